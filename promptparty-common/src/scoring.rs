// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Lexical-overlap scoring of a guess against the key prompt.

use crate::Prompt;

pub const CONTENT_MATCH_POINTS: i64 = 100;
pub const POSITION_MATCH_POINTS: i64 = 50;
pub const UNMATCHED_WORD_PENALTY: i64 = 25;
pub const SELF_GUESS_DIVISOR: i64 = 3;

/// Lower-cases a prompt into words. Text is split on single spaces; a word list
/// is taken as-is.
pub fn tokenize(prompt: &Prompt) -> Vec<String> {
    match prompt {
        Prompt::Words(words) => words.iter().map(|word| word.to_lowercase()).collect(),
        Prompt::Text(text) => text.to_lowercase().split(' ').map(str::to_string).collect(),
    }
}

/// Scores `guess` against `key`.
///
/// 1. Each guess word claims the first unclaimed equal key word: +100.
/// 2. Each index where guess and key agree position-for-position: +50.
/// 3. Each guess word left unclaimed by step 1: -25.
/// 4. Guessing your own prompt divides the total by 3, rounded up.
/// 5. Never below zero.
pub fn score_guess(key: &Prompt, guess: &Prompt, is_self_guess: bool) -> u32 {
    let key_words = tokenize(key);
    let guess_words = tokenize(guess);

    let mut score: i64 = 0;
    let mut key_claimed = vec![false; key_words.len()];
    let mut unmatched_guess_words: i64 = 0;

    for guess_word in &guess_words {
        let claim =
            (0..key_words.len()).find(|&idx| !key_claimed[idx] && key_words[idx] == *guess_word);
        match claim {
            Some(idx) => {
                key_claimed[idx] = true;
                score += CONTENT_MATCH_POINTS;
            }
            None => unmatched_guess_words += 1,
        }
    }

    score += guess_words
        .iter()
        .zip(key_words.iter())
        .filter(|(guess_word, key_word)| guess_word == key_word)
        .count() as i64
        * POSITION_MATCH_POINTS;

    score -= unmatched_guess_words * UNMATCHED_WORD_PENALTY;

    if is_self_guess {
        score = ceil_div(score, SELF_GUESS_DIVISOR);
    }

    score.max(0) as u32
}

fn ceil_div(value: i64, divisor: i64) -> i64 {
    if value > 0 {
        (value + divisor - 1) / divisor
    } else {
        value / divisor
    }
}
