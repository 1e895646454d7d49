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

use std::collections::BTreeMap;

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

/// Sentinel handed back for words that may not enter a word pool.
pub const REJECTED_WORD: &str = "****";

/// Always present in every session's pool so short games still have glue words.
pub const BASELINE_WORDS: [&str; 18] = [
    "the",
    "in",
    "around",
    "a",
    "for",
    "at",
    "4K",
    "black-and-white",
    "comicbook-style",
    "photograph",
    "realistic",
    "surreal",
    "minimalist",
    "and",
    "fighting",
    "hugging",
    "running",
    "jumping",
];

pub const THEMED_WORDS: [(&str, [&str; 10]); 6] = [
    (
        "medieval",
        [
            "castle", "knight", "sword", "dragon", "kingdom", "wizard", "armor", "siege", "torch",
            "scroll",
        ],
    ),
    (
        "scienceFiction",
        [
            "spaceship", "laser", "robot", "planet", "AI", "cyborg", "quantum", "alien", "galaxy",
            "clone",
        ],
    ),
    (
        "spooky",
        [
            "ghost", "haunted", "midnight", "fog", "cemetery", "scream", "cursed", "witch",
            "coffin", "shadow",
        ],
    ),
    (
        "vacation",
        [
            "beach",
            "island",
            "surfboard",
            "passport",
            "sunburn",
            "suitcase",
            "cocktail",
            "snorkel",
            "flight",
            "hotel",
        ],
    ),
    (
        "animals",
        [
            "lion", "penguin", "koala", "giraffe", "dolphin", "eagle", "snake", "panda", "tiger",
            "kangaroo",
        ],
    ),
    (
        "nature",
        [
            "mountain", "river", "tree", "meadow", "sunrise", "rainfall", "valley", "canyon",
            "cloud", "lake",
        ],
    ),
];

const DEFAULT_BLOCKLIST: [&str; 10] = [
    "fuck", "shit", "bitch", "bastard", "asshole", "cunt", "dick", "piss", "crap", "damn",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Moderation {
    Accepted(String),
    Rejected,
}

impl Moderation {
    /// The accepted word, or [`REJECTED_WORD`].
    pub fn as_word(&self) -> &str {
        match self {
            Moderation::Accepted(word) => word,
            Moderation::Rejected => REJECTED_WORD,
        }
    }
}

/// Vocabulary source and moderation rules. Deserializable so a YAML file can
/// override any part of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WordBank {
    pub baseline: Vec<String>,
    pub themes: BTreeMap<String, Vec<String>>,
    pub blocklist: Vec<String>,
}

impl Default for WordBank {
    fn default() -> Self {
        Self {
            baseline: BASELINE_WORDS.iter().map(|word| word.to_string()).collect(),
            themes: THEMED_WORDS
                .iter()
                .map(|(theme, words)| {
                    (
                        theme.to_string(),
                        words.iter().map(|word| word.to_string()).collect(),
                    )
                })
                .collect(),
            blocklist: DEFAULT_BLOCKLIST
                .iter()
                .map(|word| word.to_string())
                .collect(),
        }
    }
}

impl WordBank {
    /// Baseline words followed by one randomly chosen theme. Returns the theme
    /// name alongside the pool (`None` when no themes are configured).
    pub fn seed_pool<R: Rng + ?Sized>(&self, rng: &mut R) -> (Option<String>, Vec<String>) {
        let mut pool: Vec<String> = Vec::with_capacity(self.baseline.len() + 10);
        for word in &self.baseline {
            if !pool.contains(word) {
                pool.push(word.clone());
            }
        }

        let names: Vec<&String> = self.themes.keys().collect();
        let Some(theme) = names.choose(rng) else {
            return (None, pool);
        };
        for word in &self.themes[theme.as_str()] {
            if !pool.contains(word) {
                pool.push(word.clone());
            }
        }
        (Some(theme.to_string()), pool)
    }

    /// Keeps the first token of `raw`, strips everything but ASCII letters and
    /// rejects empty or blocklisted results.
    pub fn moderate(&self, raw: &str) -> Moderation {
        let first = raw.split_whitespace().next().unwrap_or_default();
        let word: String = first.chars().filter(char::is_ascii_alphabetic).collect();

        if word.is_empty() || self.is_blocked(&word) {
            return Moderation::Rejected;
        }
        Moderation::Accepted(word)
    }

    /// Masks blocklisted words in free text, leaving everything else untouched.
    pub fn censor(&self, message: &str) -> String {
        message
            .split(' ')
            .map(|token| {
                let letters: String = token.chars().filter(char::is_ascii_alphabetic).collect();
                if !letters.is_empty() && self.is_blocked(&letters) {
                    REJECTED_WORD
                } else {
                    token
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn is_blocked(&self, word: &str) -> bool {
        self.blocklist
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(word))
    }
}
