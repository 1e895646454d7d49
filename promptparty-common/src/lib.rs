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

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod events;
pub mod scoring;
pub mod words;

pub use events::{ClientEvent, ErrorCode, JoinFailure, LeaderboardEntry, RankedScore, ServerEvent};
pub use scoring::{score_guess, tokenize};
pub use words::{Moderation, REJECTED_WORD, WordBank};

pub const MAX_SESSION_MEMBERS: usize = 4;
pub const SESSION_CODE_LENGTH: usize = 6;
pub const DEFAULT_WORD_COLLECTION_SECONDS: u64 = 30;
pub const DEFAULT_TURN_ACK_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_IMAGE_TIMEOUT_SECONDS: u64 = 120;
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Stable per-player account key (the e-mail the client signs in with).
pub type PlayerKey = String;
/// Transient id of one live socket. Routing only, never a game-logic key.
pub type ConnectionId = String;
pub type SessionCode = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    WordCollection,
    AuthoringPrompt,
    GeneratingImage,
    Guessing,
    RoundScoring,
    Completed,
}

/// A prompt as it travels over the wire: either the words picked from the pool
/// or free text typed by the player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Prompt {
    Words(Vec<String>),
    Text(String),
}

impl Prompt {
    pub fn display_text(&self) -> String {
        match self {
            Prompt::Words(words) => words.join(" "),
            Prompt::Text(text) => text.clone(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Prompt::Words(words) => words.iter().all(|word| word.trim().is_empty()),
            Prompt::Text(text) => text.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerScore {
    /// Accumulated over every round of the current game.
    pub score: u64,
    /// Score of the most recent guess in the current round.
    pub round_score: u32,
    pub prompt_guessed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub lobby_id: SessionCode,
    pub host: PlayerKey,
    /// Members in join order.
    pub players: Vec<PlayerKey>,
    pub in_progress: bool,
    pub word_bank: Vec<String>,
    #[serde(default)]
    pub current_prompt_being_guessed: Option<Prompt>,
    #[serde(default)]
    pub player_scores: BTreeMap<PlayerKey, PlayerScore>,
    pub number_of_guesses_received: u32,
    pub created_at: DateTime<Utc>,
}

impl SessionDocument {
    pub fn new(lobby_id: SessionCode, host: PlayerKey, word_bank: Vec<String>) -> Self {
        Self {
            lobby_id,
            players: vec![host.clone()],
            host,
            in_progress: false,
            word_bank,
            current_prompt_being_guessed: None,
            player_scores: BTreeMap::new(),
            number_of_guesses_received: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, player: &str) -> bool {
        self.players.iter().any(|member| member == player)
    }

    /// Current members ranked by session score, highest first. Ties keep join order.
    pub fn ranked_scores(&self) -> Vec<RankedScore> {
        let mut entries: Vec<(&PlayerKey, PlayerScore)> = self
            .players
            .iter()
            .map(|player| {
                (
                    player,
                    self.player_scores.get(player).cloned().unwrap_or_default(),
                )
            })
            .collect();
        entries.sort_by(|a, b| b.1.score.cmp(&a.1.score));

        entries
            .into_iter()
            .enumerate()
            .map(|(index, (player, entry))| RankedScore {
                rank: index as u32 + 1,
                player: player.clone(),
                score: entry.score,
                round_score: entry.round_score,
                prompt_guessed: entry.prompt_guessed,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub player: PlayerKey,
    pub display_name: String,
    pub lifetime_score: u64,
    #[serde(default)]
    pub connection_id: Option<ConnectionId>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl PlayerRecord {
    pub fn new(player: PlayerKey, display_name: Option<String>) -> Self {
        let display_name = display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| player.clone());
        Self {
            player,
            display_name,
            lifetime_score: 0,
            connection_id: None,
            last_updated: None,
        }
    }
}

/// One generated image, kept under its session until the session is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub lobby_id: SessionCode,
    pub prompt: String,
    pub image_path: String,
    pub created_by: PlayerKey,
    pub created_at: DateTime<Utc>,
}

/// Short, shareable, upper-case alphanumeric session code.
pub fn generate_session_code<R: Rng + ?Sized>(rng: &mut R) -> SessionCode {
    (0..SESSION_CODE_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..SESSION_CODE_ALPHABET.len());
            SESSION_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}
