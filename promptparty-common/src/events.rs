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

//! Real-time event schema. Every frame is `{"event": <name>, "data": {...}}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PlayerKey, Prompt, SessionCode, SessionDocument};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    RegisterPlayer {
        player: PlayerKey,
        #[serde(default)]
        display_name: Option<String>,
    },
    CreateSession {
        player: PlayerKey,
    },
    JoinSession {
        lobby_id: SessionCode,
        player: PlayerKey,
    },
    RemovePlayer {
        player: PlayerKey,
        lobby_id: SessionCode,
    },
    HostStartGame {
        lobby_id: SessionCode,
    },
    SubmitWord {
        lobby_id: SessionCode,
        word: String,
    },
    TimeForPromptCreation {
        lobby_id: SessionCode,
    },
    SubmitPrompt {
        lobby_id: SessionCode,
        prompt: Prompt,
    },
    TimeForPromptGuessing {
        lobby_id: SessionCode,
    },
    SubmitPromptGuess {
        lobby_id: SessionCode,
        prompt: Prompt,
        player_email: PlayerKey,
        current_player: PlayerKey,
    },
    GetPlayerTurn {
        lobby_id: SessionCode,
    },
    TurnReceived {
        player: PlayerKey,
        #[serde(default)]
        lobby_id: Option<SessionCode>,
    },
    Stuck {
        lobby_id: SessionCode,
    },
    SendFinalScores {
        lobby_id: SessionCode,
    },
    GetLifetimeLeaderboard {
        /// Kept loose on purpose: anything that is not a positive integer
        /// falls back to the default limit instead of failing the request.
        #[serde(default)]
        limit: Option<serde_json::Value>,
    },
    SendMessage {
        username: String,
        lobby_id: SessionCode,
        message: String,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RegisterPlayer { .. } => "registerPlayer",
            ClientEvent::CreateSession { .. } => "createSession",
            ClientEvent::JoinSession { .. } => "joinSession",
            ClientEvent::RemovePlayer { .. } => "removePlayer",
            ClientEvent::HostStartGame { .. } => "hostStartGame",
            ClientEvent::SubmitWord { .. } => "submitWord",
            ClientEvent::TimeForPromptCreation { .. } => "timeForPromptCreation",
            ClientEvent::SubmitPrompt { .. } => "submitPrompt",
            ClientEvent::TimeForPromptGuessing { .. } => "timeForPromptGuessing",
            ClientEvent::SubmitPromptGuess { .. } => "submitPromptGuess",
            ClientEvent::GetPlayerTurn { .. } => "getPlayerTurn",
            ClientEvent::TurnReceived { .. } => "turnReceived",
            ClientEvent::Stuck { .. } => "stuck",
            ClientEvent::SendFinalScores { .. } => "sendFinalScores",
            ClientEvent::GetLifetimeLeaderboard { .. } => "getLifetimeLeaderboard",
            ClientEvent::SendMessage { .. } => "sendMessage",
        }
    }

    /// Field-level checks serde cannot express (non-blank strings).
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ClientEvent::RegisterPlayer { player, .. } | ClientEvent::CreateSession { player } => {
                require("player", player)
            }
            ClientEvent::JoinSession { lobby_id, player }
            | ClientEvent::RemovePlayer { player, lobby_id } => {
                require("lobbyId", lobby_id)?;
                require("player", player)
            }
            ClientEvent::HostStartGame { lobby_id }
            | ClientEvent::TimeForPromptCreation { lobby_id }
            | ClientEvent::TimeForPromptGuessing { lobby_id }
            | ClientEvent::GetPlayerTurn { lobby_id }
            | ClientEvent::Stuck { lobby_id }
            | ClientEvent::SendFinalScores { lobby_id } => require("lobbyId", lobby_id),
            ClientEvent::SubmitWord { lobby_id, .. } => require("lobbyId", lobby_id),
            ClientEvent::SubmitPrompt { lobby_id, prompt } => {
                require("lobbyId", lobby_id)?;
                if prompt.is_blank() {
                    return Err("prompt is required".to_string());
                }
                Ok(())
            }
            ClientEvent::SubmitPromptGuess {
                lobby_id,
                player_email,
                ..
            } => {
                require("lobbyId", lobby_id)?;
                require("playerEmail", player_email)
            }
            ClientEvent::TurnReceived { player, .. } => require("player", player),
            ClientEvent::GetLifetimeLeaderboard { .. } => Ok(()),
            ClientEvent::SendMessage {
                username,
                lobby_id,
                message,
            } => {
                require("username", username)?;
                require("lobbyId", lobby_id)?;
                require("message", message)
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} is required"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinFailure {
    CapacityExceeded,
    AlreadyInProgress,
    AlreadyMember,
    NotFound,
}

impl JoinFailure {
    pub fn message(self) -> &'static str {
        match self {
            JoinFailure::CapacityExceeded => "Lobby is full!",
            JoinFailure::AlreadyInProgress => "Cannot join game in progress.",
            JoinFailure::AlreadyMember => "You are already in this lobby.",
            JoinFailure::NotFound => "Lobby does not exist.",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidEvent,
    UnknownPlayer,
    NotFound,
    NotHost,
    NotMember,
    WrongPhase,
    WordRejected,
    AlreadyGuessed,
    StoreError,
    ImageGenerationFailed,
    LeaderboardError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RankedScore {
    pub rank: u32,
    pub player: PlayerKey,
    pub score: u64,
    pub round_score: u32,
    pub prompt_guessed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub username: PlayerKey,
    pub display_name: String,
    pub lifetime_score: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Registered {
        player: PlayerKey,
    },
    LobbyCreated {
        lobby_id: SessionCode,
        message: String,
    },
    LobbyJoinedSuccess {
        lobby_id: SessionCode,
        message: String,
    },
    LobbyJoinedFail {
        lobby_id: SessionCode,
        reason: JoinFailure,
        message: String,
    },
    LeaveLobbySuccess {
        lobby_id: SessionCode,
        message: String,
    },
    LobbyClosed {
        lobby_id: SessionCode,
        message: String,
    },
    YouAreNewHost {
        lobby_id: SessionCode,
        message: String,
    },
    LobbyUpdated {
        lobby: SessionDocument,
    },
    StartGame {
        lobby_id: SessionCode,
        message: String,
    },
    BeginWordInput {
        lobby_id: SessionCode,
        message: String,
    },
    UpdateTimer {
        remaining_time: u64,
    },
    StopWordInput {
        lobby_id: SessionCode,
        message: String,
    },
    YourTurn {
        lobby_id: SessionCode,
        message: String,
    },
    PlayerGoingNow {
        player_going_now: PlayerKey,
    },
    RefreshStats {
        lobby_id: SessionCode,
    },
    SelectPrompt {
        word_bank: Vec<String>,
    },
    DisplayLoading {
        lobby_id: SessionCode,
    },
    ImageGenerated {
        prompt: String,
        image_path: String,
    },
    NewImageCreated {
        prompt: String,
        image_path: String,
        created_by: PlayerKey,
    },
    GuessPrompt {
        word_bank: Vec<String>,
    },
    AllGuessesReceivedForThisTurn {
        player_scores: Vec<RankedScore>,
        prompt_guessed: BTreeMap<PlayerKey, String>,
        original_prompt: String,
    },
    GameOver {
        lobby_id: SessionCode,
        message: String,
    },
    ReceivedFinalScores {
        final_player_scores: Vec<RankedScore>,
    },
    LifetimeLeaderboard {
        entries: Vec<LeaderboardEntry>,
    },
    ChatMessage {
        username: String,
        message: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }
}
