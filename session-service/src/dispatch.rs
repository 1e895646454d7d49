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

use promptparty_common::{ClientEvent, ErrorCode, ServerEvent};
use tracing::{debug, warn};

use crate::{AppState, phase, registry, scores, turns};

pub async fn dispatch(state: &AppState, connection_id: &str, raw: &str) {
    let event = match serde_json::from_str::<ClientEvent>(raw) {
        Ok(event) => event,
        Err(error) => {
            warn!(connection_id = %connection_id, error = %error, "rejecting malformed client event");
            state
                .reply_error(connection_id, ErrorCode::InvalidEvent, format!("Malformed event: {error}"))
                .await;
            return;
        }
    };
    if let Err(message) = event.validate() {
        state
            .reply_error(connection_id, ErrorCode::InvalidEvent, format!("{}: {message}", event.name()))
            .await;
        return;
    }

    let name = event.name();
    debug!(connection_id = %connection_id, event = name, "handling client event");
    let is_leaderboard = matches!(event, ClientEvent::GetLifetimeLeaderboard { .. });
    if let Err(error) = handle_event(state, connection_id, event).await {
        warn!(connection_id = %connection_id, event = name, error = ?error, "client event failed");
        let (code, message) = if is_leaderboard {
            (ErrorCode::LeaderboardError, "Failed to load the leaderboard.".to_string())
        } else {
            (ErrorCode::StoreError, format!("{name} failed; please retry."))
        };
        state.reply_error(connection_id, code, message).await;
    }
}

async fn handle_event(state: &AppState, connection_id: &str, event: ClientEvent) -> anyhow::Result<()> {
    match event {
        ClientEvent::RegisterPlayer {
            player,
            display_name,
        } => registry::register_player(state, connection_id, &player, display_name).await,
        ClientEvent::CreateSession { player } => {
            registry::create_session(state, connection_id, &player).await
        }
        ClientEvent::JoinSession { lobby_id, player } => {
            registry::join_session(state, connection_id, &lobby_id, &player).await
        }
        ClientEvent::RemovePlayer { player, lobby_id } => {
            registry::remove_player(state, connection_id, &lobby_id, &player).await
        }
        ClientEvent::HostStartGame { lobby_id } => {
            phase::start_game(state, connection_id, &lobby_id).await
        }
        ClientEvent::SubmitWord { lobby_id, word } => {
            phase::submit_word(state, connection_id, &lobby_id, &word).await
        }
        ClientEvent::TimeForPromptCreation { lobby_id } => {
            phase::send_prompt_bank(state, connection_id, &lobby_id).await
        }
        ClientEvent::SubmitPrompt { lobby_id, prompt } => {
            phase::submit_prompt(state, connection_id, &lobby_id, prompt).await
        }
        ClientEvent::TimeForPromptGuessing { lobby_id } => {
            phase::send_guess_bank(state, connection_id, &lobby_id).await
        }
        ClientEvent::SubmitPromptGuess {
            lobby_id,
            prompt,
            player_email,
            current_player,
        } => {
            debug!(lobby_id = %lobby_id, current_player = %current_player, "guess received");
            phase::submit_guess(state, connection_id, &lobby_id, prompt, &player_email).await
        }
        ClientEvent::GetPlayerTurn { lobby_id } => {
            turns::request_turn(state, connection_id, &lobby_id).await
        }
        ClientEvent::TurnReceived { player, lobby_id } => {
            turns::acknowledge_turn(state, connection_id, &player, lobby_id.as_deref()).await
        }
        ClientEvent::Stuck { lobby_id } => {
            turns::force_advance(state, connection_id, &lobby_id).await
        }
        ClientEvent::SendFinalScores { lobby_id } => {
            phase::send_final_scores(state, connection_id, &lobby_id).await
        }
        ClientEvent::GetLifetimeLeaderboard { limit } => {
            let limit =
                scores::resolve_limit(limit.as_ref(), state.config.leaderboard_default_limit);
            let entries = scores::lifetime_leaderboard(state, limit).await?;
            state
                .hub
                .send_to(connection_id, ServerEvent::LifetimeLeaderboard { entries })
                .await;
            Ok(())
        }
        ClientEvent::SendMessage {
            username,
            lobby_id,
            message,
        } => send_chat(state, connection_id, &lobby_id, username, &message).await,
    }
}

async fn send_chat(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
    username: String,
    message: &str,
) -> anyhow::Result<()> {
    if !state.hub.in_room(lobby_id, connection_id).await {
        state
            .reply_error(connection_id, ErrorCode::NotMember, "You are not in this lobby.")
            .await;
        return Ok(());
    }
    let message = state.words.censor(message);
    state
        .hub
        .broadcast(lobby_id, ServerEvent::ChatMessage { username, message })
        .await;
    Ok(())
}
