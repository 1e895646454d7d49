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

//! Per-session lifecycle: word collection, prompt authoring, image generation, guessing, scoring.

use std::collections::BTreeMap;

use anyhow::Context;
use chrono::Utc;
use promptparty_common::{
    ArtifactRecord, ErrorCode, Moderation, Phase, Prompt, ServerEvent, SessionDocument,
    scoring::score_guess,
};
use tokio::task::AbortHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    AppState, imaging,
    runtime::{SessionRuntime, TurnSlot},
};

/// `hostStartGame`: opens the word-collection window for a fresh game.
pub async fn start_game(state: &AppState, connection_id: &str, lobby_id: &str) -> anyhow::Result<()> {
    let Some(caller) = state.hub.player_for(connection_id).await else {
        state
            .reply_error(connection_id, ErrorCode::UnknownPlayer, "Register first.")
            .await;
        return Ok(());
    };
    let Some(session) = state
        .store
        .get_session(lobby_id)
        .await
        .context("failed to read session")?
    else {
        state
            .reply_error(connection_id, ErrorCode::NotFound, format!("Lobby {lobby_id} does not exist."))
            .await;
        return Ok(());
    };
    if session.host != caller {
        state
            .reply_error(connection_id, ErrorCode::NotHost, "Only the host can start the game.")
            .await;
        return Ok(());
    }

    let runtime = state.runtimes.get(lobby_id).await;
    let mut runtime = runtime.lock().await;
    if !matches!(runtime.phase, Phase::Idle | Phase::Completed) {
        state
            .reply_error(connection_id, ErrorCode::WrongPhase, "A game is already running.")
            .await;
        return Ok(());
    }
    if state
        .store
        .begin_game(lobby_id)
        .await
        .context("failed to mark session in progress")?
        .is_none()
    {
        state
            .reply_error(connection_id, ErrorCode::NotFound, format!("Lobby {lobby_id} does not exist."))
            .await;
        return Ok(());
    }

    runtime.reset_for_new_game();
    runtime.phase = Phase::WordCollection;
    runtime.word_window_open = true;
    info!(lobby_id = %lobby_id, host = %caller, members = session.players.len(), "game started");

    state
        .hub
        .broadcast(
            lobby_id,
            ServerEvent::StartGame {
                lobby_id: lobby_id.to_string(),
                message: "Host has started the game.".to_string(),
            },
        )
        .await;
    state
        .hub
        .broadcast(
            lobby_id,
            ServerEvent::BeginWordInput {
                lobby_id: lobby_id.to_string(),
                message: "It is time for inputting words into the word bank.".to_string(),
            },
        )
        .await;
    runtime.countdown = Some(spawn_countdown(state, lobby_id, runtime.game_generation));
    Ok(())
}

fn spawn_countdown(state: &AppState, lobby_id: &str, generation: u64) -> AbortHandle {
    let state = state.clone();
    let lobby_id = lobby_id.to_string();
    tokio::spawn(async move {
        for remaining_time in (1..=state.config.word_collection_ticks).rev() {
            state
                .hub
                .broadcast(&lobby_id, ServerEvent::UpdateTimer { remaining_time })
                .await;
            tokio::time::sleep(state.config.tick).await;
        }
        close_word_window(&state, &lobby_id, generation).await;
    })
    .abort_handle()
}

async fn close_word_window(state: &AppState, lobby_id: &str, generation: u64) {
    let Some(runtime) = state.runtimes.existing(lobby_id).await else {
        return;
    };
    let mut runtime = runtime.lock().await;
    if runtime.game_generation != generation || !runtime.word_window_open {
        return;
    }
    runtime.word_window_open = false;
    runtime.countdown = None;
    info!(lobby_id = %lobby_id, "word collection closed");
    state
        .hub
        .broadcast(
            lobby_id,
            ServerEvent::StopWordInput {
                lobby_id: lobby_id.to_string(),
                message: "The time to enter words has elapsed.".to_string(),
            },
        )
        .await;
}

/// Membership check shared by the in-game events. Replies to the caller and returns `None` on failure.
async fn resolve_member(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
) -> anyhow::Result<Option<(String, SessionDocument)>> {
    let Some(session) = state
        .store
        .get_session(lobby_id)
        .await
        .context("failed to read session")?
    else {
        state
            .reply_error(connection_id, ErrorCode::NotFound, format!("Lobby {lobby_id} does not exist."))
            .await;
        return Ok(None);
    };
    match state.hub.player_for(connection_id).await {
        Some(player) if session.is_member(&player) => Ok(Some((player, session))),
        _ => {
            state
                .reply_error(connection_id, ErrorCode::NotMember, "You are not in this lobby.")
                .await;
            Ok(None)
        }
    }
}

pub async fn submit_word(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
    raw: &str,
) -> anyhow::Result<()> {
    let Some((player, _)) = resolve_member(state, connection_id, lobby_id).await? else {
        return Ok(());
    };
    let window_open = match state.runtimes.existing(lobby_id).await {
        Some(runtime) => runtime.lock().await.word_window_open,
        None => false,
    };
    if !window_open {
        state
            .reply_error(connection_id, ErrorCode::WrongPhase, "The time to enter words has elapsed.")
            .await;
        return Ok(());
    }

    let moderated = state.words.moderate(raw);
    match &moderated {
        Moderation::Rejected => {
            info!(lobby_id = %lobby_id, player = %player, "word rejected by moderation");
            state
                .reply_error(
                    connection_id,
                    ErrorCode::WordRejected,
                    format!("Word rejected: {}", moderated.as_word()),
                )
                .await;
        }
        Moderation::Accepted(word) => {
            state
                .store
                .add_words(lobby_id, std::slice::from_ref(word))
                .await
                .context("failed to add word to pool")?;
            info!(lobby_id = %lobby_id, player = %player, word = %word, "word added to pool");
        }
    }
    Ok(())
}

async fn word_pool(state: &AppState, lobby_id: &str) -> anyhow::Result<Vec<String>> {
    let mut pool = state
        .store
        .get_session(lobby_id)
        .await
        .context("failed to read word pool")?
        .map(|session| session.word_bank)
        .unwrap_or_default();
    let mut seen = std::collections::HashSet::new();
    pool.retain(|word| seen.insert(word.clone()));
    Ok(pool)
}

/// `timeForPromptCreation`: the author's private copy of the pool.
pub async fn send_prompt_bank(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
) -> anyhow::Result<()> {
    let word_bank = word_pool(state, lobby_id).await?;
    state
        .hub
        .send_to(connection_id, ServerEvent::SelectPrompt { word_bank })
        .await;
    Ok(())
}

/// `timeForPromptGuessing`: the guesser's private copy of the pool.
pub async fn send_guess_bank(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
) -> anyhow::Result<()> {
    let word_bank = word_pool(state, lobby_id).await?;
    state
        .hub
        .send_to(connection_id, ServerEvent::GuessPrompt { word_bank })
        .await;
    Ok(())
}

pub async fn submit_prompt(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
    prompt: Prompt,
) -> anyhow::Result<()> {
    let caller = state.hub.player_for(connection_id).await;
    let runtime = state.runtimes.existing(lobby_id).await;
    let (Some(caller), Some(runtime)) = (caller, runtime) else {
        state
            .reply_error(connection_id, ErrorCode::WrongPhase, "It is not your turn to write a prompt.")
            .await;
        return Ok(());
    };

    let mut runtime = runtime.lock().await;
    let author = match &runtime.active_author {
        Some(slot) if runtime.phase == Phase::AuthoringPrompt && slot.player == caller => slot.clone(),
        _ => {
            state
                .reply_error(connection_id, ErrorCode::WrongPhase, "It is not your turn to write a prompt.")
                .await;
            return Ok(());
        }
    };

    state
        .store
        .set_key_prompt(lobby_id, &prompt)
        .await
        .context("failed to store key prompt")?;
    runtime.begin_round();
    runtime.phase = Phase::GeneratingImage;
    let text = prompt.display_text();
    info!(lobby_id = %lobby_id, player = %author.player, prompt = %text, "prompt submitted");

    state
        .hub
        .broadcast(
            lobby_id,
            ServerEvent::DisplayLoading {
                lobby_id: lobby_id.to_string(),
            },
        )
        .await;
    tokio::spawn(run_image_job(
        state.clone(),
        lobby_id.to_string(),
        author,
        text,
        runtime.turn_generation,
    ));
    Ok(())
}

/// Renders the prompt off the session lock, then publishes the artifact if the round is still current.
async fn run_image_job(
    state: AppState,
    lobby_id: String,
    author: TurnSlot,
    prompt: String,
    generation: u64,
) {
    let generated = state.images.generate(&prompt).await;

    let Some(runtime) = state.runtimes.existing(&lobby_id).await else {
        return;
    };
    let mut runtime = runtime.lock().await;
    if runtime.turn_generation != generation || runtime.phase != Phase::GeneratingImage {
        info!(lobby_id = %lobby_id, "discarding image for an abandoned round");
        return;
    }

    let image_path = match generated {
        Ok(image_path) => image_path,
        Err(error) => {
            warn!(lobby_id = %lobby_id, player = %author.player, error = %error, "image generation failed; round stalled");
            notify_host(
                &state,
                &lobby_id,
                ErrorCode::ImageGenerationFailed,
                "Image generation failed. Use stuck to skip this turn.",
            )
            .await;
            return;
        }
    };

    let artifact = ArtifactRecord {
        artifact_id: Uuid::new_v4().to_string(),
        lobby_id: lobby_id.clone(),
        prompt: prompt.clone(),
        image_path: image_path.clone(),
        created_by: author.player.clone(),
        created_at: Utc::now(),
    };
    if let Err(error) = state.store.put_artifact(&artifact).await {
        warn!(lobby_id = %lobby_id, error = %error, "failed to record generated image");
        notify_host(&state, &lobby_id, ErrorCode::StoreError, "Failed to save the generated image.").await;
        return;
    }

    let url = imaging::public_url(&state.config.image.public_base_url, &image_path);
    info!(lobby_id = %lobby_id, player = %author.player, image_path = %image_path, "image ready; guessing open");
    let author_connection = match crate::turns::with_current_connection(&state, author.clone()).await {
        Ok(slot) => slot.connection_id,
        Err(error) => {
            warn!(lobby_id = %lobby_id, error = %error, "failed to refresh author connection");
            author.connection_id.clone()
        }
    };
    state
        .hub
        .send_to(
            &author_connection,
            ServerEvent::ImageGenerated {
                prompt: prompt.clone(),
                image_path: url.clone(),
            },
        )
        .await;
    state
        .hub
        .broadcast(
            &lobby_id,
            ServerEvent::NewImageCreated {
                prompt,
                image_path: url,
                created_by: author.player,
            },
        )
        .await;
    runtime.phase = Phase::Guessing;
}

async fn notify_host(state: &AppState, lobby_id: &str, code: ErrorCode, message: &str) {
    let host_connection = match state.store.get_session(lobby_id).await {
        Ok(Some(session)) => match state.store.get_player(&session.host).await {
            Ok(record) => record.and_then(|record| record.connection_id),
            Err(error) => {
                warn!(lobby_id = %lobby_id, error = %error, "failed to read host record");
                None
            }
        },
        Ok(None) => None,
        Err(error) => {
            warn!(lobby_id = %lobby_id, error = %error, "failed to read session");
            None
        }
    };
    if let Some(connection_id) = host_connection {
        state.reply_error(&connection_id, code, message).await;
    }
}

/// `submitPromptGuess`: scores one guess and closes the round once every member has guessed.
pub async fn submit_guess(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
    guess: Prompt,
    player_email: &str,
) -> anyhow::Result<()> {
    let Some((player, session)) = resolve_member(state, connection_id, lobby_id).await? else {
        return Ok(());
    };
    if player != player_email {
        warn!(lobby_id = %lobby_id, player = %player, claimed = %player_email, "guess names a different player; using the connection identity");
    }

    let runtime = state.runtimes.get(lobby_id).await;
    let mut runtime = runtime.lock().await;
    let key = match &session.current_prompt_being_guessed {
        Some(key) if runtime.phase == Phase::Guessing => key.clone(),
        _ => {
            state
                .reply_error(connection_id, ErrorCode::WrongPhase, "Guessing is not open.")
                .await;
            return Ok(());
        }
    };
    if runtime.guessed.contains(&player) {
        state
            .reply_error(connection_id, ErrorCode::AlreadyGuessed, "You already guessed this round.")
            .await;
        return Ok(());
    }

    let is_self_guess = runtime.is_author(&player);
    let points = score_guess(&key, &guess, is_self_guess);
    let Some(updated) = state
        .store
        .record_guess(lobby_id, &player, &guess.display_text(), points)
        .await
        .context("failed to record guess")?
    else {
        state
            .reply_error(connection_id, ErrorCode::NotMember, "You are not in this lobby.")
            .await;
        return Ok(());
    };
    runtime.guessed.insert(player.clone());
    info!(
        lobby_id = %lobby_id,
        player = %player,
        points,
        self_guess = is_self_guess,
        received = updated.number_of_guesses_received,
        "guess scored"
    );
    close_round_if_complete(state, &mut runtime, &updated).await
}

/// Publishes round results once every current member has guessed. Fires at most once per round.
///
/// Guesses from members who have since left stay in the store counter, so completion is
/// decided from this round's guessers instead.
pub(crate) async fn close_round_if_complete(
    state: &AppState,
    runtime: &mut SessionRuntime,
    session: &SessionDocument,
) -> anyhow::Result<()> {
    let everyone_guessed = !session.players.is_empty()
        && session
            .players
            .iter()
            .all(|player| runtime.guessed.contains(player));
    if runtime.phase != Phase::Guessing || runtime.round_closed || !everyone_guessed {
        return Ok(());
    }
    runtime.round_closed = true;

    let prompt_guessed: BTreeMap<String, String> = session
        .players
        .iter()
        .filter_map(|player| {
            session
                .player_scores
                .get(player)
                .filter(|entry| !entry.prompt_guessed.is_empty())
                .map(|entry| (player.clone(), entry.prompt_guessed.clone()))
        })
        .collect();
    let original_prompt = session
        .current_prompt_being_guessed
        .as_ref()
        .map(Prompt::display_text)
        .unwrap_or_default();
    info!(lobby_id = %session.lobby_id, guesses = session.number_of_guesses_received, "round complete");

    state
        .hub
        .broadcast(
            &session.lobby_id,
            ServerEvent::AllGuessesReceivedForThisTurn {
                player_scores: session.ranked_scores(),
                prompt_guessed,
                original_prompt,
            },
        )
        .await;

    runtime.phase = Phase::RoundScoring;
    runtime.active_author = None;
    runtime.guessed.clear();
    state
        .store
        .reset_round(&session.lobby_id)
        .await
        .context("failed to reset round state")
}

pub async fn send_final_scores(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
) -> anyhow::Result<()> {
    let Some((_, session)) = resolve_member(state, connection_id, lobby_id).await? else {
        return Ok(());
    };
    state
        .hub
        .broadcast(
            lobby_id,
            ServerEvent::ReceivedFinalScores {
                final_player_scores: session.ranked_scores(),
            },
        )
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FailingImageGenerator, app_state, app_state_with_fake_images, lobby_with_members,
    };
    use std::sync::Arc;

    async fn wait_window_closed(clients: &mut crate::test_support::TestClient) {
        assert!(
            clients
                .wait_for(|event| matches!(event, ServerEvent::StopWordInput { .. }))
                .await
                .is_some()
        );
    }

    /// Starts the game and hands the first turn to `p0`, acknowledged.
    async fn first_author_ready(state: &AppState, clients: &mut [crate::test_support::TestClient], lobby_id: &str) {
        let host = clients[0].connection_id.clone();
        start_game(state, &host, lobby_id).await.unwrap();
        wait_window_closed(&mut clients[0]).await;
        crate::turns::request_turn(state, &host, lobby_id).await.unwrap();
        crate::turns::acknowledge_turn(state, &host, "p0@example.com", Some(lobby_id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn only_host_starts_the_game() {
        let state = app_state_with_fake_images();
        let (lobby_id, mut clients) = lobby_with_members(&state, 2).await;
        let guest = clients[1].connection_id.clone();

        start_game(&state, &guest, &lobby_id).await.unwrap();
        assert!(
            clients[1]
                .wait_for(|event| matches!(
                    event,
                    ServerEvent::Error {
                        code: ErrorCode::NotHost,
                        ..
                    }
                ))
                .await
                .is_some()
        );
        let session = state.store.get_session(&lobby_id).await.unwrap().unwrap();
        assert!(!session.in_progress);
    }

    #[tokio::test]
    async fn countdown_ticks_down_and_closes_the_window() {
        let state = app_state_with_fake_images();
        let (lobby_id, mut clients) = lobby_with_members(&state, 2).await;
        let host = clients[0].connection_id.clone();

        start_game(&state, &host, &lobby_id).await.unwrap();
        let session = state.store.get_session(&lobby_id).await.unwrap().unwrap();
        assert!(session.in_progress);

        let mut ticks = Vec::new();
        loop {
            match clients[1].next().await {
                ServerEvent::UpdateTimer { remaining_time } => ticks.push(remaining_time),
                ServerEvent::StopWordInput { .. } => break,
                _ => {}
            }
        }
        let expected: Vec<u64> = (1..=state.config.word_collection_ticks).rev().collect();
        assert_eq!(ticks, expected);

        let runtime = state.runtimes.get(&lobby_id).await;
        let runtime = runtime.lock().await;
        assert!(!runtime.word_window_open);
        assert!(runtime.accepts_turn_request());
    }

    #[tokio::test]
    async fn words_are_moderated_and_only_accepted_while_window_open() {
        let state = app_state_with_fake_images();
        let (lobby_id, mut clients) = lobby_with_members(&state, 2).await;
        let host = clients[0].connection_id.clone();
        let guest = clients[1].connection_id.clone();
        start_game(&state, &host, &lobby_id).await.unwrap();

        submit_word(&state, &guest, &lobby_id, "  Zeppelin!! extra").await.unwrap();
        submit_word(&state, &host, &lobby_id, "zeppelin").await.unwrap();
        submit_word(&state, &host, &lobby_id, "Zeppelin").await.unwrap();
        submit_word(&state, &guest, &lobby_id, "12345").await.unwrap();
        let rejection = clients[1]
            .wait_for(|event| matches!(
                event,
                ServerEvent::Error {
                    code: ErrorCode::WordRejected,
                    ..
                }
            ))
            .await;
        assert_eq!(
            rejection,
            Some(ServerEvent::error(ErrorCode::WordRejected, "Word rejected: ****"))
        );

        wait_window_closed(&mut clients[0]).await;
        submit_word(&state, &guest, &lobby_id, "late").await.unwrap();
        assert!(
            clients[1]
                .wait_for(|event| matches!(
                    event,
                    ServerEvent::Error {
                        code: ErrorCode::WrongPhase,
                        ..
                    }
                ))
                .await
                .is_some()
        );

        let session = state.store.get_session(&lobby_id).await.unwrap().unwrap();
        let count = |word: &str| session.word_bank.iter().filter(|w| w.as_str() == word).count();
        assert_eq!(count("Zeppelin"), 1);
        assert_eq!(count("zeppelin"), 1);
        assert_eq!(count("late"), 0);
    }

    #[tokio::test]
    async fn prompt_from_non_author_is_refused() {
        let state = app_state_with_fake_images();
        let (lobby_id, mut clients) = lobby_with_members(&state, 2).await;
        first_author_ready(&state, &mut clients, &lobby_id).await;

        let guest = clients[1].connection_id.clone();
        submit_prompt(&state, &guest, &lobby_id, Prompt::Text("red dragon".into()))
            .await
            .unwrap();
        assert!(
            clients[1]
                .wait_for(|event| matches!(
                    event,
                    ServerEvent::Error {
                        code: ErrorCode::WrongPhase,
                        ..
                    }
                ))
                .await
                .is_some()
        );
        let session = state.store.get_session(&lobby_id).await.unwrap().unwrap();
        assert!(session.current_prompt_being_guessed.is_none());
    }

    #[tokio::test]
    async fn round_closes_once_every_member_guessed() {
        let state = app_state_with_fake_images();
        let (lobby_id, mut clients) = lobby_with_members(&state, 2).await;
        first_author_ready(&state, &mut clients, &lobby_id).await;
        let host = clients[0].connection_id.clone();
        let guest = clients[1].connection_id.clone();

        submit_prompt(&state, &host, &lobby_id, Prompt::Text("red dragon".into()))
            .await
            .unwrap();
        let created = clients[1]
            .wait_for(|event| matches!(event, ServerEvent::NewImageCreated { .. }))
            .await;
        assert!(matches!(
            created,
            Some(ServerEvent::NewImageCreated { ref created_by, ref image_path, .. })
                if created_by == "p0@example.com" && image_path.ends_with("/generated-images/test.png")
        ));
        assert_eq!(state.store.artifacts_for(&lobby_id).await.unwrap().len(), 1);

        submit_guess(&state, &guest, &lobby_id, Prompt::Text("blue dragon".into()), "p1@example.com")
            .await
            .unwrap();
        submit_guess(&state, &guest, &lobby_id, Prompt::Text("red dragon".into()), "p1@example.com")
            .await
            .unwrap();
        assert!(
            clients[1]
                .wait_for(|event| matches!(
                    event,
                    ServerEvent::Error {
                        code: ErrorCode::AlreadyGuessed,
                        ..
                    }
                ))
                .await
                .is_some()
        );

        submit_guess(&state, &host, &lobby_id, Prompt::Text("red dragon".into()), "p0@example.com")
            .await
            .unwrap();
        let result = clients[1]
            .wait_for(|event| matches!(event, ServerEvent::AllGuessesReceivedForThisTurn { .. }))
            .await;
        let Some(ServerEvent::AllGuessesReceivedForThisTurn {
            player_scores,
            prompt_guessed,
            original_prompt,
        }) = result
        else {
            panic!("round result not broadcast");
        };
        assert_eq!(original_prompt, "red dragon");
        assert_eq!(player_scores[0].player, "p1@example.com");
        assert_eq!(player_scores[0].score, 125);
        assert_eq!(player_scores[1].player, "p0@example.com");
        assert_eq!(player_scores[1].score, 100);
        assert_eq!(prompt_guessed["p1@example.com"], "blue dragon");

        let session = state.store.get_session(&lobby_id).await.unwrap().unwrap();
        assert_eq!(session.number_of_guesses_received, 0);
        assert_eq!(session.player_scores["p1@example.com"].score, 125);
        let runtime = state.runtimes.get(&lobby_id).await;
        let runtime = runtime.lock().await;
        assert_eq!(runtime.phase, Phase::RoundScoring);
        assert!(runtime.accepts_turn_request());
    }

    #[tokio::test]
    async fn guess_from_departed_member_does_not_close_round_early() {
        let state = app_state_with_fake_images();
        let (lobby_id, mut clients) = lobby_with_members(&state, 3).await;
        first_author_ready(&state, &mut clients, &lobby_id).await;
        let host = clients[0].connection_id.clone();
        let leaver = clients[1].connection_id.clone();
        let stayer = clients[2].connection_id.clone();

        submit_prompt(&state, &host, &lobby_id, Prompt::Text("red dragon".into()))
            .await
            .unwrap();
        assert!(
            clients[2]
                .wait_for(|event| matches!(event, ServerEvent::NewImageCreated { .. }))
                .await
                .is_some()
        );

        submit_guess(&state, &leaver, &lobby_id, Prompt::Text("red dragon".into()), "p1@example.com")
            .await
            .unwrap();
        crate::registry::leave_session(&state, &lobby_id, "p1@example.com")
            .await
            .unwrap();
        submit_guess(&state, &stayer, &lobby_id, Prompt::Text("blue dragon".into()), "p2@example.com")
            .await
            .unwrap();

        assert!(
            clients[2]
                .collect_for(std::time::Duration::from_millis(30))
                .await
                .iter()
                .all(|event| !matches!(event, ServerEvent::AllGuessesReceivedForThisTurn { .. }))
        );
        let runtime = state.runtimes.get(&lobby_id).await;
        assert_eq!(runtime.lock().await.phase, Phase::Guessing);

        submit_guess(&state, &host, &lobby_id, Prompt::Text("red dragon".into()), "p0@example.com")
            .await
            .unwrap();
        let result = clients[2]
            .wait_for(|event| matches!(event, ServerEvent::AllGuessesReceivedForThisTurn { .. }))
            .await;
        let Some(ServerEvent::AllGuessesReceivedForThisTurn {
            player_scores,
            prompt_guessed,
            ..
        }) = result
        else {
            panic!("round result not broadcast");
        };
        assert_eq!(player_scores.len(), 2);
        assert!(!prompt_guessed.contains_key("p1@example.com"));
        assert_eq!(runtime.lock().await.phase, Phase::RoundScoring);
    }

    #[tokio::test]
    async fn failed_image_stalls_round_and_tells_host() {
        let state = app_state(Arc::new(FailingImageGenerator));
        let (lobby_id, mut clients) = lobby_with_members(&state, 2).await;
        first_author_ready(&state, &mut clients, &lobby_id).await;
        let host = clients[0].connection_id.clone();

        submit_prompt(&state, &host, &lobby_id, Prompt::Text("red dragon".into()))
            .await
            .unwrap();
        assert!(
            clients[0]
                .wait_for(|event| matches!(
                    event,
                    ServerEvent::Error {
                        code: ErrorCode::ImageGenerationFailed,
                        ..
                    }
                ))
                .await
                .is_some()
        );
        let runtime = state.runtimes.get(&lobby_id).await;
        assert_eq!(runtime.lock().await.phase, Phase::GeneratingImage);
        assert!(state.store.artifacts_for(&lobby_id).await.unwrap().is_empty());

        crate::turns::force_advance(&state, &host, &lobby_id).await.unwrap();
        assert!(
            clients[1]
                .wait_for(|event| matches!(event, ServerEvent::YourTurn { .. }))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn word_banks_are_sent_privately() {
        let state = app_state_with_fake_images();
        let (lobby_id, mut clients) = lobby_with_members(&state, 2).await;
        let host = clients[0].connection_id.clone();

        send_prompt_bank(&state, &host, &lobby_id).await.unwrap();
        let bank = clients[0]
            .wait_for(|event| matches!(event, ServerEvent::SelectPrompt { .. }))
            .await;
        assert!(matches!(bank, Some(ServerEvent::SelectPrompt { word_bank }) if !word_bank.is_empty()));

        send_guess_bank(&state, &host, "NOPE00").await.unwrap();
        let bank = clients[0]
            .wait_for(|event| matches!(event, ServerEvent::GuessPrompt { .. }))
            .await;
        assert!(matches!(bank, Some(ServerEvent::GuessPrompt { word_bank }) if word_bank.is_empty()));
        assert!(
            clients[1]
                .collect_for(std::time::Duration::from_millis(20))
                .await
                .iter()
                .all(|event| !matches!(event, ServerEvent::SelectPrompt { .. } | ServerEvent::GuessPrompt { .. }))
        );
    }
}
