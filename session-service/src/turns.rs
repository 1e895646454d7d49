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

//! Author rotation: one offer at a time, each guarded by an acknowledgment deadline.

use std::{collections::VecDeque, future::Future, pin::Pin};

use anyhow::Context;
use promptparty_common::{ErrorCode, Phase, ServerEvent};
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::{
    AppState,
    phase,
    runtime::{PendingTurn, SessionRuntime, TurnSlot},
    scores,
};

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// `getPlayerTurn`: grants the next turn when the session sits between rounds.
pub async fn request_turn(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
) -> anyhow::Result<()> {
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
    let caller = state.hub.player_for(connection_id).await;
    if !caller.as_deref().is_some_and(|player| session.is_member(player)) {
        state
            .reply_error(connection_id, ErrorCode::NotMember, "You are not in this lobby.")
            .await;
        return Ok(());
    }

    let runtime = state.runtimes.get(lobby_id).await;
    let mut runtime = runtime.lock().await;
    if !runtime.accepts_turn_request() {
        state
            .reply_error(
                connection_id,
                ErrorCode::WrongPhase,
                format!("Cannot start a turn while the game is in {:?}.", runtime.phase),
            )
            .await;
        return Ok(());
    }
    advance_turn(state, &mut runtime, lobby_id).await
}

/// `stuck`: the host skips whatever the session is waiting on and moves to the next author.
pub async fn force_advance(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
) -> anyhow::Result<()> {
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
    let caller = state.hub.player_for(connection_id).await;
    if caller.as_deref() != Some(session.host.as_str()) {
        state
            .reply_error(connection_id, ErrorCode::NotHost, "Only the host can skip a turn.")
            .await;
        return Ok(());
    }

    let runtime = state.runtimes.get(lobby_id).await;
    let mut runtime = runtime.lock().await;
    if matches!(runtime.phase, Phase::Idle | Phase::Completed) {
        state
            .reply_error(connection_id, ErrorCode::WrongPhase, "No game is running.")
            .await;
        return Ok(());
    }
    if let Some(countdown) = runtime.countdown.take() {
        countdown.abort();
    }
    runtime.word_window_open = false;
    if let Some(pending) = runtime.pending_turn.take() {
        pending.deadline.abort();
    }
    // Orphans any image job still running for the abandoned round.
    runtime.turn_generation += 1;
    runtime.active_author = None;
    info!(lobby_id = %lobby_id, phase = ?runtime.phase, "host forced the next turn");
    advance_turn(state, &mut runtime, lobby_id).await
}

/// Offers the turn to the next reachable member, or completes the game when nobody is left.
pub(crate) async fn advance_turn(
    state: &AppState,
    runtime: &mut SessionRuntime,
    lobby_id: &str,
) -> anyhow::Result<()> {
    if runtime.rotation.is_none() {
        let rotation = snapshot_rotation(state, lobby_id).await?;
        info!(lobby_id = %lobby_id, members = rotation.len(), "turn rotation seeded");
        runtime.rotation = Some(rotation);
    }

    loop {
        let next = runtime.rotation.as_mut().and_then(VecDeque::pop_front);
        let Some(slot) = next else {
            return complete_game(state, runtime, lobby_id).await;
        };
        let slot = with_current_connection(state, slot).await?;

        runtime.turn_generation += 1;
        let delivered = state
            .hub
            .send_to(
                &slot.connection_id,
                ServerEvent::YourTurn {
                    lobby_id: lobby_id.to_string(),
                    message: "It's your turn! Please proceed.".to_string(),
                },
            )
            .await;
        if !delivered {
            info!(lobby_id = %lobby_id, player = %slot.player, "skipping unreachable member");
            continue;
        }

        let generation = runtime.turn_generation;
        info!(lobby_id = %lobby_id, player = %slot.player, generation, "turn offered");
        let deadline = schedule_deadline(state, lobby_id, generation);
        runtime.pending_turn = Some(PendingTurn {
            slot,
            generation,
            deadline,
        });
        runtime.active_author = None;
        runtime.phase = Phase::AuthoringPrompt;
        state
            .hub
            .broadcast(
                lobby_id,
                ServerEvent::RefreshStats {
                    lobby_id: lobby_id.to_string(),
                },
            )
            .await;
        return Ok(());
    }
}

/// Members in join order, addressed by the connection each one currently has in the room.
async fn snapshot_rotation(state: &AppState, lobby_id: &str) -> anyhow::Result<VecDeque<TurnSlot>> {
    let Some(session) = state
        .store
        .get_session(lobby_id)
        .await
        .context("failed to read session for rotation")?
    else {
        return Ok(VecDeque::new());
    };

    let mut rotation = VecDeque::with_capacity(session.players.len());
    for player in &session.players {
        let connection_id = state
            .store
            .get_player(player)
            .await
            .context("failed to read player record for rotation")?
            .and_then(|record| record.connection_id);
        let live = match &connection_id {
            Some(connection_id) => state.hub.in_room(lobby_id, connection_id).await,
            None => false,
        };
        match connection_id {
            Some(connection_id) if live => rotation.push_back(TurnSlot {
                player: player.clone(),
                connection_id,
            }),
            _ => warn!(lobby_id = %lobby_id, player = %player, "member has no live connection; left out of rotation"),
        }
    }
    Ok(rotation)
}

/// Re-addresses a queued slot to the connection its player registered most recently.
pub(crate) async fn with_current_connection(
    state: &AppState,
    mut slot: TurnSlot,
) -> anyhow::Result<TurnSlot> {
    let current = state
        .store
        .get_player(&slot.player)
        .await
        .context("failed to read player record for turn offer")?
        .and_then(|record| record.connection_id);
    if let Some(connection_id) = current
        && connection_id != slot.connection_id
    {
        info!(player = %slot.player, connection_id = %connection_id, "routing turn to reconnected client");
        slot.connection_id = connection_id;
    }
    Ok(slot)
}

async fn complete_game(
    state: &AppState,
    runtime: &mut SessionRuntime,
    lobby_id: &str,
) -> anyhow::Result<()> {
    runtime.rotation = None;
    runtime.pending_turn = None;
    runtime.active_author = None;
    runtime.phase = Phase::Completed;
    info!(lobby_id = %lobby_id, "rotation exhausted; game over");

    state
        .hub
        .broadcast(
            lobby_id,
            ServerEvent::GameOver {
                lobby_id: lobby_id.to_string(),
                message: "The game has ended because everyone has gone!".to_string(),
            },
        )
        .await;

    let Some(session) = state
        .store
        .get_session(lobby_id)
        .await
        .context("failed to read final scores")?
    else {
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

    if runtime.scores_folded {
        return Ok(());
    }
    match scores::fold_lifetime(state, &session).await {
        Ok(()) => runtime.scores_folded = true,
        Err(error) => {
            warn!(lobby_id = %lobby_id, error = %error, "failed to fold lifetime scores")
        }
    }
    Ok(())
}

fn schedule_deadline(state: &AppState, lobby_id: &str, generation: u64) -> AbortHandle {
    let state = state.clone();
    let lobby_id = lobby_id.to_string();
    let timeout = state.config.turn_ack_timeout;
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        expire_turn(state, lobby_id, generation).await;
    })
    .abort_handle()
}

fn expire_turn(state: AppState, lobby_id: String, generation: u64) -> TaskFuture {
    Box::pin(async move {
        let Some(runtime) = state.runtimes.existing(&lobby_id).await else {
            return;
        };
        let mut runtime = runtime.lock().await;
        let still_pending = runtime
            .pending_turn
            .as_ref()
            .is_some_and(|pending| pending.generation == generation);
        if !still_pending {
            return;
        }
        if let Some(pending) = runtime.pending_turn.take() {
            info!(lobby_id = %lobby_id, player = %pending.slot.player, "turn not acknowledged in time; forfeited");
        }
        if let Err(error) = advance_turn(&state, &mut runtime, &lobby_id).await {
            warn!(lobby_id = %lobby_id, error = %error, "failed to advance rotation after forfeit");
        }
    })
}

/// `turnReceived`: only the connection the turn was offered to can accept it.
pub async fn acknowledge_turn(
    state: &AppState,
    connection_id: &str,
    claimed_player: &str,
    lobby_id: Option<&str>,
) -> anyhow::Result<()> {
    let lobby_id = match lobby_id {
        Some(lobby_id) => Some(lobby_id.to_string()),
        None => state.runtimes.pending_for_connection(connection_id).await,
    };
    let runtime = match &lobby_id {
        Some(lobby_id) => state.runtimes.existing(lobby_id).await,
        None => None,
    };
    let (Some(lobby_id), Some(runtime)) = (lobby_id, runtime) else {
        state
            .reply_error(connection_id, ErrorCode::WrongPhase, "No turn is waiting for you.")
            .await;
        return Ok(());
    };

    let mut runtime = runtime.lock().await;
    let offered_here = runtime
        .pending_turn
        .as_ref()
        .is_some_and(|pending| pending.slot.connection_id == connection_id);
    if !offered_here {
        state
            .reply_error(connection_id, ErrorCode::WrongPhase, "No turn is waiting for you.")
            .await;
        return Ok(());
    }
    let Some(pending) = runtime.pending_turn.take() else {
        return Ok(());
    };
    pending.deadline.abort();
    if pending.slot.player != claimed_player {
        warn!(
            lobby_id = %lobby_id,
            player = %pending.slot.player,
            claimed = %claimed_player,
            "acknowledgment names a different player; using the offered identity"
        );
    }

    info!(lobby_id = %lobby_id, player = %pending.slot.player, "turn acknowledged");
    let author = pending.slot.player.clone();
    runtime.active_author = Some(pending.slot);
    state
        .hub
        .broadcast(
            &lobby_id,
            ServerEvent::PlayerGoingNow {
                player_going_now: author,
            },
        )
        .await;
    Ok(())
}

/// Rotation bookkeeping after `player` left the session.
pub async fn handle_departure(state: &AppState, lobby_id: &str, player: &str) -> anyhow::Result<()> {
    let Some(runtime) = state.runtimes.existing(lobby_id).await else {
        return Ok(());
    };
    let mut runtime = runtime.lock().await;
    runtime.remove_from_rotation(player);

    let held_offer = runtime
        .pending_turn
        .as_ref()
        .is_some_and(|pending| pending.slot.player == player);
    let authoring = runtime.phase == Phase::AuthoringPrompt && runtime.is_author(player);
    if held_offer || authoring {
        if let Some(pending) = runtime.pending_turn.take() {
            pending.deadline.abort();
        }
        runtime.active_author = None;
        info!(lobby_id = %lobby_id, player = %player, "turn holder left; forfeiting");
        return advance_turn(state, &mut runtime, lobby_id).await;
    }

    if runtime.phase == Phase::Guessing {
        if let Some(session) = state
            .store
            .get_session(lobby_id)
            .await
            .context("failed to read session after departure")?
        {
            phase::close_round_if_complete(state, &mut runtime, &session).await?;
        }
    }
    Ok(())
}
