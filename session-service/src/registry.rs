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

//! Identity registration and session membership: create, join, leave, disconnect.

use anyhow::Context;
use promptparty_common::{ErrorCode, PlayerKey, ServerEvent, SessionDocument, generate_session_code};
use tracing::{info, warn};

use crate::{
    AppState,
    store::{JoinOutcome, LeaveOutcome},
    turns,
};

const SESSION_CODE_ATTEMPTS: usize = 8;

pub async fn register_player(
    state: &AppState,
    connection_id: &str,
    player: &str,
    display_name: Option<String>,
) -> anyhow::Result<()> {
    let record = state
        .store
        .register_player(player, display_name, connection_id)
        .await
        .context("failed to register player")?;
    state.hub.bind_player(connection_id, &record.player).await;

    // A reconnecting member picks their rooms back up.
    let sessions = state
        .store
        .sessions_with_member(&record.player)
        .await
        .context("failed to look up player sessions")?;
    for lobby_id in &sessions {
        state.hub.join_room(lobby_id, connection_id).await;
    }

    info!(
        player = %record.player,
        connection_id = %connection_id,
        sessions = sessions.len(),
        "player registered"
    );
    state
        .hub
        .send_to(
            connection_id,
            ServerEvent::Registered {
                player: record.player,
            },
        )
        .await;
    Ok(())
}

/// The caller's identity, if the connection registered as `claimed`.
pub async fn resolve_caller(
    state: &AppState,
    connection_id: &str,
    claimed: &str,
) -> anyhow::Result<Option<PlayerKey>> {
    if state.hub.player_for(connection_id).await.as_deref() != Some(claimed) {
        return Ok(None);
    }
    let record = state
        .store
        .get_player(claimed)
        .await
        .context("failed to read player record")?;
    Ok(record.map(|record| record.player))
}

pub async fn create_session(
    state: &AppState,
    connection_id: &str,
    player: &str,
) -> anyhow::Result<()> {
    let Some(host) = resolve_caller(state, connection_id, player).await? else {
        warn!(player = %player, connection_id = %connection_id, "cannot create session for unresolved identity");
        state
            .reply_error(
                connection_id,
                ErrorCode::UnknownPlayer,
                "Failed to create lobby.",
            )
            .await;
        return Ok(());
    };

    let mut created = None;
    for _ in 0..SESSION_CODE_ATTEMPTS {
        let (theme, session) = {
            let mut rng = rand::rng();
            let (theme, pool) = state.words.seed_pool(&mut rng);
            let session = SessionDocument::new(generate_session_code(&mut rng), host.clone(), pool);
            (theme, session)
        };
        if state
            .store
            .insert_session(&session)
            .await
            .context("failed to create session")?
        {
            created = Some((theme, session));
            break;
        }
    }
    let (theme, session) =
        created.context("could not allocate an unused session code")?;

    state.hub.join_room(&session.lobby_id, connection_id).await;
    info!(
        lobby_id = %session.lobby_id,
        host = %host,
        theme = theme.as_deref().unwrap_or("none"),
        words = session.word_bank.len(),
        "session created"
    );
    state
        .hub
        .send_to(
            connection_id,
            ServerEvent::LobbyCreated {
                lobby_id: session.lobby_id.clone(),
                message: format!("Your game is being hosted with ID: {}", session.lobby_id),
            },
        )
        .await;
    state
        .hub
        .send_to(connection_id, ServerEvent::LobbyUpdated { lobby: session })
        .await;
    Ok(())
}

pub async fn join_session(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
    player: &str,
) -> anyhow::Result<()> {
    let Some(player) = resolve_caller(state, connection_id, player).await? else {
        state
            .reply_error(
                connection_id,
                ErrorCode::UnknownPlayer,
                "Register before joining a lobby.",
            )
            .await;
        return Ok(());
    };

    let outcome = state
        .store
        .join_session(lobby_id, &player)
        .await
        .context("failed to join session")?;
    match outcome {
        JoinOutcome::Joined(session) => {
            state.hub.join_room(lobby_id, connection_id).await;
            info!(lobby_id = %lobby_id, player = %player, members = session.players.len(), "player joined session");
            state
                .hub
                .send_to(
                    connection_id,
                    ServerEvent::LobbyJoinedSuccess {
                        lobby_id: lobby_id.to_string(),
                        message: "Successfully joined the lobby!".to_string(),
                    },
                )
                .await;
            state
                .hub
                .send_to(connection_id, ServerEvent::LobbyUpdated { lobby: session })
                .await;
        }
        JoinOutcome::Rejected(reason) => {
            info!(lobby_id = %lobby_id, player = %player, ?reason, "join refused");
            state
                .hub
                .send_to(
                    connection_id,
                    ServerEvent::LobbyJoinedFail {
                        lobby_id: lobby_id.to_string(),
                        reason,
                        message: reason.message().to_string(),
                    },
                )
                .await;
        }
    }
    Ok(())
}

/// `removePlayer`: a member leaves, or the host removes someone.
pub async fn remove_player(
    state: &AppState,
    connection_id: &str,
    lobby_id: &str,
    player: &str,
) -> anyhow::Result<()> {
    let Some(caller) = state.hub.player_for(connection_id).await else {
        state
            .reply_error(connection_id, ErrorCode::UnknownPlayer, "Register first.")
            .await;
        return Ok(());
    };
    if caller != player {
        let host = state
            .store
            .get_session(lobby_id)
            .await
            .context("failed to read session")?
            .map(|session| session.host);
        if host.as_deref() != Some(caller.as_str()) {
            state
                .reply_error(
                    connection_id,
                    ErrorCode::NotHost,
                    "Only the host can remove another player.",
                )
                .await;
            return Ok(());
        }
    }

    let left = leave_session(state, lobby_id, player).await?;
    if !left {
        state
            .reply_error(
                connection_id,
                ErrorCode::NotFound,
                format!("{player} is not in lobby {lobby_id}"),
            )
            .await;
        return Ok(());
    }
    state
        .hub
        .send_to(
            connection_id,
            ServerEvent::LeaveLobbySuccess {
                lobby_id: lobby_id.to_string(),
                message: format!("{player} was removed from lobby {lobby_id}"),
            },
        )
        .await;
    Ok(())
}

/// Removes `player` from the session. Returns `false` if they were not a member.
///
/// Safe to repeat: a second call for the same member is a no-op, which lets explicit leaves and
/// disconnect cleanup race each other.
pub async fn leave_session(state: &AppState, lobby_id: &str, player: &str) -> anyhow::Result<bool> {
    let leaver_connection = state
        .store
        .get_player(player)
        .await
        .context("failed to read player record")?
        .and_then(|record| record.connection_id);

    let outcome = state
        .store
        .leave_session(lobby_id, player)
        .await
        .context("failed to leave session")?;

    match outcome {
        LeaveOutcome::NotFound | LeaveOutcome::NotMember => Ok(false),
        LeaveOutcome::Deleted => {
            info!(lobby_id = %lobby_id, player = %player, "last member left; session closed");
            state.runtimes.discard(lobby_id).await;
            if let Some(connection_id) = leaver_connection {
                state
                    .hub
                    .send_to(
                        &connection_id,
                        ServerEvent::LobbyClosed {
                            lobby_id: lobby_id.to_string(),
                            message: format!("Lobby closed. Reason: Host left the lobby {lobby_id}"),
                        },
                    )
                    .await;
                state.hub.leave_room(lobby_id, &connection_id).await;
            }
            Ok(true)
        }
        LeaveOutcome::Left { session, promoted } => {
            info!(lobby_id = %lobby_id, player = %player, members = session.players.len(), "player left session");
            if let Some(connection_id) = leaver_connection.as_deref() {
                state.hub.leave_room(lobby_id, connection_id).await;
            }
            if let Some(new_host) = promoted {
                notify_new_host(state, lobby_id, &new_host).await?;
            }
            turns::handle_departure(state, lobby_id, player).await?;
            Ok(true)
        }
    }
}

async fn notify_new_host(state: &AppState, lobby_id: &str, new_host: &str) -> anyhow::Result<()> {
    info!(lobby_id = %lobby_id, host = %new_host, "host role transferred");
    let connection_id = state
        .store
        .get_player(new_host)
        .await
        .context("failed to read new host record")?
        .and_then(|record| record.connection_id);
    let Some(connection_id) = connection_id else {
        warn!(lobby_id = %lobby_id, host = %new_host, "no connection recorded for new host");
        return Ok(());
    };
    state
        .hub
        .send_to(
            &connection_id,
            ServerEvent::YouAreNewHost {
                lobby_id: lobby_id.to_string(),
                message: format!("Host left the game. You are the new host of lobby {lobby_id}"),
            },
        )
        .await;
    Ok(())
}

/// Best-effort cleanup for a dropped transport, keyed on the stale connection id.
pub async fn handle_disconnect(state: &AppState, connection_id: &str) {
    let record = match state.store.player_by_connection(connection_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return,
        Err(error) => {
            warn!(connection_id = %connection_id, error = %error, "failed to resolve disconnecting player");
            return;
        }
    };
    let sessions = match state.store.sessions_with_member(&record.player).await {
        Ok(sessions) => sessions,
        Err(error) => {
            warn!(player = %record.player, error = %error, "failed to list sessions for disconnecting player");
            return;
        }
    };
    for lobby_id in sessions {
        match leave_session(state, &lobby_id, &record.player).await {
            Ok(true) => info!(lobby_id = %lobby_id, player = %record.player, "removed disconnected player"),
            Ok(false) => {}
            Err(error) => {
                warn!(lobby_id = %lobby_id, player = %record.player, error = %error, "failed to remove disconnected player")
            }
        }
    }
}
