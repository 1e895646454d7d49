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

use promptparty_common::ServerEvent;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{debug, info, warn};

use crate::{AppState, store::SessionChange};

pub async fn run_session_watcher(state: AppState, mut changes: Receiver<SessionChange>) {
    info!("session watcher started");
    loop {
        match changes.recv().await {
            Ok(change) => publish_change(&state, change).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "session watcher lagged behind the change feed");
            }
            Err(RecvError::Closed) => {
                info!("change feed closed; session watcher stopping");
                break;
            }
        }
    }
}

async fn publish_change(state: &AppState, change: SessionChange) {
    match change {
        SessionChange::Updated(session) => {
            let lobby_id = session.lobby_id.clone();
            let delivered = state
                .hub
                .broadcast(&lobby_id, ServerEvent::LobbyUpdated { lobby: session })
                .await;
            debug!(lobby_id = %lobby_id, delivered, "lobby update fanned out");
        }
        SessionChange::Closed(lobby_id) => {
            state
                .hub
                .broadcast(
                    &lobby_id,
                    ServerEvent::LobbyClosed {
                        lobby_id: lobby_id.clone(),
                        message: format!("Lobby closed. Reason: Host left the lobby {lobby_id}"),
                    },
                )
                .await;
            state.hub.close_room(&lobby_id).await;
            info!(lobby_id = %lobby_id, "lobby room closed");
        }
    }
}
