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

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use promptparty_common::{ConnectionId, PlayerKey, ServerEvent, SessionCode};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<RwLock<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<SessionCode, BTreeSet<ConnectionId>>,
}

struct Connection {
    sender: mpsc::UnboundedSender<ServerEvent>,
    player: Option<PlayerKey>,
}

impl Hub {
    pub async fn connect(&self) -> (ConnectionId, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4().to_string();
        self.inner.write().await.connections.insert(
            connection_id.clone(),
            Connection {
                sender,
                player: None,
            },
        );
        (connection_id, receiver)
    }

    /// Forgets the connection and drops it from every room. Returns the identity it was bound to.
    pub async fn disconnect(&self, connection_id: &str) -> Option<PlayerKey> {
        let mut inner = self.inner.write().await;
        for members in inner.rooms.values_mut() {
            members.remove(connection_id);
        }
        inner.rooms.retain(|_, members| !members.is_empty());
        inner
            .connections
            .remove(connection_id)
            .and_then(|connection| connection.player)
    }

    pub async fn bind_player(&self, connection_id: &str, player: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.connections.get_mut(connection_id) {
            Some(connection) => {
                connection.player = Some(player.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn player_for(&self, connection_id: &str) -> Option<PlayerKey> {
        self.inner
            .read()
            .await
            .connections
            .get(connection_id)
            .and_then(|connection| connection.player.clone())
    }

    pub async fn join_room(&self, lobby_id: &str, connection_id: &str) {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(connection_id) {
            return;
        }
        inner
            .rooms
            .entry(lobby_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    pub async fn leave_room(&self, lobby_id: &str, connection_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.rooms.get_mut(lobby_id) {
            members.remove(connection_id);
            if members.is_empty() {
                inner.rooms.remove(lobby_id);
            }
        }
    }

    pub async fn close_room(&self, lobby_id: &str) {
        self.inner.write().await.rooms.remove(lobby_id);
    }

    pub async fn in_room(&self, lobby_id: &str, connection_id: &str) -> bool {
        self.inner
            .read()
            .await
            .rooms
            .get(lobby_id)
            .is_some_and(|members| members.contains(connection_id))
    }

    pub async fn send_to(&self, connection_id: &str, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        let Some(connection) = inner.connections.get(connection_id) else {
            debug!(connection_id = %connection_id, "dropping event for unknown connection");
            return false;
        };
        if connection.sender.send(event).is_err() {
            warn!(connection_id = %connection_id, "connection outbound channel closed");
            return false;
        }
        true
    }

    pub async fn broadcast(&self, lobby_id: &str, event: ServerEvent) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(lobby_id) else {
            return 0;
        };
        members
            .iter()
            .filter_map(|connection_id| inner.connections.get(connection_id))
            .filter(|connection| connection.sender.send(event.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered() -> ServerEvent {
        ServerEvent::Registered {
            player: "a@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_only_room_members() {
        let hub = Hub::default();
        let (a, mut a_rx) = hub.connect().await;
        let (b, mut b_rx) = hub.connect().await;
        let (_c, mut c_rx) = hub.connect().await;
        hub.join_room("ROOM01", &a).await;
        hub.join_room("ROOM01", &b).await;

        assert_eq!(hub.broadcast("ROOM01", registered()).await, 2);
        assert_eq!(a_rx.try_recv().unwrap(), registered());
        assert_eq!(b_rx.try_recv().unwrap(), registered());
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_unbinds_and_leaves_rooms() {
        let hub = Hub::default();
        let (a, _a_rx) = hub.connect().await;
        assert!(hub.bind_player(&a, "a@example.com").await);
        hub.join_room("ROOM01", &a).await;

        assert_eq!(hub.player_for(&a).await.as_deref(), Some("a@example.com"));
        assert_eq!(hub.disconnect(&a).await.as_deref(), Some("a@example.com"));
        assert!(!hub.in_room("ROOM01", &a).await);
        assert!(!hub.send_to(&a, registered()).await);
        assert_eq!(hub.broadcast("ROOM01", registered()).await, 0);
    }

    #[tokio::test]
    async fn unknown_connection_cannot_join_room() {
        let hub = Hub::default();
        hub.join_room("ROOM01", "ghost").await;
        assert!(!hub.in_room("ROOM01", "ghost").await);
    }
}
