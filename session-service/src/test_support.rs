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
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use promptparty_common::{ConnectionId, ServerEvent, SessionCode, WordBank};
use tokio::time::{Instant, timeout, timeout_at};

use crate::{
    AppState,
    config::ServiceConfig,
    hub::{EventReceiver, Hub},
    imaging::ImageGenerator,
    registry,
    runtime::SessionRuntimes,
    store::InMemoryDocumentStore,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct FakeImageGenerator {
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageGenerator for FakeImageGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("/generated-images/test.png".to_string())
    }
}

pub struct FailingImageGenerator;

#[async_trait]
impl ImageGenerator for FailingImageGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("image backend unavailable")
    }
}

/// Millisecond-scale timings so countdowns and deadlines finish quickly.
pub fn fast_config() -> ServiceConfig {
    ServiceConfig {
        word_collection_ticks: 3,
        tick: Duration::from_millis(10),
        turn_ack_timeout: Duration::from_millis(100),
        ..ServiceConfig::default()
    }
}

pub fn app_state(images: Arc<dyn ImageGenerator>) -> AppState {
    AppState {
        config: Arc::new(fast_config()),
        store: Arc::new(InMemoryDocumentStore::default()),
        images,
        words: Arc::new(WordBank::default()),
        hub: Hub::default(),
        runtimes: SessionRuntimes::default(),
    }
}

pub fn app_state_with_fake_images() -> AppState {
    app_state(Arc::new(FakeImageGenerator::default()))
}

/// A hub connection seen from the client side.
pub struct TestClient {
    pub connection_id: ConnectionId,
    receiver: EventReceiver,
}

impl TestClient {
    pub async fn connect(state: &AppState) -> Self {
        let (connection_id, receiver) = state.hub.connect().await;
        Self {
            connection_id,
            receiver,
        }
    }

    pub async fn registered(state: &AppState, player: &str) -> Self {
        let mut client = Self::connect(state).await;
        registry::register_player(state, &client.connection_id, player, None)
            .await
            .expect("register player");
        client.drain();
        client
    }

    pub async fn next(&mut self) -> ServerEvent {
        timeout(EVENT_TIMEOUT, self.receiver.recv())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed")
    }

    /// Skips events until one matches, or gives up after the event timeout.
    pub async fn wait_for(
        &mut self,
        predicate: impl Fn(&ServerEvent) -> bool,
    ) -> Option<ServerEvent> {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            match timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Some(event),
                Ok(Some(_)) => continue,
                _ => return None,
            }
        }
    }

    pub async fn collect_for(&mut self, window: Duration) -> Vec<ServerEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while let Ok(Some(event)) = timeout_at(deadline, self.receiver.recv()).await {
            events.push(event);
        }
        events
    }

    pub fn drain(&mut self) {
        while self.receiver.try_recv().is_ok() {}
    }

    pub async fn expect_lobby_created(&mut self) -> SessionCode {
        match self
            .wait_for(|event| matches!(event, ServerEvent::LobbyCreated { .. }))
            .await
        {
            Some(ServerEvent::LobbyCreated { lobby_id, .. }) => lobby_id,
            other => panic!("expected lobbyCreated, got {other:?}"),
        }
    }
}

/// A lobby hosted by `p0@example.com` with `p1..` joined in order.
pub async fn lobby_with_members(state: &AppState, count: usize) -> (SessionCode, Vec<TestClient>) {
    let mut host = TestClient::registered(state, "p0@example.com").await;
    registry::create_session(state, &host.connection_id, "p0@example.com")
        .await
        .expect("create session");
    let lobby_id = host.expect_lobby_created().await;

    let mut clients = vec![host];
    for index in 1..count {
        let player = format!("p{index}@example.com");
        let mut client = TestClient::registered(state, &player).await;
        registry::join_session(state, &client.connection_id, &lobby_id, &player)
            .await
            .expect("join session");
        assert!(
            client
                .wait_for(|event| matches!(event, ServerEvent::LobbyJoinedSuccess { .. }))
                .await
                .is_some(),
            "{player} failed to join"
        );
        clients.push(client);
    }
    (lobby_id, clients)
}
