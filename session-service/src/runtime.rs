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
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use promptparty_common::{ConnectionId, Phase, PlayerKey, SessionCode};
use tokio::{sync::Mutex, task::AbortHandle};

/// One member still owed a turn, addressed by the connection they had when the game began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSlot {
    pub player: PlayerKey,
    pub connection_id: ConnectionId,
}

/// A turn offered but not yet acknowledged.
#[derive(Debug)]
pub struct PendingTurn {
    pub slot: TurnSlot,
    pub generation: u64,
    pub deadline: AbortHandle,
}

#[derive(Debug)]
pub struct SessionRuntime {
    pub phase: Phase,
    pub word_window_open: bool,
    pub countdown: Option<AbortHandle>,
    /// Bumped on every game start; stale countdowns compare against it.
    pub game_generation: u64,
    /// `None` until the first turn request of a game, and again once exhausted.
    pub rotation: Option<VecDeque<TurnSlot>>,
    pub pending_turn: Option<PendingTurn>,
    /// Bumped on every grant; stale deadlines and image jobs compare against it.
    pub turn_generation: u64,
    pub active_author: Option<TurnSlot>,
    pub guessed: HashSet<PlayerKey>,
    pub round_closed: bool,
    pub scores_folded: bool,
}

impl Default for SessionRuntime {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            word_window_open: false,
            countdown: None,
            game_generation: 0,
            rotation: None,
            pending_turn: None,
            turn_generation: 0,
            active_author: None,
            guessed: HashSet::new(),
            round_closed: false,
            scores_folded: false,
        }
    }
}

impl SessionRuntime {
    pub fn cancel_timers(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            countdown.abort();
        }
        if let Some(pending) = self.pending_turn.take() {
            pending.deadline.abort();
        }
    }

    /// Clears everything left over from a previous game.
    pub fn reset_for_new_game(&mut self) {
        self.cancel_timers();
        self.game_generation += 1;
        self.rotation = None;
        self.active_author = None;
        self.guessed.clear();
        self.round_closed = false;
        self.scores_folded = false;
    }

    pub fn begin_round(&mut self) {
        self.guessed.clear();
        self.round_closed = false;
    }

    /// A new turn may be granted only between rounds, with nobody already holding an offer.
    pub fn accepts_turn_request(&self) -> bool {
        if self.pending_turn.is_some() {
            return false;
        }
        match self.phase {
            Phase::WordCollection => !self.word_window_open,
            Phase::RoundScoring => true,
            _ => false,
        }
    }

    pub fn remove_from_rotation(&mut self, player: &str) {
        if let Some(rotation) = self.rotation.as_mut() {
            rotation.retain(|slot| slot.player != player);
        }
    }

    pub fn is_author(&self, player: &str) -> bool {
        self.active_author
            .as_ref()
            .is_some_and(|slot| slot.player == player)
    }
}

pub type SharedRuntime = Arc<Mutex<SessionRuntime>>;

/// Owner of every session's runtime, one lock per session.
#[derive(Clone, Default)]
pub struct SessionRuntimes {
    inner: Arc<Mutex<HashMap<SessionCode, SharedRuntime>>>,
}

impl SessionRuntimes {
    pub async fn get(&self, lobby_id: &str) -> SharedRuntime {
        let mut runtimes = self.inner.lock().await;
        runtimes
            .entry(lobby_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionRuntime::default())))
            .clone()
    }

    pub async fn existing(&self, lobby_id: &str) -> Option<SharedRuntime> {
        self.inner.lock().await.get(lobby_id).cloned()
    }

    /// Forgets the session's runtime and cancels its timers.
    pub async fn discard(&self, lobby_id: &str) {
        let removed = self.inner.lock().await.remove(lobby_id);
        if let Some(runtime) = removed {
            runtime.lock().await.cancel_timers();
        }
    }

    /// Session whose pending turn was offered to `connection_id`, if any.
    pub async fn pending_for_connection(&self, connection_id: &str) -> Option<SessionCode> {
        let entries: Vec<(SessionCode, SharedRuntime)> = self
            .inner
            .lock()
            .await
            .iter()
            .map(|(code, runtime)| (code.clone(), runtime.clone()))
            .collect();
        for (code, runtime) in entries {
            let runtime = runtime.lock().await;
            if runtime
                .pending_turn
                .as_ref()
                .is_some_and(|pending| pending.slot.connection_id == connection_id)
            {
                return Some(code);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn slot(player: &str) -> TurnSlot {
        TurnSlot {
            player: player.to_string(),
            connection_id: format!("conn-{player}"),
        }
    }

    #[test]
    fn turn_requests_only_between_rounds() {
        let mut runtime = SessionRuntime::default();
        assert!(!runtime.accepts_turn_request());

        runtime.phase = Phase::WordCollection;
        runtime.word_window_open = true;
        assert!(!runtime.accepts_turn_request());
        runtime.word_window_open = false;
        assert!(runtime.accepts_turn_request());

        runtime.phase = Phase::Guessing;
        assert!(!runtime.accepts_turn_request());
        runtime.phase = Phase::RoundScoring;
        assert!(runtime.accepts_turn_request());
        runtime.phase = Phase::Completed;
        assert!(!runtime.accepts_turn_request());
    }

    #[test]
    fn remove_from_rotation_drops_every_slot_for_player() {
        let mut runtime = SessionRuntime {
            rotation: Some(VecDeque::from(vec![slot("a"), slot("b"), slot("c")])),
            ..SessionRuntime::default()
        };
        runtime.remove_from_rotation("b");
        let remaining: Vec<TurnSlot> = runtime.rotation.clone().unwrap().into();
        assert_eq!(remaining, vec![slot("a"), slot("c")]);
    }

    #[tokio::test]
    async fn discard_aborts_pending_deadline() {
        let runtimes = SessionRuntimes::default();
        let runtime = runtimes.get("ABC123").await;
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        runtime.lock().await.pending_turn = Some(PendingTurn {
            slot: slot("a"),
            generation: 1,
            deadline: task.abort_handle(),
        });
        assert_eq!(
            runtimes.pending_for_connection("conn-a").await.as_deref(),
            Some("ABC123")
        );

        runtimes.discard("ABC123").await;
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(runtimes.existing("ABC123").await.is_none());
    }
}
