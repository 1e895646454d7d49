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
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use promptparty_common::{
    ArtifactRecord, JoinFailure, MAX_SESSION_MEMBERS, PlayerKey, PlayerRecord, PlayerScore,
    Prompt, SessionCode, SessionDocument,
};
use tokio::sync::{RwLock, broadcast};
use tracing::info;

use crate::dynamo::DynamoDocumentStore;

const CHANGE_FEED_CAPACITY: usize = 256;

/// Published after every mutation that changes membership, host or the progress flag.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    Updated(SessionDocument),
    Closed(SessionCode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Joined(SessionDocument),
    Rejected(JoinFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    NotFound,
    NotMember,
    Left {
        session: SessionDocument,
        promoted: Option<PlayerKey>,
    },
    /// The last member left; the session and its artifacts are gone.
    Deleted,
}

/// Authoritative persistence for sessions, identities and generated artifacts.
///
/// Every method that mutates a session is atomic with respect to concurrent callers,
/// so handlers never read-modify-write a session document themselves.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn register_player(
        &self,
        player: &str,
        display_name: Option<String>,
        connection_id: &str,
    ) -> anyhow::Result<PlayerRecord>;
    async fn get_player(&self, player: &str) -> anyhow::Result<Option<PlayerRecord>>;
    async fn player_by_connection(&self, connection_id: &str)
    -> anyhow::Result<Option<PlayerRecord>>;

    /// Inserts a new session; `false` if the code is already taken.
    async fn insert_session(&self, session: &SessionDocument) -> anyhow::Result<bool>;
    async fn get_session(&self, lobby_id: &str) -> anyhow::Result<Option<SessionDocument>>;
    async fn sessions_with_member(&self, player: &str) -> anyhow::Result<Vec<SessionCode>>;
    async fn join_session(&self, lobby_id: &str, player: &str) -> anyhow::Result<JoinOutcome>;
    async fn leave_session(&self, lobby_id: &str, player: &str) -> anyhow::Result<LeaveOutcome>;

    /// Marks the session in progress and zeroes every member's session score.
    async fn begin_game(&self, lobby_id: &str) -> anyhow::Result<Option<SessionDocument>>;
    async fn add_words(&self, lobby_id: &str, words: &[String]) -> anyhow::Result<()>;
    async fn set_key_prompt(&self, lobby_id: &str, prompt: &Prompt) -> anyhow::Result<()>;
    /// Adds `points` to the member's session score and bumps the round's guess counter in one
    /// atomic step. Returns the session as it stands after the write.
    async fn record_guess(
        &self,
        lobby_id: &str,
        player: &str,
        guess: &str,
        points: u32,
    ) -> anyhow::Result<Option<SessionDocument>>;
    async fn reset_round(&self, lobby_id: &str) -> anyhow::Result<()>;

    async fn put_artifact(&self, artifact: &ArtifactRecord) -> anyhow::Result<()>;
    async fn artifacts_for(&self, lobby_id: &str) -> anyhow::Result<Vec<ArtifactRecord>>;

    /// Adds each session score to the identity's lifetime total. All or nothing.
    async fn fold_lifetime_scores(&self, totals: &[(PlayerKey, u64)]) -> anyhow::Result<()>;
    /// Identities by lifetime score, highest first, ties in insertion order.
    async fn top_players(&self, limit: usize) -> anyhow::Result<Vec<PlayerRecord>>;

    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;
}

pub async fn load_document_store() -> Arc<dyn DocumentStore> {
    if let Some(store) = DynamoDocumentStore::from_env().await {
        info!("using DynamoDB document store");
        return Arc::new(store);
    }
    info!("DYNAMODB_ENDPOINT/AWS_REGION not set; using in-memory document store");
    Arc::new(InMemoryDocumentStore::default())
}

pub fn change_feed() -> broadcast::Sender<SessionChange> {
    broadcast::channel(CHANGE_FEED_CAPACITY).0
}

pub fn fresh_scores(players: &[PlayerKey]) -> BTreeMap<PlayerKey, PlayerScore> {
    players
        .iter()
        .map(|player| (player.clone(), PlayerScore::default()))
        .collect()
}

/// Why a conditional join was refused, judged against the session as it is now.
pub fn classify_join_failure(session: Option<&SessionDocument>, player: &str) -> JoinFailure {
    let Some(session) = session else {
        return JoinFailure::NotFound;
    };
    if session.players.len() >= MAX_SESSION_MEMBERS {
        JoinFailure::CapacityExceeded
    } else if session.in_progress {
        JoinFailure::AlreadyInProgress
    } else if session.is_member(player) {
        JoinFailure::AlreadyMember
    } else {
        JoinFailure::NotFound
    }
}

pub struct InMemoryDocumentStore {
    state: RwLock<InMemoryState>,
    changes: broadcast::Sender<SessionChange>,
}

#[derive(Default)]
struct InMemoryState {
    sessions: HashMap<SessionCode, SessionDocument>,
    /// Insertion order doubles as the leaderboard tie-break.
    players: Vec<PlayerRecord>,
    artifacts: Vec<ArtifactRecord>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self {
            state: RwLock::new(InMemoryState::default()),
            changes: change_feed(),
        }
    }
}

impl InMemoryDocumentStore {
    fn publish(&self, change: SessionChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn register_player(
        &self,
        player: &str,
        display_name: Option<String>,
        connection_id: &str,
    ) -> anyhow::Result<PlayerRecord> {
        let mut state = self.state.write().await;
        let display_name = display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        let index = match state.players.iter().position(|record| record.player == player) {
            Some(index) => {
                if let Some(name) = display_name {
                    state.players[index].display_name = name;
                }
                index
            }
            None => {
                state
                    .players
                    .push(PlayerRecord::new(player.to_string(), display_name));
                state.players.len() - 1
            }
        };
        let record = &mut state.players[index];
        record.connection_id = Some(connection_id.to_string());
        record.last_updated = Some(Utc::now());
        Ok(record.clone())
    }

    async fn get_player(&self, player: &str) -> anyhow::Result<Option<PlayerRecord>> {
        let state = self.state.read().await;
        Ok(state
            .players
            .iter()
            .find(|record| record.player == player)
            .cloned())
    }

    async fn player_by_connection(
        &self,
        connection_id: &str,
    ) -> anyhow::Result<Option<PlayerRecord>> {
        let state = self.state.read().await;
        Ok(state
            .players
            .iter()
            .find(|record| record.connection_id.as_deref() == Some(connection_id))
            .cloned())
    }

    async fn insert_session(&self, session: &SessionDocument) -> anyhow::Result<bool> {
        {
            let mut state = self.state.write().await;
            if state.sessions.contains_key(&session.lobby_id) {
                return Ok(false);
            }
            state
                .sessions
                .insert(session.lobby_id.clone(), session.clone());
        }
        self.publish(SessionChange::Updated(session.clone()));
        Ok(true)
    }

    async fn get_session(&self, lobby_id: &str) -> anyhow::Result<Option<SessionDocument>> {
        Ok(self.state.read().await.sessions.get(lobby_id).cloned())
    }

    async fn sessions_with_member(&self, player: &str) -> anyhow::Result<Vec<SessionCode>> {
        let state = self.state.read().await;
        let mut codes: Vec<SessionCode> = state
            .sessions
            .values()
            .filter(|session| session.is_member(player))
            .map(|session| session.lobby_id.clone())
            .collect();
        codes.sort();
        Ok(codes)
    }

    async fn join_session(&self, lobby_id: &str, player: &str) -> anyhow::Result<JoinOutcome> {
        let joined = {
            let mut state = self.state.write().await;
            let session = state.sessions.get_mut(lobby_id);
            match session {
                Some(session)
                    if session.players.len() < MAX_SESSION_MEMBERS
                        && !session.in_progress
                        && !session.is_member(player) =>
                {
                    session.players.push(player.to_string());
                    session.clone()
                }
                other => {
                    return Ok(JoinOutcome::Rejected(classify_join_failure(
                        other.as_deref(),
                        player,
                    )));
                }
            }
        };
        self.publish(SessionChange::Updated(joined.clone()));
        Ok(JoinOutcome::Joined(joined))
    }

    async fn leave_session(&self, lobby_id: &str, player: &str) -> anyhow::Result<LeaveOutcome> {
        let outcome = {
            let mut state = self.state.write().await;
            let Some(session) = state.sessions.get_mut(lobby_id) else {
                return Ok(LeaveOutcome::NotFound);
            };
            if !session.is_member(player) {
                return Ok(LeaveOutcome::NotMember);
            }
            session.players.retain(|member| member != player);

            if session.players.is_empty() {
                state.sessions.remove(lobby_id);
                state
                    .artifacts
                    .retain(|artifact| artifact.lobby_id != lobby_id);
                LeaveOutcome::Deleted
            } else {
                let promoted = if session.host == player {
                    session.host = session.players[0].clone();
                    Some(session.host.clone())
                } else {
                    None
                };
                LeaveOutcome::Left {
                    session: session.clone(),
                    promoted,
                }
            }
        };

        match &outcome {
            LeaveOutcome::Deleted => self.publish(SessionChange::Closed(lobby_id.to_string())),
            LeaveOutcome::Left { session, .. } => {
                self.publish(SessionChange::Updated(session.clone()))
            }
            LeaveOutcome::NotFound | LeaveOutcome::NotMember => {}
        }
        Ok(outcome)
    }

    async fn begin_game(&self, lobby_id: &str) -> anyhow::Result<Option<SessionDocument>> {
        let started = {
            let mut state = self.state.write().await;
            let Some(session) = state.sessions.get_mut(lobby_id) else {
                return Ok(None);
            };
            session.in_progress = true;
            session.current_prompt_being_guessed = None;
            session.number_of_guesses_received = 0;
            session.player_scores = fresh_scores(&session.players);
            session.clone()
        };
        self.publish(SessionChange::Updated(started.clone()));
        Ok(Some(started))
    }

    async fn add_words(&self, lobby_id: &str, words: &[String]) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(lobby_id) {
            for word in words {
                if !session.word_bank.contains(word) {
                    session.word_bank.push(word.clone());
                }
            }
        }
        Ok(())
    }

    async fn set_key_prompt(&self, lobby_id: &str, prompt: &Prompt) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(lobby_id) {
            session.current_prompt_being_guessed = Some(prompt.clone());
            session.number_of_guesses_received = 0;
        }
        Ok(())
    }

    async fn record_guess(
        &self,
        lobby_id: &str,
        player: &str,
        guess: &str,
        points: u32,
    ) -> anyhow::Result<Option<SessionDocument>> {
        let mut state = self.state.write().await;
        let Some(session) = state.sessions.get_mut(lobby_id) else {
            return Ok(None);
        };
        if !session.is_member(player) {
            return Ok(None);
        }
        let entry = session.player_scores.entry(player.to_string()).or_default();
        entry.score += u64::from(points);
        entry.round_score = points;
        entry.prompt_guessed = guess.to_string();
        session.number_of_guesses_received += 1;
        Ok(Some(session.clone()))
    }

    async fn reset_round(&self, lobby_id: &str) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(lobby_id) {
            session.number_of_guesses_received = 0;
            for entry in session.player_scores.values_mut() {
                entry.round_score = 0;
                entry.prompt_guessed.clear();
            }
        }
        Ok(())
    }

    async fn put_artifact(&self, artifact: &ArtifactRecord) -> anyhow::Result<()> {
        self.state.write().await.artifacts.push(artifact.clone());
        Ok(())
    }

    async fn artifacts_for(&self, lobby_id: &str) -> anyhow::Result<Vec<ArtifactRecord>> {
        let state = self.state.read().await;
        Ok(state
            .artifacts
            .iter()
            .filter(|artifact| artifact.lobby_id == lobby_id)
            .cloned()
            .collect())
    }

    async fn fold_lifetime_scores(&self, totals: &[(PlayerKey, u64)]) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        let mut indexes = Vec::with_capacity(totals.len());
        for (player, _) in totals {
            let index = state
                .players
                .iter()
                .position(|record| &record.player == player)
                .ok_or_else(|| anyhow::anyhow!("no identity record for {player}"))?;
            indexes.push(index);
        }
        let now = Utc::now();
        for (index, (_, score)) in indexes.into_iter().zip(totals) {
            let record = &mut state.players[index];
            record.lifetime_score += score;
            record.last_updated = Some(now);
        }
        Ok(())
    }

    async fn top_players(&self, limit: usize) -> anyhow::Result<Vec<PlayerRecord>> {
        let state = self.state.read().await;
        let mut players = state.players.clone();
        players.sort_by(|a, b| b.lifetime_score.cmp(&a.lifetime_score));
        players.truncate(limit);
        Ok(players)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session_with(store: &InMemoryDocumentStore, members: &[&str]) -> SessionDocument {
        let mut session = SessionDocument::new(
            "ABC123".to_string(),
            members[0].to_string(),
            vec!["castle".to_string()],
        );
        session.players = members.iter().map(|member| member.to_string()).collect();
        assert!(store.insert_session(&session).await.unwrap());
        session
    }

    fn artifact(lobby_id: &str) -> ArtifactRecord {
        ArtifactRecord {
            artifact_id: format!("art-{lobby_id}"),
            lobby_id: lobby_id.to_string(),
            prompt: "red dragon".to_string(),
            image_path: "/generated-images/x.png".to_string(),
            created_by: "a".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_session_code_is_refused() {
        let store = InMemoryDocumentStore::default();
        let session = session_with(&store, &["a"]).await;
        assert!(!store.insert_session(&session).await.unwrap());
    }

    #[tokio::test]
    async fn join_enforces_capacity_progress_and_membership() {
        let store = InMemoryDocumentStore::default();
        session_with(&store, &["a", "b", "c"]).await;

        assert_eq!(
            store.join_session("ABC123", "b").await.unwrap(),
            JoinOutcome::Rejected(JoinFailure::AlreadyMember)
        );
        assert!(matches!(
            store.join_session("ABC123", "d").await.unwrap(),
            JoinOutcome::Joined(session) if session.players.len() == 4
        ));
        assert_eq!(
            store.join_session("ABC123", "e").await.unwrap(),
            JoinOutcome::Rejected(JoinFailure::CapacityExceeded)
        );
        assert_eq!(
            store.join_session("NOPE00", "e").await.unwrap(),
            JoinOutcome::Rejected(JoinFailure::NotFound)
        );
        let session = store.get_session("ABC123").await.unwrap().unwrap();
        assert_eq!(session.players, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn join_refused_while_in_progress() {
        let store = InMemoryDocumentStore::default();
        session_with(&store, &["a"]).await;
        store.begin_game("ABC123").await.unwrap();
        assert_eq!(
            store.join_session("ABC123", "b").await.unwrap(),
            JoinOutcome::Rejected(JoinFailure::AlreadyInProgress)
        );
    }

    #[tokio::test]
    async fn host_leaving_promotes_earliest_remaining_member() {
        let store = InMemoryDocumentStore::default();
        session_with(&store, &["a", "b", "c"]).await;

        let outcome = store.leave_session("ABC123", "a").await.unwrap();
        let LeaveOutcome::Left { session, promoted } = outcome else {
            panic!("expected Left, got {outcome:?}");
        };
        assert_eq!(promoted.as_deref(), Some("b"));
        assert_eq!(session.host, "b");
        assert_eq!(session.players, vec!["b", "c"]);

        let outcome = store.leave_session("ABC123", "c").await.unwrap();
        assert!(matches!(outcome, LeaveOutcome::Left { promoted: None, .. }));
        assert_eq!(
            store.leave_session("ABC123", "c").await.unwrap(),
            LeaveOutcome::NotMember
        );
    }

    #[tokio::test]
    async fn last_member_leaving_deletes_session_and_artifacts() {
        let store = InMemoryDocumentStore::default();
        session_with(&store, &["a"]).await;
        store.put_artifact(&artifact("ABC123")).await.unwrap();
        store.put_artifact(&artifact("OTHER1")).await.unwrap();
        let mut changes = store.subscribe();

        assert_eq!(
            store.leave_session("ABC123", "a").await.unwrap(),
            LeaveOutcome::Deleted
        );
        assert!(store.get_session("ABC123").await.unwrap().is_none());
        assert!(store.artifacts_for("ABC123").await.unwrap().is_empty());
        assert_eq!(store.artifacts_for("OTHER1").await.unwrap().len(), 1);
        assert_eq!(
            changes.try_recv().unwrap(),
            SessionChange::Closed("ABC123".to_string())
        );
        assert_eq!(
            store.leave_session("ABC123", "a").await.unwrap(),
            LeaveOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn concurrent_guesses_never_lose_an_increment() {
        let store = Arc::new(InMemoryDocumentStore::default());
        session_with(&store, &["a", "b", "c", "d"]).await;
        store.begin_game("ABC123").await.unwrap();

        let mut handles = Vec::new();
        for player in ["a", "b", "c", "d"] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_guess("ABC123", player, "red dragon", 125)
                    .await
                    .unwrap()
                    .unwrap()
                    .number_of_guesses_received
            }));
        }
        let mut counters = Vec::new();
        for handle in handles {
            counters.push(handle.await.unwrap());
        }
        counters.sort();
        assert_eq!(counters, vec![1, 2, 3, 4]);

        let session = store.get_session("ABC123").await.unwrap().unwrap();
        assert!(session.player_scores.values().all(|entry| entry.score == 125));

        store.reset_round("ABC123").await.unwrap();
        let session = store.get_session("ABC123").await.unwrap().unwrap();
        assert_eq!(session.number_of_guesses_received, 0);
        assert!(session.player_scores.values().all(|entry| entry.score == 125
            && entry.round_score == 0
            && entry.prompt_guessed.is_empty()));
    }

    #[tokio::test]
    async fn add_words_is_a_set_union() {
        let store = InMemoryDocumentStore::default();
        session_with(&store, &["a"]).await;
        store
            .add_words("ABC123", &["dragon".to_string(), "castle".to_string()])
            .await
            .unwrap();
        store.add_words("ABC123", &["dragon".to_string()]).await.unwrap();
        let session = store.get_session("ABC123").await.unwrap().unwrap();
        assert_eq!(session.word_bank, vec!["castle", "dragon"]);
    }

    #[tokio::test]
    async fn fold_is_all_or_nothing() {
        let store = InMemoryDocumentStore::default();
        store.register_player("a", None, "c1").await.unwrap();
        store.register_player("b", None, "c2").await.unwrap();

        let err = store
            .fold_lifetime_scores(&[("a".to_string(), 100), ("ghost".to_string(), 50)])
            .await;
        assert!(err.is_err());
        assert_eq!(store.get_player("a").await.unwrap().unwrap().lifetime_score, 0);

        store
            .fold_lifetime_scores(&[("a".to_string(), 100), ("b".to_string(), 50)])
            .await
            .unwrap();
        store
            .fold_lifetime_scores(&[("b".to_string(), 75)])
            .await
            .unwrap();
        let top = store.top_players(10).await.unwrap();
        let order: Vec<(&str, u64)> = top
            .iter()
            .map(|record| (record.player.as_str(), record.lifetime_score))
            .collect();
        assert_eq!(order, vec![("b", 125), ("a", 100)]);
    }

    #[tokio::test]
    async fn reconnect_replaces_connection_id() {
        let store = InMemoryDocumentStore::default();
        store
            .register_player("a", Some("Ann".to_string()), "c1")
            .await
            .unwrap();
        let record = store.register_player("a", None, "c2").await.unwrap();
        assert_eq!(record.display_name, "Ann");
        assert_eq!(record.connection_id.as_deref(), Some("c2"));
        assert!(store.player_by_connection("c1").await.unwrap().is_none());
        assert_eq!(
            store.player_by_connection("c2").await.unwrap().unwrap().player,
            "a"
        );
    }

    #[test]
    fn join_failure_classification_prefers_capacity() {
        let mut session = SessionDocument::new("ABC123".into(), "a".into(), vec![]);
        session.players = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        session.in_progress = true;
        assert_eq!(
            classify_join_failure(Some(&session), "a"),
            JoinFailure::CapacityExceeded
        );
        session.players.pop();
        assert_eq!(
            classify_join_failure(Some(&session), "a"),
            JoinFailure::AlreadyInProgress
        );
        assert_eq!(classify_join_failure(None, "a"), JoinFailure::NotFound);
    }
}
