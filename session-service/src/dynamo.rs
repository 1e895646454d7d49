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

//! DynamoDB-backed document store. Sessions keep the same camelCase attribute names as
//! their JSON form so nested score arithmetic can address them directly.

use std::collections::{BTreeSet, HashMap};

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{
    Client as DynamoClient,
    error::{ProvideErrorMetadata, SdkError},
    operation::{query::builders::QueryFluentBuilder, scan::builders::ScanFluentBuilder},
    types::{AttributeValue, ReturnValue, TransactWriteItem, Update},
};
use chrono::Utc;
use promptparty_common::{
    ArtifactRecord, MAX_SESSION_MEMBERS, PlayerKey, PlayerRecord, Prompt, SessionCode,
    SessionDocument,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::store::{
    DocumentStore, JoinOutcome, LeaveOutcome, SessionChange, change_feed, classify_join_failure,
    fresh_scores,
};

type Item = HashMap<String, AttributeValue>;

/// Attempts for read-then-conditional-write operations before giving up.
const OPTIMISTIC_RETRIES: usize = 5;

/// One word per update so the membership check and the append happen in a single atomic write.
const APPEND_WORD_EXPRESSION: &str = "SET #bank = list_append(#bank, :words)";
const APPEND_WORD_CONDITION: &str = "attribute_exists(lobbyId) AND NOT contains(#bank, :word)";

pub struct DynamoDocumentStore {
    client: DynamoClient,
    sessions_table: String,
    players_table: String,
    artifacts_table: String,
    changes: broadcast::Sender<SessionChange>,
}

impl DynamoDocumentStore {
    pub async fn from_env() -> Option<Self> {
        if std::env::var("DYNAMODB_ENDPOINT").is_err() && std::env::var("AWS_REGION").is_err() {
            return None;
        }
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(endpoint) = std::env::var("DYNAMODB_ENDPOINT") {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        let store = Self {
            client: DynamoClient::new(&config),
            sessions_table: table_name("SESSIONS_TABLE", "lobbies"),
            players_table: table_name("PLAYERS_TABLE", "players"),
            artifacts_table: table_name("ARTIFACTS_TABLE", "generated_images"),
            changes: change_feed(),
        };
        info!(
            sessions_table = %store.sessions_table,
            players_table = %store.players_table,
            artifacts_table = %store.artifacts_table,
            "DynamoDB document store configured"
        );
        Some(store)
    }

    fn publish(&self, change: SessionChange) {
        let _ = self.changes.send(change);
    }

    fn session_key(&self, lobby_id: &str) -> (String, AttributeValue) {
        ("lobbyId".to_string(), AttributeValue::S(lobby_id.to_string()))
    }

    async fn scan_items(&self, request: ScanFluentBuilder) -> anyhow::Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let output = request
                .clone()
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .context("failed to scan table")?;
            items.extend(output.items().iter().cloned());
            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => return Ok(items),
            }
        }
    }

    async fn query_items(&self, request: QueryFluentBuilder) -> anyhow::Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let output = request
                .clone()
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .context("failed to query table")?;
            items.extend(output.items().iter().cloned());
            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => return Ok(items),
            }
        }
    }

    async fn delete_artifacts(&self, lobby_id: &str) -> anyhow::Result<usize> {
        let artifacts = self.artifacts_for(lobby_id).await?;
        for artifact in &artifacts {
            self.client
                .delete_item()
                .table_name(&self.artifacts_table)
                .key("lobbyId", AttributeValue::S(artifact.lobby_id.clone()))
                .key("artifactId", AttributeValue::S(artifact.artifact_id.clone()))
                .send()
                .await
                .context("failed to delete generated image record")?;
        }
        Ok(artifacts.len())
    }

    /// One optimistic leave attempt. `None` means the session changed underneath us.
    async fn try_leave(
        &self,
        current: &SessionDocument,
        player: &str,
    ) -> anyhow::Result<Option<LeaveOutcome>> {
        let (key_name, key_value) = self.session_key(&current.lobby_id);
        let remaining: Vec<PlayerKey> = current
            .players
            .iter()
            .filter(|member| *member != player)
            .cloned()
            .collect();
        let expected = string_list(&current.players);

        if remaining.is_empty() {
            let result = self
                .client
                .delete_item()
                .table_name(&self.sessions_table)
                .key(key_name, key_value)
                .condition_expression("#players = :expected")
                .expression_attribute_names("#players", "players")
                .expression_attribute_values(":expected", expected)
                .send()
                .await;
            return match result {
                Ok(_) => {
                    let removed = self.delete_artifacts(&current.lobby_id).await?;
                    info!(lobby_id = %current.lobby_id, removed, "deleted empty session and its images");
                    Ok(Some(LeaveOutcome::Deleted))
                }
                Err(error) if condition_failed(&error) => Ok(None),
                Err(error) => Err(anyhow::Error::new(error).context("failed to delete session")),
            };
        }

        let promoted = (current.host == player).then(|| remaining[0].clone());
        let host = promoted.clone().unwrap_or_else(|| current.host.clone());
        let result = self
            .client
            .update_item()
            .table_name(&self.sessions_table)
            .key(key_name, key_value)
            .update_expression("SET #players = :remaining, #host = :host")
            .condition_expression("#players = :expected")
            .expression_attribute_names("#players", "players")
            .expression_attribute_names("#host", "host")
            .expression_attribute_values(":remaining", string_list(&remaining))
            .expression_attribute_values(":host", AttributeValue::S(host))
            .expression_attribute_values(":expected", expected)
            .return_values(ReturnValue::AllNew)
            .send()
            .await;
        match result {
            Ok(output) => {
                let session = output
                    .attributes()
                    .map(from_item::<SessionDocument>)
                    .transpose()?
                    .context("leave returned no session attributes")?;
                Ok(Some(LeaveOutcome::Left { session, promoted }))
            }
            Err(error) if condition_failed(&error) => Ok(None),
            Err(error) => Err(anyhow::Error::new(error).context("failed to remove member")),
        }
    }
}

#[async_trait]
impl DocumentStore for DynamoDocumentStore {
    async fn register_player(
        &self,
        player: &str,
        display_name: Option<String>,
        connection_id: &str,
    ) -> anyhow::Result<PlayerRecord> {
        let display_name = display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        // Keep an existing display name unless a new one was supplied.
        let name_expression = if display_name.is_some() {
            "#name = :name"
        } else {
            "#name = if_not_exists(#name, :name)"
        };
        let output = self
            .client
            .update_item()
            .table_name(&self.players_table)
            .key("player", AttributeValue::S(player.to_string()))
            .update_expression(format!(
                "SET {name_expression}, #conn = :conn, #updated = :now, #lifetime = if_not_exists(#lifetime, :zero)"
            ))
            .expression_attribute_names("#name", "displayName")
            .expression_attribute_names("#conn", "connectionId")
            .expression_attribute_names("#updated", "lastUpdated")
            .expression_attribute_names("#lifetime", "lifetimeScore")
            .expression_attribute_values(
                ":name",
                AttributeValue::S(display_name.unwrap_or_else(|| player.to_string())),
            )
            .expression_attribute_values(":conn", AttributeValue::S(connection_id.to_string()))
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .expression_attribute_values(":zero", AttributeValue::N("0".to_string()))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .context("failed to upsert player record")?;
        output
            .attributes()
            .map(from_item::<PlayerRecord>)
            .transpose()?
            .context("player upsert returned no attributes")
    }

    async fn get_player(&self, player: &str) -> anyhow::Result<Option<PlayerRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.players_table)
            .key("player", AttributeValue::S(player.to_string()))
            .send()
            .await
            .context("failed to read player record")?;
        output.item().map(from_item::<PlayerRecord>).transpose()
    }

    async fn player_by_connection(
        &self,
        connection_id: &str,
    ) -> anyhow::Result<Option<PlayerRecord>> {
        let request = self
            .client
            .scan()
            .table_name(&self.players_table)
            .filter_expression("#conn = :conn")
            .expression_attribute_names("#conn", "connectionId")
            .expression_attribute_values(":conn", AttributeValue::S(connection_id.to_string()));
        let items = self.scan_items(request).await?;
        items.first().map(from_item::<PlayerRecord>).transpose()
    }

    async fn insert_session(&self, session: &SessionDocument) -> anyhow::Result<bool> {
        let result = self
            .client
            .put_item()
            .table_name(&self.sessions_table)
            .set_item(Some(to_item(session)?))
            .condition_expression("attribute_not_exists(lobbyId)")
            .send()
            .await;
        match result {
            Ok(_) => {
                self.publish(SessionChange::Updated(session.clone()));
                Ok(true)
            }
            Err(error) if condition_failed(&error) => Ok(false),
            Err(error) => Err(anyhow::Error::new(error).context("failed to insert session")),
        }
    }

    async fn get_session(&self, lobby_id: &str) -> anyhow::Result<Option<SessionDocument>> {
        let (key_name, key_value) = self.session_key(lobby_id);
        let output = self
            .client
            .get_item()
            .table_name(&self.sessions_table)
            .key(key_name, key_value)
            .consistent_read(true)
            .send()
            .await
            .context("failed to read session")?;
        output.item().map(from_item::<SessionDocument>).transpose()
    }

    async fn sessions_with_member(&self, player: &str) -> anyhow::Result<Vec<SessionCode>> {
        let request = self
            .client
            .scan()
            .table_name(&self.sessions_table)
            .filter_expression("contains(#players, :player)")
            .projection_expression("lobbyId")
            .expression_attribute_names("#players", "players")
            .expression_attribute_values(":player", AttributeValue::S(player.to_string()));
        let mut codes: Vec<SessionCode> = self
            .scan_items(request)
            .await?
            .iter()
            .filter_map(|item| item.get("lobbyId"))
            .filter_map(|value| value.as_s().ok().cloned())
            .collect();
        codes.sort();
        Ok(codes)
    }

    async fn join_session(&self, lobby_id: &str, player: &str) -> anyhow::Result<JoinOutcome> {
        let (key_name, key_value) = self.session_key(lobby_id);
        let result = self
            .client
            .update_item()
            .table_name(&self.sessions_table)
            .key(key_name, key_value)
            .update_expression("SET #players = list_append(#players, :joiner)")
            .condition_expression(
                "attribute_exists(lobbyId) AND size(#players) < :capacity \
                 AND #progress = :false AND NOT contains(#players, :player)",
            )
            .expression_attribute_names("#players", "players")
            .expression_attribute_names("#progress", "inProgress")
            .expression_attribute_values(
                ":joiner",
                AttributeValue::L(vec![AttributeValue::S(player.to_string())]),
            )
            .expression_attribute_values(
                ":capacity",
                AttributeValue::N(MAX_SESSION_MEMBERS.to_string()),
            )
            .expression_attribute_values(":false", AttributeValue::Bool(false))
            .expression_attribute_values(":player", AttributeValue::S(player.to_string()))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => {
                let session = output
                    .attributes()
                    .map(from_item::<SessionDocument>)
                    .transpose()?
                    .context("join returned no session attributes")?;
                self.publish(SessionChange::Updated(session.clone()));
                Ok(JoinOutcome::Joined(session))
            }
            Err(error) if condition_failed(&error) => {
                let current = self.get_session(lobby_id).await?;
                Ok(JoinOutcome::Rejected(classify_join_failure(
                    current.as_ref(),
                    player,
                )))
            }
            Err(error) => Err(anyhow::Error::new(error).context("failed to join session")),
        }
    }

    async fn leave_session(&self, lobby_id: &str, player: &str) -> anyhow::Result<LeaveOutcome> {
        for attempt in 1..=OPTIMISTIC_RETRIES {
            let Some(current) = self.get_session(lobby_id).await? else {
                return Ok(LeaveOutcome::NotFound);
            };
            if !current.is_member(player) {
                return Ok(LeaveOutcome::NotMember);
            }
            match self.try_leave(&current, player).await? {
                Some(outcome) => {
                    match &outcome {
                        LeaveOutcome::Deleted => {
                            self.publish(SessionChange::Closed(lobby_id.to_string()))
                        }
                        LeaveOutcome::Left { session, .. } => {
                            self.publish(SessionChange::Updated(session.clone()))
                        }
                        LeaveOutcome::NotFound | LeaveOutcome::NotMember => {}
                    }
                    return Ok(outcome);
                }
                None => {
                    warn!(lobby_id = %lobby_id, player = %player, attempt, "session changed during leave; retrying");
                }
            }
        }
        anyhow::bail!("session {lobby_id} kept changing while removing {player}")
    }

    async fn begin_game(&self, lobby_id: &str) -> anyhow::Result<Option<SessionDocument>> {
        for attempt in 1..=OPTIMISTIC_RETRIES {
            let Some(current) = self.get_session(lobby_id).await? else {
                return Ok(None);
            };
            let (key_name, key_value) = self.session_key(lobby_id);
            let scores = serde_json::to_value(fresh_scores(&current.players))
                .context("failed to encode fresh scores")?;
            let result = self
                .client
                .update_item()
                .table_name(&self.sessions_table)
                .key(key_name, key_value)
                .update_expression(
                    "SET #progress = :true, #count = :zero, #scores = :scores REMOVE #prompt",
                )
                .condition_expression("#players = :expected")
                .expression_attribute_names("#progress", "inProgress")
                .expression_attribute_names("#count", "numberOfGuessesReceived")
                .expression_attribute_names("#scores", "playerScores")
                .expression_attribute_names("#prompt", "currentPromptBeingGuessed")
                .expression_attribute_names("#players", "players")
                .expression_attribute_values(":true", AttributeValue::Bool(true))
                .expression_attribute_values(":zero", AttributeValue::N("0".to_string()))
                .expression_attribute_values(":scores", to_attribute(scores))
                .expression_attribute_values(":expected", string_list(&current.players))
                .return_values(ReturnValue::AllNew)
                .send()
                .await;
            match result {
                Ok(output) => {
                    let session = output
                        .attributes()
                        .map(from_item::<SessionDocument>)
                        .transpose()?
                        .context("start returned no session attributes")?;
                    self.publish(SessionChange::Updated(session.clone()));
                    return Ok(Some(session));
                }
                Err(error) if condition_failed(&error) => {
                    warn!(lobby_id = %lobby_id, attempt, "session changed during start; retrying");
                }
                Err(error) => {
                    return Err(anyhow::Error::new(error).context("failed to start game"));
                }
            }
        }
        anyhow::bail!("session {lobby_id} kept changing while starting")
    }

    async fn add_words(&self, lobby_id: &str, words: &[String]) -> anyhow::Result<()> {
        let (key_name, key_value) = self.session_key(lobby_id);
        for word in unique_words(words) {
            let result = self
                .client
                .update_item()
                .table_name(&self.sessions_table)
                .key(key_name.clone(), key_value.clone())
                .update_expression(APPEND_WORD_EXPRESSION)
                .condition_expression(APPEND_WORD_CONDITION)
                .expression_attribute_names("#bank", "wordBank")
                .expression_attribute_values(":word", AttributeValue::S(word.to_string()))
                .expression_attribute_values(
                    ":words",
                    AttributeValue::L(vec![AttributeValue::S(word.to_string())]),
                )
                .send()
                .await;
            match result {
                Ok(_) => {}
                // Already in the bank, or the session is gone.
                Err(error) if condition_failed(&error) => {}
                Err(error) => {
                    return Err(anyhow::Error::new(error).context("failed to extend word bank"));
                }
            }
        }
        Ok(())
    }

    async fn set_key_prompt(&self, lobby_id: &str, prompt: &Prompt) -> anyhow::Result<()> {
        let (key_name, key_value) = self.session_key(lobby_id);
        let prompt = serde_json::to_value(prompt).context("failed to encode prompt")?;
        let result = self
            .client
            .update_item()
            .table_name(&self.sessions_table)
            .key(key_name, key_value)
            .update_expression("SET #prompt = :prompt, #count = :zero")
            .condition_expression("attribute_exists(lobbyId)")
            .expression_attribute_names("#prompt", "currentPromptBeingGuessed")
            .expression_attribute_names("#count", "numberOfGuessesReceived")
            .expression_attribute_values(":prompt", to_attribute(prompt))
            .expression_attribute_values(":zero", AttributeValue::N("0".to_string()))
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(error) if condition_failed(&error) => Ok(()),
            Err(error) => Err(anyhow::Error::new(error).context("failed to set key prompt")),
        }
    }

    async fn record_guess(
        &self,
        lobby_id: &str,
        player: &str,
        guess: &str,
        points: u32,
    ) -> anyhow::Result<Option<SessionDocument>> {
        let (key_name, key_value) = self.session_key(lobby_id);
        let result = self
            .client
            .update_item()
            .table_name(&self.sessions_table)
            .key(key_name, key_value)
            .update_expression(
                "SET #scores.#p.#score = if_not_exists(#scores.#p.#score, :zero) + :points, \
                 #scores.#p.#round = :points, #scores.#p.#guess = :guess \
                 ADD #count :one",
            )
            .condition_expression("attribute_exists(#scores.#p) AND contains(#players, :player)")
            .expression_attribute_names("#scores", "playerScores")
            .expression_attribute_names("#p", player)
            .expression_attribute_names("#score", "score")
            .expression_attribute_names("#round", "roundScore")
            .expression_attribute_names("#guess", "promptGuessed")
            .expression_attribute_names("#count", "numberOfGuessesReceived")
            .expression_attribute_names("#players", "players")
            .expression_attribute_values(":zero", AttributeValue::N("0".to_string()))
            .expression_attribute_values(":points", AttributeValue::N(points.to_string()))
            .expression_attribute_values(":guess", AttributeValue::S(guess.to_string()))
            .expression_attribute_values(":one", AttributeValue::N("1".to_string()))
            .expression_attribute_values(":player", AttributeValue::S(player.to_string()))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;
        match result {
            Ok(output) => output
                .attributes()
                .map(from_item::<SessionDocument>)
                .transpose(),
            Err(error) if condition_failed(&error) => Ok(None),
            Err(error) => Err(anyhow::Error::new(error).context("failed to record guess")),
        }
    }

    async fn reset_round(&self, lobby_id: &str) -> anyhow::Result<()> {
        let Some(current) = self.get_session(lobby_id).await? else {
            return Ok(());
        };
        let (key_name, key_value) = self.session_key(lobby_id);
        let mut assignments = vec!["#count = :zero".to_string()];
        let mut request = self
            .client
            .update_item()
            .table_name(&self.sessions_table)
            .key(key_name, key_value)
            .condition_expression("attribute_exists(lobbyId)")
            .expression_attribute_names("#count", "numberOfGuessesReceived")
            .expression_attribute_values(":zero", AttributeValue::N("0".to_string()));
        if !current.player_scores.is_empty() {
            request = request
                .expression_attribute_names("#scores", "playerScores")
                .expression_attribute_names("#round", "roundScore")
                .expression_attribute_names("#guess", "promptGuessed")
                .expression_attribute_values(":empty", AttributeValue::S(String::new()));
        }
        for (index, player) in current.player_scores.keys().enumerate() {
            assignments.push(format!("#scores.#p{index}.#round = :zero"));
            assignments.push(format!("#scores.#p{index}.#guess = :empty"));
            request = request.expression_attribute_names(format!("#p{index}"), player);
        }
        let result = request
            .update_expression(format!("SET {}", assignments.join(", ")))
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(error) if condition_failed(&error) => Ok(()),
            Err(error) => Err(anyhow::Error::new(error).context("failed to reset round")),
        }
    }

    async fn put_artifact(&self, artifact: &ArtifactRecord) -> anyhow::Result<()> {
        self.client
            .put_item()
            .table_name(&self.artifacts_table)
            .set_item(Some(to_item(artifact)?))
            .send()
            .await
            .context("failed to put generated image record")?;
        Ok(())
    }

    async fn artifacts_for(&self, lobby_id: &str) -> anyhow::Result<Vec<ArtifactRecord>> {
        let request = self
            .client
            .query()
            .table_name(&self.artifacts_table)
            .key_condition_expression("lobbyId = :lobby")
            .expression_attribute_values(":lobby", AttributeValue::S(lobby_id.to_string()));
        self.query_items(request)
            .await?
            .iter()
            .map(from_item::<ArtifactRecord>)
            .collect()
    }

    async fn fold_lifetime_scores(&self, totals: &[(PlayerKey, u64)]) -> anyhow::Result<()> {
        if totals.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let mut items = Vec::with_capacity(totals.len());
        for (player, score) in totals {
            let update = Update::builder()
                .table_name(&self.players_table)
                .key("player", AttributeValue::S(player.clone()))
                .update_expression(
                    "SET #lifetime = if_not_exists(#lifetime, :zero) + :score, #updated = :now",
                )
                .condition_expression("attribute_exists(player)")
                .expression_attribute_names("#lifetime", "lifetimeScore")
                .expression_attribute_names("#updated", "lastUpdated")
                .expression_attribute_values(":zero", AttributeValue::N("0".to_string()))
                .expression_attribute_values(":score", AttributeValue::N(score.to_string()))
                .expression_attribute_values(":now", AttributeValue::S(now.clone()))
                .build()
                .context("failed to build lifetime score update")?;
            items.push(TransactWriteItem::builder().update(update).build());
        }
        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .context("failed to fold lifetime scores")?;
        Ok(())
    }

    async fn top_players(&self, limit: usize) -> anyhow::Result<Vec<PlayerRecord>> {
        let request = self.client.scan().table_name(&self.players_table);
        let mut players = self
            .scan_items(request)
            .await?
            .iter()
            .map(from_item::<PlayerRecord>)
            .collect::<anyhow::Result<Vec<_>>>()?;
        players.sort_by(|a, b| b.lifetime_score.cmp(&a.lifetime_score));
        players.truncate(limit);
        Ok(players)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }
}

fn table_name(var_name: &str, default: &str) -> String {
    std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string())
}

fn condition_failed<E: ProvideErrorMetadata, R>(error: &SdkError<E, R>) -> bool {
    error
        .as_service_error()
        .and_then(|service_error| service_error.code())
        == Some("ConditionalCheckFailedException")
}

/// First occurrence of each word, in submission order.
fn unique_words(words: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    words
        .iter()
        .map(String::as_str)
        .filter(|word| seen.insert(*word))
        .collect()
}

fn string_list(values: &[String]) -> AttributeValue {
    AttributeValue::L(
        values
            .iter()
            .map(|value| AttributeValue::S(value.clone()))
            .collect(),
    )
}

fn to_item<T: Serialize>(value: &T) -> anyhow::Result<Item> {
    match serde_json::to_value(value).context("failed to encode document")? {
        Value::Object(fields) => Ok(fields
            .into_iter()
            .map(|(name, field)| (name, to_attribute(field)))
            .collect()),
        other => anyhow::bail!("expected a document object, got {other}"),
    }
}

fn from_item<T: DeserializeOwned>(item: &Item) -> anyhow::Result<T> {
    let fields = item
        .iter()
        .map(|(name, value)| (name.clone(), from_attribute(value)))
        .collect();
    serde_json::from_value(Value::Object(fields)).context("failed to decode document")
}

fn to_attribute(value: Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(flag) => AttributeValue::Bool(flag),
        Value::Number(number) => AttributeValue::N(number.to_string()),
        Value::String(text) => AttributeValue::S(text),
        Value::Array(values) => AttributeValue::L(values.into_iter().map(to_attribute).collect()),
        Value::Object(fields) => AttributeValue::M(
            fields
                .into_iter()
                .map(|(name, field)| (name, to_attribute(field)))
                .collect(),
        ),
    }
}

fn from_attribute(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(text) => Value::String(text.clone()),
        AttributeValue::N(number) => parse_number(number),
        AttributeValue::Bool(flag) => Value::Bool(*flag),
        AttributeValue::L(values) => Value::Array(values.iter().map(from_attribute).collect()),
        AttributeValue::M(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, field)| (name.clone(), from_attribute(field)))
                .collect(),
        ),
        AttributeValue::Ss(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
        _ => Value::Null,
    }
}

fn parse_number(raw: &str) -> Value {
    if let Ok(unsigned) = raw.parse::<u64>() {
        return Value::from(unsigned);
    }
    if let Ok(signed) = raw.parse::<i64>() {
        return Value::from(signed);
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptparty_common::PlayerScore;

    #[test]
    fn word_append_is_guarded_against_existing_entries() {
        assert!(APPEND_WORD_CONDITION.contains("NOT contains(#bank, :word)"));
        assert!(APPEND_WORD_CONDITION.contains("attribute_exists(lobbyId)"));
        assert!(APPEND_WORD_EXPRESSION.contains("list_append(#bank, :words)"));

        let words: Vec<String> = ["comet", "castle", "comet", "Comet"]
            .iter()
            .map(|word| word.to_string())
            .collect();
        assert_eq!(unique_words(&words), vec!["comet", "castle", "Comet"]);
    }

    #[test]
    fn session_document_survives_attribute_encoding() {
        let mut session = SessionDocument::new(
            "ABC123".to_string(),
            "a@example.com".to_string(),
            vec!["castle".to_string(), "dragon".to_string()],
        );
        session.players.push("b@example.com".to_string());
        session.current_prompt_being_guessed =
            Some(Prompt::Words(vec!["red".to_string(), "dragon".to_string()]));
        session.player_scores.insert(
            "a@example.com".to_string(),
            PlayerScore {
                score: 425,
                round_score: 125,
                prompt_guessed: "blue dragon".to_string(),
            },
        );

        let item = to_item(&session).unwrap();
        assert_eq!(
            item.get("lobbyId"),
            Some(&AttributeValue::S("ABC123".to_string()))
        );
        assert!(matches!(item.get("playerScores"), Some(AttributeValue::M(_))));

        let decoded: SessionDocument = from_item(&item).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn absent_prompt_decodes_as_none() {
        let session = SessionDocument::new("ABC123".into(), "a".into(), vec![]);
        let mut item = to_item(&session).unwrap();
        item.remove("currentPromptBeingGuessed");
        item.remove("playerScores");
        let decoded: SessionDocument = from_item(&item).unwrap();
        assert!(decoded.current_prompt_being_guessed.is_none());
        assert!(decoded.player_scores.is_empty());
    }

    #[test]
    fn numbers_keep_their_kind() {
        assert_eq!(parse_number("42"), Value::from(42u64));
        assert_eq!(parse_number("-1"), Value::from(-1i64));
        assert_eq!(parse_number("13.5"), serde_json::json!(13.5));
        assert_eq!(parse_number("nope"), Value::Null);
    }
}
