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

use anyhow::Context;
use promptparty_common::{LeaderboardEntry, PlayerKey, SessionDocument};
use serde_json::Value;
use tracing::info;

use crate::AppState;

/// Adds every current member's session total to their lifetime score in one all-or-nothing write.
pub async fn fold_lifetime(state: &AppState, session: &SessionDocument) -> anyhow::Result<()> {
    let totals: Vec<(PlayerKey, u64)> = session
        .ranked_scores()
        .into_iter()
        .map(|entry| (entry.player, entry.score))
        .collect();
    if totals.is_empty() {
        return Ok(());
    }
    state
        .store
        .fold_lifetime_scores(&totals)
        .await
        .context("failed to fold session scores into lifetime totals")?;
    info!(lobby_id = %session.lobby_id, players = totals.len(), "lifetime scores updated");
    Ok(())
}

/// A positive integer (fractions are floored); anything else means `default`.
pub fn resolve_limit(raw: Option<&Value>, default: usize) -> usize {
    let Some(raw) = raw else {
        return default;
    };
    if let Some(limit) = raw.as_u64() {
        return if limit >= 1 { limit as usize } else { default };
    }
    match raw.as_f64() {
        Some(limit) if limit >= 1.0 && limit.is_finite() => limit.floor() as usize,
        _ => default,
    }
}

pub async fn lifetime_leaderboard(
    state: &AppState,
    limit: usize,
) -> anyhow::Result<Vec<LeaderboardEntry>> {
    let players = state
        .store
        .top_players(limit)
        .await
        .context("failed to query lifetime leaderboard")?;
    Ok(players
        .into_iter()
        .enumerate()
        .map(|(index, record)| LeaderboardEntry {
            rank: index as u32 + 1,
            display_name: if record.display_name.trim().is_empty() {
                record.player.clone()
            } else {
                record.display_name
            },
            username: record.player,
            lifetime_score: record.lifetime_score,
        })
        .collect())
}
