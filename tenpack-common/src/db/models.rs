//! Database models
//!
//! Persisted rows and the typed metadata stored in their JSON columns.
//! Metadata is serialized only at the database boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{from_millis, to_millis};
use crate::Result;

/// Audit action recorded for each rewarded user
pub const AUDIT_ACTION_WEEKLY_REWARD: &str = "WEEKLY_REWARD_PAYOUT";

/// One row per paid-out week; its existence blocks any further payout for that week
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsPayout {
    pub id: String,
    pub week_start: DateTime<Utc>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl RewardsPayout {
    /// Build from raw `(id, week_start_ms, notes, created_at_ms)` columns
    pub fn from_row(row: (String, i64, String, i64)) -> Result<Self> {
        let (id, week_start, notes, created_at) = row;
        Ok(Self {
            id,
            week_start: from_millis(week_start)?,
            notes,
            created_at: from_millis(created_at)?,
        })
    }
}

/// Append-only ledger row: points earned by one user for one winning track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub id: String,
    pub user_id: String,
    pub week_start: DateTime<Utc>,
    pub points: i64,
    pub reason: String,
    pub metadata: RewardMetadata,
    pub created_at: DateTime<Utc>,
}

/// Stored in `rewards.metadata`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardMetadata {
    pub track_id: String,
    pub track_title: String,
    pub artist_id: String,
    pub rank: u32,
    pub payout_id: String,
}

/// Stored in `audit_logs.metadata` for [`AUDIT_ACTION_WEEKLY_REWARD`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMetadata {
    /// Week start, epoch milliseconds
    pub week_start: i64,
    pub total_points: i64,
    pub reward_count: usize,
    pub payout_id: String,
}

impl AuditMetadata {
    pub fn new(week_start: DateTime<Utc>, total_points: i64, reward_count: usize, payout_id: &str) -> Self {
        Self {
            week_start: to_millis(week_start),
            total_points,
            reward_count,
            payout_id: payout_id.to_string(),
        }
    }
}

/// Advisory fraud flag; never blocks a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudSignal {
    pub id: String,
    pub user_id: String,
    pub reason: String,
    pub score: f64,
    pub metadata: FraudMetadata,
    pub created_at: DateTime<Utc>,
}

/// Stored in `fraud_signals.metadata`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudMetadata {
    pub playlist_id: String,
    pub matching_playlist_ids: Vec<String>,
    pub matching_user_ids: Vec<String>,
    pub track_ids: Vec<String>,
}

/// Decode `artists.charted_weeks`
pub fn decode_charted_weeks(raw: &str) -> Result<Vec<i64>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

/// Add `week_start` to a charted-weeks list unless already present
///
/// Returns true when the list changed.
pub fn record_charted_week(weeks: &mut Vec<i64>, week_start: DateTime<Utc>) -> bool {
    let millis = to_millis(week_start);
    if weeks.contains(&millis) {
        return false;
    }
    weeks.push(millis);
    weeks.sort_unstable();
    true
}
