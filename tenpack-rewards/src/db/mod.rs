//! Persistence seam for the rewards engines
//!
//! The engines only see the repository traits below; [`SqliteStore`] is the
//! production implementation over the shared `tenpack.db`.

pub mod fraud_signals;
pub mod payouts;
pub mod submissions;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tenpack_common::db::{FraudSignal, RewardEntry, RewardsPayout};
use tenpack_common::{Result, WeekBounds};

use crate::ranking::SubmissionEvent;
use crate::rewards::PayoutPlan;

/// One playlist item joined to its playlist, submitting user and track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub playlist_id: String,
    pub track_id: String,
    pub track_title: String,
    pub artist_id: String,
    pub user_id: String,
    /// From the submitting user's profile
    pub country: Option<String>,
    /// Creation time of the parent playlist
    pub submitted_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn to_event(&self) -> SubmissionEvent {
        SubmissionEvent {
            track_id: self.track_id.clone(),
            user_id: self.user_id.clone(),
            country: self.country.clone(),
            submitted_at: self.submitted_at,
        }
    }
}

/// A playlist with its owner's account age and ordered track ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSnapshot {
    pub id: String,
    pub user_id: String,
    pub user_created_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub track_ids: Vec<String>,
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Items of playlists belonging exactly to `bounds`, skipping playlists
    /// created less than `min_account_age` after their owner's account
    async fn find_week_submissions(
        &self,
        bounds: &WeekBounds,
        min_account_age: Duration,
    ) -> Result<Vec<SubmissionRecord>>;
}

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    async fn find_payout(&self, week_start: DateTime<Utc>) -> Result<Option<RewardsPayout>>;

    /// Persist a payout atomically: payout row, reward rows, balance
    /// increments, artist chart history and audit rows commit together or not
    /// at all. A second payout for the same week yields `Error::Conflict`.
    async fn commit_payout(&self, plan: &PayoutPlan) -> Result<RewardsPayout>;

    async fn find_week_rewards(&self, week_start: DateTime<Utc>) -> Result<Vec<RewardEntry>>;
}

#[async_trait]
pub trait FraudSignalRepository: Send + Sync {
    async fn find_playlist(&self, playlist_id: &str) -> Result<Option<PlaylistSnapshot>>;

    /// Playlists created in `[start, end]`, excluding `exclude_playlist_id`
    async fn find_playlists_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_playlist_id: &str,
    ) -> Result<Vec<PlaylistSnapshot>>;

    async fn record_fraud_signal(&self, signal: &FraudSignal) -> Result<()>;
}

/// SQLite-backed store implementing every repository trait
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
