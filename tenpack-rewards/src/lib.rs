//! tenpack-rewards - weekly ranking, payout and fraud signal engines
//!
//! - [`ranking`]: pure Top-100 chart over submission events (all-time, hot, rising)
//! - [`rewards`]: exactly-once weekly points payout
//! - [`fraud`]: advisory duplicate-playlist detector
//! - [`db`]: repository traits and the SQLite store behind them

pub mod db;
pub mod error;
pub mod fraud;
pub mod ranking;
pub mod rewards;

pub use crate::db::{
    FraudSignalRepository, PayoutRepository, SqliteStore, SubmissionRecord, SubmissionRepository,
};
pub use crate::error::{RewardsError, RewardsResult};
pub use crate::fraud::FraudDetector;
pub use crate::ranking::{
    compute_top_tracks, compute_top_tracks_at, get_reward_points_for_rank,
    is_reward_eligible_rank, RankingMode, SubmissionEvent, TrackRank,
};
pub use crate::rewards::{RewardsEngine, RewardsSummary, RunCheck};
