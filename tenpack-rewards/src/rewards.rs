//! Rewards distribution engine
//!
//! Converts a finished week's ranking into an exactly-once points payout.
//!
//! **Run sequence:**
//! 1. Normalize the requested date to its week and reject if a payout exists
//! 2. Reject weeks that have not ended
//! 3. Load the week's submissions (minus same-session signups); reject if none
//! 4. Rank all-time and pick ranks 1-3 as winners
//! 5. One reward per distinct (user, winning track), summed per user
//! 6. Commit everything in a single store transaction
//!
//! Precondition failures write nothing. A failed commit rolls back entirely, so
//! re-invoking with the same week either redoes the work or fails fast at step 1.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tenpack_common::db::RewardMetadata;
use tenpack_common::time::{self, week_bounds};
use tenpack_common::WeekBounds;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{PayoutRepository, SubmissionRecord, SubmissionRepository};
use crate::error::{RewardsError, RewardsResult};
use crate::ranking::{
    compute_top_tracks_at, get_reward_points_for_rank, is_reward_eligible_rank, RankingMode,
    TrackRank,
};

/// Playlists created within this long of their owner's signup are ignored
pub const MIN_ACCOUNT_AGE_MINUTES: i64 = 5;

/// Ranking mode used for real payouts
pub const PAYOUT_RANKING_MODE: RankingMode = RankingMode::AllTime;

pub fn min_account_age() -> Duration {
    Duration::minutes(MIN_ACCOUNT_AGE_MINUTES)
}

/// A winning track and the distinct users who picked it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningTrack {
    pub track_id: String,
    pub title: String,
    pub artist_id: String,
    pub rank: u32,
    pub points: i64,
    pub user_ids: Vec<String>,
}

/// One reward row to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardGrant {
    pub reward_id: String,
    pub user_id: String,
    pub points: i64,
    pub reason: String,
    pub metadata: RewardMetadata,
}

/// Per-user aggregate across all of their grants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserTotal {
    pub points: i64,
    pub reward_count: usize,
}

/// Everything a payout transaction writes, computed before it opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutPlan {
    pub payout_id: String,
    pub week_start: DateTime<Utc>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub winners: Vec<WinningTrack>,
    pub grants: Vec<RewardGrant>,
}

impl PayoutPlan {
    /// Balance increment per user (a user may win with several tracks)
    pub fn user_totals(&self) -> BTreeMap<String, UserTotal> {
        let mut totals: BTreeMap<String, UserTotal> = BTreeMap::new();
        for grant in &self.grants {
            let total = totals.entry(grant.user_id.clone()).or_default();
            total.points += grant.points;
            total.reward_count += 1;
        }
        totals
    }

    pub fn charted_artist_ids(&self) -> BTreeSet<&str> {
        self.winners.iter().map(|w| w.artist_id.as_str()).collect()
    }

    pub fn total_points(&self) -> i64 {
        self.grants.iter().map(|g| g.points).sum()
    }
}

/// Per-track line of a payout summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopTrackSummary {
    pub track_id: String,
    pub rank: u32,
    pub points: i64,
    pub user_count: usize,
}

/// Result of a committed payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsSummary {
    pub week_start: DateTime<Utc>,
    /// Reward rows written
    pub total_rewards_distributed: usize,
    pub total_points_awarded: i64,
    pub top_tracks: Vec<TopTrackSummary>,
    pub payout_id: String,
}

/// Pre-flight result of [`RewardsEngine::can_run_rewards_for_week`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCheck {
    pub week_start: DateTime<Utc>,
    pub can_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub submission_count: usize,
}

/// Human-readable reward reason embedding title and rank
pub fn reward_reason(title: &str, rank: u32, week_start: DateTime<Utc>) -> String {
    format!(
        "\"{}\" finished #{} in the week of {}",
        title,
        rank,
        week_start.format("%Y-%m-%d")
    )
}

fn week_label(bounds: &WeekBounds) -> String {
    bounds.start.format("%Y-%m-%d").to_string()
}

/// Select winners from a ranking and expand them into reward grants
///
/// Each distinct submitter of a winning track gets exactly one grant for it,
/// however many of their playlists contained the track.
pub fn build_payout_plan(
    bounds: &WeekBounds,
    ranked: &[TrackRank],
    records: &[SubmissionRecord],
    now: DateTime<Utc>,
) -> PayoutPlan {
    let payout_id = Uuid::new_v4().to_string();

    // track -> (title, artist, distinct submitters)
    let mut by_track: HashMap<&str, (&str, &str, BTreeSet<&str>)> = HashMap::new();
    for record in records {
        by_track
            .entry(record.track_id.as_str())
            .or_insert_with(|| (record.track_title.as_str(), record.artist_id.as_str(), BTreeSet::new()))
            .2
            .insert(record.user_id.as_str());
    }

    let mut winners = Vec::new();
    let mut grants = Vec::new();

    for track in ranked.iter().filter(|t| is_reward_eligible_rank(t.rank)) {
        let Some((title, artist_id, users)) = by_track.get(track.track_id.as_str()) else {
            warn!(track_id = %track.track_id, "Ranked track missing from submissions, skipping");
            continue;
        };
        let points = get_reward_points_for_rank(track.rank);

        for user_id in users {
            grants.push(RewardGrant {
                reward_id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                points,
                reason: reward_reason(title, track.rank, bounds.start),
                metadata: RewardMetadata {
                    track_id: track.track_id.clone(),
                    track_title: title.to_string(),
                    artist_id: artist_id.to_string(),
                    rank: track.rank,
                    payout_id: payout_id.clone(),
                },
            });
        }

        winners.push(WinningTrack {
            track_id: track.track_id.clone(),
            title: title.to_string(),
            artist_id: artist_id.to_string(),
            rank: track.rank,
            points,
            user_ids: users.iter().map(|u| u.to_string()).collect(),
        });
    }

    let notes = format!(
        "Weekly rewards for {}: {} winning tracks, {} rewards",
        week_label(bounds),
        winners.len(),
        grants.len()
    );

    PayoutPlan {
        payout_id,
        week_start: bounds.start,
        notes,
        created_at: now,
        winners,
        grants,
    }
}

fn summarize(plan: &PayoutPlan) -> RewardsSummary {
    RewardsSummary {
        week_start: plan.week_start,
        total_rewards_distributed: plan.grants.len(),
        total_points_awarded: plan.total_points(),
        top_tracks: plan
            .winners
            .iter()
            .map(|w| TopTrackSummary {
                track_id: w.track_id.clone(),
                rank: w.rank,
                points: w.points,
                user_count: w.user_ids.len(),
            })
            .collect(),
        payout_id: plan.payout_id.clone(),
    }
}

/// Weekly payout orchestrator over an injected store
pub struct RewardsEngine<S> {
    store: S,
}

impl<S> RewardsEngine<S>
where
    S: SubmissionRepository + PayoutRepository,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Pay out the week containing `week_start`
    pub async fn apply_weekly_rewards(
        &self,
        week_start: DateTime<Utc>,
    ) -> RewardsResult<RewardsSummary> {
        self.apply_weekly_rewards_at(week_start, time::now()).await
    }

    pub async fn apply_weekly_rewards_at(
        &self,
        week_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RewardsResult<RewardsSummary> {
        let bounds = week_bounds(week_start);
        let records = self.check_preconditions(&bounds, now).await?;

        let events: Vec<_> = records.iter().map(SubmissionRecord::to_event).collect();
        let ranked = compute_top_tracks_at(&events, PAYOUT_RANKING_MODE, now);
        let plan = build_payout_plan(&bounds, &ranked, &records, now);

        match self.store.commit_payout(&plan).await {
            Ok(_) => {}
            Err(tenpack_common::Error::Conflict(_)) => {
                warn!(week_start = %bounds.start, "Concurrent payout won the race");
                return Err(RewardsError::AlreadyPaidOut(week_label(&bounds)));
            }
            Err(e) => {
                error!(week_start = %bounds.start, error = %e, "Payout transaction failed");
                return Err(e.into());
            }
        }

        let summary = summarize(&plan);
        info!(
            week_start = %bounds.start,
            payout_id = %summary.payout_id,
            rewards = summary.total_rewards_distributed,
            points = summary.total_points_awarded,
            winners = summary.top_tracks.len(),
            "Weekly rewards applied"
        );

        Ok(summary)
    }

    /// Side-effect-free pre-flight of the payout preconditions
    pub async fn can_run_rewards_for_week(
        &self,
        week_start: DateTime<Utc>,
    ) -> RewardsResult<RunCheck> {
        self.can_run_rewards_for_week_at(week_start, time::now()).await
    }

    pub async fn can_run_rewards_for_week_at(
        &self,
        week_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RewardsResult<RunCheck> {
        let bounds = week_bounds(week_start);

        match self.check_preconditions(&bounds, now).await {
            Ok(records) => Ok(RunCheck {
                week_start: bounds.start,
                can_run: true,
                reason: None,
                submission_count: records.len(),
            }),
            Err(e) if e.is_precondition() => Ok(RunCheck {
                week_start: bounds.start,
                can_run: false,
                reason: Some(e.to_string()),
                submission_count: 0,
            }),
            Err(e) => Err(e),
        }
    }

    /// Run the read-only checks, returning the week's eligible submissions
    async fn check_preconditions(
        &self,
        bounds: &WeekBounds,
        now: DateTime<Utc>,
    ) -> RewardsResult<Vec<SubmissionRecord>> {
        let label = week_label(bounds);

        if let Some(existing) = self.store.find_payout(bounds.start).await? {
            warn!(week_start = %bounds.start, payout_id = %existing.id, "Week already paid out");
            return Err(RewardsError::AlreadyPaidOut(label));
        }

        if !bounds.has_ended(now) {
            warn!(week_start = %bounds.start, week_end = %bounds.end, "Week has not ended");
            return Err(RewardsError::WeekNotEnded(label));
        }

        let records = self
            .store
            .find_week_submissions(bounds, min_account_age())
            .await?;

        if records.is_empty() {
            warn!(week_start = %bounds.start, "No eligible submissions");
            return Err(RewardsError::NoSubmissions(label));
        }

        Ok(records)
    }
}
