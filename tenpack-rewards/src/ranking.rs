//! Track ranking engine
//!
//! Turns raw submission events into a deterministic Top-N chart. Pure: no I/O,
//! no locking, operates on an in-memory snapshot.
//!
//! **Algorithm:**
//! 1. Group events by track
//! 2. Aggregate per track: submission count, distinct users, distinct countries,
//!    earliest submission
//! 3. Score according to the [`RankingMode`]
//! 4. Sort: score desc, distinct users desc, distinct countries desc, earliest
//!    submission asc, track id asc
//! 5. Assign ranks over the full list (equal score shares the predecessor's rank)
//! 6. Truncate to [`TOP_TRACKS_LIMIT`]

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::f64::consts::LN_2;
use std::fmt;
use std::str::FromStr;

/// Maximum number of ranked tracks returned
pub const TOP_TRACKS_LIMIT: usize = 100;

/// Hot mode: submission weight halves every 12 hours
const HOT_HALF_LIFE_HOURS: f64 = 12.0;

/// Rising mode: trailing window counted as "recent"
const RISING_WINDOW_HOURS: i64 = 24;

/// Rising mode: cap on the recent/older growth multiplier
const RISING_MAX_GROWTH_BOOST: f64 = 5.0;

/// Points per reward-eligible rank (index 0 = rank 1)
const REWARD_POINTS: [i64; 3] = [50, 30, 20];

/// One track pick by one user, reconstructed from a playlist item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionEvent {
    pub track_id: String,
    pub user_id: String,
    pub country: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Scoring mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankingMode {
    /// Raw popularity: score = submission count
    #[default]
    AllTime,
    /// Recency-decayed popularity (12h half-life)
    Hot,
    /// Submission velocity over the trailing 24h, boosted by growth
    Rising,
}

impl RankingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingMode::AllTime => "all-time",
            RankingMode::Hot => "hot",
            RankingMode::Rising => "rising",
        }
    }
}

impl fmt::Display for RankingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankingMode {
    type Err = tenpack_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all-time" | "alltime" | "all_time" => Ok(RankingMode::AllTime),
            "hot" => Ok(RankingMode::Hot),
            "rising" => Ok(RankingMode::Rising),
            other => Err(tenpack_common::Error::InvalidInput(format!(
                "Unknown ranking mode '{}' (expected all-time, hot or rising)",
                other
            ))),
        }
    }
}

/// Ranked track (computed per run, never persisted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRank {
    pub track_id: String,
    /// Submission events, not deduplicated
    pub submitter_count: usize,
    pub unique_submitters: usize,
    pub unique_countries: usize,
    pub earliest_appearance: DateTime<Utc>,
    pub score: f64,
    /// 1-based; equal scores share a rank
    pub rank: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hot_score: Option<f64>,
}

/// Points awarded for a rank (0 when not reward-eligible)
pub fn get_reward_points_for_rank(rank: u32) -> i64 {
    if is_reward_eligible_rank(rank) {
        REWARD_POINTS[(rank - 1) as usize]
    } else {
        0
    }
}

/// Only ranks 1-3 earn points
pub fn is_reward_eligible_rank(rank: u32) -> bool {
    (1..=REWARD_POINTS.len() as u32).contains(&rank)
}

/// Rank tracks as of the current instant
pub fn compute_top_tracks(submissions: &[SubmissionEvent], mode: RankingMode) -> Vec<TrackRank> {
    compute_top_tracks_at(submissions, mode, Utc::now())
}

/// Rank tracks as of `now` (hot and rising modes depend on it)
pub fn compute_top_tracks_at(
    submissions: &[SubmissionEvent],
    mode: RankingMode,
    now: DateTime<Utc>,
) -> Vec<TrackRank> {
    let mut groups: BTreeMap<&str, Vec<&SubmissionEvent>> = BTreeMap::new();
    for event in submissions {
        groups.entry(event.track_id.as_str()).or_default().push(event);
    }

    let mut ranked: Vec<TrackRank> = groups
        .into_iter()
        .map(|(track_id, events)| score_group(track_id, &events, mode, now))
        .collect();

    ranked.sort_by(compare_tracks);
    assign_ranks(&mut ranked);

    // Ranks depend on the full list, so truncation must come last
    ranked.truncate(TOP_TRACKS_LIMIT);

    tracing::debug!(
        mode = %mode,
        events = submissions.len(),
        ranked = ranked.len(),
        "Computed top tracks"
    );

    ranked
}

fn score_group(
    track_id: &str,
    events: &[&SubmissionEvent],
    mode: RankingMode,
    now: DateTime<Utc>,
) -> TrackRank {
    let submitter_count = events.len();
    let unique_submitters = events
        .iter()
        .map(|e| e.user_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let unique_countries = events
        .iter()
        .filter_map(|e| e.country.as_deref())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect::<HashSet<_>>()
        .len();
    let earliest_appearance = events
        .iter()
        .map(|e| e.submitted_at)
        .min()
        .unwrap_or(now);

    let count = submitter_count as f64;
    let (score, velocity, hot_score) = match mode {
        RankingMode::AllTime => (count, None, None),
        RankingMode::Hot => {
            let hot = hot_score(events, now);
            (hot * count, None, Some(hot))
        }
        RankingMode::Rising => {
            let velocity = rising_velocity(events, now);
            (velocity * count, Some(velocity), None)
        }
    };

    TrackRank {
        track_id: track_id.to_string(),
        submitter_count,
        unique_submitters,
        unique_countries,
        earliest_appearance,
        score,
        rank: 0,
        velocity,
        hot_score,
    }
}

fn hours_since(instant: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - instant).num_milliseconds() as f64 / 3_600_000.0
}

/// Sum of exponentially decayed weights, one per event
fn hot_score(events: &[&SubmissionEvent], now: DateTime<Utc>) -> f64 {
    events
        .iter()
        .map(|e| (-LN_2 * hours_since(e.submitted_at, now) / HOT_HALF_LIFE_HOURS).exp())
        .sum()
}

/// Recent events per hour, multiplied by min(recent / older, 5) when older events exist
fn rising_velocity(events: &[&SubmissionEvent], now: DateTime<Utc>) -> f64 {
    let window_start = now - Duration::hours(RISING_WINDOW_HOURS);
    let recent = events.iter().filter(|e| e.submitted_at >= window_start).count() as f64;
    let older = events.len() as f64 - recent;

    let velocity = recent / RISING_WINDOW_HOURS as f64;
    if older > 0.0 {
        velocity * (recent / older).min(RISING_MAX_GROWTH_BOOST)
    } else {
        velocity
    }
}

fn compare_tracks(a: &TrackRank, b: &TrackRank) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.unique_submitters.cmp(&a.unique_submitters))
        .then_with(|| b.unique_countries.cmp(&a.unique_countries))
        .then_with(|| a.earliest_appearance.cmp(&b.earliest_appearance))
        .then_with(|| a.track_id.cmp(&b.track_id))
}

/// Competition ranking on score alone: tie-breakers order tied tracks but never split their rank
fn assign_ranks(sorted: &mut [TrackRank]) {
    for index in 0..sorted.len() {
        sorted[index].rank = if index > 0 && sorted[index].score == sorted[index - 1].score {
            sorted[index - 1].rank
        } else {
            index as u32 + 1
        };
    }
}
