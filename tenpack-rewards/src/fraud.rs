//! Duplicate-playlist fraud signals
//!
//! Runs after a playlist submission is accepted. Looks for other playlists
//! created in the 30 minutes before it with exactly the same ten tracks, owned
//! by accounts created within an hour of the submission. Two or more such
//! matches write an advisory signal. Nothing here ever blocks or fails the
//! submission: errors are logged and swallowed.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tenpack_common::db::{FraudMetadata, FraudSignal};
use tenpack_common::{Error, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{FraudSignalRepository, PlaylistSnapshot};

/// Signal reason for coordinated identical submissions
pub const IDENTICAL_PACK_REASON: &str = "IDENTICAL_10_PACK_MULTIPLE_NEW_ACCOUNTS";

/// Fixed score attached to [`IDENTICAL_PACK_REASON`]
pub const IDENTICAL_PACK_SCORE: f64 = 0.8;

/// Tracks per submitted playlist
pub const PLAYLIST_SIZE: usize = 10;

/// How far back to look for duplicates
const DUPLICATE_WINDOW_MINUTES: i64 = 30;

/// Owner accounts created this close to the submission count as "new"
const NEW_ACCOUNT_WINDOW_HOURS: i64 = 1;

/// Matches needed before a signal is written
const MIN_SUSPICIOUS_MATCHES: usize = 2;

/// Candidates with exactly the submitted track set whose owners are new accounts
///
/// Candidates are first narrowed to supersets of the submitted tracks, then to
/// exact ten-track matches, then to owners created within an hour of
/// `submitted_at`. Playlists of `user_id` itself are ignored.
pub fn find_new_account_duplicates<'a>(
    candidates: &'a [PlaylistSnapshot],
    user_id: &str,
    track_ids: &[String],
    submitted_at: DateTime<Utc>,
) -> Vec<&'a PlaylistSnapshot> {
    let wanted: HashSet<&str> = track_ids.iter().map(String::as_str).collect();
    let new_account_window = Duration::hours(NEW_ACCOUNT_WINDOW_HOURS);

    candidates
        .iter()
        .filter(|c| c.user_id != user_id)
        .filter(|c| {
            let tracks: HashSet<&str> = c.track_ids.iter().map(String::as_str).collect();
            tracks.is_superset(&wanted)
                && tracks.len() == PLAYLIST_SIZE
                && c.track_ids.len() == PLAYLIST_SIZE
        })
        .filter(|c| (submitted_at - c.user_created_at).abs() <= new_account_window)
        .collect()
}

/// Advisory detector over an injected store
pub struct FraudDetector<S> {
    store: S,
}

impl<S: FraudSignalRepository> FraudDetector<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Best-effort check; returns the signal written, if any. Never fails.
    pub async fn check_for_fraud_signals(
        &self,
        playlist_id: &str,
        user_id: &str,
        track_ids: &[String],
    ) -> Option<FraudSignal> {
        match self.detect(playlist_id, user_id, track_ids).await {
            Ok(signal) => signal,
            Err(e) => {
                warn!(playlist_id, user_id, error = %e, "Fraud signal check failed");
                None
            }
        }
    }

    async fn detect(
        &self,
        playlist_id: &str,
        user_id: &str,
        track_ids: &[String],
    ) -> Result<Option<FraudSignal>> {
        let distinct: BTreeSet<&str> = track_ids.iter().map(String::as_str).collect();
        if track_ids.len() != PLAYLIST_SIZE || distinct.len() != PLAYLIST_SIZE {
            debug!(playlist_id, tracks = track_ids.len(), "Not a full ten-track pack, skipping");
            return Ok(None);
        }

        let playlist = self
            .store
            .find_playlist(playlist_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Playlist {}", playlist_id)))?;

        let submitted_at = playlist.created_at;
        let candidates = self
            .store
            .find_playlists_created_between(
                submitted_at - Duration::minutes(DUPLICATE_WINDOW_MINUTES),
                submitted_at,
                playlist_id,
            )
            .await?;

        let matches = find_new_account_duplicates(&candidates, user_id, track_ids, submitted_at);
        debug!(
            playlist_id,
            candidates = candidates.len(),
            matches = matches.len(),
            "Checked for identical packs"
        );

        if matches.len() < MIN_SUSPICIOUS_MATCHES {
            return Ok(None);
        }

        let matching_user_ids: BTreeSet<&str> = matches.iter().map(|m| m.user_id.as_str()).collect();
        let signal = FraudSignal {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            reason: IDENTICAL_PACK_REASON.to_string(),
            score: IDENTICAL_PACK_SCORE,
            metadata: FraudMetadata {
                playlist_id: playlist_id.to_string(),
                matching_playlist_ids: matches.iter().map(|m| m.id.clone()).collect(),
                matching_user_ids: matching_user_ids.into_iter().map(str::to_string).collect(),
                track_ids: track_ids.to_vec(),
            },
            created_at: tenpack_common::time::now(),
        };

        self.store.record_fraud_signal(&signal).await?;

        info!(
            playlist_id,
            user_id,
            matches = matches.len(),
            reason = IDENTICAL_PACK_REASON,
            "Fraud signal recorded"
        );

        Ok(Some(signal))
    }
}

impl<S: FraudSignalRepository + 'static> FraudDetector<S> {
    /// Run the check on a background task, detached from the submission path
    pub fn spawn_check(
        self: Arc<Self>,
        playlist_id: String,
        user_id: String,
        track_ids: Vec<String>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.check_for_fraud_signals(&playlist_id, &user_id, &track_ids)
                .await;
        })
    }
}
