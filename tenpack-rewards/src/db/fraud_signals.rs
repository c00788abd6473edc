//! Playlist lookups and fraud signal persistence for the duplicate detector

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tenpack_common::db::FraudSignal;
use tenpack_common::time::{from_millis, to_millis};
use tenpack_common::Result;

use super::{FraudSignalRepository, PlaylistSnapshot, SqliteStore};

/// (playlist id, owner id, playlist created_at, owner created_at)
type PlaylistRow = (String, String, i64, i64);

fn snapshot(row: PlaylistRow, track_ids: Vec<String>) -> Result<PlaylistSnapshot> {
    let (id, user_id, created_at, user_created_at) = row;
    Ok(PlaylistSnapshot {
        id,
        user_id,
        user_created_at: from_millis(user_created_at)?,
        created_at: from_millis(created_at)?,
        track_ids,
    })
}

#[async_trait]
impl FraudSignalRepository for SqliteStore {
    async fn find_playlist(&self, playlist_id: &str) -> Result<Option<PlaylistSnapshot>> {
        let row: Option<PlaylistRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.user_id, p.created_at, u.created_at
            FROM playlists p
            JOIN users u ON u.id = p.user_id
            WHERE p.id = ?
            "#,
        )
        .bind(playlist_id)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let track_ids: Vec<String> = sqlx::query_scalar(
            "SELECT track_id FROM playlist_items WHERE playlist_id = ? ORDER BY position",
        )
        .bind(playlist_id)
        .fetch_all(self.pool())
        .await?;

        snapshot(row, track_ids).map(Some)
    }

    async fn find_playlists_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_playlist_id: &str,
    ) -> Result<Vec<PlaylistSnapshot>> {
        let start = to_millis(start);
        let end = to_millis(end);

        let rows: Vec<PlaylistRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.user_id, p.created_at, u.created_at
            FROM playlists p
            JOIN users u ON u.id = p.user_id
            WHERE p.created_at BETWEEN ? AND ? AND p.id != ?
            ORDER BY p.created_at, p.id
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(exclude_playlist_id)
        .fetch_all(self.pool())
        .await?;

        let items: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT pi.playlist_id, pi.track_id
            FROM playlist_items pi
            JOIN playlists p ON p.id = pi.playlist_id
            WHERE p.created_at BETWEEN ? AND ? AND p.id != ?
            ORDER BY pi.playlist_id, pi.position
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(exclude_playlist_id)
        .fetch_all(self.pool())
        .await?;

        let mut tracks_by_playlist: HashMap<String, Vec<String>> = HashMap::new();
        for (playlist_id, track_id) in items {
            tracks_by_playlist.entry(playlist_id).or_default().push(track_id);
        }

        rows.into_iter()
            .map(|row| {
                let track_ids = tracks_by_playlist.remove(&row.0).unwrap_or_default();
                snapshot(row, track_ids)
            })
            .collect()
    }

    async fn record_fraud_signal(&self, signal: &FraudSignal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fraud_signals (id, user_id, reason, score, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.id)
        .bind(&signal.user_id)
        .bind(&signal.reason)
        .bind(signal.score)
        .bind(serde_json::to_string(&signal.metadata)?)
        .bind(to_millis(signal.created_at))
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
