//! Weekly submission queries

use async_trait::async_trait;
use chrono::Duration;
use tenpack_common::time::{from_millis, to_millis};
use tenpack_common::{Result, WeekBounds};

use super::{SqliteStore, SubmissionRecord, SubmissionRepository};

type SubmissionRow = (String, String, String, String, String, Option<String>, i64);

#[async_trait]
impl SubmissionRepository for SqliteStore {
    async fn find_week_submissions(
        &self,
        bounds: &WeekBounds,
        min_account_age: Duration,
    ) -> Result<Vec<SubmissionRecord>> {
        // Accounts younger than min_account_age at playlist creation are excluded
        let rows: Vec<SubmissionRow> = sqlx::query_as(
            r#"
            SELECT p.id, pi.track_id, t.title, t.artist_id, u.id, u.country, p.created_at
            FROM playlist_items pi
            JOIN playlists p ON p.id = pi.playlist_id
            JOIN users u ON u.id = p.user_id
            JOIN tracks t ON t.id = pi.track_id
            WHERE p.week_start = ? AND p.week_end = ?
              AND p.created_at - u.created_at >= ?
            ORDER BY p.created_at, p.id, pi.position
            "#,
        )
        .bind(to_millis(bounds.start))
        .bind(to_millis(bounds.end))
        .bind(min_account_age.num_milliseconds())
        .fetch_all(self.pool())
        .await?;

        tracing::debug!(
            week_start = %bounds.start,
            rows = rows.len(),
            "Loaded week submissions"
        );

        rows.into_iter()
            .map(
                |(playlist_id, track_id, track_title, artist_id, user_id, country, created_at)| {
                    Ok(SubmissionRecord {
                        playlist_id,
                        track_id,
                        track_title,
                        artist_id,
                        user_id,
                        country,
                        submitted_at: from_millis(created_at)?,
                    })
                },
            )
            .collect()
    }
}
