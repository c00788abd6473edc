//! Payout persistence
//!
//! Everything a payout writes happens inside one transaction. Returning early
//! with `?` drops the transaction, which rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tenpack_common::db::{
    decode_charted_weeks, record_charted_week, AuditMetadata, RewardEntry, RewardMetadata,
    RewardsPayout, AUDIT_ACTION_WEEKLY_REWARD,
};
use tenpack_common::time::{from_millis, to_millis};
use tenpack_common::{Error, Result};
use tracing::{debug, info};
use uuid::Uuid;

use super::{PayoutRepository, SqliteStore};
use crate::rewards::PayoutPlan;

#[async_trait]
impl PayoutRepository for SqliteStore {
    async fn find_payout(&self, week_start: DateTime<Utc>) -> Result<Option<RewardsPayout>> {
        let row: Option<(String, i64, String, i64)> = sqlx::query_as(
            "SELECT id, week_start, notes, created_at FROM rewards_payouts WHERE week_start = ?",
        )
        .bind(to_millis(week_start))
        .fetch_optional(self.pool())
        .await?;

        row.map(RewardsPayout::from_row).transpose()
    }

    async fn commit_payout(&self, plan: &PayoutPlan) -> Result<RewardsPayout> {
        let mut tx = self.pool().begin().await?;
        let week_start = to_millis(plan.week_start);
        let created_at = to_millis(plan.created_at);

        // Unique week_start: the losing side of a concurrent run fails here
        sqlx::query(
            "INSERT INTO rewards_payouts (id, week_start, notes, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&plan.payout_id)
        .bind(week_start)
        .bind(&plan.notes)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::from_write(e, "Payout for this week"))?;

        for grant in &plan.grants {
            sqlx::query(
                r#"
                INSERT INTO rewards (id, user_id, week_start, points, reason, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&grant.reward_id)
            .bind(&grant.user_id)
            .bind(week_start)
            .bind(grant.points)
            .bind(&grant.reason)
            .bind(serde_json::to_string(&grant.metadata)?)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        let totals = plan.user_totals();

        for (user_id, total) in &totals {
            let result = sqlx::query("UPDATE users SET points = points + ? WHERE id = ?")
                .bind(total.points)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("User {}", user_id)));
            }
        }

        for artist_id in plan.charted_artist_ids() {
            append_charted_week(&mut tx, artist_id, plan.week_start).await?;
        }

        for (user_id, total) in &totals {
            let metadata = AuditMetadata::new(
                plan.week_start,
                total.points,
                total.reward_count,
                &plan.payout_id,
            );

            sqlx::query(
                "INSERT INTO audit_logs (id, user_id, action, metadata, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(AUDIT_ACTION_WEEKLY_REWARD)
            .bind(serde_json::to_string(&metadata)?)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            payout_id = %plan.payout_id,
            week_start = %plan.week_start,
            rewards = plan.grants.len(),
            users = totals.len(),
            "Committed payout transaction"
        );

        Ok(RewardsPayout {
            id: plan.payout_id.clone(),
            week_start: plan.week_start,
            notes: plan.notes.clone(),
            created_at: plan.created_at,
        })
    }

    async fn find_week_rewards(&self, week_start: DateTime<Utc>) -> Result<Vec<RewardEntry>> {
        let rows: Vec<(String, String, i64, i64, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, user_id, week_start, points, reason, metadata, created_at
            FROM rewards
            WHERE week_start = ?
            ORDER BY points DESC, user_id
            "#,
        )
        .bind(to_millis(week_start))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(id, user_id, week_start, points, reason, metadata, created_at)| {
                Ok(RewardEntry {
                    id,
                    user_id,
                    week_start: from_millis(week_start)?,
                    points,
                    reason,
                    metadata: serde_json::from_str::<RewardMetadata>(&metadata)?,
                    created_at: from_millis(created_at)?,
                })
            })
            .collect()
    }
}

/// Add the week to an artist's chart history unless already recorded
async fn append_charted_week(
    tx: &mut Transaction<'_, Sqlite>,
    artist_id: &str,
    week_start: DateTime<Utc>,
) -> Result<()> {
    let raw: Option<String> = sqlx::query_scalar("SELECT charted_weeks FROM artists WHERE id = ?")
        .bind(artist_id)
        .fetch_optional(&mut **tx)
        .await?;

    let raw = raw.ok_or_else(|| Error::NotFound(format!("Artist {}", artist_id)))?;
    let mut weeks = decode_charted_weeks(&raw)?;

    if !record_charted_week(&mut weeks, week_start) {
        debug!(artist_id, "Week already in chart history");
        return Ok(());
    }

    sqlx::query("UPDATE artists SET charted_weeks = ? WHERE id = ?")
        .bind(serde_json::to_string(&weeks)?)
        .bind(artist_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
