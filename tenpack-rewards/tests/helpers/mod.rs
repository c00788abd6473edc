//! Test helper utilities
//!
//! Shared fixtures for tenpack-rewards integration tests: a throwaway
//! database file plus seeding and inspection helpers.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tenpack_common::db::init::init_database;
use tenpack_common::time::{to_millis, week_bounds};
use tenpack_common::WeekBounds;
use tenpack_rewards::SqliteStore;

/// Temporary database; the TempDir must outlive the pool
pub struct TestDb {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub store: SqliteStore,
}

pub async fn create_test_db() -> Result<TestDb> {
    let dir = TempDir::new()?;
    let pool = init_database(&dir.path().join("tenpack.db")).await?;
    let store = SqliteStore::new(pool.clone());

    Ok(TestDb {
        _dir: dir,
        pool,
        store,
    })
}

/// Week of Monday 2024-03-11
pub fn test_week() -> WeekBounds {
    week_bounds(Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap())
}

/// An instant safely after [`test_week`] has ended
pub fn after_week() -> DateTime<Utc> {
    test_week().end + Duration::days(1)
}

/// Wednesday noon of [`test_week`]
pub fn midweek() -> DateTime<Utc> {
    test_week().start + Duration::days(2) + Duration::hours(12)
}

/// Long-standing account creation time
pub fn established() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub async fn seed_user(
    pool: &SqlitePool,
    id: &str,
    country: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO users (id, username, country, points, created_at) VALUES (?, ?, ?, 0, ?)")
        .bind(id)
        .bind(format!("user-{}", id))
        .bind(country)
        .bind(to_millis(created_at))
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert a track (and its artist, once)
pub async fn seed_track(pool: &SqlitePool, track_id: &str, artist_id: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO artists (id, name) VALUES (?, ?)")
        .bind(artist_id)
        .bind(format!("Artist {}", artist_id))
        .execute(pool)
        .await?;

    sqlx::query("INSERT INTO tracks (id, title, artist_id) VALUES (?, ?, ?)")
        .bind(track_id)
        .bind(format!("Song {}", track_id))
        .bind(artist_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert tracks named by id, each by its own artist `artist-<id>`
pub async fn seed_tracks(pool: &SqlitePool, track_ids: &[&str]) -> Result<()> {
    for id in track_ids {
        seed_track(pool, id, &format!("artist-{}", id)).await?;
    }
    Ok(())
}

/// Insert a playlist for `bounds` with its items in order
pub async fn seed_playlist(
    pool: &SqlitePool,
    id: &str,
    user_id: &str,
    bounds: &WeekBounds,
    created_at: DateTime<Utc>,
    track_ids: &[&str],
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO playlists (id, user_id, category, week_start, week_end, created_at)
        VALUES (?, ?, 'weekly', ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(to_millis(bounds.start))
    .bind(to_millis(bounds.end))
    .bind(to_millis(created_at))
    .execute(pool)
    .await?;

    for (position, track_id) in track_ids.iter().enumerate() {
        sqlx::query("INSERT INTO playlist_items (playlist_id, track_id, position) VALUES (?, ?, ?)")
            .bind(id)
            .bind(track_id)
            .bind(position as i64)
            .execute(pool)
            .await?;
    }
    Ok(())
}

pub async fn user_points(pool: &SqlitePool, user_id: &str) -> i64 {
    sqlx::query_scalar("SELECT points FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn charted_weeks(pool: &SqlitePool, artist_id: &str) -> Vec<i64> {
    let raw: String = sqlx::query_scalar("SELECT charted_weeks FROM artists WHERE id = ?")
        .bind(artist_id)
        .fetch_one(pool)
        .await
        .unwrap();
    serde_json::from_str(&raw).unwrap()
}
