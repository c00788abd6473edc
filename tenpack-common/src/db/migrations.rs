//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in the `schema_version` table.
//! Tables themselves are created by [`crate::db::init::create_schema`]; migrations
//! carry everything added on top of that baseline.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - They must remain stable for databases upgrading from older versions
//! 2. **Always add new migrations** - Create a new migration function for each schema change
//! 3. **Use ALTER TABLE / IF NOT EXISTS** - Preserve data and stay idempotent

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes for the weekly ranking and fraud queries
///
/// - Week submissions filter playlists on `(week_start, week_end)`
/// - The duplicate detector scans playlists by `created_at`
/// - Both join `playlist_items` by playlist; reward lookups go by track
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: Add ranking and fraud lookup indexes");

    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_playlists_week ON playlists(week_start, week_end)",
        "CREATE INDEX IF NOT EXISTS idx_playlists_created_at ON playlists(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_playlist_items_playlist ON playlist_items(playlist_id)",
        "CREATE INDEX IF NOT EXISTS idx_playlist_items_track ON playlist_items(track_id)",
        "CREATE INDEX IF NOT EXISTS idx_rewards_week_user ON rewards(week_start, user_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("  ✓ Created {} indexes", statements.len());
    Ok(())
}
