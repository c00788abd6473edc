//! Integration tests for the weekly rewards engine
//!
//! Runs the engine against a real SQLite file to cover the payout
//! transaction, idempotency, rollback and concurrent runs.

mod helpers;

use chrono::Duration;
use helpers::*;
use tenpack_common::db::AUDIT_ACTION_WEEKLY_REWARD;
use tenpack_common::time::to_millis;
use tenpack_rewards::{PayoutRepository, RewardsEngine, RewardsError};

/// u1 [A, B, C], u2 [A, B], u3 [A]: A rank 1, B rank 2, C rank 3
async fn seed_basic_week(db: &TestDb) {
    let week = test_week();
    for user in ["u1", "u2", "u3"] {
        seed_user(&db.pool, user, Some("US"), established()).await.unwrap();
    }
    seed_tracks(&db.pool, &["A", "B", "C", "D"]).await.unwrap();

    seed_playlist(&db.pool, "p1", "u1", &week, midweek(), &["A", "B", "C"]).await.unwrap();
    seed_playlist(&db.pool, "p2", "u2", &week, midweek() + Duration::hours(1), &["A", "B"])
        .await
        .unwrap();
    seed_playlist(&db.pool, "p3", "u3", &week, midweek() + Duration::hours(2), &["A"])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_basic_payout() {
    let db = create_test_db().await.unwrap();
    seed_basic_week(&db).await;
    let engine = RewardsEngine::new(db.store.clone());

    let summary = engine
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await
        .unwrap();

    assert_eq!(summary.week_start, test_week().start);
    assert_eq!(summary.total_rewards_distributed, 6);
    assert_eq!(summary.total_points_awarded, 3 * 50 + 2 * 30 + 20);

    let top: Vec<(&str, u32, i64, usize)> = summary
        .top_tracks
        .iter()
        .map(|t| (t.track_id.as_str(), t.rank, t.points, t.user_count))
        .collect();
    assert_eq!(top, vec![("A", 1, 50, 3), ("B", 2, 30, 2), ("C", 3, 20, 1)]);

    assert_eq!(user_points(&db.pool, "u1").await, 100);
    assert_eq!(user_points(&db.pool, "u2").await, 80);
    assert_eq!(user_points(&db.pool, "u3").await, 50);

    assert_eq!(count_rows(&db.pool, "rewards_payouts").await, 1);
    assert_eq!(count_rows(&db.pool, "rewards").await, 6);
    assert_eq!(count_rows(&db.pool, "audit_logs").await, 3);

    let week_ms = to_millis(test_week().start);
    assert_eq!(charted_weeks(&db.pool, "artist-A").await, vec![week_ms]);
    assert_eq!(charted_weeks(&db.pool, "artist-C").await, vec![week_ms]);
    assert!(charted_weeks(&db.pool, "artist-D").await.is_empty());
}

#[tokio::test]
async fn test_second_run_rejected_without_writes() {
    let db = create_test_db().await.unwrap();
    seed_basic_week(&db).await;
    let engine = RewardsEngine::new(db.store.clone());

    engine
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await
        .unwrap();

    let result = engine
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await;

    match result {
        Err(RewardsError::AlreadyPaidOut(week)) => assert_eq!(week, "2024-03-11"),
        other => panic!("Expected AlreadyPaidOut, got {:?}", other),
    }
    assert_eq!(count_rows(&db.pool, "rewards_payouts").await, 1);
    assert_eq!(count_rows(&db.pool, "rewards").await, 6);
    assert_eq!(count_rows(&db.pool, "audit_logs").await, 3);
    assert_eq!(user_points(&db.pool, "u1").await, 100);
}

#[tokio::test]
async fn test_midweek_date_normalized_to_monday() {
    let db = create_test_db().await.unwrap();
    seed_basic_week(&db).await;
    let engine = RewardsEngine::new(db.store.clone());

    let summary = engine
        .apply_weekly_rewards_at(midweek(), after_week())
        .await
        .unwrap();
    assert_eq!(summary.week_start, test_week().start);

    // Any other date in the same week hits the same payout
    let again = engine
        .apply_weekly_rewards_at(test_week().end, after_week())
        .await;
    assert!(matches!(again, Err(RewardsError::AlreadyPaidOut(_))));
}

#[tokio::test]
async fn test_week_not_ended() {
    let db = create_test_db().await.unwrap();
    seed_basic_week(&db).await;
    let engine = RewardsEngine::new(db.store.clone());

    let result = engine
        .apply_weekly_rewards_at(test_week().start, test_week().end)
        .await;

    assert!(matches!(result, Err(RewardsError::WeekNotEnded(_))));
    assert_eq!(count_rows(&db.pool, "rewards_payouts").await, 0);
    assert_eq!(user_points(&db.pool, "u1").await, 0);
}

#[tokio::test]
async fn test_no_submissions() {
    let db = create_test_db().await.unwrap();
    let engine = RewardsEngine::new(db.store.clone());

    let err = engine
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await
        .unwrap_err();

    assert!(matches!(err, RewardsError::NoSubmissions(_)));
    assert!(err.user_message().contains("no submissions found"));
    assert_eq!(count_rows(&db.pool, "rewards_payouts").await, 0);
}

#[tokio::test]
async fn test_other_weeks_playlists_ignored() {
    let db = create_test_db().await.unwrap();
    seed_user(&db.pool, "u1", None, established()).await.unwrap();
    seed_tracks(&db.pool, &["A"]).await.unwrap();
    let previous = test_week().previous();
    seed_playlist(&db.pool, "p1", "u1", &previous, previous.start + Duration::days(1), &["A"])
        .await
        .unwrap();

    let result = RewardsEngine::new(db.store.clone())
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await;

    assert!(matches!(result, Err(RewardsError::NoSubmissions(_))));
}

#[tokio::test]
async fn test_same_session_accounts_excluded() {
    let db = create_test_db().await.unwrap();
    // Playlist created 2 minutes after signup
    seed_user(&db.pool, "fresh", None, midweek() - Duration::minutes(2)).await.unwrap();
    seed_tracks(&db.pool, &["A"]).await.unwrap();
    seed_playlist(&db.pool, "p1", "fresh", &test_week(), midweek(), &["A"]).await.unwrap();

    let result = RewardsEngine::new(db.store.clone())
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await;

    assert!(matches!(result, Err(RewardsError::NoSubmissions(_))));
    assert_eq!(user_points(&db.pool, "fresh").await, 0);
}

#[tokio::test]
async fn test_account_exactly_five_minutes_old_counts() {
    let db = create_test_db().await.unwrap();
    seed_user(&db.pool, "u1", None, midweek() - Duration::minutes(5)).await.unwrap();
    seed_tracks(&db.pool, &["A"]).await.unwrap();
    seed_playlist(&db.pool, "p1", "u1", &test_week(), midweek(), &["A"]).await.unwrap();

    let summary = RewardsEngine::new(db.store.clone())
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await
        .unwrap();

    assert_eq!(summary.total_points_awarded, 50);
    assert_eq!(user_points(&db.pool, "u1").await, 50);
}

#[tokio::test]
async fn test_one_reward_per_user_per_track() {
    let db = create_test_db().await.unwrap();
    let week = test_week();
    seed_user(&db.pool, "u1", None, established()).await.unwrap();
    seed_user(&db.pool, "u2", None, established()).await.unwrap();
    seed_tracks(&db.pool, &["A"]).await.unwrap();

    // u1 submits A twice across two playlists
    seed_playlist(&db.pool, "p1", "u1", &week, midweek(), &["A"]).await.unwrap();
    seed_playlist(&db.pool, "p2", "u1", &week, midweek() + Duration::hours(1), &["A"]).await.unwrap();
    seed_playlist(&db.pool, "p3", "u2", &week, midweek() + Duration::hours(2), &["A"]).await.unwrap();

    let summary = RewardsEngine::new(db.store.clone())
        .apply_weekly_rewards_at(week.start, after_week())
        .await
        .unwrap();

    assert_eq!(summary.total_rewards_distributed, 2);
    assert_eq!(user_points(&db.pool, "u1").await, 50);
    assert_eq!(user_points(&db.pool, "u2").await, 50);
}

#[tokio::test]
async fn test_tied_third_place_both_rewarded() {
    let db = create_test_db().await.unwrap();
    let week = test_week();
    for user in ["u1", "u2", "u3", "u4"] {
        seed_user(&db.pool, user, None, established()).await.unwrap();
    }
    seed_tracks(&db.pool, &["A", "B", "C", "D"]).await.unwrap();

    seed_playlist(&db.pool, "p1", "u1", &week, midweek(), &["A", "B"]).await.unwrap();
    seed_playlist(&db.pool, "p2", "u2", &week, midweek(), &["A", "B"]).await.unwrap();
    seed_playlist(&db.pool, "p3", "u3", &week, midweek(), &["A", "C"]).await.unwrap();
    seed_playlist(&db.pool, "p4", "u4", &week, midweek(), &["D"]).await.unwrap();

    let summary = RewardsEngine::new(db.store.clone())
        .apply_weekly_rewards_at(week.start, after_week())
        .await
        .unwrap();

    let ranks: Vec<(&str, u32)> = summary
        .top_tracks
        .iter()
        .map(|t| (t.track_id.as_str(), t.rank))
        .collect();
    assert_eq!(ranks, vec![("A", 1), ("B", 2), ("C", 3), ("D", 3)]);
    assert_eq!(user_points(&db.pool, "u3").await, 50 + 20);
    assert_eq!(user_points(&db.pool, "u4").await, 20);
}

#[tokio::test]
async fn test_chart_history_not_duplicated() {
    let db = create_test_db().await.unwrap();
    let week = test_week();
    let week_ms = to_millis(week.start);
    seed_user(&db.pool, "u1", None, established()).await.unwrap();

    // Both winning tracks by the same artist, who already charted this week
    seed_track(&db.pool, "A", "artist-x").await.unwrap();
    seed_track(&db.pool, "B", "artist-x").await.unwrap();
    sqlx::query("UPDATE artists SET charted_weeks = ? WHERE id = 'artist-x'")
        .bind(format!("[{}]", week_ms))
        .execute(&db.pool)
        .await
        .unwrap();
    seed_playlist(&db.pool, "p1", "u1", &week, midweek(), &["A", "B"]).await.unwrap();

    RewardsEngine::new(db.store.clone())
        .apply_weekly_rewards_at(week.start, after_week())
        .await
        .unwrap();

    assert_eq!(charted_weeks(&db.pool, "artist-x").await, vec![week_ms]);
}

#[tokio::test]
async fn test_audit_rows_summarize_each_user() {
    let db = create_test_db().await.unwrap();
    seed_basic_week(&db).await;

    let summary = RewardsEngine::new(db.store.clone())
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await
        .unwrap();

    let (action, metadata): (String, String) =
        sqlx::query_as("SELECT action, metadata FROM audit_logs WHERE user_id = 'u1'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
    let metadata: serde_json::Value = serde_json::from_str(&metadata).unwrap();

    assert_eq!(action, AUDIT_ACTION_WEEKLY_REWARD);
    assert_eq!(metadata["total_points"], 100);
    assert_eq!(metadata["reward_count"], 3);
    assert_eq!(metadata["payout_id"], summary.payout_id.as_str());
}

#[tokio::test]
async fn test_find_week_rewards() {
    let db = create_test_db().await.unwrap();
    seed_basic_week(&db).await;

    let summary = RewardsEngine::new(db.store.clone())
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await
        .unwrap();

    let rewards = db.store.find_week_rewards(test_week().start).await.unwrap();

    assert_eq!(rewards.len(), 6);
    assert!(rewards.iter().all(|r| r.metadata.payout_id == summary.payout_id));
    assert!(rewards.iter().all(|r| r.week_start == test_week().start));
    assert_eq!(rewards[0].points, 50);

    let c_reward = rewards.iter().find(|r| r.metadata.track_id == "C").unwrap();
    assert_eq!(c_reward.user_id, "u1");
    assert_eq!(c_reward.metadata.rank, 3);
    assert!(c_reward.reason.contains("Song C"));
}

#[tokio::test]
async fn test_failed_commit_rolls_back_everything() {
    let db = create_test_db().await.unwrap();
    seed_basic_week(&db).await;

    // Last write of the transaction fails
    sqlx::query(
        r#"
        CREATE TRIGGER fail_audit BEFORE INSERT ON audit_logs
        BEGIN
            SELECT RAISE(ABORT, 'audit log unavailable');
        END
        "#,
    )
    .execute(&db.pool)
    .await
    .unwrap();

    let engine = RewardsEngine::new(db.store.clone());
    let err = engine
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await
        .unwrap_err();

    assert!(matches!(err, RewardsError::Store(_)));
    assert_eq!(err.user_message(), "Failed to apply weekly rewards");
    assert_eq!(count_rows(&db.pool, "rewards_payouts").await, 0);
    assert_eq!(count_rows(&db.pool, "rewards").await, 0);
    assert_eq!(user_points(&db.pool, "u1").await, 0);
    assert!(charted_weeks(&db.pool, "artist-A").await.is_empty());

    // Retry after the fault clears
    sqlx::query("DROP TRIGGER fail_audit")
        .execute(&db.pool)
        .await
        .unwrap();

    engine
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await
        .unwrap();
    assert_eq!(user_points(&db.pool, "u1").await, 100);
}

#[tokio::test]
async fn test_concurrent_runs_pay_out_once() {
    let db = create_test_db().await.unwrap();
    seed_basic_week(&db).await;

    let first = RewardsEngine::new(db.store.clone());
    let second = RewardsEngine::new(db.store.clone());

    let (a, b) = tokio::join!(
        first.apply_weekly_rewards_at(test_week().start, after_week()),
        second.apply_weekly_rewards_at(test_week().start, after_week()),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1, "Exactly one run must succeed: {:?} / {:?}", a, b);

    assert_eq!(count_rows(&db.pool, "rewards_payouts").await, 1);
    assert_eq!(count_rows(&db.pool, "rewards").await, 6);
    assert_eq!(user_points(&db.pool, "u1").await, 100);
    assert_eq!(user_points(&db.pool, "u2").await, 80);
}

#[tokio::test]
async fn test_can_run_reports_without_writing() {
    let db = create_test_db().await.unwrap();
    seed_basic_week(&db).await;
    let engine = RewardsEngine::new(db.store.clone());

    let check = engine
        .can_run_rewards_for_week_at(test_week().start, after_week())
        .await
        .unwrap();
    assert!(check.can_run);
    assert!(check.reason.is_none());
    assert_eq!(check.submission_count, 6);
    assert_eq!(count_rows(&db.pool, "rewards_payouts").await, 0);

    let early = engine
        .can_run_rewards_for_week_at(test_week().start, midweek())
        .await
        .unwrap();
    assert!(!early.can_run);
    assert!(early.reason.unwrap().contains("has not ended"));

    engine
        .apply_weekly_rewards_at(test_week().start, after_week())
        .await
        .unwrap();

    let done = engine
        .can_run_rewards_for_week_at(test_week().start, after_week())
        .await
        .unwrap();
    assert!(!done.can_run);
    assert!(done.reason.unwrap().contains("already paid out"));
}
