//! Grant outbox state machine tests: retry bounds, terminal transitions,
//! alerting, and idempotency-key stability.

#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use common::*;
use retos::outbox::{self, AttemptOutcome};

#[tokio::test]
async fn test_successful_enqueue_delivers_immediately() {
    let (state, agenda, _notifier) = setup_default_state();

    let row = outbox::enqueue(&state, "ana@example.com").await.unwrap();

    assert_eq!(row.status, GrantStatus::Ok);
    assert_eq!(row.tries, 1);
    assert!(row.last_error.is_none());
    assert_eq!(agenda.call_count(), 1);
}

#[tokio::test]
async fn test_tries_increment_once_per_attempt_until_exhaustion() {
    let agenda = Arc::new(FakeAgenda::always_failing(503));
    let notifier = Arc::new(CountingNotifier::default());
    let state = setup_state(agenda.clone(), notifier.clone());

    // Immediate attempt: tries 0 -> 1, still pending.
    let row = outbox::enqueue(&state, "ana@example.com").await.unwrap();
    assert_eq!(row.status, GrantStatus::Pending);
    assert_eq!(row.tries, 1);
    assert!(row.last_error.as_deref().unwrap().contains("503"));

    // Test config caps at 4 tries. Three more sweeps walk the row to the cap.
    for expected_tries in 2..=4u32 {
        let stats = outbox::sweep(&state, 4, 50).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 1);

        let conn = state.db.get().unwrap();
        let row = queries::get_grant(&conn, &row.id).unwrap().unwrap();
        assert_eq!(row.tries, expected_tries);
        let expected_status = if expected_tries == 4 {
            GrantStatus::Error
        } else {
            GrantStatus::Pending
        };
        assert_eq!(row.status, expected_status);
    }

    // Exhausted rows are invisible to further sweeps; tries stay put.
    let stats = outbox::sweep(&state, 4, 50).await.unwrap();
    assert_eq!(stats.processed, 0);
    let conn = state.db.get().unwrap();
    let row = queries::get_grant(&conn, &row.id).unwrap().unwrap();
    assert_eq!(row.tries, 4);
    assert_eq!(row.status, GrantStatus::Error);
    assert_eq!(agenda.call_count(), 4);
}

#[tokio::test]
async fn test_failed_immediate_attempt_alerts_once() {
    let agenda = Arc::new(FakeAgenda::always_failing(503));
    let notifier = Arc::new(CountingNotifier::default());
    let state = setup_state(agenda.clone(), notifier.clone());

    let row = outbox::enqueue(&state, "ana@example.com").await.unwrap();
    assert_eq!(row.status, GrantStatus::Pending);

    let fast_path_alerts: Vec<_> = notifier
        .alerts()
        .into_iter()
        .filter(|a| a.get("reason").and_then(|r| r.as_str()) == Some("immediate attempt failed"))
        .collect();
    assert_eq!(fast_path_alerts.len(), 1);
    assert_eq!(
        fast_path_alerts[0].get("grant_id").and_then(|v| v.as_str()),
        Some(row.id.as_str())
    );

    // Sweeper retries stay quiet; only terminal transitions alert again.
    outbox::sweep(&state, 4, 50).await.unwrap();
    let fast_path_alerts = notifier
        .alerts()
        .into_iter()
        .filter(|a| a.get("reason").and_then(|r| r.as_str()) == Some("immediate attempt failed"))
        .count();
    assert_eq!(fast_path_alerts, 1);
}

#[tokio::test]
async fn test_stale_snapshots_cannot_strand_row_at_the_cap() {
    let agenda = Arc::new(FakeAgenda::always_failing(503));
    let notifier = Arc::new(CountingNotifier::default());
    let state = setup_state(agenda.clone(), notifier.clone());

    let row = {
        let conn = state.db.get().unwrap();
        let row = queries::insert_grant(&conn, "ana@example.com").unwrap();
        // Two attempts already on the books.
        conn.execute(
            "UPDATE agenda_grants SET tries = 2 WHERE id = ?1",
            rusqlite::params![row.id],
        )
        .unwrap();
        queries::get_grant(&conn, &row.id).unwrap().unwrap()
    };

    // Two sweeps holding the same tries=2 snapshot each run an attempt.
    // The second must dead-letter against the live counter (cap 4), not
    // leave the row pending at the cap where no sweep would pick it up.
    let first = outbox::attempt(&state, &row).await.unwrap();
    let second = outbox::attempt(&state, &row).await.unwrap();
    assert_eq!(first, AttemptOutcome::Retrying);
    assert_eq!(second, AttemptOutcome::Exhausted);

    let conn = state.db.get().unwrap();
    let stored = queries::get_grant(&conn, &row.id).unwrap().unwrap();
    assert_eq!(stored.status, GrantStatus::Error);
    assert_eq!(stored.tries, 4);
    assert!(queries::pending_grants(&conn, 4, 50).unwrap().is_empty());
    drop(conn);

    let exhausted_alerts = notifier
        .alerts()
        .into_iter()
        .filter(|a| a.get("reason").and_then(|r| r.as_str()) == Some("exhausted"))
        .count();
    assert_eq!(exhausted_alerts, 1);

    // A third stale attempt finds the row terminal and records nothing.
    let third = outbox::attempt(&state, &row).await.unwrap();
    assert_eq!(third, AttemptOutcome::Retrying);
    let conn = state.db.get().unwrap();
    let stored = queries::get_grant(&conn, &row.id).unwrap().unwrap();
    assert_eq!(stored.tries, 4);
    assert_eq!(stored.status, GrantStatus::Error);
}

#[tokio::test]
async fn test_exhaustion_alerts_exactly_once() {
    let agenda = Arc::new(FakeAgenda::always_failing(500));
    let notifier = Arc::new(CountingNotifier::default());
    let state = setup_state(agenda.clone(), notifier.clone());

    outbox::enqueue(&state, "ana@example.com").await.unwrap();
    for _ in 0..5 {
        outbox::sweep(&state, 4, 50).await.unwrap();
    }

    let exhausted_alerts: Vec<_> = notifier
        .alerts()
        .into_iter()
        .filter(|a| a.get("reason").and_then(|r| r.as_str()) == Some("exhausted"))
        .collect();
    assert_eq!(exhausted_alerts.len(), 1);
    assert_eq!(
        exhausted_alerts[0].get("tries").and_then(|t| t.as_u64()),
        Some(4)
    );
}

#[tokio::test]
async fn test_unusable_email_dead_letters_without_external_call() {
    let (state, agenda, notifier) = setup_default_state();

    // A stored address that fails normalization (no domain dot).
    let row = {
        let conn = state.db.get().unwrap();
        queries::insert_grant(&conn, "not-an-email").unwrap()
    };

    let outcome = outbox::attempt(&state, &row).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::MissingEmail);
    assert_eq!(agenda.call_count(), 0);

    let conn = state.db.get().unwrap();
    let row = queries::get_grant(&conn, &row.id).unwrap().unwrap();
    assert_eq!(row.status, GrantStatus::Error);
    assert_eq!(row.tries, 1);
    assert_eq!(row.last_error.as_deref(), Some("missing email"));

    let alerts = notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(
        alerts[0].get("reason").and_then(|r| r.as_str()),
        Some("missing email")
    );
}

#[tokio::test]
async fn test_transient_failures_then_success_clears_error() {
    // Three 503s, then the script runs dry and the fake succeeds.
    let agenda = Arc::new(FakeAgenda::scripted(vec![
        Err(failure(503)),
        Err(failure(503)),
        Err(failure(503)),
    ]));
    let notifier = Arc::new(CountingNotifier::default());
    let state = setup_state(agenda.clone(), notifier.clone());

    let row = outbox::enqueue(&state, "ana@example.com").await.unwrap();
    assert_eq!(row.status, GrantStatus::Pending);

    for _ in 0..3 {
        outbox::sweep(&state, 4, 50).await.unwrap();
    }

    let conn = state.db.get().unwrap();
    let row = queries::get_grant(&conn, &row.id).unwrap().unwrap();
    assert_eq!(row.status, GrantStatus::Ok);
    assert_eq!(row.tries, 4);
    assert!(row.last_error.is_none());

    // Every retry of the same logical grant carried the same key: the row id.
    let keys = agenda.idempotency_keys();
    assert_eq!(keys.len(), 4);
    assert!(keys.iter().all(|k| *k == row.id));
}

#[tokio::test]
async fn test_terminal_rows_survive_direct_update_attempts() {
    let (state, _agenda, _notifier) = setup_default_state();

    let row = outbox::enqueue(&state, "ana@example.com").await.unwrap();
    assert_eq!(row.status, GrantStatus::Ok);

    // A racing sweep that somehow held a stale pending snapshot must not
    // revive the row: status updates are guarded on pending.
    let conn = state.db.get().unwrap();
    let recorded = queries::record_grant_failure(&conn, &row.id, "stale attempt", false, 4).unwrap();
    assert!(recorded.is_none());

    let row = queries::get_grant(&conn, &row.id).unwrap().unwrap();
    assert_eq!(row.status, GrantStatus::Ok);
    assert_eq!(row.tries, 1);
    assert!(row.last_error.is_none());
}

#[tokio::test]
async fn test_cron_endpoint_reports_sweep_stats() {
    let agenda = Arc::new(FakeAgenda::always_failing(503));
    let notifier = Arc::new(CountingNotifier::default());
    let state = setup_state(agenda.clone(), notifier.clone());

    {
        let conn = state.db.get().unwrap();
        queries::insert_grant(&conn, "ana@example.com").unwrap();
        queries::insert_grant(&conn, "luis@example.com").unwrap();
    }

    let axum::Json(body) =
        retos::handlers::cron::handle_grant_retry(axum::extract::State(state.clone()))
            .await
            .unwrap();

    assert_eq!(body.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(body.get("processed").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(body.get("succeeded").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(body.get("failed").and_then(|v| v.as_u64()), Some(2));
}

#[tokio::test]
async fn test_sweep_respects_batch_size_and_age_order() {
    let agenda = Arc::new(FakeAgenda::always_failing(502));
    let notifier = Arc::new(CountingNotifier::default());
    let state = setup_state(agenda.clone(), notifier.clone());

    let ids: Vec<String> = {
        let conn = state.db.get().unwrap();
        (0..3)
            .map(|i| {
                let row = queries::insert_grant(&conn, &format!("user{}@example.com", i)).unwrap();
                // Spread created_at so ordering is deterministic.
                conn.execute(
                    "UPDATE agenda_grants SET created_at = ?2 WHERE id = ?1",
                    rusqlite::params![row.id, 1000 + i],
                )
                .unwrap();
                row.id
            })
            .collect()
    };

    let stats = outbox::sweep(&state, 4, 2).await.unwrap();
    assert_eq!(stats.processed, 2);

    let conn = state.db.get().unwrap();
    let first = queries::get_grant(&conn, &ids[0]).unwrap().unwrap();
    let second = queries::get_grant(&conn, &ids[1]).unwrap().unwrap();
    let third = queries::get_grant(&conn, &ids[2]).unwrap().unwrap();
    assert_eq!(first.tries, 1);
    assert_eq!(second.tries, 1);
    assert_eq!(third.tries, 0);
}
