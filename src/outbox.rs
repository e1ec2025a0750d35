//! Durable grant outbox: at-least-once delivery to the Agenda system with
//! bounded retry and dead-lettering.
//!
//! `enqueue` inserts a pending row and immediately tries to deliver it, so
//! the common case completes without waiting for a sweep. The row only earns
//! its keep when that fast path fails: the cron sweeper picks pending rows
//! back up until they succeed or exhaust their tries.
//!
//! There is no cross-invocation mutual exclusion. Two concurrent sweeps (or
//! a sweep racing an enqueue) may both call the external endpoint for the
//! same row; the stable per-row idempotency key lets the Agenda side
//! deduplicate. Terminal rows can never be revived: every status update is
//! guarded on `status = 'pending'`.

use serde::Serialize;
use serde_json::json;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::{GrantRow, GrantStatus};
use crate::notify::NotificationKind;
use crate::util::normalize_email;

/// Outcome of one delivery attempt on one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// External call succeeded; row is terminally "ok"
    Delivered,
    /// External call failed; row stays pending for a later sweep
    Retrying,
    /// External call failed and tries reached the cap; row is terminally
    /// "error" and an exhaustion alert was fired
    Exhausted,
    /// Stored email failed normalization; row went straight to "error"
    /// without an external call
    MissingEmail,
}

/// Counts for one sweep invocation.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepStats {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Insert a pending outbox row for `email` and attempt immediate delivery.
///
/// Returns the row as it stands after the fast-path attempt. A failed
/// immediate attempt alerts operations but does not propagate an error:
/// the grant is durably queued and the sweeper owns it from here.
pub async fn enqueue(state: &AppState, email: &str) -> Result<GrantRow> {
    let row = {
        let conn = state.db.get()?;
        queries::insert_grant(&conn, email)?
    };

    tracing::info!(grant_id = %row.id, email, "Agenda grant enqueued");

    let outcome = attempt(state, &row).await?;
    if outcome == AttemptOutcome::Retrying {
        // Terminal outcomes alert inside attempt(); the non-terminal
        // fast-path failure alerts here per the ops contract.
        alert(
            state,
            json!({
                "reason": "immediate attempt failed",
                "grant_id": row.id,
                "email": row.email,
            }),
        )
        .await;
    }

    let conn = state.db.get()?;
    Ok(queries::get_grant(&conn, &row.id)?.unwrap_or(row))
}

/// Run one delivery attempt for `row`, recording the result.
///
/// Exactly one `tries` increment per call. The idempotency key sent to the
/// Agenda endpoint is the outbox row id, stable across retries of the same
/// logical grant so the external side can deduplicate double-sends.
pub async fn attempt(state: &AppState, row: &GrantRow) -> Result<AttemptOutcome> {
    let max_tries = state.config.agenda_grant_max_tries;

    let Some(email) = normalize_email(&row.email) else {
        // Permanent data error: no external call, no retries wasted.
        {
            let conn = state.db.get()?;
            queries::record_grant_failure(&conn, &row.id, "missing email", true, max_tries)?;
        }
        tracing::warn!(grant_id = %row.id, "Grant row has unusable email, dead-lettered");
        alert(
            state,
            json!({
                "reason": "missing email",
                "grant_id": row.id,
                "email": row.email,
            }),
        )
        .await;
        return Ok(AttemptOutcome::MissingEmail);
    };

    match state.agenda.grant(&email, &row.id).await {
        Ok(()) => {
            let conn = state.db.get()?;
            queries::record_grant_success(&conn, &row.id)?;
            tracing::info!(grant_id = %row.id, tries = row.tries + 1, "Agenda grant delivered");
            Ok(AttemptOutcome::Delivered)
        }
        Err(failure) => {
            let error = failure.describe();
            // The query decides terminality against the live counter; our
            // `row` snapshot may be stale under concurrent sweeps.
            let updated = {
                let conn = state.db.get()?;
                queries::record_grant_failure(&conn, &row.id, &error, false, max_tries)?
            };

            let Some(updated) = updated else {
                // Lost the race to a concurrent attempt that already
                // terminated the row. Nothing to record, nothing to alert.
                tracing::debug!(grant_id = %row.id, "Grant row already terminal, attempt discarded");
                return Ok(AttemptOutcome::Retrying);
            };

            if updated.status == GrantStatus::Error {
                tracing::error!(
                    grant_id = %row.id,
                    tries = updated.tries,
                    error,
                    "Agenda grant exhausted its tries, dead-lettered"
                );
                // One alert per row, fired on the pending -> error transition.
                alert(
                    state,
                    json!({
                        "reason": "exhausted",
                        "grant_id": row.id,
                        "email": email,
                        "tries": updated.tries,
                        "last_error": error,
                    }),
                )
                .await;
                Ok(AttemptOutcome::Exhausted)
            } else {
                tracing::warn!(
                    grant_id = %row.id,
                    tries = updated.tries,
                    error,
                    "Agenda grant attempt failed, will retry"
                );
                Ok(AttemptOutcome::Retrying)
            }
        }
    }
}

/// One bounded pass over the outbox: pending rows with tries below the cap,
/// oldest first, at most `batch_size` of them, attempted sequentially.
///
/// Safe to invoke concurrently or redundantly; rows are independent and a
/// doubly-processed row resolves through the endpoint's idempotency.
pub async fn sweep(state: &AppState, max_tries: u32, batch_size: u32) -> Result<SweepStats> {
    let rows = {
        let conn = state.db.get()?;
        queries::pending_grants(&conn, max_tries, batch_size)?
    };

    let mut stats = SweepStats::default();
    for row in &rows {
        stats.processed += 1;
        match attempt(state, row).await? {
            AttemptOutcome::Delivered => stats.succeeded += 1,
            _ => stats.failed += 1,
        }
    }

    if stats.processed > 0 {
        tracing::info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Grant outbox sweep complete"
        );
    }

    Ok(stats)
}

/// Fire an ops alert. Best-effort: the outcome never affects outbox state.
async fn alert(state: &AppState, data: serde_json::Value) {
    let outcome = state
        .notifier
        .send(NotificationKind::GrantAlert, &state.config.support_email, data)
        .await;
    if !outcome.ok {
        tracing::warn!(
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "Grant alert delivery failed"
        );
    }
}
