//! Cron surface: the scheduled sweep over pending Agenda grants.
//!
//! The platform scheduler hits GET /cron/grant-retry every few minutes.
//! The endpoint is safe to invoke concurrently or more often than
//! scheduled: the outbox only moves rows pending -> ok/error and never
//! revives terminal rows.

use axum::{extract::State, response::Json};
use serde_json::{json, Value};

use crate::db::AppState;
use crate::error::Result;
use crate::outbox;

/// GET /cron/grant-retry
pub async fn handle_grant_retry(State(state): State<AppState>) -> Result<Json<Value>> {
    let stats = outbox::sweep(
        &state,
        state.config.agenda_grant_max_tries,
        state.config.agenda_grant_batch_size,
    )
    .await?;

    tracing::info!(
        processed = stats.processed,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "Grant retry sweep complete"
    );

    Ok(Json(json!({
        "ok": true,
        "processed": stats.processed,
        "succeeded": stats.succeeded,
        "failed": stats.failed,
    })))
}
