pub mod cron;
pub mod grant;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::AppState;
use crate::rate_limit;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Assemble the full application router.
///
/// Webhooks are unlimited (providers retry on 429; signatures gate abuse),
/// the grant API is rate limited per IP.
pub fn router(grant_rate_limit_rpm: u32) -> Router<AppState> {
    let grant_routes = Router::new()
        .route("/api/grant", post(grant::handle_grant))
        .layer(rate_limit::grant_layer(grant_rate_limit_rpm));

    Router::new()
        .route("/health", get(health))
        .route("/cron/grant-retry", get(cron::handle_grant_retry))
        .merge(webhooks::router())
        .merge(grant_routes)
}
