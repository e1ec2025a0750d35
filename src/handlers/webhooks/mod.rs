use axum::{routing::post, Router};

use crate::db::AppState;

pub mod common;
pub mod stripe;
pub mod wompi;

pub use stripe::handle_stripe_webhook;
pub use wompi::handle_wompi_webhook;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/stripe", post(handle_stripe_webhook))
        .route("/webhooks/wompi", post(handle_wompi_webhook))
}
