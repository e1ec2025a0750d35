//! Grant API: token-authenticated entitlement activation.
//!
//! POST /api/grant lets trusted internal callers (support tooling, the
//! Agenda backend reconciling a manual sale) activate entitlements without
//! a payment event. Callers authenticate with a short-lived HS256 bearer
//! token; the request body names the recipient and SKU.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::jwt;
use crate::models::{Product, Sku};
use crate::notify::{spawn_notification, NotificationKind};
use crate::util::normalize_email;

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub email: Option<String>,
    /// SKU code: "retos" | "agenda" | "combo". Accepts "sku" as a key too.
    #[serde(alias = "sku")]
    pub product: Option<String>,
}

/// POST /api/grant
pub async fn handle_grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GrantRequest>,
) -> Result<Response> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    let claims = jwt::verify_grant_token(
        &state.config.grant_jwt_secret,
        &state.config.grant_jwt_issuer,
        &state.config.grant_jwt_audience,
        token,
    )?;
    if claims.custom.scope != "grant" {
        return Err(AppError::Unauthorized);
    }

    let email = payload
        .email
        .as_deref()
        .and_then(normalize_email)
        .ok_or_else(|| AppError::BadRequest("Missing or invalid email".to_string()))?;

    let sku = match payload.product.as_deref() {
        Some(raw) => Sku::from_str(raw)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown product: {}", raw)))?,
        None => return Err(AppError::BadRequest("Missing product".to_string())),
    };

    let products = sku.products();
    {
        let conn = state.db.get()?;
        for product in &products {
            queries::upsert_entitlement(&conn, &email, *product)?;
        }
    }

    tracing::info!(%email, sku = %sku, "Entitlements granted via API");

    for product in &products {
        let kind = match product {
            Product::Retos => NotificationKind::WelcomeRetos,
            Product::Agenda => NotificationKind::WelcomeAgenda,
        };
        spawn_notification(
            state.notifier.clone(),
            kind,
            email.clone(),
            json!({ "source": "grant_api", "sku": sku.as_str() }),
        );
    }

    let product_names: Vec<&str> = products.iter().map(|p| p.as_str()).collect();
    Ok(Json(json!({ "ok": true, "email": email, "products": product_names })).into_response())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
