use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::models::Sku;

use super::common::{handle_webhook, PaymentFacts, PaymentProvider, WebhookEvent, WebhookResult};

type HmacSha256 = Hmac<Sha256>;

/// Wompi webhook provider.
///
/// The `wompi-signature` header carries a hex HMAC-SHA256 of the raw body,
/// keyed with the shared events secret. The SKU is inferred from the
/// free-text payment reference. A signature mismatch returns 401.
pub struct WompiProvider {
    events_secret: String,
}

impl WompiProvider {
    pub fn new(events_secret: &str) -> Self {
        Self {
            events_secret: events_secret.to_string(),
        }
    }
}

impl PaymentProvider for WompiProvider {
    fn provider_name(&self) -> &'static str {
        "wompi"
    }

    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult> {
        headers
            .get("wompi-signature")
            .ok_or((StatusCode::UNAUTHORIZED, "Missing wompi-signature header"))?
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| {
                tracing::debug!("Invalid UTF-8 in Wompi signature header: {}", e);
                (StatusCode::UNAUTHORIZED, "Invalid signature header")
            })
    }

    fn verify_signature(&self, body: &Bytes, signature: &str) -> Result<bool, WebhookResult> {
        let mut mac = HmacSha256::new_from_slice(self.events_secret.as_bytes())
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Invalid events secret"))?;
        mac.update(body);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison; digest length is not secret.
        let expected_bytes = expected.as_bytes();
        let provided_bytes = signature.as_bytes();
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }
        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }

    fn signature_failure_status(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult> {
        let event: WompiWebhookEvent = serde_json::from_slice(body).map_err(|e| {
            tracing::error!("Failed to parse Wompi webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid JSON")
        })?;

        let Some(transaction) = event.data.and_then(|d| d.transaction) else {
            return Ok(WebhookEvent::Ignored);
        };

        // Only approved transactions record an order.
        if transaction.status.as_deref() != Some("APPROVED") {
            return Ok(WebhookEvent::Ignored);
        }

        let sku = transaction
            .reference
            .as_deref()
            .map(Sku::from_reference)
            .unwrap_or(Sku::Retos);

        Ok(WebhookEvent::Paid(PaymentFacts {
            email: transaction.customer_email,
            sku,
            amount_cents: transaction.amount_in_cents,
            currency: transaction.currency,
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct WompiWebhookEvent {
    pub event: Option<String>,
    pub data: Option<WompiEventData>,
}

#[derive(Debug, Deserialize)]
pub struct WompiEventData {
    pub transaction: Option<WompiTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct WompiTransaction {
    /// Free-text payment reference, the SKU carrier ("combo-2024-01")
    pub reference: Option<String>,
    /// "APPROVED", "DECLINED", "VOIDED", "ERROR"
    pub status: Option<String>,
    pub customer_email: Option<String>,
    pub amount_in_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Axum handler for Wompi webhooks.
pub async fn handle_wompi_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = WompiProvider::new(&state.config.wompi_events_secret);
    handle_webhook(&provider, &state, headers, body).await
}
