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

/// Maximum age of a webhook timestamp before it's rejected (in seconds).
/// Stripe recommends 300 seconds (5 minutes).
const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Stripe webhook provider.
///
/// Signature scheme is the `stripe-signature` header (`t=<ts>,v1=<hex>`),
/// HMAC-SHA256 over `"{timestamp}.{body}"` - the same check the official SDK
/// event-construction routine performs, including timestamp tolerance.
pub struct StripeProvider {
    webhook_secret: String,
}

impl StripeProvider {
    pub fn new(webhook_secret: &str) -> Self {
        Self {
            webhook_secret: webhook_secret.to_string(),
        }
    }
}

impl PaymentProvider for StripeProvider {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult> {
        headers
            .get("stripe-signature")
            .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| {
                tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid signature header")
            })
    }

    fn verify_signature(&self, body: &Bytes, signature: &str) -> Result<bool, WebhookResult> {
        let mut timestamp = None;
        // During secret rotation the header carries several v1 signatures;
        // any one matching is enough.
        let mut v1_sigs = Vec::new();

        for part in signature.split(',') {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                v1_sigs.push(s);
            }
        }

        let Some(timestamp_str) = timestamp else {
            return Err((StatusCode::BAD_REQUEST, "Invalid signature format"));
        };
        if v1_sigs.is_empty() {
            return Err((StatusCode::BAD_REQUEST, "Invalid signature format"));
        }

        // Reject stale timestamps to prevent replay attacks.
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid timestamp in signature"))?;

        let age = chrono::Utc::now().timestamp() - timestamp;
        if age > WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }
        // Future timestamps allow 60 seconds of clock skew.
        if age < -60 {
            tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(body));

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Invalid webhook secret"))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison; digest length is not secret.
        let expected_bytes = expected.as_bytes();
        let valid = v1_sigs.iter().any(|candidate| {
            let candidate = candidate.as_bytes();
            candidate.len() == expected_bytes.len()
                && bool::from(expected_bytes.ct_eq(candidate))
        });
        Ok(valid)
    }

    fn signature_failure_status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult> {
        let event: StripeWebhookEvent = serde_json::from_slice(body).map_err(|e| {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid JSON")
        })?;

        match event.event_type.as_str() {
            "checkout.session.completed" => parse_checkout_completed(&event),
            "payment_intent.succeeded" => parse_payment_intent_succeeded(&event),
            _ => Ok(WebhookEvent::Ignored),
        }
    }
}

fn parse_checkout_completed(event: &StripeWebhookEvent) -> Result<WebhookEvent, WebhookResult> {
    let session: StripeCheckoutSession =
        serde_json::from_value(event.data.object.clone()).map_err(|e| {
            tracing::error!("Failed to parse checkout session: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid checkout session")
        })?;

    if session.payment_status.as_deref() != Some("paid") {
        return Ok(WebhookEvent::Ignored);
    }

    // Prefer the email entered during checkout over the one on the session.
    let email = session
        .customer_details
        .as_ref()
        .and_then(|d| d.email.clone())
        .or(session.customer_email);

    Ok(WebhookEvent::Paid(PaymentFacts {
        email,
        sku: Sku::from_metadata(session.metadata.as_ref().and_then(|m| m.sku.as_deref())),
        amount_cents: session.amount_total,
        currency: session.currency,
    }))
}

fn parse_payment_intent_succeeded(
    event: &StripeWebhookEvent,
) -> Result<WebhookEvent, WebhookResult> {
    let intent: StripePaymentIntent =
        serde_json::from_value(event.data.object.clone()).map_err(|e| {
            tracing::error!("Failed to parse payment intent: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid payment intent")
        })?;

    Ok(WebhookEvent::Paid(PaymentFacts {
        email: intent.receipt_email,
        sku: Sku::from_metadata(intent.metadata.as_ref().and_then(|m| m.sku.as_deref())),
        amount_cents: intent.amount,
        currency: intent.currency,
    }))
}

/// Generic Stripe webhook event - object is parsed based on event type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub payment_status: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<StripeCustomerDetails>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Option<StripeMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeMetadata {
    pub sku: Option<String>,
}

// ============ payment_intent.succeeded ============

#[derive(Debug, Deserialize)]
pub struct StripePaymentIntent {
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub metadata: Option<StripeMetadata>,
}

/// Axum handler for Stripe webhooks.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = StripeProvider::new(&state.config.stripe_webhook_secret);
    handle_webhook(&provider, &state, headers, body).await
}
