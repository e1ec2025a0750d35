//! Common webhook handling for payment providers.
//!
//! Providers implement [`PaymentProvider`] for signature verification and
//! fact extraction; the shared flow here records the Order, activates
//! entitlements, and kicks off Agenda propagation. The Order Recorder is
//! provider-agnostic: it only ever sees [`PaymentFacts`].

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::db::{queries, AppState};
use crate::models::{CreateOrder, Product, Sku};
use crate::notify::{spawn_notification, NotificationKind};
use crate::outbox;
use crate::util::normalize_email;

/// Result type for webhook rejections: status plus a provider-facing message.
pub type WebhookResult = (StatusCode, &'static str);

/// Provider-agnostic facts extracted from a successful payment event.
#[derive(Debug)]
pub struct PaymentFacts {
    pub email: Option<String>,
    pub sku: Sku,
    /// Minor currency units, as delivered by the provider
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Parsed webhook event.
#[derive(Debug)]
pub enum WebhookEvent {
    /// A payment this subsystem acts on
    Paid(PaymentFacts),
    /// Event type not relevant to entitlement management
    Ignored,
}

/// Capability interface for a payment provider.
pub trait PaymentProvider: Send + Sync {
    /// Provider name for logging and order storage ("stripe", "wompi")
    fn provider_name(&self) -> &'static str;

    /// Extract the signature from request headers.
    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult>;

    /// Verify the signature over the raw body. Must run before any parsing
    /// feeds into side effects.
    fn verify_signature(&self, body: &Bytes, signature: &str) -> Result<bool, WebhookResult>;

    /// Status returned on signature mismatch (providers differ: Stripe
    /// expects 400, Wompi 401).
    fn signature_failure_status(&self) -> StatusCode;

    /// Parse the payload into a provider-agnostic event.
    fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult>;
}

/// Generic webhook handler: verify, parse, record, grant.
///
/// Verified and processed events are always acknowledged with 200 so the
/// provider does not redeliver already-applied business effects; only
/// verification and our own persistence failures return error codes.
pub async fn handle_webhook<P: PaymentProvider>(
    provider: &P,
    state: &AppState,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = match provider.extract_signature(&headers) {
        Ok(s) => s,
        Err((status, msg)) => return reject(status, msg),
    };

    match provider.verify_signature(&body, &signature) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(provider = provider.provider_name(), "Webhook signature mismatch");
            return reject(provider.signature_failure_status(), "Invalid signature");
        }
        Err((status, msg)) => return reject(status, msg),
    }

    let event = match provider.parse_event(&body) {
        Ok(e) => e,
        Err((status, msg)) => return reject(status, msg),
    };

    match event {
        WebhookEvent::Paid(facts) => {
            match process_paid_event(state, provider.provider_name(), &facts, &body).await {
                Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
                Err((status, msg)) => reject(status, msg),
            }
        }
        WebhookEvent::Ignored => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
    }
}

fn reject(status: StatusCode, msg: &'static str) -> Response {
    (status, Json(json!({ "ok": false, "error": msg }))).into_response()
}

/// Record the Order, activate entitlements, and propagate Agenda grants.
///
/// Order insertion and entitlement upserts are the operations whose failure
/// fails the request. Welcome notifications are fire-and-forget; the
/// immediate grant attempt reports through the outbox, never through here.
pub async fn process_paid_event(
    state: &AppState,
    provider: &'static str,
    facts: &PaymentFacts,
    raw_body: &[u8],
) -> Result<(), WebhookResult> {
    // Missing email is stored as NULL, never a request failure.
    let email = facts.email.as_deref().and_then(normalize_email);
    if email.is_none() {
        tracing::warn!(
            provider,
            sku = %facts.sku,
            "Paid event without usable email - order recorded, no entitlements"
        );
    }

    let order = {
        let conn = state.db.get().map_err(db_error)?;
        queries::insert_order(
            &conn,
            &CreateOrder {
                email: email.clone(),
                sku: facts.sku.as_str().to_string(),
                provider: provider.to_string(),
                status: "paid".to_string(),
                amount_cents: facts.amount_cents,
                currency: facts.currency.clone(),
                raw: String::from_utf8_lossy(raw_body).into_owned(),
            },
        )
        .map_err(|e| {
            tracing::error!("Failed to insert order: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error") as WebhookResult
        })?
    };

    tracing::info!(
        order_id = %order.id,
        provider,
        sku = %order.sku,
        amount_cents = order.amount_cents,
        "Order recorded"
    );

    let Some(email) = email else {
        return Ok(());
    };

    let products = {
        let conn = state.db.get().map_err(db_error)?;
        let mut activated = Vec::new();
        for product in facts.sku.products() {
            queries::upsert_entitlement(&conn, &email, product).map_err(|e| {
                tracing::error!("Failed to upsert entitlement: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error") as WebhookResult
            })?;
            activated.push(product);
        }
        activated
    };

    for product in &products {
        let kind = match product {
            Product::Retos => NotificationKind::WelcomeRetos,
            Product::Agenda => NotificationKind::WelcomeAgenda,
        };
        spawn_notification(
            state.notifier.clone(),
            kind,
            email.clone(),
            json!({ "order_id": order.id, "sku": order.sku }),
        );
    }

    if products.contains(&Product::Agenda) {
        // Durable queue plus optimistic immediate attempt. Grant failures
        // stay in the outbox; they never bounce the webhook.
        if let Err(e) = outbox::enqueue(state, &email).await {
            tracing::error!("Failed to enqueue Agenda grant: {}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
        }
    }

    Ok(())
}

fn db_error(e: r2d2::Error) -> WebhookResult {
    tracing::error!("DB connection error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}
