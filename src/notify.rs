//! Transactional notification dispatch.
//!
//! The notifier is a collaborator, not part of the core: entitlement and
//! outbox mutations must succeed or fail independently of anything here.
//! Callers either fire-and-forget (welcome emails) or await and discard the
//! outcome (operational alerts).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// What is being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Welcome email after a "retos" entitlement activates
    WelcomeRetos,
    /// Activation email after an "agenda" entitlement activates
    WelcomeAgenda,
    /// Internal ops alert for grant-outbox failures
    GrantAlert,
}

/// Result of a notification attempt. Informational only - never fed back
/// into the success/failure path of the operation that triggered it.
#[derive(Debug, Clone)]
pub struct NotifyOutcome {
    pub ok: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl NotifyOutcome {
    pub fn sent(status: u16) -> Self {
        Self { ok: true, status: Some(status), error: None }
    }

    pub fn failed(status: Option<u16>, error: impl Into<String>) -> Self {
        Self { ok: false, status, error: Some(error.into()) }
    }
}

/// Notification dispatcher boundary.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn send(&self, kind: NotificationKind, to: &str, data: serde_json::Value)
        -> NotifyOutcome;
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
}

/// Resend-backed notifier.
#[derive(Clone)]
pub struct EmailNotifier {
    api_key: Option<String>,
    from_email: String,
    http_client: Client,
}

impl EmailNotifier {
    pub fn new(api_key: Option<String>, from_email: String) -> Self {
        Self {
            api_key,
            from_email,
            http_client: Client::new(),
        }
    }

    fn compose(kind: NotificationKind, data: &serde_json::Value) -> (String, String) {
        match kind {
            NotificationKind::WelcomeRetos => (
                "Bienvenido a los 21 Retos".to_string(),
                "Tu acceso a los 21 Retos ya está activo.\n\nIngresa con este correo para comenzar tu primer reto.".to_string(),
            ),
            NotificationKind::WelcomeAgenda => (
                "Tu Agenda está activa".to_string(),
                "Tu acceso a la Agenda ya está activo.\n\nIngresa con este correo en la Agenda para empezar a usarla.".to_string(),
            ),
            NotificationKind::GrantAlert => {
                let reason = data
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("delivery failure");
                (
                    format!("[21 Retos] Agenda grant failure: {}", reason),
                    format!(
                        "An Agenda grant could not be delivered.\n\n{}",
                        serde_json::to_string_pretty(data).unwrap_or_default()
                    ),
                )
            }
        }
    }
}

#[async_trait]
impl Notify for EmailNotifier {
    async fn send(
        &self,
        kind: NotificationKind,
        to: &str,
        data: serde_json::Value,
    ) -> NotifyOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::debug!(?kind, to, "No email API key configured, notification skipped");
            return NotifyOutcome::failed(None, "email disabled: no API key");
        };

        let (subject, text) = Self::compose(kind, &data);
        let request = ResendEmailRequest {
            from: &self.from_email,
            to: vec![to],
            subject,
            text,
        };

        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(?kind, to, "Notification sent");
                NotifyOutcome::sent(resp.status().as_u16())
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                tracing::warn!(?kind, to, status, "Notification rejected: {}", body);
                NotifyOutcome::failed(Some(status), body)
            }
            Err(e) => {
                tracing::warn!(?kind, to, "Notification send failed: {}", e);
                NotifyOutcome::failed(None, e.to_string())
            }
        }
    }
}

/// Spawn a fire-and-forget notification.
///
/// Used for welcome emails on the webhook path, where the provider must be
/// acknowledged regardless of email delivery. Panics in the spawned task are
/// logged rather than silently swallowed.
pub fn spawn_notification(
    notifier: Arc<dyn Notify>,
    kind: NotificationKind,
    to: String,
    data: serde_json::Value,
) {
    tokio::spawn(
        AssertUnwindSafe(async move {
            let outcome = notifier.send(kind, &to, data).await;
            if !outcome.ok {
                tracing::warn!(
                    ?kind,
                    to,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Background notification failed"
                );
            }
        })
        .catch_unwind()
        .map(move |result| {
            if let Err(panic) = result {
                let panic_msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Notification task panicked: {}", panic_msg);
            }
        }),
    );
}
