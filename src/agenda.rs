//! Outbound grant client for the external Agenda system.
//!
//! Each delivery attempt signs a fresh five-minute HS256 token and POSTs the
//! grant to the configured endpoint. The `Idempotency-Key` header is supplied
//! by the outbox so that every retry of the same logical grant carries the
//! same key and the Agenda side can deduplicate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::Config;
use crate::jwt::sign_grant_token;
use crate::util::truncate_error;

/// Upper bound on how much of a failure response body gets stored on the
/// outbox row.
const MAX_ERROR_BYTES: usize = 500;

/// Outbound request timeout. A timeout counts as a retryable failure.
const GRANT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A failed delivery attempt. `message` is already bounded for storage.
#[derive(Debug, Clone)]
pub struct GrantFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl GrantFailure {
    pub fn describe(&self) -> String {
        match self.status {
            Some(status) => format!("HTTP {}: {}", status, self.message),
            None => self.message.clone(),
        }
    }
}

/// Boundary to the external Agenda grant endpoint. Implemented over HTTP in
/// production; tests inject fakes with scripted outcomes.
#[async_trait]
pub trait AgendaGrant: Send + Sync {
    /// Attempt to grant Agenda access for `email`. Any 2xx is success.
    async fn grant(&self, email: &str, idempotency_key: &str) -> Result<(), GrantFailure>;
}

#[derive(Debug, Serialize)]
struct GrantRequestBody<'a> {
    email: &'a str,
    product: &'a str,
}

/// HTTP implementation of [`AgendaGrant`].
#[derive(Clone)]
pub struct HttpAgendaClient {
    client: Client,
    grant_url: String,
    jwt_secret: String,
    jwt_issuer: String,
    jwt_audience: String,
}

impl HttpAgendaClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            grant_url: config.agenda_grant_url.clone(),
            jwt_secret: config.grant_jwt_secret.clone(),
            jwt_issuer: config.grant_jwt_issuer.clone(),
            jwt_audience: config.grant_jwt_audience.clone(),
        }
    }
}

#[async_trait]
impl AgendaGrant for HttpAgendaClient {
    async fn grant(&self, email: &str, idempotency_key: &str) -> Result<(), GrantFailure> {
        let token = sign_grant_token(
            &self.jwt_secret,
            &self.jwt_issuer,
            &self.jwt_audience,
            email,
            "agenda",
        )
        .map_err(|e| GrantFailure {
            status: None,
            message: format!("token signing failed: {}", e),
        })?;

        let response = self
            .client
            .post(&self.grant_url)
            .bearer_auth(token)
            .header("Idempotency-Key", idempotency_key)
            .json(&GrantRequestBody { email, product: "agenda" })
            .timeout(GRANT_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| GrantFailure {
                status: None,
                message: truncate_error(&e.to_string(), MAX_ERROR_BYTES),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(GrantFailure {
            status: Some(status.as_u16()),
            message: truncate_error(&body, MAX_ERROR_BYTES),
        })
    }
}
