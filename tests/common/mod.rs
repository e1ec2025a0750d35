//! Test utilities and fixtures for Retos integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

pub use retos::agenda::{AgendaGrant, GrantFailure};
pub use retos::config::Config;
pub use retos::db::{create_memory_pool, init_db, queries, AppState};
pub use retos::models::*;
pub use retos::notify::{NotificationKind, Notify, NotifyOutcome};

pub const TEST_STRIPE_SECRET: &str = "whsec_test123secret456";
pub const TEST_WOMPI_SECRET: &str = "wompi_test_events_secret";
pub const TEST_JWT_SECRET: &str = "test-grant-jwt-secret";

/// Fixed test configuration. max_tries is kept small so exhaustion tests
/// stay cheap.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: ":memory:".to_string(),
        stripe_webhook_secret: TEST_STRIPE_SECRET.to_string(),
        wompi_events_secret: TEST_WOMPI_SECRET.to_string(),
        grant_jwt_secret: TEST_JWT_SECRET.to_string(),
        grant_jwt_issuer: "retos".to_string(),
        grant_jwt_audience: "agenda".to_string(),
        agenda_grant_url: "http://agenda.test/grant".to_string(),
        agenda_grant_max_tries: 4,
        agenda_grant_batch_size: 50,
        support_email: "ops@21retos.test".to_string(),
        resend_api_key: None,
        email_from: "21 Retos <test@21retos.test>".to_string(),
        rate_limit_grant_rpm: 30,
    }
}

/// Scripted in-memory stand-in for the Agenda grant endpoint.
///
/// Outcomes are consumed in order; once the script runs dry every further
/// call succeeds. All calls are recorded as (email, idempotency_key).
pub struct FakeAgenda {
    script: Mutex<Vec<Result<(), GrantFailure>>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeAgenda {
    /// A fake that always succeeds.
    pub fn succeeding() -> Self {
        Self::scripted(vec![])
    }

    /// A fake that fails every call with the given HTTP status. Scripted
    /// long past any try cap used in these tests.
    pub fn always_failing(status: u16) -> Self {
        Self::scripted((0..64).map(|_| Err(failure(status))).collect())
    }

    pub fn scripted(outcomes: Vec<Result<(), GrantFailure>>) -> Self {
        Self {
            script: Mutex::new(outcomes),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn idempotency_keys(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, k)| k.clone()).collect()
    }
}

pub fn failure(status: u16) -> GrantFailure {
    GrantFailure {
        status: Some(status),
        message: format!("scripted failure {}", status),
    }
}

#[async_trait]
impl AgendaGrant for FakeAgenda {
    async fn grant(&self, email: &str, idempotency_key: &str) -> Result<(), GrantFailure> {
        self.calls
            .lock()
            .unwrap()
            .push((email.to_string(), idempotency_key.to_string()));
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(())
        } else {
            script.remove(0)
        }
    }
}

/// Notifier that records every send and reports success.
#[derive(Default)]
pub struct CountingNotifier {
    pub sent: Mutex<Vec<(NotificationKind, String, serde_json::Value)>>,
}

impl CountingNotifier {
    pub fn count_of(&self, kind: NotificationKind) -> usize {
        self.sent.lock().unwrap().iter().filter(|(k, _, _)| *k == kind).count()
    }

    pub fn alerts(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _, _)| *k == NotificationKind::GrantAlert)
            .map(|(_, _, data)| data.clone())
            .collect()
    }
}

#[async_trait]
impl Notify for CountingNotifier {
    async fn send(
        &self,
        kind: NotificationKind,
        to: &str,
        data: serde_json::Value,
    ) -> NotifyOutcome {
        self.sent.lock().unwrap().push((kind, to.to_string(), data));
        NotifyOutcome::sent(200)
    }
}

/// Build an AppState over an in-memory database with the given fakes.
pub fn setup_state(agenda: Arc<FakeAgenda>, notifier: Arc<CountingNotifier>) -> AppState {
    let pool = create_memory_pool().expect("Failed to create in-memory pool");
    {
        let conn = pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    AppState {
        db: pool,
        config: Arc::new(test_config()),
        agenda,
        notifier,
    }
}

/// Shorthand for the common case: succeeding agenda, counting notifier.
pub fn setup_default_state() -> (AppState, Arc<FakeAgenda>, Arc<CountingNotifier>) {
    let agenda = Arc::new(FakeAgenda::succeeding());
    let notifier = Arc::new(CountingNotifier::default());
    let state = setup_state(agenda.clone(), notifier.clone());
    (state, agenda, notifier)
}
