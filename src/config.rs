use std::env;

/// Default cap on delivery attempts before an outbox row is dead-lettered.
pub const DEFAULT_GRANT_MAX_TRIES: u32 = 10;
/// Default number of pending rows one sweep will process.
pub const DEFAULT_GRANT_BATCH_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,

    /// Stripe webhook endpoint secret (whsec_...)
    pub stripe_webhook_secret: String,
    /// Wompi events secret, shared HMAC key for the wompi-signature header
    pub wompi_events_secret: String,

    /// Shared secret for HS256 grant tokens (both inbound /api/grant and
    /// outbound Agenda calls)
    pub grant_jwt_secret: String,
    pub grant_jwt_issuer: String,
    pub grant_jwt_audience: String,

    /// External Agenda grant endpoint
    pub agenda_grant_url: String,
    pub agenda_grant_max_tries: u32,
    pub agenda_grant_batch_size: u32,

    /// Operations address for outbox failure alerts
    pub support_email: String,

    pub resend_api_key: Option<String>,
    pub email_from: String,

    /// Per-IP requests per minute on /api/grant
    pub rate_limit_grant_rpm: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "retos.db".to_string()),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            wompi_events_secret: env::var("WOMPI_EVENTS_SECRET").unwrap_or_default(),
            grant_jwt_secret: env::var("GRANT_JWT_SECRET").unwrap_or_default(),
            grant_jwt_issuer: env::var("GRANT_JWT_ISSUER").unwrap_or_else(|_| "retos".to_string()),
            grant_jwt_audience: env::var("GRANT_JWT_AUDIENCE")
                .unwrap_or_else(|_| "agenda".to_string()),
            agenda_grant_url: env::var("AGENDA_GRANT_URL").unwrap_or_default(),
            agenda_grant_max_tries: env_u32("AGENDA_GRANT_MAX_TRIES", DEFAULT_GRANT_MAX_TRIES),
            agenda_grant_batch_size: env_u32("AGENDA_GRANT_BATCH_SIZE", DEFAULT_GRANT_BATCH_SIZE),
            support_email: env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "soporte@21retos.local".to_string()),
            resend_api_key: env::var("RESEND_API_KEY").ok(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "21 Retos <hola@21retos.local>".to_string()),
            rate_limit_grant_rpm: env_u32("RATE_LIMIT_GRANT_RPM", 30),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
