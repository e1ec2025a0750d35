use serde::{Deserialize, Serialize};

/// Outbox row status. Legal transitions:
/// pending -> ok (terminal), pending -> pending (retry),
/// pending -> error (terminal, exhausted or unusable email).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Pending,
    Ok,
    Error,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Pending => "pending",
            GrantStatus::Ok => "ok",
            GrantStatus::Error => "error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(GrantStatus::Pending),
            "ok" => Some(GrantStatus::Ok),
            "error" => Some(GrantStatus::Error),
            _ => None,
        }
    }
}

/// One pending or completed request to propagate an Agenda entitlement to
/// the external companion system. Rows are never deleted - the table doubles
/// as the delivery audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRow {
    pub id: String,
    pub email: String,
    /// Fixed "agenda" - the only cross-system product
    pub product: String,
    pub status: GrantStatus,
    /// Attempts so far, incremented exactly once per attempt
    pub tries: u32,
    pub last_try: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}
