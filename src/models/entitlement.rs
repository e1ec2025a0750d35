use serde::{Deserialize, Serialize};

/// A per-(email, product) access flag. Unique on (email, product); the
/// upsert conflict target enforces it. Correlates with orders by normalized
/// email, not by foreign key - orders may arrive before any user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: String,
    pub email: String,
    /// Linked lazily once the user registers
    pub user_id: Option<String>,
    /// "retos" | "agenda" - never "combo"
    pub product: String,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}
