use serde::{Deserialize, Serialize};

/// One observed payment event. Append-only: rows are evidence, never state.
/// Duplicate webhook deliveries produce duplicate rows by design; the
/// entitlement upsert downstream makes them harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Buyer email as extracted from the provider event. Providers may omit it.
    pub email: Option<String>,
    /// Product code: "retos" | "agenda" | "combo"
    pub sku: String,
    /// "stripe" | "wompi"
    pub provider: String,
    /// "paid" for the events this subsystem acts on
    pub status: String,
    /// Amount in minor currency units (cents), source of truth
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    /// Full provider payload, kept opaque for audit
    pub raw: String,
    pub created_at: i64,
}

impl Order {
    /// Major-unit amount for display and reporting. Minor units stay the
    /// stored source of truth.
    pub fn amount_major(&self) -> Option<f64> {
        self.amount_cents.map(|c| c as f64 / 100.0)
    }
}

/// Data required to record a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub email: Option<String>,
    pub sku: String,
    pub provider: String,
    pub status: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub raw: String,
}
