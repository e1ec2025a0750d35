use std::fmt;

use serde::{Deserialize, Serialize};

/// A product access flag can be held for these two products.
/// "combo" is a SKU, never a product: it expands before storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Retos,
    Agenda,
}

impl Product {
    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Retos => "retos",
            Product::Agenda => "agenda",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "retos" => Some(Product::Retos),
            "agenda" => Some(Product::Agenda),
            _ => None,
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was purchased or granted, as carried on payment events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sku {
    Retos,
    Agenda,
    Combo,
}

impl Sku {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sku::Retos => "retos",
            Sku::Agenda => "agenda",
            Sku::Combo => "combo",
        }
    }

    /// Strict parse for API input: unknown values are an error, not a default.
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "retos" => Some(Sku::Retos),
            "agenda" => Some(Sku::Agenda),
            "combo" => Some(Sku::Combo),
            _ => None,
        }
    }

    /// Resolve a SKU from an explicit metadata value (Stripe path).
    /// Empty or unknown values default to "retos".
    pub fn from_metadata(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("combo") => Sku::Combo,
            Some("agenda") => Sku::Agenda,
            Some("retos") => Sku::Retos,
            Some("") | None => Sku::Retos,
            Some(other) => {
                tracing::warn!("Unknown sku metadata '{}', defaulting to retos", other);
                Sku::Retos
            }
        }
    }

    /// Infer a SKU from a free-text payment reference (Wompi path).
    /// Substring match with precedence: combo > agenda > retos (default).
    pub fn from_reference(reference: &str) -> Self {
        let reference = reference.to_lowercase();
        if reference.contains("combo") {
            Sku::Combo
        } else if reference.contains("agenda") {
            Sku::Agenda
        } else {
            Sku::Retos
        }
    }

    /// Expand into the product entitlements this SKU carries.
    pub fn products(&self) -> Vec<Product> {
        match self {
            Sku::Retos => vec![Product::Retos],
            Sku::Agenda => vec![Product::Agenda],
            Sku::Combo => vec![Product::Retos, Product::Agenda],
        }
    }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_precedence_combo_beats_agenda() {
        assert_eq!(Sku::from_reference("combo-agenda-2024"), Sku::Combo);
        assert_eq!(Sku::from_reference("AGENDA-99"), Sku::Agenda);
        assert_eq!(Sku::from_reference("pedido-123"), Sku::Retos);
    }

    #[test]
    fn test_metadata_defaults_to_retos() {
        assert_eq!(Sku::from_metadata(None), Sku::Retos);
        assert_eq!(Sku::from_metadata(Some("")), Sku::Retos);
        assert_eq!(Sku::from_metadata(Some("  ")), Sku::Retos);
        assert_eq!(Sku::from_metadata(Some("combo")), Sku::Combo);
        assert_eq!(Sku::from_metadata(Some("mystery")), Sku::Retos);
    }

    #[test]
    fn test_combo_expands_to_both_products() {
        assert_eq!(Sku::Combo.products(), vec![Product::Retos, Product::Agenda]);
        assert_eq!(Sku::Retos.products(), vec![Product::Retos]);
        assert_eq!(Sku::Agenda.products(), vec![Product::Agenda]);
    }
}
