//! Artifacts accepted into a store, and supplier listings sourced for them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Highest meaningful confidence score
pub const MAX_CONFIDENCE: u8 = 10;

/// A structured item (app idea, product niche) produced by an analysis phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    /// Display name; compared case-insensitively for dedup
    pub name: String,

    /// 0-10 viability score; `None` means the item was never scored
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: Option<u8>,

    /// Lifecycle status
    #[serde(default)]
    pub status: ArtifactStatus,

    /// When the store first accepted this artifact
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,

    /// Status change notes, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<StatusNote>,

    /// Every other descriptive field, kept verbatim
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Artifact {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            confidence: None,
            status: ArtifactStatus::New,
            added_at: Utc::now(),
            notes: Vec::new(),
            fields: Map::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence.min(MAX_CONFIDENCE));
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Build from a raw JSON object; `name` must already be present
    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        let name = fields
            .remove("name")
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let confidence = fields.remove("confidence").and_then(|v| confidence_from_value(&v));
        // Status and timestamps are assigned by the store, not the model
        fields.remove("status");
        fields.remove("added_at");
        fields.remove("notes");

        Self {
            name,
            confidence,
            status: ArtifactStatus::New,
            added_at: Utc::now(),
            notes: Vec::new(),
            fields,
        }
    }

    /// Case-insensitive dedup key
    pub fn key(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// String value of a descriptive field
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Interpret a model-supplied confidence (number or numeric string), clamped to 0-10
pub fn confidence_from_value(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().split('/').next()?.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    Some(n.round().clamp(0.0, MAX_CONFIDENCE as f64) as u8)
}

fn lenient_confidence<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(confidence_from_value))
}

/// Lifecycle of an accepted artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    #[default]
    New,
    Investigating,
    Validating,
    Building,
    Rejected,
}

impl ArtifactStatus {
    pub const ALL: [ArtifactStatus; 5] = [
        Self::New,
        Self::Investigating,
        Self::Validating,
        Self::Building,
        Self::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Investigating => "investigating",
            Self::Validating => "validating",
            Self::Building => "building",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| {
                format!(
                    "unknown status '{}' (expected one of: new, investigating, validating, building, rejected)",
                    s
                )
            })
    }
}

/// A timestamped note recorded with a status transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusNote {
    #[serde(alias = "timestamp")]
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub status: ArtifactStatus,
    pub note: String,
}

/// A supplier candidate sourced for a niche
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub name: String,

    /// Name of the niche artifact this listing was sourced for (non-owning)
    pub niche: String,

    pub supplier: String,
    #[serde(default, alias = "cj_pid")]
    pub supplier_id: String,

    pub supplier_price: f64,
    pub shipping_cost: f64,
    pub sell_price: f64,

    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub category: String,

    #[serde(default = "Utc::now")]
    pub sourced_at: DateTime<Utc>,
}

/// Card processing fee: 2.9% + $0.30
const PAYMENT_FEE_RATE: f64 = 0.029;
const PAYMENT_FEE_FIXED: f64 = 0.30;

impl Listing {
    /// Cost of goods sold: supplier price plus shipping
    pub fn cogs(&self) -> f64 {
        self.supplier_price + self.shipping_cost
    }

    pub fn payment_fee(&self) -> f64 {
        self.sell_price * PAYMENT_FEE_RATE + PAYMENT_FEE_FIXED
    }

    /// Profit per sale after COGS and payment fees (before ad spend)
    pub fn net_profit(&self) -> f64 {
        self.sell_price - self.cogs() - self.payment_fee()
    }

    pub fn net_margin(&self) -> f64 {
        if self.sell_price <= 0.0 {
            return 0.0;
        }
        self.net_profit() / self.sell_price
    }

    /// Dedup key within a listing store
    pub fn key(&self) -> (String, String) {
        (self.niche.trim().to_lowercase(), self.name.trim().to_lowercase())
    }
}

/// Retail price ladder for a supplier price
pub fn estimate_sell_price(supplier_price: f64) -> f64 {
    match supplier_price {
        p if p < 3.0 => 14.99,
        p if p < 5.0 => 19.99,
        p if p < 10.0 => 29.99,
        p if p < 15.0 => 39.99,
        p if p < 25.0 => 49.99,
        p if p < 40.0 => 69.99,
        p => (p * 2.0 / 10.0).round() * 10.0 + 9.99,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_fields_extracts_known_fields() {
        let fields = json!({
            "name": "  HabitForge ",
            "confidence": "8/10",
            "status": "building",
            "problem": "People forget habits"
        });
        let artifact = Artifact::from_fields(fields.as_object().unwrap().clone());

        assert_eq!(artifact.name, "HabitForge");
        assert_eq!(artifact.confidence, Some(8));
        assert_eq!(artifact.status, ArtifactStatus::New);
        assert_eq!(artifact.field_str("problem"), Some("People forget habits"));
        assert!(!artifact.fields.contains_key("status"));
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(confidence_from_value(&json!(42)), Some(10));
        assert_eq!(confidence_from_value(&json!(-3)), Some(0));
        assert_eq!(confidence_from_value(&json!(7.4)), Some(7));
        assert_eq!(confidence_from_value(&json!("high")), None);
        assert_eq!(confidence_from_value(&Value::Null), None);
    }

    #[test]
    fn test_artifact_serialization_roundtrip() {
        let artifact = Artifact::new("Pet Tracker")
            .with_confidence(6)
            .with_field("category", "Pets");

        let json = serde_json::to_string(&artifact).unwrap();
        assert!(json.contains("\"category\":\"Pets\""));
        assert!(json.contains("\"status\":\"new\""));

        let parsed: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, artifact);
    }

    #[test]
    fn test_legacy_record_without_status_loads() {
        let parsed: Artifact =
            serde_json::from_str(r#"{"name": "Old", "confidence": "7"}"#).unwrap();
        assert_eq!(parsed.status, ArtifactStatus::New);
        assert_eq!(parsed.confidence, Some(7));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Building".parse::<ArtifactStatus>().unwrap(), ArtifactStatus::Building);
        assert!("shipped".parse::<ArtifactStatus>().is_err());
        assert_eq!(ArtifactStatus::Validating.to_string(), "validating");
    }

    #[test]
    fn test_listing_margins() {
        let listing = Listing {
            name: "Mini Blender".into(),
            niche: "Portable Blenders".into(),
            supplier: "cjdropshipping".into(),
            supplier_id: "p1".into(),
            supplier_price: 6.0,
            shipping_cost: 2.0,
            sell_price: estimate_sell_price(6.0),
            source_url: String::new(),
            image_url: String::new(),
            category: String::new(),
            sourced_at: Utc::now(),
        };

        assert_eq!(listing.sell_price, 29.99);
        assert!((listing.cogs() - 8.0).abs() < 1e-9);
        assert!((listing.payment_fee() - (29.99 * 0.029 + 0.30)).abs() < 1e-9);
        let expected_profit = 29.99 - 8.0 - (29.99 * 0.029 + 0.30);
        assert!((listing.net_profit() - expected_profit).abs() < 1e-9);
        assert!(listing.net_margin() > 0.30);
    }

    #[test]
    fn test_sell_price_ladder() {
        assert_eq!(estimate_sell_price(2.5), 14.99);
        assert_eq!(estimate_sell_price(4.0), 19.99);
        assert_eq!(estimate_sell_price(12.0), 39.99);
        assert_eq!(estimate_sell_price(30.0), 69.99);
        assert_eq!(estimate_sell_price(50.0), 109.99);
    }
}
