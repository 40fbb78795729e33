//! Typed views over the fields stages read from and write to a job payload.
//!
//! The orchestrator treats the payload as an opaque map. Stages go through
//! these records instead of poking at raw JSON, and every write stamps
//! `schema_version` so a consumer can reject payloads from a newer producer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StageError;
use crate::job::{now_timestamp, parse_timestamp};

pub const PAYLOAD_SCHEMA_VERSION: u64 = 1;

pub mod keys {
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const RFQ: &str = "rfq";
    pub const RFQ_ID: &str = "rfq_id";
    pub const SUPPLIERS: &str = "suppliers";
    pub const EMAIL_RESULTS: &str = "email_results";
    pub const EMAIL_RESPONSES: &str = "email_responses";
    pub const PARSED_OFFERS: &str = "parsed_offers";
    pub const VERIFIED_OFFERS: &str = "verified_offers";
    pub const FINAL_REPORT: &str = "final_report";
    pub const EXPECTED_RESPONSES_AFTER: &str = "expected_responses_after";

    pub const INTAKE_COMPLETED_AT: &str = "intake_completed_at";
    pub const DISCOVERY_COMPLETED_AT: &str = "discovery_completed_at";
    pub const EMAILS_SENT_AT: &str = "emails_sent_at";
    pub const PARSING_COMPLETED_AT: &str = "parsing_completed_at";
    pub const VERIFICATION_COMPLETED_AT: &str = "verification_completed_at";
    pub const COMPLETED_AT: &str = "completed_at";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rfq {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_until_deadline: Option<i64>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Fields this crate does not interpret, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Rfq {
    /// Accepts a full timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.deadline.as_deref()?;
        parse_timestamp(raw).or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub relevance_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentInvitation {
    pub supplier_id: Option<String>,
    pub email: String,
    pub sent_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedInvitation {
    pub supplier_id: Option<String>,
    pub email: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailResults {
    pub sent: Vec<SentInvitation>,
    pub failed: Vec<FailedInvitation>,
    pub sent_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Quote,
    RequestInfo,
    Decline,
}

/// Structured terms pulled out of a quote reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteTerms {
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub total_price: Option<f64>,
    /// Days.
    #[serde(default)]
    pub delivery_time: Option<i64>,
    #[serde(default)]
    pub terms: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierReply {
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub supplier_email: String,
    #[serde(default)]
    pub supplier_name: String,
    pub response_type: ReplyKind,
    #[serde(default)]
    pub received_at: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "extracted_data", skip_serializing_if = "Option::is_none")]
    pub extracted: Option<QuoteTerms>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub price_valid: bool,
    pub delivery_time_reasonable: bool,
    pub supplier_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    pub issues: Vec<String>,
    pub score: f64,
    pub checks: VerificationChecks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    #[serde(default)]
    pub rfq_id: String,
    #[serde(default)]
    pub supplier_id: Option<String>,
    pub unit_price: f64,
    pub total_price: f64,
    pub delivery_time: i64,
    #[serde(default)]
    pub terms: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub submitted_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    #[serde(default)]
    pub verified: bool,
}

impl Offer {
    pub fn verification_score(&self) -> f64 {
        self.verification.as_ref().map_or(0.0, |v| v.score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAnalysis {
    pub min_price: f64,
    pub max_price: f64,
    pub avg_price: f64,
    pub price_spread: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAnalysis {
    pub min_delivery_time: i64,
    pub max_delivery_time: i64,
    pub avg_delivery_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAnalysis {
    pub avg_verification_score: f64,
    pub high_quality_offers: usize,
    pub low_quality_offers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAnalysis {
    pub within_budget_count: usize,
    pub below_budget_count: usize,
    pub above_budget_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_analysis: Option<PriceAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_analysis: Option<DeliveryAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_analysis: Option<QualityAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_analysis: Option<BudgetAnalysis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub supplier_id: Option<String>,
    pub unit_price: f64,
    pub total_price: f64,
    pub delivery_time: i64,
    pub terms: String,
    pub verification_score: f64,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub rfq: Option<Rfq>,
    pub total_offers: usize,
    pub analysis: Analysis,
    pub recommendations: Vec<String>,
    pub comparison_table: Vec<ComparisonRow>,
    pub generated_at: String,
}

/// Rejects payloads written by a newer schema. Payloads without a version
/// predate versioning and are accepted.
pub fn check_schema(payload: &Map<String, Value>) -> Result<(), StageError> {
    match payload.get(keys::SCHEMA_VERSION).and_then(Value::as_u64) {
        Some(version) if version > PAYLOAD_SCHEMA_VERSION => Err(StageError::business(format!(
            "payload schema version {version} is newer than supported {PAYLOAD_SCHEMA_VERSION}"
        ))),
        _ => Ok(()),
    }
}

/// Reads `key` as `T`. Missing and `null` both read as `None`.
pub fn read<T: DeserializeOwned>(
    payload: &Map<String, Value>,
    key: &str,
) -> Result<Option<T>, StageError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| StageError::business(format!("malformed payload field {key}: {e}"))),
    }
}

pub fn read_or_default<T: DeserializeOwned + Default>(
    payload: &Map<String, Value>,
    key: &str,
) -> Result<T, StageError> {
    Ok(read(payload, key)?.unwrap_or_default())
}

/// The RFQ id a job refers to, from the inline RFQ or a bare `rfq_id`.
pub fn rfq_id(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get(keys::RFQ)
        .and_then(|rfq| rfq.get("id"))
        .and_then(Value::as_str)
        .or_else(|| payload.get(keys::RFQ_ID).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Top-level keys a stage adds to the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadUpdates {
    fields: Map<String, Value>,
}

impl Default for PayloadUpdates {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadUpdates {
    pub fn new() -> Self {
        let mut fields = Map::new();
        fields.insert(keys::SCHEMA_VERSION.into(), Value::from(PAYLOAD_SCHEMA_VERSION));
        Self { fields }
    }

    pub fn set<T: Serialize>(mut self, key: &str, value: &T) -> Result<Self, StageError> {
        let value = serde_json::to_value(value)
            .map_err(|e| StageError::system(format!("could not encode {key}: {e}")))?;
        self.fields.insert(key.to_string(), value);
        Ok(self)
    }

    pub fn timestamp(mut self, key: &str) -> Self {
        self.fields.insert(key.to_string(), Value::String(now_timestamp()));
        self
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn rfq_keeps_unknown_fields() {
        let payload = map(json!({"rfq": {"id": "r1", "title": "Cables", "color": "red"}}));
        let rfq: Rfq = read(&payload, keys::RFQ).unwrap().unwrap();
        assert_eq!(rfq.id, "r1");
        assert_eq!(rfq.extra.get("color"), Some(&json!("red")));

        let back = serde_json::to_value(&rfq).unwrap();
        assert_eq!(back["color"], json!("red"));
    }

    #[test]
    fn deadline_accepts_date_only() {
        let rfq = Rfq {
            deadline: Some("2030-01-15".into()),
            ..Rfq::default()
        };
        assert!(rfq.deadline_at().is_some());
        let rfq = Rfq {
            deadline: Some("soon".into()),
            ..Rfq::default()
        };
        assert!(rfq.deadline_at().is_none());
    }

    #[test]
    fn missing_and_null_read_as_none() {
        let payload = map(json!({"suppliers": null}));
        let suppliers: Option<Vec<Supplier>> = read(&payload, keys::SUPPLIERS).unwrap();
        assert!(suppliers.is_none());
        let offers: Vec<Offer> = read_or_default(&payload, keys::PARSED_OFFERS).unwrap();
        assert!(offers.is_empty());
    }

    #[test]
    fn malformed_field_is_business_failure() {
        let payload = map(json!({"suppliers": "not a list"}));
        let err = read::<Vec<Supplier>>(&payload, keys::SUPPLIERS).unwrap_err();
        assert!(matches!(err, StageError::Business(_)));
    }

    #[test]
    fn newer_schema_is_rejected() {
        assert!(check_schema(&map(json!({}))).is_ok());
        assert!(check_schema(&map(json!({"schema_version": 1}))).is_ok());
        assert!(check_schema(&map(json!({"schema_version": 2}))).is_err());
    }

    #[test]
    fn rfq_id_prefers_inline_rfq() {
        assert_eq!(
            rfq_id(&map(json!({"rfq": {"id": "a"}, "rfq_id": "b"}))),
            Some("a".into())
        );
        assert_eq!(rfq_id(&map(json!({"rfq_id": "b"}))), Some("b".into()));
        assert_eq!(rfq_id(&map(json!({}))), None);
    }

    #[test]
    fn updates_carry_schema_version() {
        let updates = PayloadUpdates::new()
            .set(keys::SUPPLIERS, &Vec::<Supplier>::new())
            .unwrap()
            .timestamp(keys::DISCOVERY_COMPLETED_AT)
            .into_map();
        assert_eq!(updates.get(keys::SCHEMA_VERSION), Some(&json!(1)));
        assert_eq!(updates.get(keys::SUPPLIERS), Some(&json!([])));
        assert!(updates.contains_key(keys::DISCOVERY_COMPLETED_AT));
    }
}
