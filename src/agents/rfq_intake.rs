use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;

use super::payload::{self, PayloadUpdates, Rfq, Urgency, keys};
use super::{AgentWorker, SourcingBackend, StageOutput, names};
use crate::error::StageError;
use crate::job::JobEnvelope;

/// Validates an incoming RFQ and enriches it for supplier matching.
pub struct RfqIntake<B> {
    backend: Arc<B>,
}

impl<B: SourcingBackend> RfqIntake<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    async fn load(&self, envelope: &JobEnvelope) -> Result<Rfq, StageError> {
        if let Some(rfq) = payload::read::<Rfq>(&envelope.payload, keys::RFQ)? {
            return Ok(rfq);
        }
        let Some(rfq_id) = payload::rfq_id(&envelope.payload) else {
            return Err(StageError::business("payload carries neither rfq nor rfq_id"));
        };
        self.backend
            .load_rfq(&rfq_id)
            .await?
            .ok_or_else(|| StageError::business(format!("RFQ {rfq_id} not found")))
    }
}

fn validate(rfq: &Rfq) -> Vec<String> {
    let mut errors = Vec::new();
    for (field, value) in [
        ("title", &rfq.title),
        ("description", &rfq.description),
        ("category", &rfq.category),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    match rfq.quantity {
        None => errors.push("Missing required field: quantity".into()),
        Some(q) if q <= 0 => errors.push("Quantity must be greater than 0".into()),
        Some(_) => {}
    }

    match (&rfq.deadline, rfq.deadline_at()) {
        (None, _) => errors.push("Missing required field: deadline".into()),
        (Some(_), None) => errors.push("Invalid deadline format".into()),
        (Some(_), Some(deadline)) if deadline <= Utc::now() => {
            errors.push("Deadline must be in the future".into())
        }
        _ => {}
    }
    errors
}

fn urgency_for(days_until_deadline: i64) -> Urgency {
    match days_until_deadline {
        d if d <= 3 => Urgency::High,
        d if d <= 7 => Urgency::Medium,
        _ => Urgency::Low,
    }
}

fn category_keywords(category: &str) -> Vec<String> {
    let words: &[&str] = match category.to_lowercase().as_str() {
        "electronics" => &["electronic", "technology", "hardware", "components"],
        "machinery" => &["machine", "equipment", "tools", "industrial"],
        "chemicals" => &["chemical", "raw materials", "substances"],
        "textiles" => &["fabric", "cloth", "textile", "yarn"],
        "food" => &["food", "beverage", "consumables", "perishable"],
        _ => &[],
    };
    words.iter().map(|w| w.to_string()).collect()
}

fn enrich(mut rfq: Rfq) -> Rfq {
    match rfq.deadline_at() {
        Some(deadline) => {
            let days = (deadline - Utc::now()).num_days();
            rfq.urgency = Some(urgency_for(days));
            rfq.days_until_deadline = Some(days);
        }
        None => rfq.urgency = Some(Urgency::Medium),
    }
    rfq.keywords = category_keywords(&rfq.category);
    rfq
}

impl<B: SourcingBackend> AgentWorker for RfqIntake<B> {
    fn name(&self) -> &str {
        names::RFQ_INTAKE
    }

    fn description(&self) -> &str {
        "Validates incoming RFQs and enriches them with urgency and keywords"
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<StageOutput, StageError> {
        let rfq = self.load(envelope).await?;
        info!(job_id = %envelope.job_id, rfq_id = %rfq.id, "processing RFQ");

        let errors = validate(&rfq);
        if !errors.is_empty() {
            return Err(StageError::business(format!(
                "RFQ validation failed: {}",
                errors.join("; ")
            )));
        }

        let rfq = enrich(rfq);
        let summary = json!({
            "rfq_validated": true,
            "urgency": rfq.urgency,
            "days_until_deadline": rfq.days_until_deadline,
        });
        let updates = PayloadUpdates::new()
            .set(keys::RFQ, &rfq)?
            .timestamp(keys::INTAKE_COMPLETED_AT);
        Ok(StageOutput::new(updates.into_map(), summary))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::{Map, Value};

    use super::*;
    use crate::agents::LoggingBackend;

    fn rfq(days_ahead: i64) -> Rfq {
        Rfq {
            id: "rfq-1".into(),
            title: "Industrial sensors".into(),
            description: "Temperature sensors for a packaging line".into(),
            category: "Electronics".into(),
            quantity: Some(500),
            deadline: Some((Utc::now() + Duration::days(days_ahead)).to_rfc3339()),
            ..Rfq::default()
        }
    }

    fn envelope_with(payload: Value) -> JobEnvelope {
        JobEnvelope::new("rfq_process", payload.as_object().cloned().unwrap_or_default(), "u")
    }

    fn stage() -> RfqIntake<LoggingBackend> {
        RfqIntake::new(Arc::new(LoggingBackend::new()))
    }

    #[test]
    fn urgency_thresholds() {
        assert_eq!(urgency_for(0), Urgency::High);
        assert_eq!(urgency_for(3), Urgency::High);
        assert_eq!(urgency_for(4), Urgency::Medium);
        assert_eq!(urgency_for(7), Urgency::Medium);
        assert_eq!(urgency_for(8), Urgency::Low);
    }

    #[test]
    fn validation_collects_every_problem() {
        let bad = Rfq {
            quantity: Some(0),
            deadline: Some("2001-01-01T00:00:00Z".into()),
            ..Rfq::default()
        };
        let errors = validate(&bad);
        assert!(errors.contains(&"Missing required field: title".to_string()));
        assert!(errors.contains(&"Quantity must be greater than 0".to_string()));
        assert!(errors.contains(&"Deadline must be in the future".to_string()));
        assert!(validate(&rfq(10)).is_empty());
    }

    #[tokio::test]
    async fn enriches_inline_rfq() {
        let env = envelope_with(serde_json::json!({"rfq": rfq(10)}));
        let output = stage().process(&env).await.unwrap();

        let enriched: Rfq = payload::read(&output.payload, keys::RFQ).unwrap().unwrap();
        assert_eq!(enriched.urgency, Some(Urgency::Low));
        assert!(enriched.days_until_deadline.is_some_and(|d| (8..=10).contains(&d)));
        assert!(enriched.keywords.contains(&"hardware".to_string()));
        assert!(output.payload.contains_key(keys::INTAKE_COMPLETED_AT));
        assert_eq!(output.summary["rfq_validated"], Value::Bool(true));
    }

    #[tokio::test]
    async fn loads_rfq_by_id_from_backend() {
        let backend = Arc::new(LoggingBackend::new().with_rfq(rfq(2)));
        let stage = RfqIntake::new(backend);
        let env = envelope_with(serde_json::json!({"rfq_id": "rfq-1"}));

        let output = stage.process(&env).await.unwrap();
        let enriched: Rfq = payload::read(&output.payload, keys::RFQ).unwrap().unwrap();
        assert_eq!(enriched.urgency, Some(Urgency::High));
    }

    #[tokio::test]
    async fn invalid_rfq_is_business_failure() {
        let mut bad = rfq(10);
        bad.quantity = None;
        let env = envelope_with(serde_json::json!({"rfq": bad}));
        let err = stage().process(&env).await.unwrap_err();
        assert!(matches!(err, StageError::Business(ref m) if m.contains("quantity")));
    }

    #[tokio::test]
    async fn missing_rfq_is_business_failure() {
        let env = JobEnvelope::new("rfq_process", Map::new(), "u");
        assert!(matches!(
            stage().process(&env).await,
            Err(StageError::Business(_))
        ));
    }
}
