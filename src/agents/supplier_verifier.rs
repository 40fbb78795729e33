use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::payload::{self, Offer, PayloadUpdates, Supplier, Verification, VerificationChecks, keys};
use super::{AgentWorker, SourcingBackend, StageOutput, names};
use crate::error::StageError;
use crate::job::JobEnvelope;

const MAX_DELIVERY_DAYS: i64 = 365;
const DELIVERY_PENALTY: f64 = 0.2;
const SUPPLIER_PENALTY: f64 = 0.3;

pub struct SupplierVerifier<B> {
    backend: Arc<B>,
}

impl<B: SourcingBackend> SupplierVerifier<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    async fn verify(&self, offer: &Offer) -> Result<Verification, StageError> {
        let mut issues = Vec::new();
        let mut passed = true;
        let mut score = 1.0_f64;

        if offer.unit_price <= 0.0 {
            issues.push("Invalid unit price".to_string());
            passed = false;
        }
        if offer.total_price <= 0.0 {
            issues.push("Invalid total price".to_string());
            passed = false;
        }

        let delivery_ok = (1..=MAX_DELIVERY_DAYS).contains(&offer.delivery_time);
        if !delivery_ok {
            issues.push("Invalid delivery time".to_string());
            score -= DELIVERY_PENALTY;
        }

        let supplier_issues = match offer.supplier_id.as_deref() {
            Some(id) => match self.backend.find_supplier(id).await? {
                Some(supplier) => supplier_record_issues(&supplier),
                None => vec!["Supplier not found".to_string()],
            },
            None => vec!["Supplier not found".to_string()],
        };
        let supplier_verified = supplier_issues.is_empty();
        if !supplier_verified {
            score -= SUPPLIER_PENALTY;
            issues.extend(supplier_issues);
        }

        Ok(Verification {
            passed,
            issues,
            score: score.max(0.0),
            checks: VerificationChecks {
                price_valid: offer.unit_price > 0.0 && offer.total_price > 0.0,
                delivery_time_reasonable: delivery_ok,
                supplier_verified,
            },
        })
    }
}

fn supplier_record_issues(supplier: &Supplier) -> Vec<String> {
    let mut issues = Vec::new();
    for (field, value) in [
        ("name", &supplier.name),
        ("email", &supplier.email),
        ("company", &supplier.company),
    ] {
        if value.trim().is_empty() {
            issues.push(format!("Missing {field}"));
        }
    }
    if !supplier.email.contains('@') || !supplier.email.contains('.') {
        issues.push("Invalid email format".to_string());
    }
    issues
}

impl<B: SourcingBackend> AgentWorker for SupplierVerifier<B> {
    fn name(&self) -> &str {
        names::SUPPLIER_VERIFIER
    }

    fn description(&self) -> &str {
        "Checks offer prices, delivery times and supplier records"
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<StageOutput, StageError> {
        let offers: Vec<Offer> = payload::read_or_default(&envelope.payload, keys::PARSED_OFFERS)?;
        info!(job_id = %envelope.job_id, offers = offers.len(), "verifying offers");

        let total = offers.len();
        let mut verified = Vec::new();
        for mut offer in offers {
            let verification = self.verify(&offer).await?;
            offer.verified = verification.passed;
            offer.verification = Some(verification);
            if offer.verified {
                self.backend.store_offer(&offer).await?;
                verified.push(offer);
            }
        }

        let summary = json!({
            "total_offers": total,
            "verified_offers": verified.len(),
        });
        let updates = PayloadUpdates::new()
            .set(keys::VERIFIED_OFFERS, &verified)?
            .timestamp(keys::VERIFICATION_COMPLETED_AT);
        Ok(StageOutput::new(updates.into_map(), summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::LoggingBackend;

    fn offer(supplier_id: &str, total_price: f64, delivery_time: i64) -> Offer {
        Offer {
            rfq_id: "r1".into(),
            supplier_id: Some(supplier_id.into()),
            unit_price: total_price / 10.0,
            total_price,
            delivery_time,
            terms: String::new(),
            notes: String::new(),
            status: "submitted".into(),
            submitted_at: String::new(),
            verification: None,
            verified: false,
        }
    }

    fn known_supplier() -> Supplier {
        Supplier {
            id: Some("good".into()),
            name: "Good Parts".into(),
            email: "sales@goodparts.com".into(),
            company: "Good Parts Ltd.".into(),
            ..Supplier::default()
        }
    }

    fn verifier() -> SupplierVerifier<LoggingBackend> {
        SupplierVerifier::new(Arc::new(LoggingBackend::new().with_supplier(known_supplier())))
    }

    #[tokio::test]
    async fn clean_offer_scores_full() {
        let v = verifier().verify(&offer("good", 100.0, 10)).await.unwrap();
        assert!(v.passed);
        assert!(v.issues.is_empty());
        assert!((v.score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn penalties_lower_score_without_failing() {
        let v = verifier().verify(&offer("good", 100.0, 400)).await.unwrap();
        assert!(v.passed);
        assert!((v.score - 0.8).abs() < 1e-9);

        let v = verifier().verify(&offer("stranger", 100.0, 0)).await.unwrap();
        assert!(v.passed);
        assert!((v.score - 0.5).abs() < 1e-9);
        assert!(!v.checks.supplier_verified);
        assert!(v.issues.contains(&"Supplier not found".to_string()));
    }

    #[tokio::test]
    async fn bad_price_fails() {
        let v = verifier().verify(&offer("good", 0.0, 10)).await.unwrap();
        assert!(!v.passed);
        assert!(!v.checks.price_valid);
    }

    #[test]
    fn supplier_record_checks() {
        assert!(supplier_record_issues(&known_supplier()).is_empty());
        let bad = Supplier {
            email: "nobody".into(),
            ..known_supplier()
        };
        assert_eq!(supplier_record_issues(&bad), vec!["Invalid email format".to_string()]);
    }

    #[tokio::test]
    async fn stores_only_passing_offers() {
        let backend = Arc::new(LoggingBackend::new().with_supplier(known_supplier()));
        let stage = SupplierVerifier::new(backend.clone());
        let data = json!({"parsed_offers": [offer("good", 100.0, 10), offer("good", -1.0, 10)]})
            .as_object()
            .cloned()
            .unwrap();
        let env = JobEnvelope::new("offer_processing", data, "u");

        let output = stage.process(&env).await.unwrap();
        let verified: Vec<Offer> = payload::read(&output.payload, keys::VERIFIED_OFFERS).unwrap().unwrap();
        assert_eq!(verified.len(), 1);
        assert!(verified[0].verified);
        assert_eq!(backend.stored_offers().len(), 1);
        assert_eq!(output.summary, json!({"total_offers": 2, "verified_offers": 1}));
    }
}
