use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use super::payload::{
    self, EmailResults, FailedInvitation, PayloadUpdates, Rfq, SentInvitation, Supplier, keys,
};
use super::{AgentWorker, Invitation, SourcingBackend, StageOutput, names};
use crate::error::StageError;
use crate::job::{JobEnvelope, format_timestamp, now_timestamp};

/// Replies are not expected before this much time has passed since sending.
const RESPONSE_WINDOW_MINUTES: i64 = 5;

pub struct EmailSend<B> {
    backend: Arc<B>,
}

impl<B: SourcingBackend> EmailSend<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

fn invitation(rfq: &Rfq, supplier: &Supplier) -> Invitation {
    let mut body = String::new();
    let _ = writeln!(body, "Dear {},\n", supplier.name);
    let _ = writeln!(
        body,
        "We would like to invite {} to participate in our Request for Quotation.\n",
        if supplier.company.is_empty() { &supplier.name } else { &supplier.company }
    );
    let _ = writeln!(body, "RFQ details:");
    let _ = writeln!(body, "- Title: {}", rfq.title);
    let _ = writeln!(body, "- Category: {}", rfq.category);
    if let Some(quantity) = rfq.quantity {
        let _ = writeln!(body, "- Quantity: {quantity} {}", rfq.unit.as_deref().unwrap_or("pcs"));
    }
    if let Some(deadline) = &rfq.deadline {
        let _ = writeln!(body, "- Deadline: {deadline}");
    }
    if let Some(location) = &rfq.delivery_location {
        let _ = writeln!(body, "- Delivery location: {location}");
    }
    let _ = writeln!(body, "\n{}\n", rfq.description);
    if let Some(requirements) = &rfq.requirements {
        let _ = writeln!(body, "Requirements:\n{requirements}\n");
    }
    if let (Some(min), Some(max)) = (rfq.budget_min, rfq.budget_max) {
        let _ = writeln!(body, "Budget range: ${min} - ${max}\n");
    }
    let _ = writeln!(
        body,
        "Please reply with unit price, total price, delivery time, terms and any notes."
    );

    Invitation {
        rfq_id: rfq.id.clone(),
        supplier_id: supplier.id.clone(),
        recipient: supplier.email.clone(),
        subject: format!("RFQ Invitation: {}", rfq.title),
        body,
    }
}

impl<B: SourcingBackend> AgentWorker for EmailSend<B> {
    fn name(&self) -> &str {
        names::EMAIL_SEND
    }

    fn description(&self) -> &str {
        "Sends RFQ invitations to the selected suppliers"
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<StageOutput, StageError> {
        let rfq: Rfq = payload::read(&envelope.payload, keys::RFQ)?
            .ok_or_else(|| StageError::business("payload has no rfq"))?;
        let suppliers: Vec<Supplier> = payload::read_or_default(&envelope.payload, keys::SUPPLIERS)?;
        info!(job_id = %envelope.job_id, rfq_id = %rfq.id, suppliers = suppliers.len(), "sending invitations");

        // A failed send is recorded per supplier and does not fail the stage.
        let mut results = EmailResults::default();
        for supplier in &suppliers {
            match self.backend.send_invitation(&invitation(&rfq, supplier)).await {
                Ok(()) => results.sent.push(SentInvitation {
                    supplier_id: supplier.id.clone(),
                    email: supplier.email.clone(),
                    sent_at: now_timestamp(),
                }),
                Err(err) => {
                    warn!(job_id = %envelope.job_id, recipient = %supplier.email, error = %err, "invitation failed");
                    results.failed.push(FailedInvitation {
                        supplier_id: supplier.id.clone(),
                        email: supplier.email.clone(),
                        error: err.message().to_string(),
                    });
                }
            }
        }
        results.sent_count = results.sent.len();
        results.failed_count = results.failed.len();

        let summary = json!({
            "emails_sent": results.sent_count,
            "emails_failed": results.failed_count,
        });
        let expected_after = format_timestamp(Utc::now() + Duration::minutes(RESPONSE_WINDOW_MINUTES));
        let updates = PayloadUpdates::new()
            .set(keys::EMAIL_RESULTS, &results)?
            .set(keys::EXPECTED_RESPONSES_AFTER, &expected_after)?
            .timestamp(keys::EMAILS_SENT_AT);
        Ok(StageOutput::new(updates.into_map(), summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::LoggingBackend;
    use crate::job::parse_timestamp;

    fn supplier(id: &str) -> Supplier {
        Supplier {
            id: Some(id.into()),
            name: format!("Supplier {id}"),
            email: format!("{id}@example.com"),
            ..Supplier::default()
        }
    }

    fn rfq() -> Rfq {
        Rfq {
            id: "r1".into(),
            title: "Copper cable".into(),
            description: "10mm copper cable".into(),
            category: "electronics".into(),
            quantity: Some(200),
            unit: Some("m".into()),
            ..Rfq::default()
        }
    }

    #[test]
    fn invitation_mentions_rfq_details() {
        let inv = invitation(&rfq(), &supplier("a"));
        assert_eq!(inv.subject, "RFQ Invitation: Copper cable");
        assert_eq!(inv.recipient, "a@example.com");
        assert!(inv.body.contains("Quantity: 200 m"));
        assert!(inv.body.contains("Dear Supplier a"));
    }

    #[tokio::test]
    async fn records_sent_and_failed() {
        let backend = Arc::new(LoggingBackend::new().with_undeliverable("b@example.com"));
        let stage = EmailSend::new(backend.clone());
        let data = json!({"rfq": rfq(), "suppliers": [supplier("a"), supplier("b")]})
            .as_object()
            .cloned()
            .unwrap();
        let env = JobEnvelope::new("rfq_process", data, "u");

        let before = Utc::now();
        let output = stage.process(&env).await.unwrap();

        let results: EmailResults = payload::read(&output.payload, keys::EMAIL_RESULTS).unwrap().unwrap();
        assert_eq!(results.sent_count, 1);
        assert_eq!(results.failed_count, 1);
        assert_eq!(results.failed[0].error, "SMTP delivery failed");
        assert_eq!(backend.invitations().len(), 1);

        let expected: String = payload::read(&output.payload, keys::EXPECTED_RESPONSES_AFTER).unwrap().unwrap();
        let expected = parse_timestamp(&expected).unwrap();
        assert!(expected >= before + Duration::minutes(5) - Duration::milliseconds(1));
        assert_eq!(output.summary, json!({"emails_sent": 1, "emails_failed": 1}));
    }
}
