use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use super::payload::{self, Offer, PayloadUpdates, ReplyKind, Supplier, SupplierReply, keys};
use super::{AgentWorker, SourcingBackend, StageOutput, names};
use crate::error::StageError;
use crate::job::JobEnvelope;

pub struct InboxParser<B> {
    backend: Arc<B>,
}

impl<B: SourcingBackend> InboxParser<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

/// Only quotes that state unit price, total price and delivery time become offers.
fn extract_offer(rfq_id: &str, reply: &SupplierReply) -> Option<Offer> {
    if reply.response_type != ReplyKind::Quote {
        return None;
    }
    let terms = reply.extracted.as_ref()?;
    Some(Offer {
        rfq_id: rfq_id.to_string(),
        supplier_id: reply.supplier_id.clone(),
        unit_price: terms.unit_price?,
        total_price: terms.total_price?,
        delivery_time: terms.delivery_time?,
        terms: terms.terms.clone().unwrap_or_default(),
        notes: format!("Response received from {}", reply.supplier_name),
        status: "submitted".into(),
        submitted_at: reply.received_at.clone(),
        verification: None,
        verified: false,
    })
}

impl<B: SourcingBackend> AgentWorker for InboxParser<B> {
    fn name(&self) -> &str {
        names::INBOX_PARSER
    }

    fn description(&self) -> &str {
        "Collects supplier replies and extracts structured offers"
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<StageOutput, StageError> {
        let rfq_id = payload::rfq_id(&envelope.payload)
            .ok_or_else(|| StageError::business("payload has no rfq id"))?;
        let suppliers: Vec<Supplier> = payload::read_or_default(&envelope.payload, keys::SUPPLIERS)?;
        info!(job_id = %envelope.job_id, rfq_id = %rfq_id, "parsing supplier replies");

        let replies = self.backend.fetch_replies(&rfq_id, &suppliers).await?;
        let offers: Vec<Offer> = replies
            .iter()
            .filter_map(|reply| {
                let offer = extract_offer(&rfq_id, reply);
                if offer.is_none() {
                    debug!(supplier = %reply.supplier_email, kind = ?reply.response_type, "reply carries no offer");
                }
                offer
            })
            .collect();

        let summary = json!({
            "responses_received": replies.len(),
            "offers_extracted": offers.len(),
        });
        let updates = PayloadUpdates::new()
            .set(keys::EMAIL_RESPONSES, &replies)?
            .set(keys::PARSED_OFFERS, &offers)?
            .timestamp(keys::PARSING_COMPLETED_AT);
        Ok(StageOutput::new(updates.into_map(), summary))
    }
}
