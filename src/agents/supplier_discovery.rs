use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::payload::{self, PayloadUpdates, Rfq, Supplier, keys};
use super::{AgentWorker, SourcingBackend, StageOutput, names};
use crate::error::StageError;
use crate::job::JobEnvelope;

/// How many ranked suppliers are carried forward to outreach.
const MAX_SELECTED: usize = 10;

pub struct SupplierDiscovery<B> {
    backend: Arc<B>,
}

impl<B: SourcingBackend> SupplierDiscovery<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

/// 0.5 for a category match, up to 0.3 for keyword hits in the description,
/// 0.2 for a verified supplier. Capped at 1.0.
fn relevance(rfq: &Rfq, supplier: &Supplier) -> f64 {
    let mut score = 0.0;

    let category = rfq.category.to_lowercase();
    if supplier.categories.iter().any(|c| c.to_lowercase() == category) {
        score += 0.5;
    }

    let description = supplier.description.to_lowercase();
    let hits = rfq
        .keywords
        .iter()
        .filter(|k| description.contains(k.as_str()))
        .count();
    score += hits as f64 / rfq.keywords.len().max(1) as f64 * 0.3;

    if supplier.verified {
        score += 0.2;
    }
    score.min(1.0)
}

fn rank(rfq: &Rfq, candidates: Vec<Supplier>) -> Vec<Supplier> {
    let mut ranked: Vec<Supplier> = candidates
        .into_iter()
        .map(|mut s| {
            s.relevance_score = relevance(rfq, &s);
            s
        })
        .collect();
    ranked.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    ranked
}

impl<B: SourcingBackend> AgentWorker for SupplierDiscovery<B> {
    fn name(&self) -> &str {
        names::SUPPLIER_DISCOVERY
    }

    fn description(&self) -> &str {
        "Finds and ranks suppliers matching the RFQ category and keywords"
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<StageOutput, StageError> {
        let rfq: Rfq = payload::read(&envelope.payload, keys::RFQ)?
            .ok_or_else(|| StageError::business("payload has no rfq"))?;
        info!(job_id = %envelope.job_id, rfq_id = %rfq.id, category = %rfq.category, "discovering suppliers");

        let candidates = self.backend.find_suppliers(&rfq.category).await?;
        let found = candidates.len();
        let mut selected = rank(&rfq, candidates);
        selected.truncate(MAX_SELECTED);

        let summary = json!({
            "suppliers_found": found,
            "suppliers_selected": selected.len(),
        });
        let updates = PayloadUpdates::new()
            .set(keys::SUPPLIERS, &selected)?
            .timestamp(keys::DISCOVERY_COMPLETED_AT);
        Ok(StageOutput::new(updates.into_map(), summary))
    }
}
