//! Demonstração embutida: o pipeline completo de RFQ sobre um armazenamento
//! em memória, sem Redis nem serviços externos.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::info;

use crate::agents::payload::{self, QuoteTerms, ReplyKind, Rfq, Supplier, SupplierReply};
use crate::agents::{LoggingBackend, Stage};
use crate::job::{StatusRecord, now_timestamp};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::store::MemoryQueueStore;
use crate::ui::JobProgress;
use crate::workflow::{RFQ_PROCESSING, WorkflowRegistry};

pub const DEMO_RFQ_ID: &str = "rfq-demo-001";
const DEMO_USER: &str = "demo";
const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn supplier(id: &str, name: &str, description: &str, verified: bool) -> Supplier {
    Supplier {
        id: Some(id.into()),
        name: name.into(),
        email: format!("sales@{id}.example.com"),
        company: format!("{name} Ltd."),
        categories: vec!["electronics".into()],
        description: description.into(),
        verified,
        ..Supplier::default()
    }
}

fn quote(supplier: &Supplier, unit_price: f64, delivery_time: i64) -> SupplierReply {
    SupplierReply {
        supplier_id: supplier.id.clone(),
        supplier_email: supplier.email.clone(),
        supplier_name: supplier.name.clone(),
        response_type: ReplyKind::Quote,
        received_at: now_timestamp(),
        content: format!("We can deliver in {delivery_time} days at {unit_price:.2} per unit."),
        extracted: Some(QuoteTerms {
            unit_price: Some(unit_price),
            total_price: Some(unit_price * 500.0),
            delivery_time: Some(delivery_time),
            terms: Some("Net 30".into()),
        }),
    }
}

/// Backend seeded with three suppliers: two quote, one declines.
pub fn sample_backend() -> LoggingBackend {
    let volt = supplier("voltline", "Voltline", "Sensors and microcontroller components", true);
    let circuit = supplier("circuitworks", "CircuitWorks", "PCB assembly and components", true);
    let budget = supplier("budgetparts", "BudgetParts", "Discount hardware", false);

    let decline = SupplierReply {
        response_type: ReplyKind::Decline,
        extracted: None,
        content: "Unable to quote this quarter.".into(),
        ..quote(&budget, 0.0, 0)
    };

    LoggingBackend::new()
        .with_rfq(sample_rfq())
        .with_undeliverable(&budget.email)
        .with_reply(DEMO_RFQ_ID, quote(&volt, 4.20, 12))
        .with_reply(DEMO_RFQ_ID, quote(&circuit, 3.85, 21))
        .with_reply(DEMO_RFQ_ID, decline)
        .with_supplier(volt)
        .with_supplier(circuit)
        .with_supplier(budget)
}

/// An electronics RFQ whose deadline is ten days out.
pub fn sample_rfq() -> Rfq {
    Rfq {
        id: DEMO_RFQ_ID.into(),
        title: "Temperature sensor modules".into(),
        description: "Digital temperature sensor modules for an industrial monitoring rollout".into(),
        category: "electronics".into(),
        quantity: Some(500),
        unit: Some("pcs".into()),
        deadline: Some((Utc::now() + chrono::Duration::days(10)).format("%Y-%m-%d").to_string()),
        budget_min: Some(1500.0),
        budget_max: Some(2500.0),
        ..Rfq::default()
    }
}

/// Payload carrying the sample RFQ inline.
pub fn sample_payload() -> Result<Map<String, Value>> {
    let mut data = Map::new();
    data.insert(payload::keys::RFQ.into(), serde_json::to_value(sample_rfq())?);
    Ok(data)
}

/// Runs one RFQ through all six stages and returns its final status record.
pub async fn run(settings: OrchestratorSettings) -> Result<StatusRecord> {
    let backend = Arc::new(sample_backend());
    let orchestrator = Orchestrator::new(MemoryQueueStore::new(), WorkflowRegistry::standard(), settings);
    for stage in Stage::all(backend.clone()) {
        orchestrator.register(stage)?;
    }
    orchestrator.start().await?;

    let job_id = orchestrator
        .submit(RFQ_PROCESSING, sample_payload()?, DEMO_USER)
        .await?;
    info!(job_id = %job_id, "demo job submitted");

    let mut progress = JobProgress::start(&job_id, RFQ_PROCESSING);
    let record = loop {
        match orchestrator.get_status(&job_id).await? {
            Some(record) if record.status.is_terminal() => break record,
            Some(record) => progress.update(&record),
            None => {}
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    progress.complete(&record);

    orchestrator.shutdown().await?;
    for agent in orchestrator.agents() {
        let attempts = orchestrator.agent_audit(&agent.name, usize::MAX).await?.len();
        info!(
            agent = %agent.name,
            processed = agent.processed,
            failed = agent.failed,
            success_rate = ?agent.success_rate(),
            attempts,
            "agent summary"
        );
    }
    info!(
        invitations = backend.invitations().len(),
        offers = backend.stored_offers().len(),
        rfq_status = backend.rfq_status(DEMO_RFQ_ID).as_deref().unwrap_or("open"),
        "demo finished"
    );
    if record.result.is_none() && record.error.is_none() {
        bail!("job {job_id} finished without result or error");
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::job::JobStatus;

    fn fast_settings() -> OrchestratorSettings {
        OrchestratorSettings {
            pop_timeout: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(1),
            ..OrchestratorSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn demo_pipeline_completes_with_report() {
        let record = run(fast_settings()).await.unwrap();

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.current_stage.as_deref(), Some("aggregation_report"));
        let result = record.result.unwrap();
        assert_eq!(result["final_report_generated"], json!(true));
        assert_eq!(result["total_offers"], json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn demo_leaves_one_audit_entry_per_stage() {
        let store = MemoryQueueStore::new();
        let trail = crate::retry::AuditTrail::new(store.clone());
        let orchestrator = Orchestrator::new(store, WorkflowRegistry::standard(), fast_settings());
        for stage in Stage::all(Arc::new(sample_backend())) {
            orchestrator.register(stage).unwrap();
        }
        orchestrator.start().await.unwrap();
        let job_id = orchestrator
            .submit(RFQ_PROCESSING, sample_payload().unwrap(), DEMO_USER)
            .await
            .unwrap();
        loop {
            let record = orchestrator.get_status(&job_id).await.unwrap();
            if record.is_some_and(|r| r.status.is_terminal()) {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        orchestrator.shutdown().await.unwrap();

        for name in crate::agents::names::ALL {
            let entries = trail.recent(name, 10).await.unwrap();
            assert_eq!(entries.len(), 1, "{name}");
            assert!(entries[0].success);
            assert_eq!(entries[0].job_id, job_id);
        }
    }

    #[test]
    fn sample_payload_carries_rfq() {
        let data = sample_payload().unwrap();
        assert_eq!(data["rfq"]["id"], json!(DEMO_RFQ_ID));
        assert_eq!(data["rfq"]["quantity"], json!(500));
    }
}
