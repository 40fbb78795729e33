//! Stage workers of the sourcing pipeline.
//!
//! Each stage reads typed records from the payload, calls the
//! [`SourcingBackend`], and returns the keys it adds. Stages never enqueue;
//! the orchestrator decides where a job goes next.

mod aggregation_report;
mod backend;
mod email_send;
mod inbox_parser;
pub mod payload;
mod rfq_intake;
mod supplier_discovery;
mod supplier_verifier;

use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::StageError;
use crate::job::JobEnvelope;

pub use aggregation_report::AggregationReport;
pub use backend::{Invitation, LoggingBackend, SourcingBackend};
pub use email_send::EmailSend;
pub use inbox_parser::InboxParser;
pub use rfq_intake::RfqIntake;
pub use supplier_discovery::SupplierDiscovery;
pub use supplier_verifier::SupplierVerifier;

pub mod names {
    pub const RFQ_INTAKE: &str = "rfq_intake";
    pub const SUPPLIER_DISCOVERY: &str = "supplier_discovery";
    pub const EMAIL_SEND: &str = "email_send";
    pub const INBOX_PARSER: &str = "inbox_parser";
    pub const SUPPLIER_VERIFIER: &str = "supplier_verifier";
    pub const AGGREGATION_REPORT: &str = "aggregation_report";

    pub const ALL: [&str; 6] = [
        RFQ_INTAKE,
        SUPPLIER_DISCOVERY,
        EMAIL_SEND,
        INBOX_PARSER,
        SUPPLIER_VERIFIER,
        AGGREGATION_REPORT,
    ];
}

/// What a successful stage hands back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    /// Top-level keys merged into the envelope payload.
    pub payload: Map<String, Value>,
    /// Short summary recorded as `stage_info`, or as `result` on the last stage.
    pub summary: Value,
}

impl StageOutput {
    pub fn new(payload: Map<String, Value>, summary: Value) -> Self {
        Self { payload, summary }
    }
}

/// A named unit of work, one per stage.
///
/// Delivery is at-least-once, so `process` must tolerate seeing the same job
/// twice.
pub trait AgentWorker: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn process(
        &self,
        envelope: &JobEnvelope,
    ) -> impl Future<Output = Result<StageOutput, StageError>> + Send;
}

/// The six built-in stages behind one worker type.
pub enum Stage<B> {
    RfqIntake(RfqIntake<B>),
    SupplierDiscovery(SupplierDiscovery<B>),
    EmailSend(EmailSend<B>),
    InboxParser(InboxParser<B>),
    SupplierVerifier(SupplierVerifier<B>),
    AggregationReport(AggregationReport<B>),
}

impl<B: SourcingBackend> Stage<B> {
    /// Every stage, in pipeline order, sharing one backend.
    pub fn all(backend: Arc<B>) -> Vec<Self> {
        names::ALL
            .iter()
            .filter_map(|name| Self::by_name(name, backend.clone()))
            .collect()
    }

    pub fn by_name(name: &str, backend: Arc<B>) -> Option<Self> {
        let stage = match name {
            names::RFQ_INTAKE => Stage::RfqIntake(RfqIntake::new(backend)),
            names::SUPPLIER_DISCOVERY => Stage::SupplierDiscovery(SupplierDiscovery::new(backend)),
            names::EMAIL_SEND => Stage::EmailSend(EmailSend::new(backend)),
            names::INBOX_PARSER => Stage::InboxParser(InboxParser::new(backend)),
            names::SUPPLIER_VERIFIER => Stage::SupplierVerifier(SupplierVerifier::new(backend)),
            names::AGGREGATION_REPORT => Stage::AggregationReport(AggregationReport::new(backend)),
            _ => return None,
        };
        Some(stage)
    }
}

impl<B: SourcingBackend> AgentWorker for Stage<B> {
    fn name(&self) -> &str {
        match self {
            Stage::RfqIntake(s) => s.name(),
            Stage::SupplierDiscovery(s) => s.name(),
            Stage::EmailSend(s) => s.name(),
            Stage::InboxParser(s) => s.name(),
            Stage::SupplierVerifier(s) => s.name(),
            Stage::AggregationReport(s) => s.name(),
        }
    }

    fn description(&self) -> &str {
        match self {
            Stage::RfqIntake(s) => s.description(),
            Stage::SupplierDiscovery(s) => s.description(),
            Stage::EmailSend(s) => s.description(),
            Stage::InboxParser(s) => s.description(),
            Stage::SupplierVerifier(s) => s.description(),
            Stage::AggregationReport(s) => s.description(),
        }
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<StageOutput, StageError> {
        payload::check_schema(&envelope.payload)?;
        match self {
            Stage::RfqIntake(s) => s.process(envelope).await,
            Stage::SupplierDiscovery(s) => s.process(envelope).await,
            Stage::EmailSend(s) => s.process(envelope).await,
            Stage::InboxParser(s) => s.process(envelope).await,
            Stage::SupplierVerifier(s) => s.process(envelope).await,
            Stage::AggregationReport(s) => s.process(envelope).await,
        }
    }
}
