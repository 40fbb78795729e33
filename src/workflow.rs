//! Static workflow definitions: name → ordered stage names.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::agents::names;
use crate::error::AgentikError;

pub const RFQ_PROCESSING: &str = "rfq_processing";
pub const OFFER_PROCESSING: &str = "offer_processing";
pub const DAILY_MAINTENANCE: &str = "daily_maintenance";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub stages: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(name: &str, stages: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            stages: stages.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn first_stage(&self) -> Option<&str> {
        self.stages.first().map(String::as_str)
    }

    /// Routing goes by stage position, so a stage may appear only once.
    pub fn validate(&self) -> Result<(), AgentikError> {
        if self.stages.is_empty() {
            return Err(AgentikError::InvalidWorkflow(format!("{} has no stages", self.name)));
        }
        for (idx, stage) in self.stages.iter().enumerate() {
            if self.stages[..idx].contains(stage) {
                return Err(AgentikError::InvalidWorkflow(format!(
                    "{} lists stage {stage} more than once",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Stage after `current`, or `None` when `current` is last.
    /// `current` must belong to the workflow.
    pub fn next_after(&self, current: &str) -> Option<Option<&str>> {
        let idx = self.stages.iter().position(|s| s == current)?;
        Some(self.stages.get(idx + 1).map(String::as_str))
    }
}

/// Single source of truth for stage ordering. Job types resolve either to a
/// workflow by name or through an alias.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, WorkflowDefinition>,
    aliases: BTreeMap<String, String>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three built-in sourcing workflows.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.insert(WorkflowDefinition::new(
            RFQ_PROCESSING,
            &[
                names::RFQ_INTAKE,
                names::SUPPLIER_DISCOVERY,
                names::EMAIL_SEND,
                names::INBOX_PARSER,
                names::SUPPLIER_VERIFIER,
                names::AGGREGATION_REPORT,
            ],
        ));
        registry.insert(WorkflowDefinition::new(
            OFFER_PROCESSING,
            &[
                names::INBOX_PARSER,
                names::SUPPLIER_VERIFIER,
                names::AGGREGATION_REPORT,
            ],
        ));
        registry.insert(WorkflowDefinition::new(
            DAILY_MAINTENANCE,
            &[names::AGGREGATION_REPORT],
        ));
        registry.alias("rfq_process", RFQ_PROCESSING);
        registry.alias("rfq_discovery", RFQ_PROCESSING);
        registry
    }

    /// Adds or replaces a workflow. Rejects definitions that fail [`WorkflowDefinition::validate`].
    pub fn register(&mut self, workflow: WorkflowDefinition) -> Result<(), AgentikError> {
        workflow.validate()?;
        self.insert(workflow);
        Ok(())
    }

    fn insert(&mut self, workflow: WorkflowDefinition) {
        self.workflows.insert(workflow.name.clone(), workflow);
    }

    pub fn alias(&mut self, alias: &str, workflow: &str) {
        self.aliases.insert(alias.to_string(), workflow.to_string());
    }

    pub fn resolve(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(name).or_else(|| {
            self.aliases
                .get(name)
                .and_then(|target| self.workflows.get(target))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn first_stage(&self, name: &str) -> Result<&str, AgentikError> {
        self.resolve(name)
            .and_then(WorkflowDefinition::first_stage)
            .ok_or_else(|| AgentikError::UnknownWorkflow(name.to_string()))
    }

    /// Next stage after `current` in workflow `name`. `Ok(None)` means the job is done.
    pub fn next_stage(&self, name: &str, current: &str) -> Result<Option<&str>, AgentikError> {
        let workflow = self
            .resolve(name)
            .ok_or_else(|| AgentikError::UnknownWorkflow(name.to_string()))?;
        workflow.next_after(current).ok_or_else(|| {
            AgentikError::UnknownWorkflow(format!("{name} has no stage {current}"))
        })
    }

    /// Every stage any workflow references, deduplicated, in first-seen order.
    pub fn stage_names(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for stage in self.workflows.values().flat_map(|w| w.stages.iter()) {
            if !seen.contains(&stage.as_str()) {
                seen.push(stage.as_str());
            }
        }
        seen
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.workflows.values()
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(a, w)| (a.as_str(), w.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfq_process_alias_resolves_to_six_stages() {
        let registry = WorkflowRegistry::standard();
        let workflow = registry.resolve("rfq_process").unwrap();
        assert_eq!(workflow.name, RFQ_PROCESSING);
        assert_eq!(workflow.stages.len(), 6);
        assert_eq!(registry.first_stage("rfq_process").unwrap(), "rfq_intake");
        assert_eq!(registry.first_stage("rfq_discovery").unwrap(), "rfq_intake");
    }

    #[test]
    fn next_stage_follows_declared_order() {
        let registry = WorkflowRegistry::standard();
        assert_eq!(
            registry.next_stage("rfq_process", "rfq_intake").unwrap(),
            Some("supplier_discovery")
        );
        assert_eq!(
            registry.next_stage(OFFER_PROCESSING, "inbox_parser").unwrap(),
            Some("supplier_verifier")
        );
        assert_eq!(
            registry.next_stage(RFQ_PROCESSING, "aggregation_report").unwrap(),
            None
        );
        assert_eq!(
            registry.next_stage(DAILY_MAINTENANCE, "aggregation_report").unwrap(),
            None
        );
    }

    #[test]
    fn unknown_names_are_errors() {
        let registry = WorkflowRegistry::standard();
        assert!(matches!(
            registry.first_stage("payroll"),
            Err(AgentikError::UnknownWorkflow(_))
        ));
        assert!(registry.next_stage(OFFER_PROCESSING, "rfq_intake").is_err());
        assert!(!registry.contains("payroll"));
    }

    #[test]
    fn register_rejects_repeated_stages() {
        let mut registry = WorkflowRegistry::new();
        let err = registry
            .register(WorkflowDefinition::new("loop", &["a", "b", "a"]))
            .unwrap_err();
        assert!(matches!(err, AgentikError::InvalidWorkflow(_)));
        assert!(registry.register(WorkflowDefinition::new("empty", &[])).is_err());
        assert!(!registry.contains("loop"));

        registry.register(WorkflowDefinition::new("ok", &["a", "b"])).unwrap();
        assert_eq!(registry.next_stage("ok", "b").unwrap(), None);
    }

    #[test]
    fn standard_workflows_are_valid() {
        for workflow in WorkflowRegistry::standard().iter() {
            assert!(workflow.validate().is_ok(), "{}", workflow.name);
        }
    }

    #[test]
    fn stage_names_are_deduplicated() {
        let registry = WorkflowRegistry::standard();
        let stages = registry.stage_names();
        assert_eq!(stages.len(), 6);
        for name in names::ALL {
            assert!(stages.contains(&name), "missing {name}");
        }
    }
}
