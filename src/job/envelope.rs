use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The serialized job record that moves between stage queues.
///
/// Only `payload` grows as the job advances; `queued_at`/`queued_by` are
/// overwritten on every push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: String,
    /// Some producers only write `workflow_name`; decoding fills this in from it.
    #[serde(default)]
    pub job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub user_id: String,
    #[serde(with = "super::iso8601")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "super::iso8601::option", skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_by: Option<String>,
}

impl JobEnvelope {
    pub fn new(job_type: impl Into<String>, payload: Map<String, Value>, user_id: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            workflow_name: None,
            payload,
            user_id: user_id.into(),
            created_at: Utc::now(),
            queued_at: None,
            queued_by: None,
        }
    }

    /// Name used to look the job up in the workflow registry.
    pub fn workflow_key(&self) -> &str {
        self.workflow_name.as_deref().unwrap_or(&self.job_type)
    }

    /// Marks the envelope as pushed by `queued_by`, right now.
    pub fn stamp(&mut self, queued_by: &str) {
        self.queued_at = Some(Utc::now());
        self.queued_by = Some(queued_by.to_string());
    }

    /// Shallow merge: top-level keys in `updates` replace existing ones.
    pub fn merge_payload(&mut self, updates: Map<String, Value>) {
        self.payload.extend(updates);
    }

    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes an envelope. Either `job_type` or `workflow_name` must be set.
    pub fn from_wire(raw: &str) -> serde_json::Result<Self> {
        let mut env: Self = serde_json::from_str(raw)?;
        if env.job_type.is_empty() {
            match &env.workflow_name {
                Some(name) if !name.is_empty() => env.job_type = name.clone(),
                _ => return Err(serde_json::Error::custom("envelope has neither job_type nor workflow_name")),
            }
        }
        Ok(env)
    }
}
