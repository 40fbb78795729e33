use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{now_timestamp, parse_timestamp};
use crate::error::StoreError;

/// Error text written when a user cancels a job. Cancellation shares the
/// `failed` status, so this string is the only way to tell the two apart.
pub const CANCELLED_ERROR: &str = "cancelled by user";

/// Lifecycle of a job as recorded in its status record.
///
/// queued → in_progress → completed | failed. `cancelled` is accepted when
/// read back from the store but never written here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    /// A terminal job never resumes.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Queued => true,
            JobStatus::InProgress => next != JobStatus::Queued,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(StoreError::Serialization(format!("unknown job status: {other}"))),
        }
    }
}

pub(crate) mod fields {
    pub const STATUS: &str = "status";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const RESULT: &str = "result";
    pub const ERROR: &str = "error";
    pub const USER_ID: &str = "user_id";
    pub const JOB_TYPE: &str = "job_type";
    pub const CURRENT_STAGE: &str = "current_agent";
    pub const STAGE: &str = "stage";
    pub const STAGE_INFO: &str = "stage_info";
    pub const ATTEMPTS: &str = "attempts";
    pub const QUEUE: &str = "queue";
    pub const ENVELOPE: &str = "envelope";
    pub const CANCELLED_AT: &str = "cancelled_at";
}

/// One job's status record, read back from its field map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub user_id: Option<String>,
    pub job_type: Option<String>,
    /// Stage currently responsible for the job.
    pub current_stage: Option<String>,
    /// Last progress marker, e.g. `rfq_intake_completed`.
    pub stage: Option<String>,
    pub stage_info: Option<Value>,
    pub attempts: Option<u32>,
    /// Queue and exact serialized envelope of the last push, used by cancel.
    #[serde(skip)]
    pub queue: Option<String>,
    #[serde(skip)]
    pub envelope: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl StatusRecord {
    /// Builds a record from a raw field map. An empty map means "no such job".
    pub fn from_fields(
        job_id: &str,
        mut raw: HashMap<String, String>,
    ) -> Result<Option<Self>, StoreError> {
        if raw.is_empty() {
            return Ok(None);
        }
        let status = raw
            .get(fields::STATUS)
            .map(|s| s.parse::<JobStatus>())
            .transpose()?
            .unwrap_or(JobStatus::Queued);
        let timestamp = |raw: &HashMap<String, String>, key: &str| {
            raw.get(key).and_then(|v| parse_timestamp(v))
        };
        // Stored as JSON text; anything unparsable is kept as a plain string.
        let json = |text: String| serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(Some(Self {
            job_id: job_id.to_string(),
            status,
            created_at: timestamp(&raw, fields::CREATED_AT),
            updated_at: timestamp(&raw, fields::UPDATED_AT),
            cancelled_at: timestamp(&raw, fields::CANCELLED_AT),
            result: raw.remove(fields::RESULT).map(json),
            stage_info: raw.remove(fields::STAGE_INFO).map(json),
            error: raw.remove(fields::ERROR),
            user_id: raw.remove(fields::USER_ID),
            job_type: raw.remove(fields::JOB_TYPE),
            current_stage: raw.remove(fields::CURRENT_STAGE),
            stage: raw.remove(fields::STAGE),
            attempts: raw.get(fields::ATTEMPTS).and_then(|a| a.parse().ok()),
            queue: raw.remove(fields::QUEUE),
            envelope: raw.remove(fields::ENVELOPE),
        }))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some() || self.error.as_deref() == Some(CANCELLED_ERROR)
    }
}

/// A partial write to a status record. Every update advances `updated_at`.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    fields: Vec<(String, String)>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self::touch().field(fields::STATUS, status.as_str())
    }

    /// An update that changes no status, only `updated_at`.
    pub fn touch() -> Self {
        Self {
            fields: vec![(fields::UPDATED_AT.to_string(), now_timestamp())],
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    pub fn json(self, name: &str, value: &Value) -> Self {
        let text = value.to_string();
        self.field(name, text)
    }

    pub fn error(self, message: &str) -> Self {
        self.field(fields::ERROR, message)
    }

    pub fn attempts(self, attempts: u32) -> Self {
        self.field(fields::ATTEMPTS, attempts.to_string())
    }

    pub fn into_fields(self) -> Vec<(String, String)> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn terminal_states_never_resume() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::InProgress));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn empty_fields_mean_missing_record() {
        assert!(StatusRecord::from_fields("j", HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn record_from_fields() {
        let record = StatusRecord::from_fields(
            "j1",
            raw(&[
                ("status", "in_progress"),
                ("created_at", "2024-05-01T12:30:00Z"),
                ("updated_at", "2024-05-01T12:31:00.000000Z"),
                ("user_id", "u1"),
                ("stage_info", r#"{"suppliers_found": 3}"#),
                ("attempts", "2"),
                ("result", "not json"),
            ]),
        )
        .unwrap()
        .unwrap();

        assert_eq!(record.status, JobStatus::InProgress);
        assert_eq!(record.user_id.as_deref(), Some("u1"));
        assert_eq!(record.stage_info, Some(json!({"suppliers_found": 3})));
        assert_eq!(record.result, Some(Value::String("not json".into())));
        assert_eq!(record.attempts, Some(2));
        assert!(record.updated_at > record.created_at);
        assert!(!record.is_cancelled());
    }

    #[test]
    fn cancellation_detected_from_error_text() {
        let record = StatusRecord::from_fields(
            "j1",
            raw(&[("status", "failed"), ("error", CANCELLED_ERROR)]),
        )
        .unwrap()
        .unwrap();
        assert!(record.is_cancelled());
    }

    #[test]
    fn update_always_advances_updated_at() {
        let fields = StatusUpdate::new(JobStatus::Failed)
            .error("boom")
            .attempts(3)
            .into_fields();
        let names: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["updated_at", "status", "error", "attempts"]);
        assert!(StatusUpdate::touch().into_fields()[0].0 == "updated_at");
    }
}
