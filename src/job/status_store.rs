//! Per-job status records kept in the queue store.
//!
//! All writes are field merges, so concurrent writers (a cancel racing a
//! completion, say) resolve as last-write-wins per field. Nothing here detects
//! or prevents that.

use serde_json::Value;
use tracing::debug;

use super::status::fields;
use super::{CANCELLED_ERROR, JobEnvelope, JobStatus, StatusRecord, StatusUpdate, now_timestamp};
use crate::error::StoreResult;
use crate::store::{QueueStore, keys};

#[derive(Debug, Clone)]
pub struct StatusStore<S> {
    store: S,
}

impl<S: QueueStore> StatusStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Writes the initial `queued` record. Must happen before the first push.
    pub async fn create(&self, envelope: &JobEnvelope) -> StoreResult<()> {
        let update = StatusUpdate::new(JobStatus::Queued)
            .field(fields::CREATED_AT, now_timestamp())
            .field(fields::USER_ID, envelope.user_id.as_str())
            .field(fields::JOB_TYPE, envelope.job_type.as_str());
        self.update(&envelope.job_id, update).await
    }

    pub async fn update(&self, job_id: &str, update: StatusUpdate) -> StoreResult<()> {
        self.store
            .set_fields(&keys::status_key(job_id), &update.into_fields())
            .await
    }

    pub async fn get(&self, job_id: &str) -> StoreResult<Option<StatusRecord>> {
        let raw = self.store.get_fields(&keys::status_key(job_id)).await?;
        StatusRecord::from_fields(job_id, raw)
    }

    /// Remembers where the job was last pushed, byte for byte, so cancel can find it.
    pub async fn record_location(&self, job_id: &str, queue: &str, wire: &str) -> StoreResult<()> {
        let update = StatusUpdate::touch()
            .field(fields::QUEUE, queue)
            .field(fields::ENVELOPE, wire);
        self.update(job_id, update).await
    }

    pub async fn mark_in_progress(&self, job_id: &str, stage: &str) -> StoreResult<()> {
        let update = StatusUpdate::new(JobStatus::InProgress)
            .field(fields::CURRENT_STAGE, stage)
            .field(fields::STAGE, format!("{stage}_started"));
        self.update(job_id, update).await
    }

    /// A non-terminal stage finished; the job stays `in_progress` under `next`.
    pub async fn mark_stage_completed(
        &self,
        job_id: &str,
        stage: &str,
        next: &str,
        summary: &Value,
        attempts: u32,
    ) -> StoreResult<()> {
        let update = StatusUpdate::new(JobStatus::InProgress)
            .field(fields::CURRENT_STAGE, next)
            .field(fields::STAGE, format!("{stage}_completed"))
            .json(fields::STAGE_INFO, summary)
            .attempts(attempts);
        self.update(job_id, update).await
    }

    /// The terminal stage finished. Only this write sets `result`.
    pub async fn mark_completed(
        &self,
        job_id: &str,
        stage: &str,
        result: &Value,
        attempts: u32,
    ) -> StoreResult<()> {
        let update = StatusUpdate::new(JobStatus::Completed)
            .field(fields::STAGE, "completed")
            .field(fields::CURRENT_STAGE, stage)
            .json(fields::RESULT, result)
            .attempts(attempts);
        debug!(job_id, stage, "job completed");
        self.update(job_id, update).await
    }

    pub async fn mark_failed(&self, job_id: &str, error: &str, attempts: u32) -> StoreResult<()> {
        let update = StatusUpdate::new(JobStatus::Failed)
            .error(error)
            .attempts(attempts);
        self.update(job_id, update).await
    }

    /// Cancellation is recorded as a failure with [`CANCELLED_ERROR`], plus a
    /// `cancelled_at` marker that workers check right after popping.
    pub async fn mark_cancelled(&self, job_id: &str) -> StoreResult<()> {
        let update = StatusUpdate::new(JobStatus::Failed)
            .error(CANCELLED_ERROR)
            .field(fields::CANCELLED_AT, now_timestamp());
        self.update(job_id, update).await
    }

    /// Most recent jobs owned by `user_id`, newest first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        job_type: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<StatusRecord>> {
        let mut records = Vec::new();
        for key in self.store.scan_keys(keys::STATUS_PATTERN).await? {
            let Some(job_id) = keys::job_id_from_status_key(&key) else {
                continue;
            };
            let Some(record) = self.get(job_id).await? else {
                continue;
            };
            if record.user_id.as_deref() != Some(user_id) {
                continue;
            }
            if job_type.is_some_and(|t| record.job_type.as_deref() != Some(t)) {
                continue;
            }
            records.push(record);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
