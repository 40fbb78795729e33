use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::AgentSlot;
use super::{ORCHESTRATOR, Shared};
use crate::agents::{AgentWorker, StageOutput};
use crate::error::AgentikError;
use crate::job::{JobEnvelope, JobStatus};
use crate::retry::RetryOutcome;
use crate::store::{QueueStore, keys};

/// What a worker loop did with one popped element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Disposition {
    Forwarded,
    Completed,
    Skipped,
    Failed,
}

/// Sleeps for `duration` unless `token` fires first. Returns `true` when cancelled.
pub(super) async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Moves submitted jobs from the intake queue to their workflow's first stage.
///
/// The pop is never raced against the token: dropping a pop that already
/// took an element would lose the job. Shutdown is noticed between pops.
pub(super) async fn run_intake<S: QueueStore, W: AgentWorker>(
    shared: Arc<Shared<S, W>>,
    store: S,
    token: CancellationToken,
) {
    let queues = vec![keys::JOBS_QUEUE.to_string()];
    info!(queue = keys::JOBS_QUEUE, "intake loop started");
    while !token.is_cancelled() {
        match store.pop_right_blocking(&queues, shared.settings.pop_timeout).await {
            Ok(Some((_, raw))) => shared.route_new_job(&raw).await,
            Ok(None) => {}
            Err(err) => {
                error!(queue = keys::JOBS_QUEUE, error = %err, "intake pop failed");
                if sleep_or_cancel(&token, shared.settings.store_retry_delay).await {
                    break;
                }
            }
        }
    }
    info!("intake loop stopped");
}

/// Pops from one stage queue, runs the worker with retries and hands
/// successful jobs to the next stage.
pub(super) async fn run_worker<S: QueueStore, W: AgentWorker>(
    shared: Arc<Shared<S, W>>,
    slot: Arc<AgentSlot<W>>,
    store: S,
    token: CancellationToken,
) {
    let queue = keys::stage_queue(slot.name());
    let queues = vec![queue.clone()];
    let settings = &shared.settings;
    let mut consecutive_failures = 0u32;
    info!(agent = slot.name(), queue = %queue, "worker loop started");

    while !token.is_cancelled() {
        if consecutive_failures >= settings.breaker_threshold {
            warn!(
                agent = slot.name(),
                failures = consecutive_failures,
                pause_secs = settings.breaker_pause.as_secs(),
                "circuit breaker open, pausing worker"
            );
            if sleep_or_cancel(&token, settings.breaker_pause).await {
                break;
            }
            consecutive_failures = 0;
            continue;
        }

        match store.pop_right_blocking(&queues, settings.pop_timeout).await {
            Ok(Some((_, raw))) => match shared.handle_job(&slot, &raw).await {
                Disposition::Forwarded | Disposition::Completed => consecutive_failures = 0,
                Disposition::Failed => consecutive_failures += 1,
                Disposition::Skipped => {}
            },
            Ok(None) => {}
            Err(err) => {
                consecutive_failures += 1;
                error!(agent = slot.name(), queue = %queue, error = %err, "worker pop failed");
                if sleep_or_cancel(&token, settings.store_retry_delay).await {
                    break;
                }
            }
        }
    }
    info!(agent = slot.name(), "worker loop stopped");
}

impl<S: QueueStore, W: AgentWorker> Shared<S, W> {
    async fn is_cancelled(&self, job_id: &str) -> bool {
        match self.statuses.get(job_id).await {
            Ok(Some(record)) => record.is_cancelled(),
            Ok(None) => false,
            Err(err) => {
                warn!(job_id, error = %err, "could not read status, assuming not cancelled");
                false
            }
        }
    }

    async fn route_new_job(&self, raw: &str) {
        let mut envelope = match JobEnvelope::from_wire(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = %err, "dropping malformed envelope from intake queue");
                return;
            }
        };
        if self.is_cancelled(&envelope.job_id).await {
            info!(job_id = %envelope.job_id, "job cancelled before routing, skipping");
            return;
        }

        let first = match self.workflows.first_stage(envelope.workflow_key()) {
            Ok(stage) => stage.to_string(),
            Err(err) => {
                warn!(job_id = %envelope.job_id, error = %err, "cannot route job");
                if let Err(store_err) = self
                    .statuses
                    .mark_failed(&envelope.job_id, &err.to_string(), 0)
                    .await
                {
                    error!(job_id = %envelope.job_id, error = %store_err, "could not record failure");
                }
                return;
            }
        };

        let queue = keys::stage_queue(&first);
        if let Err(err) = self.enqueue(&mut envelope, &queue, ORCHESTRATOR).await {
            self.routing_failed(&envelope.job_id, &queue, &err, 0).await;
            return;
        }
        info!(job_id = %envelope.job_id, stage = %first, "job routed");
    }

    pub(super) async fn handle_job(&self, slot: &AgentSlot<W>, raw: &str) -> Disposition {
        let stage = slot.name();
        let envelope = match JobEnvelope::from_wire(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(agent = stage, error = %err, "dropping malformed envelope");
                return Disposition::Failed;
            }
        };
        let job_id = envelope.job_id.clone();

        match self.statuses.get(&job_id).await {
            Ok(Some(record)) if record.is_cancelled() => {
                info!(job_id = %job_id, stage, "job cancelled, skipping");
                return Disposition::Skipped;
            }
            Ok(Some(record)) if !record.status.can_transition_to(JobStatus::InProgress) => {
                info!(job_id = %job_id, stage, status = %record.status, "job already finished, skipping");
                return Disposition::Skipped;
            }
            Ok(_) => {}
            Err(err) => warn!(job_id = %job_id, error = %err, "could not read status before processing"),
        }

        if let Err(err) = self.statuses.mark_in_progress(&job_id, stage).await {
            warn!(job_id = %job_id, stage, error = %err, "could not mark job in progress");
        }
        debug!(job_id = %job_id, stage, "processing job");

        match self.executor.execute_with_retry(&slot.worker, &envelope).await {
            RetryOutcome::Succeeded { output, attempts } => {
                slot.record_outcome(true);
                self.advance(envelope, stage, output, attempts).await
            }
            RetryOutcome::Exhausted { .. } => {
                slot.record_outcome(false);
                Disposition::Failed
            }
        }
    }

    /// Merges the stage output into the envelope, then either pushes it to the
    /// next stage or marks the job completed.
    async fn advance(
        &self,
        mut envelope: JobEnvelope,
        stage: &str,
        output: StageOutput,
        attempts: u32,
    ) -> Disposition {
        let job_id = envelope.job_id.clone();
        envelope.merge_payload(output.payload);

        let next = match self.workflows.next_stage(envelope.workflow_key(), stage) {
            Ok(next) => next.map(str::to_string),
            Err(err) => {
                error!(job_id = %job_id, stage, error = %err, "no route after stage");
                if let Err(store_err) = self.statuses.mark_failed(&job_id, &err.to_string(), attempts).await {
                    error!(job_id = %job_id, error = %store_err, "could not record failure");
                }
                return Disposition::Failed;
            }
        };

        let Some(next) = next else {
            return match self
                .statuses
                .mark_completed(&job_id, stage, &output.summary, attempts)
                .await
            {
                Ok(()) => {
                    info!(job_id = %job_id, stage, attempts, "job completed");
                    Disposition::Completed
                }
                Err(err) => {
                    error!(job_id = %job_id, error = %err, "could not record completion");
                    Disposition::Failed
                }
            };
        };

        if self.is_cancelled(&job_id).await {
            info!(job_id = %job_id, stage, "job cancelled during processing, not forwarding");
            return Disposition::Skipped;
        }

        let queue = keys::stage_queue(&next);
        match self
            .hand_off(&mut envelope, stage, &next, &output.summary, attempts)
            .await
        {
            Ok(()) => {
                info!(job_id = %job_id, stage, next = %next, attempts, "stage completed, job forwarded");
                Disposition::Forwarded
            }
            Err(err) => {
                self.routing_failed(&job_id, &queue, &err, attempts).await;
                Disposition::Failed
            }
        }
    }

    async fn hand_off(
        &self,
        envelope: &mut JobEnvelope,
        stage: &str,
        next: &str,
        summary: &Value,
        attempts: u32,
    ) -> Result<(), AgentikError> {
        self.statuses
            .mark_stage_completed(&envelope.job_id, stage, next, summary, attempts)
            .await?;
        self.enqueue(envelope, &keys::stage_queue(next), stage).await
    }

    async fn routing_failed(&self, job_id: &str, queue: &str, err: &AgentikError, attempts: u32) {
        error!(job_id, queue, error = %err, "could not forward job");
        let message = format!("routing to {queue} failed: {err}");
        if let Err(store_err) = self.statuses.mark_failed(job_id, &message, attempts).await {
            error!(job_id, error = %store_err, "could not record failure");
        }
    }
}
