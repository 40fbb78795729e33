use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::agents::{AgentWorker, StageOutput};
use crate::error::{StageError, StoreError, StoreResult};
use crate::job::{JobEnvelope, StatusStore};
use crate::store::{QueueStore, keys};

/// Entries kept per worker before the oldest is dropped.
pub const AUDIT_CAPACITY: usize = 100;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per stage execution, first try included.
    pub max_retries: u32,
    /// Base delay in milliseconds for linear backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// delay = base_delay_ms * attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }

    /// Zero is read as a single attempt.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// One attempt at running a stage on a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub job_id: String,
    pub agent: String,
    pub attempt: u32,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Bounded per-agent history of attempts, kept in the shared store.
///
/// Each agent has one list, newest entry at the head, trimmed to `capacity`
/// after every write. Any process connected to the store can read it.
#[derive(Debug, Clone)]
pub struct AuditTrail<S> {
    store: S,
    capacity: usize,
}

impl<S: QueueStore> AuditTrail<S> {
    pub fn new(store: S) -> Self {
        Self::with_capacity(store, AUDIT_CAPACITY)
    }

    pub fn with_capacity(store: S, capacity: usize) -> Self {
        Self { store, capacity }
    }

    pub async fn record(&self, entry: &AuditEntry) -> StoreResult<()> {
        let raw = serde_json::to_string(entry).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let key = keys::audit_key(&entry.agent);
        self.store.push_left(&key, &raw).await?;
        self.store.trim(&key, self.capacity).await
    }

    /// Up to `limit` of the newest entries for `agent`, oldest first.
    pub async fn recent(&self, agent: &str, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let raw = self.store.range(&keys::audit_key(agent), limit).await?;
        let mut entries: Vec<AuditEntry> = raw
            .iter()
            .filter_map(|item| match serde_json::from_str(item) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(agent, error = %err, "skipping unreadable audit entry");
                    None
                }
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Succeeded { output: StageOutput, attempts: u32 },
    Exhausted { error: StageError, attempts: u32 },
}

/// Runs a stage with bounded attempts and linear backoff.
///
/// Exhaustion writes the `failed` status itself. Success is left to the
/// caller, which knows whether the job moves on or completes.
#[derive(Debug, Clone)]
pub struct RetryExecutor<S> {
    statuses: StatusStore<S>,
    audit: AuditTrail<S>,
    config: RetryConfig,
}

impl<S: QueueStore> RetryExecutor<S> {
    pub fn new(statuses: StatusStore<S>, audit: AuditTrail<S>, config: RetryConfig) -> Self {
        Self {
            statuses,
            audit,
            config,
        }
    }

    pub fn audit(&self) -> &AuditTrail<S> {
        &self.audit
    }

    pub async fn execute_with_retry<W: AgentWorker>(&self, worker: &W, envelope: &JobEnvelope) -> RetryOutcome {
        let max = self.config.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = worker.process(envelope).await;
            let entry = AuditEntry {
                job_id: envelope.job_id.clone(),
                agent: worker.name().to_string(),
                attempt,
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
                timestamp: Utc::now(),
            };
            if let Err(store_err) = self.audit.record(&entry).await {
                warn!(job_id = %envelope.job_id, agent = worker.name(), error = %store_err, "could not write audit entry");
            }

            let err = match result {
                Ok(output) => {
                    return RetryOutcome::Succeeded {
                        output,
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            if attempt >= max {
                error!(
                    job_id = %envelope.job_id,
                    agent = worker.name(),
                    attempts = attempt,
                    error = %err,
                    "stage failed, retries exhausted"
                );
                if let Err(store_err) = self
                    .statuses
                    .mark_failed(&envelope.job_id, err.message(), attempt)
                    .await
                {
                    error!(job_id = %envelope.job_id, error = %store_err, "could not record failure");
                }
                return RetryOutcome::Exhausted {
                    error: err,
                    attempts: attempt,
                };
            }

            let delay = self.config.delay_for_attempt(attempt);
            warn!(
                job_id = %envelope.job_id,
                agent = worker.name(),
                attempt,
                max,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "stage attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::{Map, json};
    use tokio::time::Instant;

    use super::*;
    use crate::job::JobStatus;
    use crate::store::MemoryQueueStore;

    /// Fails until the `succeed_on`th call.
    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    impl Flaky {
        fn new(succeed_on: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed_on,
            }
        }
    }

    impl AgentWorker for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn description(&self) -> &str {
            "fails a fixed number of times"
        }

        async fn process(&self, _envelope: &JobEnvelope) -> Result<StageOutput, StageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(StageOutput::new(Map::new(), json!({"call": call})))
            } else {
                Err(StageError::system("supplier directory timeout"))
            }
        }
    }

    fn executor(max_retries: u32) -> (RetryExecutor<MemoryQueueStore>, StatusStore<MemoryQueueStore>) {
        let store = MemoryQueueStore::new();
        let statuses = StatusStore::new(store.clone());
        let config = RetryConfig {
            max_retries,
            base_delay_ms: 1000,
        };
        (RetryExecutor::new(statuses.clone(), AuditTrail::new(store), config), statuses)
    }

    fn entry(attempt: u32) -> AuditEntry {
        AuditEntry {
            job_id: "j".into(),
            agent: "a".into(),
            attempt,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn linear_backoff() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(3000));
    }

    #[test]
    fn zero_retries_still_runs_once() {
        let config = RetryConfig {
            max_retries: 0,
            base_delay_ms: 10,
        };
        assert_eq!(config.attempts(), 1);
    }

    #[tokio::test]
    async fn audit_trail_drops_oldest() {
        let store = MemoryQueueStore::new();
        let trail = AuditTrail::with_capacity(store.clone(), 3);
        for attempt in 1..=5 {
            trail.record(&entry(attempt)).await.unwrap();
        }
        assert_eq!(store.len("agentik:audit:a").await.unwrap(), 3);
        let attempts: Vec<u32> = trail.recent("a", 10).await.unwrap().iter().map(|e| e.attempt).collect();
        assert_eq!(attempts, vec![3, 4, 5]);
        let attempts: Vec<u32> = trail.recent("a", 2).await.unwrap().iter().map(|e| e.attempt).collect();
        assert_eq!(attempts, vec![4, 5]);
        assert!(trail.recent("other", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn audit_trail_is_readable_from_another_handle() {
        let store = MemoryQueueStore::new();
        AuditTrail::new(store.clone()).record(&entry(1)).await.unwrap();
        store.push_left("agentik:audit:a", "not json").await.unwrap();

        let reader = AuditTrail::new(store.clone());
        let entries = reader.recent("a", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].job_id, "j");
    }

    #[tokio::test(start_paused = true)]
    async fn audit_write_failure_does_not_fail_the_job() {
        let store = MemoryQueueStore::new();
        let statuses = StatusStore::new(store.clone());
        let offline = MemoryQueueStore::new();
        offline.set_offline(true);
        let executor = RetryExecutor::new(statuses, AuditTrail::new(offline), RetryConfig::default());
        let env = JobEnvelope::new("t", Map::new(), "u");

        let outcome = executor.execute_with_retry(&Flaky::new(1), &env).await;
        assert!(matches!(outcome, RetryOutcome::Succeeded { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_kth_attempt() {
        let (executor, _) = executor(3);
        let worker = Flaky::new(2);
        let env = JobEnvelope::new("t", Map::new(), "u");

        let outcome = executor.execute_with_retry(&worker, &env).await;
        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(worker.calls.load(Ordering::SeqCst), 2);
        let entries = executor.audit().recent("flaky", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].success);
        assert!(entries[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_marks_job_failed() {
        let (executor, statuses) = executor(3);
        let worker = Flaky::new(u32::MAX);
        let env = JobEnvelope::new("t", Map::new(), "u");
        statuses.create(&env).await.unwrap();

        let started = Instant::now();
        let outcome = executor.execute_with_retry(&worker, &env).await;

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(worker.calls.load(Ordering::SeqCst), 3);
        // 1s + 2s between the three attempts
        assert!(started.elapsed() >= Duration::from_secs(3));

        let record = statuses.get(&env.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("supplier directory timeout"));
        assert_eq!(record.attempts, Some(3));
        assert_eq!(executor.audit().recent("flaky", usize::MAX).await.unwrap().len(), 3);
    }
}
