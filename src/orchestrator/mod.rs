//! Runs one loop per registered worker plus the intake, heartbeat and health
//! loops, all on the current tokio runtime.
//!
//! ```text
//! submit ──▶ agentik:jobs ──intake──▶ agentik:agent:<first> ──worker──▶ agentik:agent:<next> … ──▶ completed
//! ```
//!
//! Everything the loops share lives in the queue store. The orchestrator
//! itself only holds worker registrations and the task handles.

mod monitor;
mod registry;
mod worker_loop;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::AgentWorker;
use crate::config::AgentikConfig;
use crate::error::{AgentikError, StoreResult};
use crate::job::{JobEnvelope, StatusRecord, StatusStore};
use crate::retry::{AuditEntry, AuditTrail, RetryConfig, RetryExecutor};
use crate::store::{QueueStore, keys};
use crate::workflow::{WorkflowDefinition, WorkflowRegistry};

pub use monitor::Heartbeat;
pub use registry::{AgentHealth, AgentLifecycle, AgentRegistration};
use registry::AgentSlot;

/// Label used for the intake queue in depth snapshots.
pub const MAIN_QUEUE_LABEL: &str = "main";
/// `queued_by` value for pushes the orchestrator makes itself.
const ORCHESTRATOR: &str = "orchestrator";

/// Timing and threshold knobs for the loops.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub retry: RetryConfig,
    pub pop_timeout: Duration,
    pub store_retry_delay: Duration,
    pub heartbeat_interval: Duration,
    pub health_interval: Duration,
    pub stale_after: Duration,
    pub breaker_threshold: u32,
    pub breaker_pause: Duration,
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&AgentikConfig::default())
    }
}

impl From<&AgentikConfig> for OrchestratorSettings {
    fn from(config: &AgentikConfig) -> Self {
        Self {
            retry: RetryConfig {
                max_retries: config.max_retries,
                base_delay_ms: config.base_delay_ms,
            },
            pop_timeout: Duration::from_millis(config.pop_timeout_ms),
            store_retry_delay: Duration::from_millis(config.store_retry_delay_ms),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            health_interval: Duration::from_secs(config.health_interval_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
            breaker_threshold: config.breaker_threshold,
            breaker_pause: Duration::from_secs(config.breaker_pause_secs),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Point-in-time view of the orchestrator and the store.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub state: OrchestratorState,
    pub started_at: Option<DateTime<Utc>>,
    pub store_healthy: bool,
    pub agents: Vec<AgentRegistration>,
    pub workflows: Vec<WorkflowDefinition>,
    pub queues: BTreeMap<String, usize>,
}

struct Shared<S, W> {
    store: S,
    statuses: StatusStore<S>,
    executor: RetryExecutor<S>,
    workflows: WorkflowRegistry,
    settings: OrchestratorSettings,
    agents: RwLock<Vec<Arc<AgentSlot<W>>>>,
    state: Mutex<OrchestratorState>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl<S: QueueStore, W: AgentWorker> Shared<S, W> {
    fn state(&self) -> OrchestratorState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(OrchestratorState::Stopped)
    }

    fn set_state(&self, next: OrchestratorState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = ?*state, to = ?next, "orchestrator state change");
            *state = next;
        }
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.lock().ok().and_then(|s| *s)
    }

    fn slots(&self) -> Vec<Arc<AgentSlot<W>>> {
        self.agents.read().map(|a| a.clone()).unwrap_or_default()
    }

    fn agent_names(&self) -> Vec<String> {
        self.slots().iter().map(|s| s.name().to_string()).collect()
    }

    /// Stage queues worth reporting: every registered agent plus every stage
    /// any workflow names.
    fn stage_names(&self) -> Vec<String> {
        let mut names = self.agent_names();
        for stage in self.workflows.stage_names() {
            if !names.iter().any(|n| n == stage) {
                names.push(stage.to_string());
            }
        }
        names
    }

    /// `(label, queue key)` for the intake queue and every stage queue.
    fn queue_keys(&self) -> Vec<(String, String)> {
        let mut queues = vec![(MAIN_QUEUE_LABEL.to_string(), keys::JOBS_QUEUE.to_string())];
        queues.extend(
            self.stage_names()
                .into_iter()
                .map(|name| {
                    let key = keys::stage_queue(&name);
                    (name, key)
                }),
        );
        queues
    }

    /// Records where `envelope` is going, then pushes it. Recording first
    /// keeps a fast consumer's later writes from being overwritten.
    async fn enqueue(&self, envelope: &mut JobEnvelope, queue: &str, queued_by: &str) -> Result<(), AgentikError> {
        envelope.stamp(queued_by);
        let wire = envelope.to_wire()?;
        self.statuses.record_location(&envelope.job_id, queue, &wire).await?;
        self.store.push_left(queue, &wire).await?;
        debug!(job_id = %envelope.job_id, queue, queued_by, "job enqueued");
        Ok(())
    }
}

struct Runtime {
    token: CancellationToken,
    tasks: JoinSet<()>,
}

/// Queue-driven job orchestrator over a [`QueueStore`] and one worker type.
pub struct Orchestrator<S, W> {
    shared: Arc<Shared<S, W>>,
    runtime: tokio::sync::Mutex<Option<Runtime>>,
}

impl<S: QueueStore, W: AgentWorker> Orchestrator<S, W> {
    pub fn new(store: S, workflows: WorkflowRegistry, settings: OrchestratorSettings) -> Self {
        let statuses = StatusStore::new(store.clone());
        let executor = RetryExecutor::new(statuses.clone(), AuditTrail::new(store.clone()), settings.retry);
        let shared = Shared {
            store,
            statuses,
            executor,
            workflows,
            settings,
            agents: RwLock::new(Vec::new()),
            state: Mutex::new(OrchestratorState::Stopped),
            started_at: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
            runtime: tokio::sync::Mutex::new(None),
        }
    }

    /// Adds a worker. Its queue is `agentik:agent:<name>`. Only allowed while stopped.
    pub fn register(&self, worker: W) -> Result<(), AgentikError> {
        if self.shared.state() != OrchestratorState::Stopped {
            return Err(AgentikError::AlreadyRunning);
        }
        let slot = Arc::new(AgentSlot::new(worker));
        info!(agent = slot.name(), "agent registered");
        if let Ok(mut agents) = self.shared.agents.write() {
            agents.retain(|existing| existing.name() != slot.name());
            agents.push(slot);
        }
        Ok(())
    }

    pub fn state(&self) -> OrchestratorState {
        self.shared.state()
    }

    /// Connects, then spawns every loop. An unreachable store aborts startup.
    pub async fn start(&self) -> Result<(), AgentikError> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Err(AgentikError::AlreadyRunning);
        }
        self.shared.set_state(OrchestratorState::Starting);

        let slots = self.shared.slots();
        let stores = match self.connect(slots.len()).await {
            Ok(stores) => stores,
            Err(err) => {
                error!(error = %err, "queue store unreachable, startup aborted");
                self.shared.set_state(OrchestratorState::Stopped);
                return Err(err.into());
            }
        };

        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut stores = stores.into_iter();
        if let Some(store) = stores.next() {
            tasks.spawn(worker_loop::run_intake(self.shared.clone(), store, token.clone()));
        }
        for (slot, store) in slots.iter().zip(stores) {
            slot.set_lifecycle(AgentLifecycle::Active);
            tasks.spawn(worker_loop::run_worker(
                self.shared.clone(),
                slot.clone(),
                store,
                token.clone(),
            ));
        }
        tasks.spawn(monitor::run_heartbeat(self.shared.clone(), token.clone()));
        tasks.spawn(monitor::run_health(self.shared.clone(), token.clone()));

        if let Ok(mut started_at) = self.shared.started_at.lock() {
            *started_at = Some(Utc::now());
        }
        self.shared.set_state(OrchestratorState::Running);
        *runtime = Some(Runtime { token, tasks });
        info!(agents = slots.len(), "orchestrator started");
        Ok(())
    }

    /// One connection for the intake loop plus one per worker loop.
    async fn connect(&self, workers: usize) -> StoreResult<Vec<S>> {
        self.shared.store.ping().await?;
        let mut stores = Vec::with_capacity(workers + 1);
        for _ in 0..=workers {
            stores.push(self.shared.store.dedicated().await?);
        }
        Ok(stores)
    }

    /// Cancels every loop, waits up to the grace period, then aborts stragglers.
    pub async fn shutdown(&self) -> Result<(), AgentikError> {
        let Some(mut runtime) = self.runtime.lock().await.take() else {
            return Err(AgentikError::NotRunning);
        };
        self.shared.set_state(OrchestratorState::Stopping);
        info!("orchestrator stopping");
        runtime.token.cancel();

        let grace = self.shared.settings.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while runtime.tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(grace_secs = grace.as_secs(), "loops still running after grace period, aborting");
            runtime.tasks.abort_all();
            while runtime.tasks.join_next().await.is_some() {}
        }

        for slot in self.shared.slots() {
            slot.set_lifecycle(AgentLifecycle::Inactive);
        }
        self.shared.set_state(OrchestratorState::Stopped);
        if let Err(err) = monitor::publish_heartbeat(&self.shared).await {
            warn!(error = %err, "final heartbeat failed");
        }
        info!("orchestrator stopped");
        Ok(())
    }

    /// Creates the status record, then queues the job on the intake queue.
    pub async fn submit(
        &self,
        job_type: &str,
        payload: Map<String, Value>,
        user_id: &str,
    ) -> Result<String, AgentikError> {
        if !self.shared.workflows.contains(job_type) {
            return Err(AgentikError::UnknownWorkflow(job_type.to_string()));
        }
        let mut envelope = JobEnvelope::new(job_type, payload, user_id);
        self.shared.statuses.create(&envelope).await?;

        if let Err(err) = self
            .shared
            .enqueue(&mut envelope, keys::JOBS_QUEUE, ORCHESTRATOR)
            .await
        {
            error!(job_id = %envelope.job_id, error = %err, "could not queue job");
            if let Err(store_err) = self
                .shared
                .statuses
                .mark_failed(&envelope.job_id, &format!("enqueue failed: {err}"), 0)
                .await
            {
                error!(job_id = %envelope.job_id, error = %store_err, "could not record failure");
            }
            return Err(err);
        }
        info!(job_id = %envelope.job_id, job_type, user_id, "job submitted");
        Ok(envelope.job_id)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Option<StatusRecord>, AgentikError> {
        Ok(self.shared.statuses.get(job_id).await?)
    }

    /// Best-effort removal from the job's last queue, then marks it cancelled.
    ///
    /// Work already popped by a worker keeps running; its later status writes
    /// may overwrite the cancellation. Returns `false` for unknown jobs.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, AgentikError> {
        let Some(record) = self.shared.statuses.get(job_id).await? else {
            return Ok(false);
        };
        if let (Some(queue), Some(wire)) = (&record.queue, &record.envelope) {
            match self.shared.store.remove(queue, wire).await {
                Ok(removed) => debug!(job_id, queue = %queue, removed, "removed from queue"),
                Err(err) => warn!(job_id, queue = %queue, error = %err, "queue removal failed"),
            }
        }
        self.shared.statuses.mark_cancelled(job_id).await?;
        info!(job_id, "job cancelled");
        Ok(true)
    }

    pub async fn list_recent_jobs_for_user(
        &self,
        user_id: &str,
        job_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StatusRecord>, AgentikError> {
        Ok(self
            .shared
            .statuses
            .list_for_user(user_id, job_type, limit)
            .await?)
    }

    /// Length of the intake queue (as `main`) and of every stage queue.
    pub async fn queue_depth_snapshot(&self) -> Result<BTreeMap<String, usize>, AgentikError> {
        let mut depths = BTreeMap::new();
        for (label, key) in self.shared.queue_keys() {
            depths.insert(label, self.shared.store.len(&key).await?);
        }
        Ok(depths)
    }

    pub async fn system_status(&self) -> Result<SystemStatus, AgentikError> {
        let store_healthy = self.shared.store.ping().await.is_ok();
        let queues = if store_healthy {
            self.queue_depth_snapshot().await?
        } else {
            BTreeMap::new()
        };
        Ok(SystemStatus {
            state: self.shared.state(),
            started_at: self.shared.started_at(),
            store_healthy,
            agents: self
                .shared
                .slots()
                .iter()
                .filter_map(|s| s.snapshot())
                .collect(),
            workflows: self.shared.workflows.iter().cloned().collect(),
            queues,
        })
    }

    /// Deletes the intake queue and every stage queue. Development helper.
    pub async fn clear_queues(&self) -> Result<usize, AgentikError> {
        let mut cleared = 0;
        for (_, key) in self.shared.queue_keys() {
            if self.shared.store.delete(&key).await? {
                cleared += 1;
            }
        }
        warn!(cleared, "queues cleared");
        Ok(cleared)
    }

    /// The last heartbeat any orchestrator wrote to the store.
    pub async fn latest_heartbeat(&self) -> Result<Option<Heartbeat>, AgentikError> {
        match self.shared.store.get_slot(keys::HEARTBEAT_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn agents(&self) -> Vec<AgentRegistration> {
        self.shared
            .slots()
            .iter()
            .filter_map(|s| s.snapshot())
            .collect()
    }

    /// Newest audit entries for `agent`, oldest first. Read from the store, so
    /// attempts made by other orchestrator processes show up too.
    pub async fn agent_audit(&self, agent: &str, limit: usize) -> Result<Vec<AuditEntry>, AgentikError> {
        Ok(self.shared.executor.audit().recent(agent, limit).await?)
    }
}
