use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::worker_loop::sleep_or_cancel;
use super::registry::AgentHealth;
use super::{OrchestratorState, Shared};
use crate::agents::AgentWorker;
use crate::error::{StoreError, StoreResult};
use crate::job::now_timestamp;
use crate::store::{QueueStore, keys};

/// Liveness snapshot written to `agentik:heartbeat`.
///
/// A queue whose length could not be read is reported as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub ts: String,
    pub running: bool,
    pub version: String,
    pub agents: Vec<String>,
    pub queues: BTreeMap<String, Option<usize>>,
}

pub(super) async fn build_heartbeat<S: QueueStore, W: AgentWorker>(shared: &Shared<S, W>) -> Heartbeat {
    let mut queues = BTreeMap::new();
    for (label, key) in shared.queue_keys() {
        let depth = match shared.store.len(&key).await {
            Ok(depth) => Some(depth),
            Err(err) => {
                debug!(queue = %key, error = %err, "queue length unavailable");
                None
            }
        };
        queues.insert(label, depth);
    }
    Heartbeat {
        ts: now_timestamp(),
        running: shared.state() == OrchestratorState::Running,
        version: env!("CARGO_PKG_VERSION").to_string(),
        agents: shared.agent_names(),
        queues,
    }
}

pub(super) async fn publish_heartbeat<S: QueueStore, W: AgentWorker>(shared: &Shared<S, W>) -> StoreResult<()> {
    let heartbeat = build_heartbeat(shared).await;
    let raw = serde_json::to_string(&heartbeat)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    shared.store.set_slot(keys::HEARTBEAT_KEY, &raw).await
}

pub(super) async fn run_heartbeat<S: QueueStore, W: AgentWorker>(
    shared: Arc<Shared<S, W>>,
    token: CancellationToken,
) {
    let interval = shared.settings.heartbeat_interval;
    info!(interval_secs = interval.as_secs(), "heartbeat loop started");
    loop {
        if let Err(err) = publish_heartbeat(&shared).await {
            warn!(error = %err, "heartbeat write failed");
        }
        if sleep_or_cancel(&token, interval).await {
            break;
        }
    }
    info!("heartbeat loop stopped");
}

/// Pings the store and flags agents that have gone quiet. Advisory only.
pub(super) async fn run_health<S: QueueStore, W: AgentWorker>(
    shared: Arc<Shared<S, W>>,
    token: CancellationToken,
) {
    let interval = shared.settings.health_interval;
    let stale_after = chrono::Duration::from_std(shared.settings.stale_after)
        .unwrap_or(chrono::Duration::MAX);
    info!(interval_secs = interval.as_secs(), "health loop started");
    while !sleep_or_cancel(&token, interval).await {
        if let Err(err) = shared.store.ping().await {
            warn!(error = %err, "queue store health check failed");
        }
        let now = Utc::now();
        let since = shared.started_at().unwrap_or(now);
        for slot in shared.slots() {
            if slot.check_health(now, since, stale_after) == AgentHealth::Unhealthy {
                warn!(
                    agent = slot.name(),
                    stale_after_secs = stale_after.num_seconds(),
                    "agent has not handled a job recently"
                );
            }
        }
    }
    info!("health loop stopped");
}
