use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agents::AgentWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    Initialized,
    Active,
    Inactive,
}

/// Advisory only. Nothing is restarted based on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

/// In-memory bookkeeping for one registered worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRegistration {
    pub name: String,
    pub description: String,
    pub processed: u64,
    pub failed: u64,
    pub lifecycle: AgentLifecycle,
    pub health: AgentHealth,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AgentRegistration {
    fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            processed: 0,
            failed: 0,
            lifecycle: AgentLifecycle::Initialized,
            health: AgentHealth::Unknown,
            last_seen: None,
        }
    }

    /// Share of handled jobs that succeeded, `None` before the first job.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed + self.failed;
        (total > 0).then(|| self.processed as f64 / total as f64)
    }
}

/// A worker together with its registration.
pub(crate) struct AgentSlot<W> {
    pub(crate) worker: W,
    registration: Mutex<AgentRegistration>,
}

impl<W: AgentWorker> AgentSlot<W> {
    pub(crate) fn new(worker: W) -> Self {
        let registration = AgentRegistration::new(worker.name(), worker.description());
        Self {
            worker,
            registration: Mutex::new(registration),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.worker.name()
    }

    fn registration(&self) -> Option<MutexGuard<'_, AgentRegistration>> {
        self.registration.lock().ok()
    }

    pub(crate) fn snapshot(&self) -> Option<AgentRegistration> {
        self.registration().map(|r| r.clone())
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: AgentLifecycle) {
        if let Some(mut r) = self.registration() {
            r.lifecycle = lifecycle;
        }
    }

    pub(crate) fn record_outcome(&self, success: bool) {
        if let Some(mut r) = self.registration() {
            if success {
                r.processed += 1;
            } else {
                r.failed += 1;
            }
            r.last_seen = Some(Utc::now());
            r.health = AgentHealth::Healthy;
        }
    }

    /// Marks the agent unhealthy when it has not handled a job within
    /// `stale_after`. Agents that never handled one are measured from `since`.
    pub(crate) fn check_health(&self, now: DateTime<Utc>, since: DateTime<Utc>, stale_after: chrono::Duration) -> AgentHealth {
        let Some(mut r) = self.registration() else {
            return AgentHealth::Unknown;
        };
        let last = r.last_seen.unwrap_or(since);
        r.health = if now - last > stale_after {
            AgentHealth::Unhealthy
        } else {
            AgentHealth::Healthy
        };
        r.health
    }
}
