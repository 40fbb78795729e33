use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentikError {
    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown workflow or job type: {0}")]
    UnknownWorkflow(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Orchestrator is already running")]
    AlreadyRunning,

    #[error("Orchestrator is not running")]
    NotRunning,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the shared queue store. Every store operation may return one.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command {command} failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command {
                command: "redis",
                message: err.to_string(),
            }
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Classifies a stage failure. Both kinds are retried by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Stage logic rejected the job (validation error, missing data).
    #[error("Business failure: {0}")]
    Business(String),
    /// A collaborator failed (store, mail transport, network).
    #[error("System failure: {0}")]
    System(String),
}

impl StageError {
    pub fn business(msg: impl Into<String>) -> Self {
        StageError::Business(msg.into())
    }

    pub fn system(msg: impl Into<String>) -> Self {
        StageError::System(msg.into())
    }

    /// The bare message, without the kind prefix. This is what lands in the status record.
    pub fn message(&self) -> &str {
        match self {
            StageError::Business(msg) | StageError::System(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        StageError::Business(format!("malformed payload: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_display() {
        let biz = StageError::business("missing title");
        assert_eq!(biz.to_string(), "Business failure: missing title");
        assert_eq!(biz.message(), "missing title");

        let sys = StageError::system("smtp down");
        assert_eq!(sys.to_string(), "System failure: smtp down");
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::Command {
            command: "BRPOP",
            message: "wrong type".into(),
        };
        assert_eq!(err.to_string(), "command BRPOP failed: wrong type");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AgentikError>();
        assert_send_sync::<StageError>();
    }
}
