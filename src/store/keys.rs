//! Key and queue names shared with every other client of the store.

/// Top-level submission queue drained by the intake loop.
pub const JOBS_QUEUE: &str = "agentik:jobs";

/// Overwrite-on-write slot holding the latest heartbeat snapshot.
pub const HEARTBEAT_KEY: &str = "agentik:heartbeat";

const STAGE_QUEUE_PREFIX: &str = "agentik:agent:";
const STATUS_PREFIX: &str = "agentik:status:";
const AUDIT_PREFIX: &str = "agentik:audit:";

/// Glob matching every status record.
pub const STATUS_PATTERN: &str = "agentik:status:*";

pub fn stage_queue(stage: &str) -> String {
    format!("{STAGE_QUEUE_PREFIX}{stage}")
}

pub fn status_key(job_id: &str) -> String {
    format!("{STATUS_PREFIX}{job_id}")
}

/// Newest-first list of one agent's attempt records.
pub fn audit_key(agent: &str) -> String {
    format!("{AUDIT_PREFIX}{agent}")
}

/// Inverse of [`status_key`].
pub fn job_id_from_status_key(key: &str) -> Option<&str> {
    key.strip_prefix(STATUS_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_wire_format() {
        assert_eq!(JOBS_QUEUE, "agentik:jobs");
        assert_eq!(HEARTBEAT_KEY, "agentik:heartbeat");
        assert_eq!(stage_queue("rfq_intake"), "agentik:agent:rfq_intake");
        assert_eq!(status_key("abc"), "agentik:status:abc");
        assert_eq!(audit_key("email_send"), "agentik:audit:email_send");
    }

    #[test]
    fn status_key_roundtrip() {
        let key = status_key("job-1");
        assert_eq!(job_id_from_status_key(&key), Some("job-1"));
        assert_eq!(job_id_from_status_key("agentik:jobs"), None);
    }
}
