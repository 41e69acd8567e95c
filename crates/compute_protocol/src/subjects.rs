//! Canonical event bus subject names (§6).
//!
//! Subjects are plain dot-separated strings; `compute_bus` matches wildcard
//! subscriptions (`*`) against a single path segment.

use compute_ids::{AgentId, JobId};

pub const JOB_CREATED: &str = "job.created";
pub const JOB_SCHEDULED: &str = "job.scheduled";
pub const JOB_SUCCEEDED: &str = "job.succeeded";
pub const JOB_FAILED: &str = "job.failed";
pub const JOB_CANCELLED: &str = "job.cancelled";
pub const JOB_RESULT: &str = "job.result";
pub const JOB_TERMINAL_WILDCARD: &str = "job.*.terminal";

pub const AGENT_HEARTBEAT: &str = "agent.heartbeat";
pub const AGENT_OFFLINE: &str = "agent.offline";

pub const OFFER_CREATED: &str = "offer.created";
pub const OFFER_RESERVED: &str = "offer.reserved";
pub const OFFER_WITHDRAWN: &str = "offer.withdrawn";

pub const BID_CREATED: &str = "bid.created";
pub const BID_MATCHED: &str = "bid.matched";
pub const BID_EXPIRED: &str = "bid.expired";

pub const MATCH_CREATED: &str = "match.created";
pub const MATCH_CONFIRMED: &str = "match.confirmed";
pub const MATCH_EXPIRED: &str = "match.expired";

pub const ALLOCATION_CREATED: &str = "allocation.created";
pub const ALLOCATION_RELEASED: &str = "allocation.released";

/// Per-agent assignment request subject: `agent.{id}.assign`.
pub fn agent_assign_subject(agent_id: &AgentId) -> String {
    format!("agent.{agent_id}.assign")
}

/// Per-agent cancellation subject: `agent.{id}.job.cancel`.
pub fn agent_job_cancel_subject(agent_id: &AgentId) -> String {
    format!("agent.{agent_id}.job.cancel")
}

/// Subject used by the resource ledger's job-completion listener to signal a
/// terminal job transition, matched against `job.*.terminal`.
pub fn job_terminal_subject(job_id: &JobId) -> String {
    format!("job.{job_id}.terminal")
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute_ids::AgentId;

    #[test]
    fn builds_per_agent_subjects() {
        let id = AgentId::new();
        assert_eq!(agent_assign_subject(&id), format!("agent.{id}.assign"));
        assert_eq!(
            agent_job_cancel_subject(&id),
            format!("agent.{id}.job.cancel")
        );
    }
}
