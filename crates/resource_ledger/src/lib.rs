//! Resource Ledger (§4.B): per-agent capacity accounting and allocation
//! leasing.
//!
//! `allocate` is one critical section: every dimension is checked, then every
//! dimension is mutated. No partial grant is ever observable, mirroring the
//! atomic claim-then-update shape of `casparian_db::queue::pop_job` (find,
//! then update within the same lock/transaction) translated from a SQL
//! transaction to a single `parking_lot::RwLock` write guard.

mod error;
mod sweeper;

pub use error::LedgerError;
pub use sweeper::{LeaseReaper, LivenessWatcher, TerminalAllocationReleaser};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use compute_protocol::{AgentId, Allocation, AllocationId, AllocationState, ConsumerId, JobId, Resource, ResourceId, ResourceVector};
use parking_lot::RwLock;
use serde_json::Value;

#[derive(Default)]
struct LedgerState {
    resources: HashMap<ResourceId, Resource>,
    allocations: HashMap<AllocationId, Allocation>,
}

/// Filters accepted by [`ResourceLedger::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub agent_id: Option<AgentId>,
    pub resource_id: Option<ResourceId>,
    pub job_id: Option<JobId>,
    pub allocation_state: Option<AllocationState>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub resources: Vec<Resource>,
    pub allocations: Vec<Allocation>,
}

pub struct ResourceLedger {
    state: RwLock<LedgerState>,
}

impl ResourceLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(LedgerState::default()),
        })
    }

    pub fn register_resource(
        &self,
        agent_id: AgentId,
        capacity: ResourceVector,
        metadata: Value,
    ) -> ResourceId {
        let id = ResourceId::new();
        let now = Utc::now();
        let resource = Resource {
            id,
            agent_id,
            capacity,
            allocated: ResourceVector::new(),
            metadata,
            registered_at: now,
            updated_at: now,
        };
        self.state.write().resources.insert(id, resource);
        id
    }

    /// Atomically checks every requested dimension against `available`, and
    /// only on success decrements `allocated` and records the allocation.
    /// Invariant 1 (`0 ≤ allocated[d] ≤ capacity[d]`) and invariant 3 (the sum
    /// of active allocations equals `allocated`) both hold because the check
    /// and the mutation happen under the same write guard — no other call can
    /// observe or act on a partially-updated resource.
    pub fn allocate(
        &self,
        resource_id: ResourceId,
        consumer_id: ConsumerId,
        job_id: Option<JobId>,
        amount: ResourceVector,
        lease_seconds: Option<u64>,
    ) -> Result<AllocationId, LedgerError> {
        let mut state = self.state.write();

        let resource = state
            .resources
            .get(&resource_id)
            .ok_or(LedgerError::UnknownResource(resource_id))?;

        if !resource.available().satisfies(&amount) {
            return Err(LedgerError::InsufficientCapacity { resource_id });
        }

        let allocation_id = AllocationId::new();
        let now = Utc::now();
        let lease_expires_at = lease_seconds.map(|secs| now + ChronoDuration::seconds(secs as i64));

        // Every check above passed; from here on only infallible mutation.
        let resource = state.resources.get_mut(&resource_id).expect("checked above");
        resource.allocated = resource.allocated.add(&amount);
        resource.updated_at = now;
        let agent_id = resource.agent_id;

        state.allocations.insert(
            allocation_id,
            Allocation {
                id: allocation_id,
                agent_id,
                job_id,
                consumer_id,
                amount,
                granted_at: now,
                lease_expires_at,
                state: AllocationState::Active,
            },
        );

        Ok(allocation_id)
    }

    /// Idempotent: only an `active` allocation transitions to `released`;
    /// calling this on an already-released or unknown allocation is a no-op.
    pub fn release(&self, allocation_id: AllocationId) {
        self.release_with_reason(allocation_id, AllocationState::Released, "released");
    }

    fn release_with_reason(&self, allocation_id: AllocationId, target: AllocationState, reason: &str) {
        let mut state = self.state.write();

        let Some(allocation) = state.allocations.get(&allocation_id) else {
            return;
        };
        if allocation.state != AllocationState::Active {
            return;
        }

        let resource_id = state
            .resources
            .values()
            .find(|r| r.agent_id == allocation.agent_id)
            .map(|r| r.id);

        let amount = allocation.amount.clone();

        if let Some(allocation) = state.allocations.get_mut(&allocation_id) {
            allocation.state = target;
        }

        if let Some(resource_id) = resource_id {
            if let Some(resource) = state.resources.get_mut(&resource_id) {
                resource.allocated = resource.allocated.sub(&amount);
                resource.updated_at = Utc::now();
            }
        }

        tracing::debug!(%allocation_id, reason, "allocation released");
    }

    /// Releases every active allocation belonging to `job_id`, used by the
    /// job-completion listener and by the scheduler on cancel/terminal.
    pub fn release_job_allocations(&self, job_id: JobId) {
        let ids: Vec<AllocationId> = {
            let state = self.state.read();
            state
                .allocations
                .values()
                .filter(|a| a.job_id == Some(job_id) && a.state == AllocationState::Active)
                .map(|a| a.id)
                .collect()
        };
        for id in ids {
            self.release(id);
        }
    }

    /// Releases every active allocation belonging to `agent_id`, used by the
    /// agent registry's offline-grace reclamation (§4.C).
    pub fn release_agent_allocations(&self, agent_id: AgentId) {
        let ids: Vec<AllocationId> = {
            let state = self.state.read();
            state
                .allocations
                .values()
                .filter(|a| a.agent_id == agent_id && a.state == AllocationState::Active)
                .map(|a| a.id)
                .collect()
        };
        for id in ids {
            self.release(id);
        }
    }

    /// Releases every active allocation whose lease has expired, called by
    /// the [`LeaseReaper`] sweep. Returns the released allocation ids.
    pub fn reap_expired_leases(&self, now: DateTime<Utc>) -> Vec<AllocationId> {
        let expired: Vec<AllocationId> = {
            let state = self.state.read();
            state
                .allocations
                .values()
                .filter(|a| {
                    a.state == AllocationState::Active
                        && a.lease_expires_at.is_some_and(|exp| exp <= now)
                })
                .map(|a| a.id)
                .collect()
        };
        for id in &expired {
            self.release_with_reason(*id, AllocationState::Expired, "expired");
        }
        expired
    }

    /// Resources whose capacity hasn't been touched in `stale_after`,
    /// reported (not evicted — liveness is the registry's call) by the
    /// [`LivenessWatcher`] sweep.
    pub fn stale_resources(&self, now: DateTime<Utc>, stale_after: ChronoDuration) -> Vec<ResourceId> {
        let state = self.state.read();
        state
            .resources
            .values()
            .filter(|r| now - r.updated_at >= stale_after)
            .map(|r| r.id)
            .collect()
    }

    /// The sole authorized seam for heartbeat-reported capacity to reach the
    /// ledger (§4.C open-question resolution): bumps a resource's recorded
    /// capacity up to the reported snapshot without ever shrinking it below
    /// what's already allocated.
    pub fn reconcile_capacity(&self, resource_id: ResourceId, reported_capacity: ResourceVector) {
        let mut state = self.state.write();
        if let Some(resource) = state.resources.get_mut(&resource_id) {
            let mut capacity = reported_capacity;
            for (dimension, allocated) in &resource.allocated.0 {
                // Never let a reported capacity drop below what's already
                // committed on that dimension.
                let reported = capacity.get(dimension);
                if reported < *allocated {
                    capacity.set(dimension.clone(), *allocated);
                }
            }
            resource.capacity = capacity;
            resource.updated_at = Utc::now();
        }
    }

    pub fn query(&self, filter: &QueryFilter) -> QueryResult {
        let state = self.state.read();

        let resources: Vec<Resource> = state
            .resources
            .values()
            .filter(|r| filter.agent_id.map_or(true, |a| a == r.agent_id))
            .filter(|r| filter.resource_id.map_or(true, |id| id == r.id))
            .cloned()
            .collect();

        let allocations: Vec<Allocation> = state
            .allocations
            .values()
            .filter(|a| filter.agent_id.map_or(true, |agent| agent == a.agent_id))
            .filter(|a| filter.job_id.map_or(true, |job| Some(job) == a.job_id))
            .filter(|a| filter.allocation_state.map_or(true, |s| s == a.state))
            .cloned()
            .collect();

        QueryResult { resources, allocations }
    }
}
