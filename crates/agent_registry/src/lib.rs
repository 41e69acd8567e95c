//! Agent Registry (§4.C): liveness tracking via heartbeat, plus the
//! assignment channel the scheduler uses to offer a job to a specific
//! agent.
//!
//! Grounded on `ConnectedWorker` / `Sentinel` in the teacher's
//! `casparian_sentinel::sentinel`: an in-memory map keyed by agent id,
//! `last_seen` bumped on every heartbeat, and a periodic cleanup sweep that
//! evicts agents that have gone quiet — generalized from the teacher's
//! single `WORKER_TIMEOUT_SECS` constant to the spec's
//! `2 * heartbeat_interval` liveness window plus an offline grace period
//! before allocations are reclaimed.

mod error;
mod sweeper;

pub use error::RegistryError;
pub use sweeper::LivenessSweeper;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use compute_bus::{publish_event, BusError, EventBus};
use compute_protocol::{
    Agent, AgentId, AgentState, AssignReply, AssignRequest, Clock, DomainEvent, Heartbeat, JobId,
};
use parking_lot::RwLock;
use resource_ledger::ResourceLedger;

/// An agent record plus registry-private bookkeeping not part of the wire
/// entity (when it went offline, for grace-period reclamation).
struct AgentRecord {
    agent: Agent,
    offline_since: Option<DateTime<Utc>>,
    reclaimed: bool,
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<AgentId, AgentRecord>,
}

/// Filters accepted by [`AgentRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub state: Option<AgentState>,
    pub region: Option<String>,
}

pub struct AgentRegistry {
    state: RwLock<RegistryState>,
    bus: Arc<dyn EventBus>,
    ledger: Arc<ResourceLedger>,
    clock: Arc<dyn Clock>,
}

impl AgentRegistry {
    pub fn new(bus: Arc<dyn EventBus>, ledger: Arc<ResourceLedger>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(RegistryState::default()),
            bus,
            ledger,
            clock,
        })
    }

    /// Registers an agent's static profile (capabilities, region, pricing,
    /// initial capacity). Capacity here is informational only — the
    /// resource ledger is the sole authoritative writer (§4.C open
    /// question); callers that also want allocable capacity must separately
    /// call `resource_ledger::register_resource`.
    pub fn register(&self, agent: Agent) {
        let mut state = self.state.write();
        state.agents.insert(
            agent.id,
            AgentRecord {
                agent,
                offline_since: None,
                reclaimed: true,
            },
        );
    }

    /// Upserts an agent record from a heartbeat (§4.C / §6). Creates a
    /// minimal record if this agent has never registered.
    pub fn heartbeat(&self, heartbeat: Heartbeat) {
        let mut state = self.state.write();
        let now = self.clock.now();
        let record = state.agents.entry(heartbeat.agent_id).or_insert_with(|| AgentRecord {
            agent: Agent {
                id: heartbeat.agent_id,
                state: AgentState::Unknown,
                last_seen: now,
                capacity: heartbeat.capacity.clone(),
                allocated: compute_protocol::ResourceVector::new(),
                capabilities: Default::default(),
                region: String::new(),
                price_per_hour: Default::default(),
                reputation: 0.5,
                active_jobs: Default::default(),
            },
            offline_since: None,
            reclaimed: true,
        });
        record.agent.last_seen = now;
        record.agent.state = heartbeat.state;
        record.agent.capacity = heartbeat.capacity;
        record.agent.active_jobs = heartbeat.active_jobs;
        if record.agent.state != AgentState::Offline {
            record.offline_since = None;
            record.reclaimed = true;
        }
    }

    /// Records that `job_id` was just assigned to `agent_id`, without
    /// waiting for the next heartbeat to report it back (§4.D step 5).
    pub fn note_job_assigned(&self, agent_id: AgentId, job_id: JobId) {
        let mut state = self.state.write();
        if let Some(record) = state.agents.get_mut(&agent_id) {
            record.agent.active_jobs.insert(job_id);
        }
    }

    /// Records that `job_id` finished (or was cancelled) on `agent_id`.
    pub fn note_job_finished(&self, agent_id: AgentId, job_id: JobId) {
        let mut state = self.state.write();
        if let Some(record) = state.agents.get_mut(&agent_id) {
            record.agent.active_jobs.remove(&job_id);
        }
    }

    pub fn get(&self, agent_id: AgentId) -> Option<Agent> {
        self.state.read().agents.get(&agent_id).map(|r| r.agent.clone())
    }

    /// Snapshot of every agent matching `filter`, used by the scheduler's
    /// eligibility filter (§4.D step 4b) and the HTTP boundary.
    pub fn list(&self, filter: &AgentFilter) -> Vec<Agent> {
        self.state
            .read()
            .agents
            .values()
            .map(|r| &r.agent)
            .filter(|a| filter.state.map_or(true, |s| s == a.state))
            .filter(|a| filter.region.as_deref().map_or(true, |r| r == a.region))
            .cloned()
            .collect()
    }

    /// Contacts `agent_id` with `request("agent.{id}.assign", job, timeout)`
    /// (§4.C). A non-reply within the timeout is treated as refusal, not
    /// propagated as an error to the scheduler's caller — only a genuine
    /// transport failure is.
    pub async fn assign(
        &self,
        agent_id: AgentId,
        request: AssignRequest,
        timeout: Duration,
    ) -> AssignReply {
        let subject = compute_protocol::subjects::agent_assign_subject(&agent_id);
        let payload = match serde_json::to_value(&request) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(%agent_id, error = %err, "failed to serialize assign request");
                return AssignReply {
                    accepted: false,
                    reason: Some("serialization failure".to_string()),
                };
            }
        };

        match self.bus.request(&subject, payload, timeout).await {
            Ok(value) => serde_json::from_value(value).unwrap_or(AssignReply {
                accepted: false,
                reason: Some("malformed assign reply".to_string()),
            }),
            Err(BusError::Timeout { .. }) => AssignReply {
                accepted: false,
                reason: Some("assignment request timed out".to_string()),
            },
            Err(BusError::NoReplier(_)) => AssignReply {
                accepted: false,
                reason: Some("agent has no registered assignment channel".to_string()),
            },
            Err(err) => {
                tracing::warn!(%agent_id, error = %err, "assignment request transport failure");
                AssignReply {
                    accepted: false,
                    reason: Some(err.to_string()),
                }
            }
        }
    }

    /// One liveness sweep (§4.C): `last_seen` older than `liveness_window`
    /// transitions `active`/`busy` agents to `offline` and publishes
    /// `agent.offline`; agents offline for longer than `offline_grace` have
    /// their allocations reclaimed exactly once.
    pub(crate) async fn sweep_liveness(&self, liveness_window: Duration, offline_grace: Duration) {
        let now = self.clock.now();
        let mut newly_offline = Vec::new();
        let mut to_reclaim = Vec::new();

        {
            let mut state = self.state.write();
            for record in state.agents.values_mut() {
                let stale = now.signed_duration_since(record.agent.last_seen)
                    >= chrono::Duration::from_std(liveness_window).unwrap_or_default();

                if stale && record.agent.state != AgentState::Offline {
                    record.agent.state = AgentState::Offline;
                    record.offline_since = Some(now);
                    record.reclaimed = false;
                    newly_offline.push(record.agent.clone());
                }

                if record.agent.state == AgentState::Offline && !record.reclaimed {
                    if let Some(since) = record.offline_since {
                        let elapsed = now.signed_duration_since(since);
                        if elapsed >= chrono::Duration::from_std(offline_grace).unwrap_or_default() {
                            record.reclaimed = true;
                            to_reclaim.push(record.agent.id);
                        }
                    }
                }
            }
        }

        for agent in newly_offline {
            tracing::warn!(agent_id = %agent.id, "agent went offline");
            publish_event(self.bus.as_ref(), &DomainEvent::AgentOffline(agent)).await;
        }
        for agent_id in to_reclaim {
            tracing::info!(%agent_id, "reclaiming allocations after offline grace period");
            self.ledger.release_agent_allocations(agent_id);
        }
    }

    /// Subscribes to `agent.heartbeat` for the lifetime of the process and
    /// folds every arrival into this registry's liveness state. Resource
    /// capacity reconciliation is deliberately *not* done here (§4.C open
    /// question) — that's the platform launcher's job, via a separate
    /// subscriber calling `resource_ledger::reconcile_capacity`, so this
    /// registry stays the single writer of its own state.
    pub async fn run_heartbeat_listener(self: Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        let mut heartbeats = self.bus.subscribe(compute_protocol::subjects::AGENT_HEARTBEAT);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("agent heartbeat listener shutting down");
                    return;
                }
                envelope = heartbeats.recv() => {
                    let Some(envelope) = envelope else { return };
                    match serde_json::from_value::<Heartbeat>(envelope.payload) {
                        Ok(heartbeat) => self.heartbeat(heartbeat),
                        Err(err) => tracing::warn!(error = %err, "malformed agent.heartbeat payload"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod heartbeat_listener_tests {
    use super::*;
    use compute_bus::InProcessBus;
    use compute_test_utils::ManualClock;

    #[tokio::test]
    async fn heartbeat_on_the_bus_updates_the_registry() {
        let bus = InProcessBus::new();
        let ledger = ResourceLedger::new();
        let clock = Arc::new(ManualClock::starting_now());
        let registry = AgentRegistry::new(bus.clone(), ledger, clock.clone());

        let cancel = tokio_util::sync::CancellationToken::new();
        let listener_cancel = cancel.clone();
        let listener = tokio::spawn(registry.clone().run_heartbeat_listener(listener_cancel));

        let agent_id = AgentId::new();
        let heartbeat = Heartbeat {
            agent_id,
            state: AgentState::Active,
            capacity: compute_protocol::ResourceVector::single("cpu", 8.0),
            active_jobs: Default::default(),
            metrics: Default::default(),
            timestamp: clock.now(),
        };
        bus.publish(
            compute_protocol::subjects::AGENT_HEARTBEAT,
            serde_json::to_value(&heartbeat).unwrap(),
        )
        .await;

        for _ in 0..50 {
            if registry.get(agent_id).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(registry.get(agent_id).unwrap().state, AgentState::Active);
        cancel.cancel();
        let _ = listener.await;
    }
}
