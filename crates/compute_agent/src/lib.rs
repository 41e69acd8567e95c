//! Reference provider agent (§2 expansion).
//!
//! Exercises the Agent Registry and Scheduler end to end the way
//! `casparian_worker::worker::Worker` exercises `casparian_sentinel`: connect,
//! identify (here, a heartbeat loop), enter an event loop that handles one
//! inbound request type, and report a terminal result. Unlike the teacher's
//! worker, there is no ZMQ socket to own — everything flows through the
//! shared `compute_bus::EventBus`, so `ReferenceAgent` is a library a binary
//! (or `compute_platform`'s dev-mode launcher) can spawn any number of.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use compute_bus::EventBus;
use compute_protocol::{
    AgentId, AgentState, AssignReply, AssignRequest, Clock, JobId, JobOutcome, JobResult,
    ResourceVector,
};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Static capacity/pricing description the agent heartbeats and the
/// assignment handler consult. Not mutated after construction — a real
/// provider would restart the process to change its advertised shape.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub capacity: ResourceVector,
    pub capabilities: BTreeSet<String>,
    pub region: String,
    pub price_per_hour: BTreeMap<String, f64>,
    pub heartbeat_interval: Duration,
    pub max_concurrent_jobs: usize,
    /// How long a simulated job takes to "run" before reporting success.
    pub execution_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            capacity: ResourceVector::single("cpu", 4.0),
            capabilities: BTreeSet::new(),
            region: "us-west-1".to_string(),
            price_per_hour: BTreeMap::new(),
            heartbeat_interval: Duration::from_secs(30),
            max_concurrent_jobs: 4,
            execution_delay: Duration::from_millis(50),
        }
    }
}

/// A minimal compute provider: heartbeats on a fixed interval, accepts
/// assignments up to `max_concurrent_jobs`, and reports a terminal
/// `job.result` after simulating execution for `execution_delay`.
pub struct ReferenceAgent {
    id: AgentId,
    config: AgentConfig,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    active_jobs: RwLock<HashMap<JobId, CancellationToken>>,
}

impl ReferenceAgent {
    pub fn new(id: AgentId, config: AgentConfig, bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            id,
            config,
            bus,
            clock,
            active_jobs: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Runs the heartbeat loop, the assignment replier and the
    /// cancellation listener concurrently until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tokio::join!(
            self.clone().run_heartbeat_loop(cancel.clone()),
            self.clone().run_assignment_loop(cancel.clone()),
            self.clone().run_cancellation_listener(cancel.clone()),
        );
    }

    async fn run_heartbeat_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(agent_id = %self.id, "agent heartbeat loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.publish_heartbeat().await;
                }
            }
        }
    }

    async fn publish_heartbeat(&self) {
        let heartbeat = compute_protocol::Heartbeat {
            agent_id: self.id,
            state: AgentState::Active,
            capacity: self.config.capacity.clone(),
            active_jobs: self.active_jobs.read().keys().copied().collect(),
            metrics: BTreeMap::new(),
            timestamp: self.clock.now(),
        };
        match serde_json::to_value(&heartbeat) {
            Ok(payload) => self.bus.publish(compute_protocol::subjects::AGENT_HEARTBEAT, payload).await,
            Err(err) => tracing::error!(agent_id = %self.id, error = %err, "failed to serialize heartbeat"),
        }
    }

    async fn run_assignment_loop(self: Arc<Self>, cancel: CancellationToken) {
        let subject = compute_protocol::subjects::agent_assign_subject(&self.id);
        let mut replier = self.bus.register_replier(&subject);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(agent_id = %self.id, "agent assignment loop shutting down");
                    return;
                }
                pending = replier.recv() => {
                    let Some(pending) = pending else { return };
                    let reply = self.clone().handle_assign_request(pending.payload.clone());
                    pending.respond(serde_json::to_value(reply).unwrap_or_else(|_| serde_json::json!({"accepted": false})));
                }
            }
        }
    }

    fn handle_assign_request(self: Arc<Self>, payload: serde_json::Value) -> AssignReply {
        let request: AssignRequest = match serde_json::from_value(payload) {
            Ok(request) => request,
            Err(err) => {
                return AssignReply {
                    accepted: false,
                    reason: Some(format!("malformed assign request: {err}")),
                }
            }
        };

        let mut active = self.active_jobs.write();
        if active.len() >= self.config.max_concurrent_jobs {
            return AssignReply {
                accepted: false,
                reason: Some("at max concurrent jobs".to_string()),
            };
        }

        let job_id = request.job.id;
        let token = CancellationToken::new();
        active.insert(job_id, token.clone());
        drop(active);

        tokio::spawn(self.clone().simulate_execution(job_id, token));

        AssignReply {
            accepted: true,
            reason: None,
        }
    }

    async fn simulate_execution(self: Arc<Self>, job_id: JobId, token: CancellationToken) {
        let outcome = tokio::select! {
            _ = tokio::time::sleep(self.config.execution_delay) => JobOutcome::Succeeded,
            _ = token.cancelled() => JobOutcome::Cancelled,
        };

        self.active_jobs.write().remove(&job_id);

        let result = JobResult {
            job_id,
            status: outcome,
            exit_code: matches!(outcome, JobOutcome::Succeeded).then_some(0),
            error: None,
            metrics: BTreeMap::new(),
        };
        match serde_json::to_value(&result) {
            Ok(payload) => self.bus.publish(compute_protocol::subjects::JOB_RESULT, payload).await,
            Err(err) => tracing::error!(agent_id = %self.id, %job_id, error = %err, "failed to serialize job result"),
        }
    }

    async fn run_cancellation_listener(self: Arc<Self>, cancel: CancellationToken) {
        let subject = compute_protocol::subjects::agent_job_cancel_subject(&self.id);
        let mut subscription = self.bus.subscribe(&subject);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(agent_id = %self.id, "agent cancellation listener shutting down");
                    return;
                }
                envelope = subscription.recv() => {
                    let Some(envelope) = envelope else { return };
                    let Some(job_id) = envelope.payload.get("job_id").and_then(|v| serde_json::from_value::<JobId>(v.clone()).ok()) else {
                        continue;
                    };
                    if let Some(token) = self.active_jobs.read().get(&job_id) {
                        token.cancel();
                    }
                }
            }
        }
    }
}
