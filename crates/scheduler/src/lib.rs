//! Scheduler (§4.D): job queue, eligibility filter, multi-factor scoring,
//! and assignment with back-off.
//!
//! The scheduling sweep and its exponential back-off are grounded on the
//! teacher's `casparian_sentinel::sentinel` dispatch loop
//! (`DISPATCH_BACKOFF_BASE_MS`/`BACKOFF_BASE_SECS`), generalized here to the
//! spec's literal `2^retry_count` seconds. The "assign then allocate"
//! cross-component sequence is the two-step protocol called for in §9:
//! allocate *after* the agent accepts, confirm the job only once the
//! allocation itself succeeds, and treat either failure as a plain refusal
//! — never propagated to the submitter.

mod cost;
mod error;
mod sweeper;

pub use cost::{CostEstimator, LinearCostEstimator};
pub use error::SchedulerError;
pub use sweeper::ScheduleSweeper;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use agent_registry::{AgentFilter, AgentRegistry};
use chrono::{DateTime, Utc};
use compute_bus::{publish_event, subscribe_events, EventBus};
use compute_protocol::{
    Agent, AgentState, AssignRequest, Clock, ConsumerId, DomainEvent, Job, JobId, JobResult,
    JobSubmission, subjects::agent_job_cancel_subject,
};
use job_journal::{JobFilter, JobJournal};
use parking_lot::RwLock;
use resource_ledger::{QueryFilter, ResourceLedger};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Eligibility requires a heartbeat fresher than this, independent of (and
/// stricter than) the agent registry's own offline-detection window — a
/// literal from §4.D step 4b ("last seen < 2 min").
const ELIGIBILITY_MAX_STALENESS: Duration = Duration::from_secs(120);

struct DeferredJob {
    wake_at: DateTime<Utc>,
}

#[derive(Default)]
struct SchedulerState {
    ready: VecDeque<JobId>,
    deferred: HashMap<JobId, DeferredJob>,
}

pub struct Scheduler {
    journal: Arc<JobJournal>,
    registry: Arc<AgentRegistry>,
    ledger: Arc<ResourceLedger>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    cost_estimator: Arc<dyn CostEstimator>,
    default_job_timeout_secs: u64,
    default_max_retries: u32,
    assignment_timeout: Duration,
    state: RwLock<SchedulerState>,
    wake: Notify,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        journal: Arc<JobJournal>,
        registry: Arc<AgentRegistry>,
        ledger: Arc<ResourceLedger>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        cost_estimator: Arc<dyn CostEstimator>,
        default_job_timeout_secs: u64,
        default_max_retries: u32,
        assignment_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            journal,
            registry,
            ledger,
            bus,
            clock,
            cost_estimator,
            default_job_timeout_secs,
            default_max_retries,
            assignment_timeout,
            state: RwLock::new(SchedulerState::default()),
            wake: Notify::new(),
        })
    }

    /// §4.D steps 1-3: validate, estimate cost, enqueue. Triggers an
    /// immediate scheduling attempt in addition to the periodic sweep.
    pub async fn submit(&self, submission: JobSubmission) -> Result<Job, SchedulerError> {
        if submission.requirements.cpu_cores <= 0.0 || submission.requirements.memory_mb <= 0.0 {
            return Err(SchedulerError::InvalidRequirements);
        }
        let priority = submission.priority.min(10);
        let timeout_secs = submission.timeout_secs.unwrap_or(self.default_job_timeout_secs);
        let max_retries = submission.max_retries.unwrap_or(self.default_max_retries);
        let estimated_cost = self.cost_estimator.estimate(&submission.requirements, timeout_secs);

        let now = self.clock.now();
        let job = Job {
            id: JobId::new(),
            submitter: submission.submitter,
            kind: submission.kind,
            payload: submission.payload,
            requirements: submission.requirements,
            priority,
            timeout_secs,
            max_retries,
            retry_count: 0,
            state: compute_protocol::JobState::Queued,
            assigned_agent: None,
            submitted_at: now,
            scheduled_at: None,
            finished_at: None,
            exit_code: None,
            error: None,
            estimated_cost,
            actual_cost: None,
        };

        self.journal.create(job.clone()).await;
        self.state.write().ready.push_back(job.id);
        self.wake.notify_one();
        Ok(job)
    }

    pub fn get(&self, job_id: JobId) -> Option<Job> {
        self.journal.get(job_id)
    }

    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.journal.list(filter)
    }

    /// `cancel(id)` (§4.D): authorized against submitter identity, releases
    /// allocations, and asks the assigned agent (if any) to stop.
    pub async fn cancel(&self, job_id: JobId, requester: ConsumerId) -> Result<Option<Job>, SchedulerError> {
        let now = self.clock.now();
        let job_before = self.journal.get(job_id).ok_or(SchedulerError::UnknownJob(job_id))?;
        let cancelled = self.journal.cancel(job_id, requester, now).await?;
        if cancelled.is_some() {
            self.ledger.release_job_allocations(job_id);
            if let Some(agent_id) = job_before.assigned_agent {
                self.registry.note_job_finished(agent_id, job_id);
                self.bus
                    .publish(&agent_job_cancel_subject(&agent_id), serde_json::json!({"job_id": job_id}))
                    .await;
            }
        }
        Ok(cancelled)
    }

    /// Subscribes to `job.result` (§4.D "Terminal events") and to
    /// `agent.offline` (§8 scenario 3) for the lifetime of the process.
    /// Intended to be spawned once alongside the scheduling sweep.
    pub async fn run_terminal_listener(self: Arc<Self>, cancel: CancellationToken) {
        let mut job_results = self.bus.subscribe(compute_protocol::subjects::JOB_RESULT);
        let mut agent_offline = subscribe_events(self.bus.as_ref(), compute_protocol::subjects::AGENT_OFFLINE);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("scheduler terminal listener shutting down");
                    return;
                }
                envelope = job_results.recv() => {
                    let Some(envelope) = envelope else { return };
                    match serde_json::from_value::<JobResult>(envelope.payload) {
                        Ok(result) => self.handle_job_result(result).await,
                        Err(err) => tracing::warn!(error = %err, "malformed job.result payload"),
                    }
                }
                event = agent_offline.recv() => {
                    let Some(DomainEvent::AgentOffline(agent)) = event else { continue };
                    self.handle_agent_offline(agent).await;
                }
            }
        }
    }

    async fn handle_job_result(&self, result: JobResult) {
        let now = self.clock.now();
        if let Some(job) = self.journal.get(result.job_id) {
            if let Some(agent_id) = job.assigned_agent {
                self.registry.note_job_finished(agent_id, result.job_id);
            }
        }
        match self
            .journal
            .mark_terminal(result.job_id, result.status, result.exit_code, result.error, now)
            .await
        {
            Ok(Some(_)) => self.ledger.release_job_allocations(result.job_id),
            Ok(None) => {}
            Err(err) => tracing::warn!(job_id = %result.job_id, error = %err, "failed to record job result"),
        }
    }

    /// §8 scenario 3: the assigned agent went offline before reporting a
    /// terminal result — release its allocations and re-queue every job it
    /// was holding, incrementing `retry_count`.
    async fn handle_agent_offline(&self, agent: Agent) {
        for job_id in agent.active_jobs {
            self.ledger.release_job_allocations(job_id);
            match self.journal.requeue(job_id).await {
                Ok(_) => {
                    self.state.write().ready.push_back(job_id);
                    self.wake.notify_one();
                }
                Err(err) => tracing::debug!(%job_id, error = %err, "job already terminal, not re-queuing after agent loss"),
            }
        }
    }

    /// One scheduling sweep (§4.D step 4): move any deferred job whose
    /// back-off has elapsed back onto the ready queue, then attempt
    /// assignment for every ready job in FIFO order.
    pub async fn sweep(&self) {
        let now = self.clock.now();
        let ready: Vec<JobId> = {
            let mut state = self.state.write();
            let woken: Vec<JobId> = state
                .deferred
                .iter()
                .filter(|(_, d)| d.wake_at <= now)
                .map(|(id, _)| *id)
                .collect();
            for id in &woken {
                state.deferred.remove(id);
                state.ready.push_back(*id);
            }
            state.ready.drain(..).collect()
        };

        for job_id in ready {
            self.try_schedule_one(job_id).await;
        }
    }

    async fn try_schedule_one(&self, job_id: JobId) {
        let Some(job) = self.journal.get(job_id) else { return };
        if job.state != compute_protocol::JobState::Queued {
            return;
        }

        let candidates = self.eligible_candidates(&job);
        let scored = self.score_candidates(&job, candidates);

        for (agent, resource_id) in scored {
            let reply = self
                .registry
                .assign(agent.id, AssignRequest { job: job.clone() }, self.assignment_timeout)
                .await;
            if !reply.accepted {
                continue;
            }

            let now = self.clock.now();
            let lease_seconds = Some(job.timeout_secs);
            match self.ledger.allocate(
                resource_id,
                job.submitter,
                Some(job.id),
                job.requirements.as_vector(),
                lease_seconds,
            ) {
                Ok(_allocation_id) => {
                    if let Err(err) = self.journal.mark_scheduled(job.id, agent.id, now).await {
                        tracing::error!(job_id = %job.id, error = %err, "failed to record scheduled state after successful allocation");
                        self.ledger.release_job_allocations(job.id);
                        continue;
                    }
                    self.registry.note_job_assigned(agent.id, job.id);
                    return;
                }
                Err(_) => {
                    // Allocation lost a race to a concurrent sweep; treat
                    // exactly like a refusal and try the next candidate.
                    continue;
                }
            }
        }

        self.handle_exhaustion(job).await;
    }

    fn eligible_candidates(&self, job: &Job) -> Vec<(Agent, compute_protocol::ResourceId)> {
        let now = self.clock.now();
        let candidates = self.registry.list(&AgentFilter {
            state: Some(AgentState::Active),
            region: None,
        });

        candidates
            .into_iter()
            .filter_map(|agent| {
                let staleness = now.signed_duration_since(agent.last_seen);
                if staleness >= chrono::Duration::from_std(ELIGIBILITY_MAX_STALENESS).unwrap_or_default() {
                    return None;
                }
                if !agent.capabilities.is_superset(&job.requirements.capabilities) {
                    return None;
                }
                if let Some(sla) = &job.requirements.sla {
                    if !sla.preferred_regions.is_empty() && !sla.preferred_regions.contains(&agent.region) {
                        return None;
                    }
                    let rate = agent.price_per_hour.get("cpu").copied().unwrap_or(0.0);
                    if rate * job.requirements.cpu_cores.max(1.0) > sla.max_price_per_hour {
                        return None;
                    }
                }

                let resources = self.ledger.query(&QueryFilter {
                    agent_id: Some(agent.id),
                    ..Default::default()
                });
                let resource = resources.resources.into_iter().next()?;
                if !resource.available().satisfies(&job.requirements.as_vector()) {
                    return None;
                }
                Some((agent, resource.id))
            })
            .collect()
    }

    /// §4.D step 4c: weighted sum of cost (30%), reputation (30%), headroom
    /// (20%), load (20%). Ties break by earliest `last_seen`, then
    /// lexicographic agent id (§4.D "Tie-breaking"), so the ordering is
    /// deterministic run to run.
    fn score_candidates(
        &self,
        job: &Job,
        candidates: Vec<(Agent, compute_protocol::ResourceId)>,
    ) -> Vec<(Agent, compute_protocol::ResourceId)> {
        let mut scored: Vec<(f64, Agent, compute_protocol::ResourceId)> = candidates
            .into_iter()
            .map(|(agent, resource_id)| {
                let rate = agent.price_per_hour.get("cpu").copied().unwrap_or(0.0);
                let cost_factor = 1.0 / (1.0 + rate / 100.0);
                let capacity_cpu = agent.capacity.get("cpu");
                let headroom = if capacity_cpu > 0.0 {
                    agent.available().get("cpu") / capacity_cpu
                } else {
                    0.0
                };
                let load_factor = 1.0 / (1.0 + agent.active_jobs.len() as f64);
                let score = 0.3 * cost_factor + 0.3 * agent.reputation + 0.2 * headroom + 0.2 * load_factor;
                let _ = job;
                (score, agent, resource_id)
            })
            .collect();

        scored.sort_by(|(score_a, a, _), (score_b, b, _)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.last_seen.cmp(&b.last_seen))
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        });

        scored.into_iter().map(|(_, agent, resource_id)| (agent, resource_id)).collect()
    }

    /// §4.D step 6: exhaustion handling. Past the retry budget the job is
    /// force-failed as "unschedulable"; otherwise it is re-queued and
    /// deferred for `2^retry_count` seconds.
    async fn handle_exhaustion(&self, job: Job) {
        let now = self.clock.now();
        if job.retry_count + 1 > job.max_retries {
            if let Err(err) = self.journal.mark_unschedulable(job.id, now).await {
                tracing::error!(job_id = %job.id, error = %err, "failed to mark job unschedulable");
            }
            return;
        }

        match self.journal.requeue(job.id).await {
            Ok(requeued) => {
                let backoff_secs = 2u64.saturating_pow(requeued.retry_count);
                self.state.write().deferred.insert(
                    job.id,
                    DeferredJob {
                        wake_at: now + chrono::Duration::seconds(backoff_secs as i64),
                    },
                );
            }
            Err(err) => tracing::error!(job_id = %job.id, error = %err, "failed to requeue exhausted job"),
        }
    }

    pub(crate) fn notify_handle(&self) -> &Notify {
        &self.wake
    }
}
