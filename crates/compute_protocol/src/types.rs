//! Domain entities shared by every component.
//!
//! This is the single definition of the wire schema: the event bus payload
//! documents and the HTTP boundary's JSON bodies are both this module's
//! types, serialized directly. No component re-derives its own copy.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use compute_ids::{
    AgentId, AllocationId, BidId, ConsumerId, JobId, MatchId, OfferId, ProviderId, ResourceId,
};

/// A non-negative, named-dimension vector (cpu, memory_mb, gpu, storage_mb, ...).
///
/// Dimensions are data-driven: arithmetic ignores a dimension absent in the
/// lighter operand rather than treating it as an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVector(pub BTreeMap<String, f64>);

impl ResourceVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn single(dimension: impl Into<String>, amount: f64) -> Self {
        let mut map = BTreeMap::new();
        map.insert(dimension.into(), amount);
        Self(map)
    }

    pub fn get(&self, dimension: &str) -> f64 {
        self.0.get(dimension).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, dimension: impl Into<String>, amount: f64) {
        self.0.insert(dimension.into(), amount);
    }

    pub fn is_non_negative(&self) -> bool {
        self.0.values().all(|v| *v >= 0.0)
    }

    /// `self + other`, dimension by dimension.
    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        let mut result = self.0.clone();
        for (dim, amount) in &other.0 {
            *result.entry(dim.clone()).or_insert(0.0) += amount;
        }
        ResourceVector(result)
    }

    /// `self - other`, dimension by dimension. Never produces negative values;
    /// callers that need to detect underflow should use `satisfies` first.
    pub fn sub(&self, other: &ResourceVector) -> ResourceVector {
        let mut result = self.0.clone();
        for (dim, amount) in &other.0 {
            let entry = result.entry(dim.clone()).or_insert(0.0);
            *entry = (*entry - amount).max(0.0);
        }
        ResourceVector(result)
    }

    /// True if `self` has at least `requirement` on every dimension named in
    /// `requirement`. Dimensions in `self` not named in `requirement` are
    /// ignored, per the spec's "ignores dimensions absent in the lighter
    /// operand" rule.
    pub fn satisfies(&self, requirement: &ResourceVector) -> bool {
        requirement
            .0
            .iter()
            .all(|(dim, amount)| self.get(dim) >= *amount)
    }

    /// Componentwise minimum, used when reconciling a reported capacity
    /// snapshot against a larger existing capacity vector.
    pub fn componentwise_min(&self, other: &ResourceVector) -> ResourceVector {
        let mut dims: BTreeSet<&String> = self.0.keys().collect();
        dims.extend(other.0.keys());
        let mut result = BTreeMap::new();
        for dim in dims {
            result.insert(dim.clone(), self.get(dim).min(other.get(dim)));
        }
        ResourceVector(result)
    }
}

/// A registered pool of capacity on one agent, owned by the resource ledger
/// (§4.B). `allocated` is the sum of that resource's active allocations;
/// `available` is always derived, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub agent_id: AgentId,
    pub capacity: ResourceVector,
    pub allocated: ResourceVector,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn available(&self) -> ResourceVector {
        self.capacity.sub(&self.allocated)
    }
}

/// Resource/SLA requirements a job places on its execution environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    pub cpu_cores: f64,
    pub memory_mb: f64,
    #[serde(default)]
    pub gpu_count: f64,
    #[serde(default)]
    pub gpu_model: Option<String>,
    #[serde(default)]
    pub storage_mb: f64,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub sla: Option<Sla>,
}

impl Requirements {
    pub fn as_vector(&self) -> ResourceVector {
        let mut vector = ResourceVector::new();
        vector.set("cpu", self.cpu_cores);
        vector.set("memory_mb", self.memory_mb);
        if self.gpu_count > 0.0 {
            vector.set("gpu", self.gpu_count);
        }
        if self.storage_mb > 0.0 {
            vector.set("storage_mb", self.storage_mb);
        }
        vector
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sla {
    pub max_price_per_hour: f64,
    #[serde(default)]
    pub preferred_regions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Container,
    Script,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }
}

/// Request body for `POST /jobs` (§6) / `Scheduler::submit` (§4.D step 1).
/// Distinct from `Job`: a submission carries only what the caller provides,
/// before validation fills in defaults and the scheduler assigns
/// id/state/timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub submitter: ConsumerId,
    pub kind: JobKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub requirements: Requirements,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub submitter: ConsumerId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub requirements: Requirements,
    pub priority: u8,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_count: u32,
    pub state: JobState,
    pub assigned_agent: Option<AgentId>,
    pub submitted_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Unknown,
    Active,
    Busy,
    Draining,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub state: AgentState,
    pub last_seen: DateTime<Utc>,
    pub capacity: ResourceVector,
    pub allocated: ResourceVector,
    pub capabilities: BTreeSet<String>,
    pub region: String,
    pub price_per_hour: BTreeMap<String, f64>,
    pub reputation: f64,
    pub active_jobs: BTreeSet<JobId>,
}

impl Agent {
    pub fn available(&self) -> ResourceVector {
        self.capacity.sub(&self.allocated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationState {
    Active,
    Released,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub agent_id: AgentId,
    pub job_id: Option<JobId>,
    pub consumer_id: ConsumerId,
    pub amount: ResourceVector,
    pub granted_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub state: AllocationState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub rrule: Option<String>,
}

impl Availability {
    pub fn contains(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= start && end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferState {
    Open,
    Reserved,
    Expired,
    Withdrawn,
}

/// Request body for `POST /offers` (§6) / `Marketplace::create_offer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferSubmission {
    pub provider_id: ProviderId,
    pub agent_id: AgentId,
    pub resources: ResourceVector,
    pub price_per_hour: f64,
    pub availability: Availability,
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(default = "default_sla_uptime")]
    pub sla_uptime: f64,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

fn default_sla_uptime() -> f64 {
    0.99
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub provider_id: ProviderId,
    pub agent_id: AgentId,
    pub resources: ResourceVector,
    pub price_per_hour: f64,
    pub availability: Availability,
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    pub features: BTreeSet<String>,
    pub sla_uptime: f64,
    pub state: OfferState,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidState {
    Open,
    Matched,
    Expired,
    Cancelled,
}

/// Request body for `POST /bids` (§6) / `Marketplace::create_bid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidSubmission {
    pub consumer_id: ConsumerId,
    pub requirements: Requirements,
    pub max_price_per_hour: f64,
    pub start_time: DateTime<Utc>,
    pub duration_secs: u64,
    #[serde(default)]
    pub flex_window_secs: u64,
    #[serde(default)]
    pub preferred_regions: Vec<String>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub consumer_id: ConsumerId,
    pub requirements: Requirements,
    pub max_price_per_hour: f64,
    pub start_time: DateTime<Utc>,
    pub duration_secs: u64,
    #[serde(default)]
    pub flex_window_secs: u64,
    #[serde(default)]
    pub preferred_regions: Vec<String>,
    pub state: BidState,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    Proposed,
    ConfirmedByConsumer,
    ConfirmedByProvider,
    Active,
    Completed,
    Disputed,
    Expired,
}

impl MatchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MatchState::Completed | MatchState::Disputed | MatchState::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchParty {
    Consumer,
    Provider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub bid_id: BidId,
    pub offer_id: OfferId,
    pub consumer_id: ConsumerId,
    pub provider_id: ProviderId,
    pub agreed_price: f64,
    pub window: MatchWindow,
    pub state: MatchState,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Shape reported by an agent on every heartbeat (§4.C / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: AgentId,
    pub state: AgentState,
    pub capacity: ResourceVector,
    pub active_jobs: BTreeSet<JobId>,
    pub metrics: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

/// Reply accompanying a terminal `job.result` event (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobOutcome,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Request body sent on `agent.{id}.assign` (§4.C / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRequest {
    pub job: Job,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignReply {
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}
