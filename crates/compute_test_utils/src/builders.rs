use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use compute_protocol::{
    Agent, AgentId, AgentState, Bid, BidState, ConsumerId, Job, JobId, JobKind, JobState, Offer,
    OfferState, ProviderId, Requirements, ResourceVector,
};

/// Builds an `Agent` with every field defaulted to a reasonable value for
/// happy-path tests; override only what a given test asserts on.
pub struct AgentBuilder {
    agent: Agent,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            agent: Agent {
                id: AgentId::new(),
                state: AgentState::Active,
                last_seen: Utc::now(),
                capacity: ResourceVector::single("cpu", 8.0).add(&ResourceVector::single("memory_mb", 32768.0)),
                allocated: ResourceVector::new(),
                capabilities: BTreeSet::new(),
                region: "us-west-1".to_string(),
                price_per_hour: BTreeMap::new(),
                reputation: 0.9,
                active_jobs: BTreeSet::new(),
            },
        }
    }

    pub fn id(mut self, id: AgentId) -> Self {
        self.agent.id = id;
        self
    }

    pub fn state(mut self, state: AgentState) -> Self {
        self.agent.state = state;
        self
    }

    pub fn capacity(mut self, capacity: ResourceVector) -> Self {
        self.agent.capacity = capacity;
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.agent.region = region.into();
        self
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.agent.capabilities.insert(capability.into());
        self
    }

    pub fn reputation(mut self, reputation: f64) -> Self {
        self.agent.reputation = reputation;
        self
    }

    pub fn build(self) -> Agent {
        self.agent
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a `Job` with minimal valid requirements.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            job: Job {
                id: JobId::new(),
                submitter: ConsumerId::new(),
                kind: JobKind::Container,
                payload: serde_json::json!({}),
                requirements: Requirements {
                    cpu_cores: 1.0,
                    memory_mb: 512.0,
                    ..Default::default()
                },
                priority: 5,
                timeout_secs: 3600,
                max_retries: 3,
                retry_count: 0,
                state: JobState::Queued,
                assigned_agent: None,
                submitted_at: Utc::now(),
                scheduled_at: None,
                finished_at: None,
                exit_code: None,
                error: None,
                estimated_cost: 0.0,
                actual_cost: None,
            },
        }
    }

    pub fn requirements(mut self, requirements: Requirements) -> Self {
        self.job.requirements = requirements;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.job.priority = priority;
        self
    }

    pub fn submitter(mut self, submitter: ConsumerId) -> Self {
        self.job.submitter = submitter;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds an `Offer` with an 8-hour availability window starting now.
pub struct OfferBuilder {
    offer: Offer,
}

impl OfferBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            offer: Offer {
                id: compute_protocol::OfferId::new(),
                provider_id: ProviderId::new(),
                agent_id: AgentId::new(),
                resources: ResourceVector::single("cpu", 8.0),
                price_per_hour: 0.05,
                availability: compute_protocol::Availability {
                    start: now,
                    end: now + chrono::Duration::hours(8),
                    rrule: None,
                },
                min_duration_secs: 3600,
                max_duration_secs: 8 * 3600,
                features: BTreeSet::new(),
                sla_uptime: 0.999,
                state: OfferState::Open,
                expires_at: now + chrono::Duration::days(1),
            },
        }
    }

    pub fn price_per_hour(mut self, price: f64) -> Self {
        self.offer.price_per_hour = price;
        self
    }

    pub fn resources(mut self, resources: ResourceVector) -> Self {
        self.offer.resources = resources;
        self
    }

    pub fn region_feature(mut self, region: impl Into<String>) -> Self {
        self.offer.features.insert(region.into());
        self
    }

    pub fn availability(mut self, availability: compute_protocol::Availability) -> Self {
        self.offer.availability = availability;
        self
    }

    pub fn build(self) -> Offer {
        self.offer
    }
}

impl Default for OfferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a `Bid` requesting 4 cpu starting one hour from now.
pub struct BidBuilder {
    bid: Bid,
}

impl BidBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            bid: Bid {
                id: compute_protocol::BidId::new(),
                consumer_id: ConsumerId::new(),
                requirements: Requirements {
                    cpu_cores: 4.0,
                    memory_mb: 0.0,
                    ..Default::default()
                },
                max_price_per_hour: 0.25,
                start_time: now + chrono::Duration::hours(1),
                duration_secs: 4 * 3600,
                flex_window_secs: 0,
                preferred_regions: Vec::new(),
                state: BidState::Open,
                expires_at: now + chrono::Duration::days(1),
                created_at: now,
            },
        }
    }

    pub fn max_price_per_hour(mut self, price: f64) -> Self {
        self.bid.max_price_per_hour = price;
        self
    }

    pub fn requirements(mut self, requirements: Requirements) -> Self {
        self.bid.requirements = requirements;
        self
    }

    pub fn preferred_region(mut self, region: impl Into<String>) -> Self {
        self.bid.preferred_regions.push(region.into());
        self
    }

    pub fn start_time(mut self, start: chrono::DateTime<Utc>) -> Self {
        self.bid.start_time = start;
        self
    }

    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.bid.duration_secs = secs;
        self
    }

    pub fn build(self) -> Bid {
        self.bid
    }
}

impl Default for BidBuilder {
    fn default() -> Self {
        Self::new()
    }
}
