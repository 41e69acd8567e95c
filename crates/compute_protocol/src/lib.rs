//! Wire schema for the compute marketplace.
//!
//! Every entity here is published verbatim as an event bus payload (§6) and
//! serialized verbatim at the HTTP boundary. There is exactly one
//! definition per entity, shared by every crate in the workspace.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod subjects;
pub mod types;

pub use clock::{system_clock, Clock, SystemClock};
pub use config::PlatformConfig;
pub use error::{DomainError, ErrorKind};
pub use events::DomainEvent;
pub use types::{
    Agent, AgentState, Allocation, AllocationState, AssignReply, AssignRequest, Availability, Bid,
    BidState, BidSubmission, Heartbeat, Job, JobKind, JobOutcome, JobResult, JobState,
    JobSubmission, Match, MatchParty, MatchState, MatchWindow, Offer, OfferState, OfferSubmission,
    Requirements, Resource, ResourceVector, Sla,
};

pub use compute_ids::{
    AgentId, AllocationId, BidId, ConsumerId, JobId, MatchId, OfferId, ProviderId, ResourceId,
};
