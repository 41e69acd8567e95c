//! Typed event envelope published alongside the raw subject/payload pairs in
//! §6. Components are free to publish `serde_json::Value` directly through
//! `compute_bus`; this enum exists so in-process subscribers (and tests) can
//! match on a closed set instead of re-parsing JSON by convention.

use serde::{Deserialize, Serialize};

use crate::types::{Agent, Allocation, Bid, Job, Match, Offer};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "snapshot")]
pub enum DomainEvent {
    JobCreated(Job),
    JobScheduled(Job),
    JobSucceeded(Job),
    JobFailed(Job),
    JobCancelled(Job),
    AgentOffline(Agent),
    OfferCreated(Offer),
    OfferReserved(Offer),
    OfferWithdrawn(Offer),
    BidCreated(Bid),
    BidMatched(Bid),
    BidExpired(Bid),
    MatchCreated(Match),
    MatchConfirmed(Match),
    MatchExpired(Match),
    AllocationCreated(Allocation),
    AllocationReleased(Allocation),
}

impl DomainEvent {
    /// The canonical subject this event is published under (§6).
    pub fn subject(&self) -> &'static str {
        use crate::subjects::*;
        match self {
            DomainEvent::JobCreated(_) => JOB_CREATED,
            DomainEvent::JobScheduled(_) => JOB_SCHEDULED,
            DomainEvent::JobSucceeded(_) => JOB_SUCCEEDED,
            DomainEvent::JobFailed(_) => JOB_FAILED,
            DomainEvent::JobCancelled(_) => JOB_CANCELLED,
            DomainEvent::AgentOffline(_) => AGENT_OFFLINE,
            DomainEvent::OfferCreated(_) => OFFER_CREATED,
            DomainEvent::OfferReserved(_) => OFFER_RESERVED,
            DomainEvent::OfferWithdrawn(_) => OFFER_WITHDRAWN,
            DomainEvent::BidCreated(_) => BID_CREATED,
            DomainEvent::BidMatched(_) => BID_MATCHED,
            DomainEvent::BidExpired(_) => BID_EXPIRED,
            DomainEvent::MatchCreated(_) => MATCH_CREATED,
            DomainEvent::MatchConfirmed(_) => MATCH_CONFIRMED,
            DomainEvent::MatchExpired(_) => MATCH_EXPIRED,
            DomainEvent::AllocationCreated(_) => ALLOCATION_CREATED,
            DomainEvent::AllocationReleased(_) => ALLOCATION_RELEASED,
        }
    }
}
