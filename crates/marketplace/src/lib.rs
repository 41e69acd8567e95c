//! Marketplace Matcher (§4.E): bid/offer catalog, scored matching,
//! reservation state machine, and two-party confirmation.
//!
//! The matching sweep's winning-offer search is grounded on the atomic
//! claim-then-verify pattern in the teacher's `casparian_db` queue (`pop_job`:
//! find the candidate row, then re-validate and mutate inside the same write
//! guard, rolling back to the prior state if another caller already claimed
//! it) — translated here from a SQL `UPDATE ... WHERE` to a single
//! `parking_lot::RwLock` write guard around "check every open offer, pick
//! the best feasible one, flip both sides to reserved".

mod error;
mod scoring;
mod sweeper;

pub use error::MarketplaceError;
pub use scoring::{feasible, score};
pub use sweeper::MatchingSweeper;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use compute_bus::{publish_event, EventBus};
use compute_protocol::{
    Availability, Bid, BidId, BidState, BidSubmission, Clock, ConsumerId, DomainEvent, Match,
    MatchId, MatchParty, MatchState, MatchWindow, Offer, OfferId, OfferState, OfferSubmission,
    ProviderId,
};
use parking_lot::RwLock;
use tokio::sync::Notify;

#[derive(Default)]
struct MarketState {
    offers: HashMap<OfferId, Offer>,
    bids: HashMap<BidId, Bid>,
    matches: HashMap<MatchId, Match>,
    confirmations: HashMap<MatchId, HashSet<MatchParty>>,
}

#[derive(Debug, Clone, Default)]
pub struct OfferFilter {
    pub provider_id: Option<ProviderId>,
    pub state: Option<OfferState>,
}

#[derive(Debug, Clone, Default)]
pub struct BidFilter {
    pub consumer_id: Option<ConsumerId>,
    pub state: Option<BidState>,
}

pub struct MarketplaceMatcher {
    state: RwLock<MarketState>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    match_confirm_window: chrono::Duration,
    wake: Notify,
}

impl MarketplaceMatcher {
    pub fn new(bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>, match_confirm_window_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(MarketState::default()),
            bus,
            clock,
            match_confirm_window: chrono::Duration::seconds(match_confirm_window_secs as i64),
            wake: Notify::new(),
        })
    }

    pub(crate) fn notify_handle(&self) -> &Notify {
        &self.wake
    }

    /// `create_offer` (§4.E). `ttl_secs` defaults to 24h when omitted.
    pub async fn create_offer(&self, submission: OfferSubmission) -> Offer {
        let now = self.clock.now();
        let ttl = submission.ttl_secs.unwrap_or(24 * 3600);
        let offer = Offer {
            id: OfferId::new(),
            provider_id: submission.provider_id,
            agent_id: submission.agent_id,
            resources: submission.resources,
            price_per_hour: submission.price_per_hour,
            availability: submission.availability,
            min_duration_secs: submission.min_duration_secs,
            max_duration_secs: submission.max_duration_secs,
            features: submission.features,
            sla_uptime: submission.sla_uptime,
            state: OfferState::Open,
            expires_at: now + chrono::Duration::seconds(ttl as i64),
        };
        self.state.write().offers.insert(offer.id, offer.clone());
        publish_event(self.bus.as_ref(), &DomainEvent::OfferCreated(offer.clone())).await;
        offer
    }

    /// `create_bid` (§4.E). Triggers an immediate matching attempt in
    /// addition to the periodic sweep.
    pub async fn create_bid(&self, submission: BidSubmission) -> Bid {
        let now = self.clock.now();
        let ttl = submission.ttl_secs.unwrap_or(24 * 3600);
        let bid = Bid {
            id: BidId::new(),
            consumer_id: submission.consumer_id,
            requirements: submission.requirements,
            max_price_per_hour: submission.max_price_per_hour,
            start_time: submission.start_time,
            duration_secs: submission.duration_secs,
            flex_window_secs: submission.flex_window_secs,
            preferred_regions: submission.preferred_regions,
            state: BidState::Open,
            expires_at: now + chrono::Duration::seconds(ttl as i64),
            created_at: now,
        };
        self.state.write().bids.insert(bid.id, bid.clone());
        publish_event(self.bus.as_ref(), &DomainEvent::BidCreated(bid.clone())).await;
        self.wake.notify_one();
        bid
    }

    pub fn get_offer(&self, id: OfferId) -> Option<Offer> {
        self.state.read().offers.get(&id).cloned()
    }

    pub fn get_bid(&self, id: BidId) -> Option<Bid> {
        self.state.read().bids.get(&id).cloned()
    }

    pub fn get_match(&self, id: MatchId) -> Option<Match> {
        self.state.read().matches.get(&id).cloned()
    }

    pub fn list_offers(&self, filter: &OfferFilter) -> Vec<Offer> {
        self.state
            .read()
            .offers
            .values()
            .filter(|o| filter.provider_id.map_or(true, |p| p == o.provider_id))
            .filter(|o| filter.state.map_or(true, |s| s == o.state))
            .cloned()
            .collect()
    }

    pub fn list_bids(&self, filter: &BidFilter) -> Vec<Bid> {
        self.state
            .read()
            .bids
            .values()
            .filter(|b| filter.consumer_id.map_or(true, |c| c == b.consumer_id))
            .filter(|b| filter.state.map_or(true, |s| s == b.state))
            .cloned()
            .collect()
    }

    /// `cancel_offer` (§4.E). Authorized against `provider_id`; idempotent
    /// once the offer has left `open` (returns `Ok(None)`).
    pub async fn cancel_offer(&self, id: OfferId, provider_id: ProviderId) -> Result<Option<Offer>, MarketplaceError> {
        let offer = {
            let mut state = self.state.write();
            let offer = state.offers.get_mut(&id).ok_or(MarketplaceError::UnknownOffer(id))?;
            if offer.provider_id != provider_id {
                return Err(MarketplaceError::UnknownOffer(id));
            }
            if offer.state != OfferState::Open {
                return Ok(None);
            }
            offer.state = OfferState::Withdrawn;
            offer.clone()
        };
        publish_event(self.bus.as_ref(), &DomainEvent::OfferWithdrawn(offer.clone())).await;
        Ok(Some(offer))
    }

    /// `cancel_bid` (§4.E). Authorized against `consumer_id`; idempotent
    /// once the bid has left `open`.
    pub async fn cancel_bid(&self, id: BidId, consumer_id: ConsumerId) -> Result<Option<Bid>, MarketplaceError> {
        let mut state = self.state.write();
        let bid = state.bids.get_mut(&id).ok_or(MarketplaceError::UnknownBid(id))?;
        if bid.consumer_id != consumer_id {
            return Err(MarketplaceError::UnknownBid(id));
        }
        if bid.state != BidState::Open {
            return Ok(None);
        }
        bid.state = BidState::Cancelled;
        Ok(Some(bid.clone()))
    }

    /// `confirm_match(id, party)` (§4.E). Once both parties have confirmed,
    /// transitions to `active`, emits `match.confirmed` exactly once, and
    /// is handed off to the scheduler for placement by whichever
    /// subscriber wires the two together (the matcher itself has no
    /// dependency on the scheduler crate). A confirmation on a match that
    /// has already left `proposed`/`confirmed_by_*` is a no-op, matching
    /// "a duplicate confirm ... is a no-op" (§8 scenario 5).
    pub async fn confirm_match(&self, id: MatchId, party: MatchParty) -> Result<Match, MarketplaceError> {
        let (snapshot, just_activated) = {
            let mut state = self.state.write();
            let existing = state.matches.get(&id).ok_or(MarketplaceError::UnknownMatch(id))?.clone();
            if existing.state == MatchState::Active || existing.state.is_terminal() {
                return Ok(existing);
            }

            let confirmations = state.confirmations.entry(id).or_default();
            confirmations.insert(party);
            let both_confirmed = confirmations.contains(&MatchParty::Consumer)
                && confirmations.contains(&MatchParty::Provider);

            let current = state.matches.get_mut(&id).expect("checked above");
            if both_confirmed {
                current.state = MatchState::Active;
                current.confirmed_at = Some(self.clock.now());
            } else {
                current.state = match party {
                    MatchParty::Consumer => MatchState::ConfirmedByConsumer,
                    MatchParty::Provider => MatchState::ConfirmedByProvider,
                };
            }
            (current.clone(), both_confirmed)
        };

        if just_activated {
            publish_event(self.bus.as_ref(), &DomainEvent::MatchConfirmed(snapshot.clone())).await;
        }
        Ok(snapshot)
    }

    /// Either party cancelling a not-yet-active match (§4.E): returns the
    /// bid to `open` and the offer to `open`. Modeled as the same
    /// "return to open" transition the timeout sweep performs, since the
    /// wire schema has no distinct cancelled match state — only
    /// completed/disputed/expired are terminal (§3).
    pub async fn cancel_match(&self, id: MatchId) -> Result<Option<Match>, MarketplaceError> {
        let should_expire = {
            let state = self.state.read();
            let existing = state.matches.get(&id).ok_or(MarketplaceError::UnknownMatch(id))?;
            existing.state != MatchState::Active && !existing.state.is_terminal()
        };
        if !should_expire {
            return Ok(None);
        }
        Ok(Some(self.expire_match_and_reopen(id).await))
    }

    async fn expire_match_and_reopen(&self, id: MatchId) -> Match {
        let (snapshot, reopened_bid, reopened_offer) = {
            let mut state = self.state.write();
            let m = state.matches.get_mut(&id).expect("caller verified existence");
            m.state = MatchState::Expired;
            let snapshot = m.clone();
            state.confirmations.remove(&id);

            let bid = state.bids.get_mut(&snapshot.bid_id).map(|b| {
                b.state = BidState::Open;
                b.clone()
            });
            let offer = state.offers.get_mut(&snapshot.offer_id).map(|o| {
                o.state = OfferState::Open;
                o.clone()
            });
            (snapshot, bid, offer)
        };

        publish_event(self.bus.as_ref(), &DomainEvent::MatchExpired(snapshot.clone())).await;
        if let Some(bid) = reopened_bid {
            publish_event(self.bus.as_ref(), &DomainEvent::BidCreated(bid)).await;
        }
        if let Some(offer) = reopened_offer {
            publish_event(self.bus.as_ref(), &DomainEvent::OfferCreated(offer)).await;
        }
        snapshot
    }

    /// One matching sweep (§4.E steps 1-2): snapshot open, unexpired bids
    /// sorted descending by `max_price_per_hour` (tie-break `created_at`
    /// ascending), then for each bid in order pick the highest-scoring
    /// feasible offer still open and reserve it.
    pub async fn sweep(&self) {
        self.sweep_matching().await;
        self.sweep_timeouts().await;
    }

    async fn sweep_matching(&self) {
        let now = self.clock.now();
        let mut bids: Vec<Bid> = {
            let state = self.state.read();
            state
                .bids
                .values()
                .filter(|b| b.state == BidState::Open && now < b.expires_at)
                .cloned()
                .collect()
        };
        bids.sort_by(|a, b| {
            b.max_price_per_hour
                .partial_cmp(&a.max_price_per_hour)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let mut created = Vec::new();
        for bid in bids {
            let reservation = {
                let mut state = self.state.write();
                // Re-check under the write guard: a bid earlier in this
                // same sweep (or a concurrent caller) may already have
                // claimed the only feasible offer.
                let Some(current_bid) = state.bids.get(&bid.id).cloned() else { continue };
                if current_bid.state != BidState::Open {
                    continue;
                }

                let best = state
                    .offers
                    .values()
                    .filter(|o| o.state == OfferState::Open && now < o.expires_at)
                    .filter(|o| feasible(&current_bid, o, now))
                    .map(|o| (score(&current_bid, o), o.id))
                    .max_by(|(s1, _), (s2, _)| s1.partial_cmp(s2).unwrap_or(std::cmp::Ordering::Equal));

                let Some((_, offer_id)) = best else { continue };
                let offer = state.offers.get(&offer_id).expect("just selected").clone();

                let window = MatchWindow {
                    start: current_bid.start_time,
                    end: current_bid.start_time + chrono::Duration::seconds(current_bid.duration_secs as i64),
                };
                // Agreed price: the offer's ask plus three quarters of the
                // headroom up to the bid's max (§4.E); feasible() already
                // guarantees max_price_per_hour >= price_per_hour.
                let agreed_price =
                    offer.price_per_hour + 0.75 * (current_bid.max_price_per_hour - offer.price_per_hour);
                let m = Match {
                    id: MatchId::new(),
                    bid_id: current_bid.id,
                    offer_id,
                    consumer_id: current_bid.consumer_id,
                    provider_id: offer.provider_id,
                    agreed_price,
                    window,
                    state: MatchState::Proposed,
                    created_at: now,
                    confirmed_at: None,
                };

                state.bids.get_mut(&current_bid.id).expect("checked above").state = BidState::Matched;
                state.offers.get_mut(&offer_id).expect("checked above").state = OfferState::Reserved;
                state.matches.insert(m.id, m.clone());
                Some(m)
            };

            if let Some(m) = reservation {
                created.push(m);
            }
        }

        for m in created {
            publish_event(self.bus.as_ref(), &DomainEvent::MatchCreated(m.clone())).await;
            if let Some(bid) = self.get_bid(m.bid_id) {
                publish_event(self.bus.as_ref(), &DomainEvent::BidMatched(bid)).await;
            }
            if let Some(offer) = self.get_offer(m.offer_id) {
                publish_event(self.bus.as_ref(), &DomainEvent::OfferReserved(offer)).await;
            }
        }
    }

    /// Expires `proposed` matches outstanding past `match_confirm_window`
    /// (§4.E "Timeouts"), plus offers/bids whose own `expires_at` has
    /// passed while still `open`.
    async fn sweep_timeouts(&self) {
        let now = self.clock.now();
        let stale_matches: Vec<MatchId> = {
            let state = self.state.read();
            state
                .matches
                .values()
                .filter(|m| !m.state.is_terminal() && m.state != MatchState::Active)
                .filter(|m| now - m.created_at >= self.match_confirm_window)
                .map(|m| m.id)
                .collect()
        };
        for id in stale_matches {
            self.expire_match_and_reopen(id).await;
        }

        let stale_bids: Vec<Bid> = {
            let mut state = self.state.write();
            let ids: Vec<BidId> = state
                .bids
                .values()
                .filter(|b| b.state == BidState::Open && now >= b.expires_at)
                .map(|b| b.id)
                .collect();
            ids.into_iter()
                .map(|id| {
                    let b = state.bids.get_mut(&id).expect("just selected");
                    b.state = BidState::Expired;
                    b.clone()
                })
                .collect()
        };
        for bid in stale_bids {
            publish_event(self.bus.as_ref(), &DomainEvent::BidExpired(bid)).await;
        }

        let stale_offers: Vec<Offer> = {
            let mut state = self.state.write();
            let ids: Vec<OfferId> = state
                .offers
                .values()
                .filter(|o| o.state == OfferState::Open && now >= o.expires_at)
                .map(|o| o.id)
                .collect();
            ids.into_iter()
                .map(|id| {
                    let o = state.offers.get_mut(&id).expect("just selected");
                    o.state = OfferState::Expired;
                    o.clone()
                })
                .collect()
        };
        for offer in stale_offers {
            // No dedicated `offer.expired` subject exists (§6); reuse
            // `offer.withdrawn` since both mean "no longer available".
            publish_event(self.bus.as_ref(), &DomainEvent::OfferWithdrawn(offer)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute_bus::InProcessBus;
    use compute_protocol::{Requirements, Sla};
    use compute_test_utils::ManualClock;

    fn matcher() -> (Arc<MarketplaceMatcher>, Arc<InProcessBus>, Arc<ManualClock>) {
        let bus = InProcessBus::new();
        let clock = Arc::new(ManualClock::starting_now());
        let matcher = MarketplaceMatcher::new(bus.clone(), clock.clone(), 300);
        (matcher, bus, clock)
    }

    fn offer_submission(price: f64) -> OfferSubmission {
        let now = Utc::now();
        OfferSubmission {
            provider_id: ProviderId::new(),
            agent_id: compute_protocol::AgentId::new(),
            resources: compute_protocol::ResourceVector::single("cpu", 8.0),
            price_per_hour: price,
            availability: Availability {
                start: now,
                end: now + chrono::Duration::hours(8),
                rrule: None,
            },
            min_duration_secs: 3600,
            max_duration_secs: 8 * 3600,
            features: ["us-west-1".to_string()].into_iter().collect(),
            sla_uptime: 0.999,
            ttl_secs: None,
        }
    }

    fn bid_submission(max_price: f64) -> BidSubmission {
        let now = Utc::now();
        BidSubmission {
            consumer_id: ConsumerId::new(),
            requirements: Requirements {
                cpu_cores: 4.0,
                memory_mb: 0.0,
                ..Default::default()
            },
            max_price_per_hour: max_price,
            start_time: now + chrono::Duration::hours(1),
            duration_secs: 4 * 3600,
            flex_window_secs: 0,
            preferred_regions: vec!["us-west-1".to_string()],
            ttl_secs: None,
        }
    }

    #[tokio::test]
    async fn matching_sweep_reserves_the_feasible_offer() {
        let (matcher, _bus, _clock) = matcher();
        matcher.create_offer(offer_submission(0.05)).await;
        let bid = matcher.create_bid(bid_submission(0.25)).await;

        matcher.sweep().await;

        let stored_bid = matcher.get_bid(bid.id).unwrap();
        assert_eq!(stored_bid.state, BidState::Matched);

        let matches: Vec<Match> = {
            let state = matcher.state.read();
            state.matches.values().cloned().collect()
        };
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].state, MatchState::Proposed);
    }

    #[tokio::test]
    async fn offer_ending_before_bid_window_is_never_matched() {
        let (matcher, _bus, _clock) = matcher();
        let mut submission = offer_submission(0.05);
        let now = Utc::now();
        submission.availability = Availability {
            start: now,
            end: now + chrono::Duration::minutes(30),
            rrule: None,
        };
        matcher.create_offer(submission).await;
        matcher.create_bid(bid_submission(0.25)).await;

        matcher.sweep().await;

        let matches_len = matcher.state.read().matches.len();
        assert_eq!(matches_len, 0);
    }

    #[tokio::test]
    async fn bid_max_price_exactly_equal_to_offer_price_is_feasible() {
        let (matcher, _bus, _clock) = matcher();
        matcher.create_offer(offer_submission(0.25)).await;
        let bid = matcher.create_bid(bid_submission(0.25)).await;

        matcher.sweep().await;

        assert_eq!(matcher.get_bid(bid.id).unwrap().state, BidState::Matched);
    }

    #[tokio::test]
    async fn confirmation_from_both_parties_activates_exactly_once() {
        let (matcher, bus, _clock) = matcher();
        matcher.create_offer(offer_submission(0.05)).await;
        matcher.create_bid(bid_submission(0.25)).await;
        matcher.sweep().await;

        let m = { matcher.state.read().matches.values().next().unwrap().clone() };

        let mut confirmed_events = compute_bus::subscribe_events(bus.as_ref(), "match.confirmed");

        let after_consumer = matcher.confirm_match(m.id, MatchParty::Consumer).await.unwrap();
        assert_eq!(after_consumer.state, MatchState::ConfirmedByConsumer);

        let after_provider = matcher.confirm_match(m.id, MatchParty::Provider).await.unwrap();
        assert_eq!(after_provider.state, MatchState::Active);

        // Duplicate confirm by the already-confirmed party is a no-op.
        let duplicate = matcher.confirm_match(m.id, MatchParty::Consumer).await.unwrap();
        assert_eq!(duplicate.state, MatchState::Active);

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), confirmed_events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(DomainEvent::MatchConfirmed(_))));

        let no_second_event = tokio::time::timeout(std::time::Duration::from_millis(50), confirmed_events.recv()).await;
        assert!(no_second_event.is_err(), "match.confirmed must fire exactly once");
    }

    #[tokio::test]
    async fn unconfirmed_match_times_out_and_reopens_both_sides() {
        let (matcher, _bus, clock) = matcher();
        matcher.create_offer(offer_submission(0.05)).await;
        matcher.create_bid(bid_submission(0.25)).await;
        matcher.sweep().await;

        let m = { matcher.state.read().matches.values().next().unwrap().clone() };

        clock.advance(chrono::Duration::seconds(301));
        matcher.sweep_timeouts().await;

        let stored = matcher.get_match(m.id).unwrap();
        assert_eq!(stored.state, MatchState::Expired);
        assert_eq!(matcher.get_bid(m.bid_id).unwrap().state, BidState::Open);
        assert_eq!(matcher.get_offer(m.offer_id).unwrap().state, OfferState::Open);
    }

    #[tokio::test]
    async fn zero_capacity_offer_never_matches() {
        let (matcher, _bus, _clock) = matcher();
        let mut submission = offer_submission(0.05);
        submission.resources = compute_protocol::ResourceVector::single("cpu", 0.0);
        matcher.create_offer(submission).await;
        matcher.create_bid(bid_submission(0.25)).await;

        matcher.sweep().await;

        assert_eq!(matcher.get_bid(matcher.list_bids(&BidFilter::default())[0].id).unwrap().state, BidState::Open);
    }

    #[tokio::test]
    async fn region_preference_excludes_non_matching_offers() {
        let (matcher, _bus, _clock) = matcher();
        let mut submission = offer_submission(0.05);
        submission.features = ["eu-central-1".to_string()].into_iter().collect();
        matcher.create_offer(submission).await;
        let bid = matcher.create_bid(bid_submission(0.25)).await;

        matcher.sweep().await;

        assert_eq!(matcher.get_bid(bid.id).unwrap().state, BidState::Open);
    }

    #[tokio::test]
    async fn sla_max_price_per_hour_unused_field_does_not_affect_feasibility() {
        // Guard against accidentally wiring Requirements::sla (job-side
        // SLA) into the bid/offer feasibility check instead of the bid's
        // own max_price_per_hour/preferred_regions (§3 distinguishes them).
        let (matcher, _bus, _clock) = matcher();
        matcher.create_offer(offer_submission(0.05)).await;
        let mut submission = bid_submission(0.25);
        submission.requirements.sla = Some(Sla {
            max_price_per_hour: 0.01,
            preferred_regions: vec!["unused-region".to_string()],
        });
        matcher.create_bid(submission).await;

        matcher.sweep().await;

        let matches_len = matcher.state.read().matches.len();
        assert_eq!(matches_len, 1);
    }
}
