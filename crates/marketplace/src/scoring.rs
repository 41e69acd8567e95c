//! Feasibility and scoring for one (bid, offer) pair (§4.E).
//!
//! Region is not a dedicated field on `Offer` — it is carried in
//! `offer.features` (the same convention `OfferBuilder::region_feature`
//! already uses in tests), so "preferred region" matching and "required
//! capability" matching both reduce to a features-set lookup.

use chrono::{DateTime, Utc};
use compute_protocol::{Bid, Offer};

/// True if `offer` can satisfy `bid`'s resource, price, window, region and
/// capability constraints. Does not consider whether `offer`/`bid` are
/// still `open` — callers check that separately under the write lock so
/// the feasibility check itself stays a pure function of the two entities.
pub fn feasible(bid: &Bid, offer: &Offer, now: DateTime<Utc>) -> bool {
    let _ = now; // expiry is checked by the caller against each entity's own clock reading
    if !offer.resources.satisfies(&bid.requirements.as_vector()) {
        return false;
    }
    if offer.price_per_hour > bid.max_price_per_hour {
        return false;
    }
    let window_end = bid.start_time + chrono::Duration::seconds(bid.duration_secs as i64);
    if !offer.availability.contains(bid.start_time, window_end) {
        return false;
    }
    let duration = bid.duration_secs;
    if duration < offer.min_duration_secs || duration > offer.max_duration_secs {
        return false;
    }
    if !bid.preferred_regions.is_empty()
        && !bid.preferred_regions.iter().any(|r| offer.features.contains(r))
    {
        return false;
    }
    if !bid.requirements.capabilities.is_subset(&offer.features) {
        return false;
    }
    true
}

/// Multiplicative score, base 100 (§4.E): price headroom dominates, with
/// bonuses for region affinity, spare capability overlap and SLA, and a
/// penalty for grossly over-provisioning the bid's CPU ask.
pub fn score(bid: &Bid, offer: &Offer) -> f64 {
    let max_price = bid.max_price_per_hour.max(f64::EPSILON);
    let price_factor = (2.0 - offer.price_per_hour / max_price).max(0.0);
    let mut score = 100.0 * price_factor;

    if !bid.preferred_regions.is_empty()
        && bid.preferred_regions.iter().any(|r| offer.features.contains(r))
    {
        score *= 1.2;
    }

    let required_cpu = bid.requirements.cpu_cores;
    if required_cpu > 0.0 {
        let offered_cpu = offer.resources.get("cpu");
        if (offered_cpu - required_cpu) / required_cpu > 0.5 {
            score *= 0.9;
        }
    }

    let extra_features = offer.features.intersection(&bid.requirements.capabilities).count();
    if extra_features > 0 {
        score *= 1.0 + 0.05 * extra_features as f64;
    }

    if offer.sla_uptime >= 0.999 {
        score *= 1.1;
    }

    score
}
