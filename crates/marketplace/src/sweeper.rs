//! Periodic matching sweep (§4.E), run every `match_interval` (default 10s)
//! plus triggered immediately on bid submission via the matcher's internal
//! `Notify` handle. Same cancellable `tokio::time::interval` shape as
//! `scheduler::ScheduleSweeper` / `resource_ledger::LeaseReaper` /
//! `agent_registry::LivenessSweeper` (§9).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::MarketplaceMatcher;

pub struct MatchingSweeper {
    matcher: Arc<MarketplaceMatcher>,
    interval: Duration,
}

impl MatchingSweeper {
    pub fn new(matcher: Arc<MarketplaceMatcher>, interval: Duration) -> Self {
        Self { matcher, interval }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("matching sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.matcher.sweep().await;
                }
                _ = self.matcher.notify_handle().notified() => {
                    self.matcher.sweep().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute_bus::InProcessBus;
    use compute_protocol::{Availability, BidSubmission, ConsumerId, OfferSubmission, Requirements};
    use compute_test_utils::ManualClock;

    #[tokio::test]
    async fn immediate_notify_matches_without_waiting_for_the_tick() {
        let bus = InProcessBus::new();
        let clock = Arc::new(ManualClock::starting_now());
        let matcher = MarketplaceMatcher::new(bus.clone(), clock.clone(), 300);

        let now = chrono::Utc::now();
        matcher
            .create_offer(OfferSubmission {
                provider_id: compute_protocol::ProviderId::new(),
                agent_id: compute_protocol::AgentId::new(),
                resources: compute_protocol::ResourceVector::single("cpu", 8.0),
                price_per_hour: 0.05,
                availability: Availability { start: now, end: now + chrono::Duration::hours(8), rrule: None },
                min_duration_secs: 60,
                max_duration_secs: 8 * 3600,
                features: Default::default(),
                sla_uptime: 0.999,
                ttl_secs: None,
            })
            .await;

        let cancel = CancellationToken::new();
        let sweeper = MatchingSweeper::new(matcher.clone(), Duration::from_secs(3600));
        let handle = tokio::spawn(sweeper.run(cancel.clone()));

        let bid = matcher
            .create_bid(BidSubmission {
                consumer_id: ConsumerId::new(),
                requirements: Requirements { cpu_cores: 4.0, memory_mb: 0.0, ..Default::default() },
                max_price_per_hour: 0.25,
                start_time: now + chrono::Duration::hours(1),
                duration_secs: 3600,
                flex_window_secs: 0,
                preferred_regions: Vec::new(),
                ttl_secs: None,
            })
            .await;

        // The sweeper's interval is an hour; only the immediate `Notify`
        // from `create_bid` can possibly have matched this within the test.
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if matcher.get_bid(bid.id).unwrap().state == compute_protocol::BidState::Matched {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("bid should have been matched via the immediate notify path");

        cancel.cancel();
        handle.await.unwrap();
    }
}
