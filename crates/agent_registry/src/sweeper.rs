use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::AgentRegistry;

/// Periodic liveness sweep (§4.C): detects agents that have gone quiet and,
/// after the offline grace period, reclaims their allocations. Modeled as a
/// cancellable `tokio::time::interval` loop per the §9 redesign flag.
pub struct LivenessSweeper {
    registry: Arc<AgentRegistry>,
    interval: Duration,
    liveness_window: Duration,
    offline_grace: Duration,
}

impl LivenessSweeper {
    pub fn new(
        registry: Arc<AgentRegistry>,
        interval: Duration,
        liveness_window: Duration,
        offline_grace: Duration,
    ) -> Self {
        Self {
            registry,
            interval,
            liveness_window,
            offline_grace,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("agent liveness sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.registry
                        .sweep_liveness(self.liveness_window, self.offline_grace)
                        .await;
                }
            }
        }
    }
}
