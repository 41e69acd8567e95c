//! Periodic scheduling sweep (§4.D step 4), run every `schedule_interval`
//! (default 5s) plus triggered immediately on submit via the scheduler's
//! internal `Notify` handle. Modeled as a cancellable `tokio::time::interval`
//! loop per the §9 "sweep loops with an explicit cancellation token"
//! redesign flag, the same shape as `resource_ledger::LeaseReaper` and
//! `agent_registry::LivenessSweeper`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::Scheduler;

pub struct ScheduleSweeper {
    scheduler: Arc<Scheduler>,
    interval: Duration,
}

impl ScheduleSweeper {
    pub fn new(scheduler: Arc<Scheduler>, interval: Duration) -> Self {
        Self { scheduler, interval }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("scheduling sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.scheduler.sweep().await;
                }
                _ = self.scheduler.notify_handle().notified() => {
                    // An immediate attempt was requested (job submitted or
                    // requeued); the next tick still runs on schedule.
                    self.scheduler.sweep().await;
                }
            }
        }
    }
}
