//! Injectable time source (§9 "no global singleton services" redesign
//! flag). Every component that schedules sweeps or checks expiry takes a
//! `Arc<dyn Clock>` by constructor argument instead of calling `Utc::now()`
//! directly, so tests can swap in a manual clock instead of sleeping real
//! wall-clock seconds to exercise lease/offline/match-timeout behavior.

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The production clock: wall-clock `Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
