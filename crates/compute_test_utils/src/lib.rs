//! Fixtures shared by every crate's test suite: a manual clock so
//! sweep/expiry tests don't sleep real wall-clock seconds, and builders for
//! the entities in `compute_protocol::types` with sane defaults so a test
//! only has to spell out the field(s) it cares about.

mod builders;
mod manual_clock;

pub use builders::{AgentBuilder, BidBuilder, JobBuilder, OfferBuilder};
pub use manual_clock::ManualClock;
