pub mod allocations;
pub mod bids;
pub mod jobs;
pub mod matches;
pub mod offers;
pub mod resources;
