use std::sync::Arc;

use marketplace::MarketplaceMatcher;
use resource_ledger::ResourceLedger;
use scheduler::Scheduler;

/// Shared handles every route closes over, grounded on the teacher's
/// `AxumAppState`: a thin bag of `Arc`s, no business logic of its own.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub marketplace: Arc<MarketplaceMatcher>,
    pub ledger: Arc<ResourceLedger>,
}
