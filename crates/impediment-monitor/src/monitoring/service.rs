use std::sync::Arc;
use std::time::Duration;

use super::certificates::CertificateTracker;
use super::checkers::SourceChecker;
use super::orchestrator::{OrchestratorSettings, VerificationOrchestrator};
use super::purge::PurgeCoordinator;
use super::status::MonitoringQueries;
use super::store::MonitoringStore;

/// Everything the HTTP surface and CLI need, wired over one store.
pub struct MonitoringService<S: ?Sized> {
    pub orchestrator: VerificationOrchestrator<S>,
    pub queries: MonitoringQueries<S>,
    pub certificates: CertificateTracker<S>,
    pub purge: PurgeCoordinator<S>,
}

impl<S> MonitoringService<S>
where
    S: MonitoringStore + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        checkers: Vec<Arc<dyn SourceChecker>>,
        settings: OrchestratorSettings,
        purge_ttl: Duration,
    ) -> Self {
        Self {
            orchestrator: VerificationOrchestrator::new(Arc::clone(&store), checkers, settings),
            queries: MonitoringQueries::new(Arc::clone(&store)),
            certificates: CertificateTracker::new(Arc::clone(&store)),
            purge: PurgeCoordinator::new(store, purge_ttl),
        }
    }
}
