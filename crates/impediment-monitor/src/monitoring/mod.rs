//! Impediment monitoring: company registry, source checkers, orchestration, and history.

pub mod batch;
pub mod certificates;
pub mod checkers;
pub mod domain;
pub mod memory;
pub mod orchestrator;
pub mod purge;
pub mod registry;
pub mod rest;
pub mod router;
pub mod service;
pub mod sources;
pub mod status;
pub mod store;

#[cfg(test)]
mod tests;

pub use batch::{BatchInput, BatchInputError, BatchItem};
pub use certificates::{
    Certificate, CertificateError, CertificateFilter, CertificateKind, CertificateRequest,
    CertificateStatus, CertificateTracker, CertificateView, CompanyCertificates,
    ExpiringCertificate, StatusFilter, UnknownStatusFilter, DEFAULT_EXPIRY_WINDOW_DAYS,
};
pub use checkers::{
    CompanyNameLookup, FailureReason, NotImplementedChecker, PublicRegistryLookup, SourceChecker,
    SourceFailure, SourceResult,
};
pub use domain::{
    aggregate_verdict, Company, CompanyId, NewCompany, PurgeSummary, RejectedVerification,
    ResultFilter, SourceKind, VerificationResult, PENDING_LOOKUP_NAME,
};
pub use memory::InMemoryMonitoringStore;
pub use orchestrator::{
    BatchOutcome, OrchestratorFailure, OrchestratorSettings, SourceReport, VerificationOrchestrator,
    VerificationReport, VerificationState,
};
pub use purge::{PurgeCoordinator, PurgeError, PurgeRequest};
pub use registry::{CompanyRegistry, RegistryError};
pub use rest::RestTableStore;
pub use router::monitoring_router;
pub use service::MonitoringService;
pub use sources::{build_checkers, CheckerBuildError};
pub use status::{CompanyStatus, ImpededCompany, MonitoringQueries, QueryError};
pub use store::{MonitoringStore, StoreError};
