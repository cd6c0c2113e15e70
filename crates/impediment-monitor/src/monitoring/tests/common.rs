use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::identifier::TaxId;
use crate::monitoring::checkers::{
    CompanyNameLookup, FailureReason, SourceChecker, SourceFailure, SourceResult,
};
use crate::monitoring::certificates::{Certificate, CertificateQuery, NewCertificate};
use crate::monitoring::domain::{
    Company, CompanyId, NewCompany, NewRejectedVerification, NewVerificationResult, PurgeSummary,
    RejectedVerification, ResultFilter, SourceKind, VerificationResult,
};
use crate::monitoring::memory::InMemoryMonitoringStore;
use crate::monitoring::orchestrator::{OrchestratorSettings, VerificationOrchestrator};
use crate::monitoring::service::MonitoringService;
use crate::monitoring::store::{MonitoringStore, StoreError};

pub(super) const ACME: &str = "11222333000181";
pub(super) const GLOBEX: &str = "11444777000161";

pub(super) fn tax_id(raw: &str) -> TaxId {
    TaxId::parse(raw).expect("valid identifier")
}

pub(super) fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        source_timeout: Duration::from_millis(200),
        per_source_concurrency: 2,
        batch_concurrency: 2,
        batch_pause: Duration::ZERO,
    }
}

pub(super) fn orchestrator<S>(
    store: Arc<S>,
    checkers: Vec<Arc<dyn SourceChecker>>,
) -> VerificationOrchestrator<S>
where
    S: MonitoringStore + ?Sized,
{
    VerificationOrchestrator::new(store, checkers, settings())
}

pub(super) fn service(
    store: Arc<InMemoryMonitoringStore>,
    checkers: Vec<Arc<dyn SourceChecker>>,
) -> Arc<MonitoringService<InMemoryMonitoringStore>> {
    Arc::new(MonitoringService::new(
        store,
        checkers,
        settings(),
        Duration::from_secs(60),
    ))
}

pub(super) async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Checker returning a fixed outcome and counting calls.
pub(super) struct ScriptedChecker {
    kind: SourceKind,
    outcome: Result<SourceResult, SourceFailure>,
    calls: AtomicUsize,
}

impl ScriptedChecker {
    pub(super) fn regular(kind: SourceKind) -> Arc<Self> {
        Self::with(kind, Ok(SourceResult::regular("Regular")))
    }

    pub(super) fn irregular(kind: SourceKind, detail: &str) -> Arc<Self> {
        Self::with(kind, Ok(SourceResult::irregular(detail)))
    }

    pub(super) fn failing(kind: SourceKind, reason: FailureReason) -> Arc<Self> {
        Self::with(kind, Err(SourceFailure::new(reason, "scripted failure")))
    }

    pub(super) fn with(
        kind: SourceKind,
        outcome: Result<SourceResult, SourceFailure>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceChecker for ScriptedChecker {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn check(&self, _identifier: &TaxId) -> Result<SourceResult, SourceFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Checker that never answers within the test timeout.
pub(super) struct StalledChecker(pub(super) SourceKind);

#[async_trait]
impl SourceChecker for StalledChecker {
    fn kind(&self) -> SourceKind {
        self.0
    }

    async fn check(&self, _identifier: &TaxId) -> Result<SourceResult, SourceFailure> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(SourceResult::regular("too late"))
    }
}

pub(super) struct PanickingChecker(pub(super) SourceKind);

#[async_trait]
impl SourceChecker for PanickingChecker {
    fn kind(&self) -> SourceKind {
        self.0
    }

    async fn check(&self, _identifier: &TaxId) -> Result<SourceResult, SourceFailure> {
        panic!("scraper crashed");
    }
}

/// Regular checker that flips to irregular after the first call.
pub(super) struct FlippingChecker {
    kind: SourceKind,
    calls: AtomicUsize,
}

impl FlippingChecker {
    pub(super) fn new(kind: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SourceChecker for FlippingChecker {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn check(&self, _identifier: &TaxId) -> Result<SourceResult, SourceFailure> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(SourceResult::regular("Regular"))
        } else {
            Ok(SourceResult::irregular("Sanction: Suspensão"))
        }
    }
}

/// Delegates to an in-memory store but reports unseen identifiers for the first
/// `blind_reads` lookups, the way concurrent first-time resolutions observe the store.
/// A lookup right after a rejected insert always sees the committed row.
pub(super) struct BlindReadStore {
    pub(super) inner: InMemoryMonitoringStore,
    blind_reads: AtomicUsize,
    conflict_seen: AtomicBool,
}

impl BlindReadStore {
    pub(super) fn new(blind_reads: usize) -> Self {
        Self {
            inner: InMemoryMonitoringStore::default(),
            blind_reads: AtomicUsize::new(blind_reads),
            conflict_seen: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MonitoringStore for BlindReadStore {
    async fn insert_company(&self, company: NewCompany) -> Result<Company, StoreError> {
        let outcome = self.inner.insert_company(company).await;
        if matches!(outcome, Err(StoreError::Conflict)) {
            self.conflict_seen.store(true, Ordering::SeqCst);
        }
        outcome
    }

    async fn find_company_by_identifier(
        &self,
        identifier: &TaxId,
    ) -> Result<Option<Company>, StoreError> {
        let rereading = self.conflict_seen.swap(false, Ordering::SeqCst);
        let blind = !rereading
            && self
                .blind_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
        if blind {
            return Ok(None);
        }
        self.inner.find_company_by_identifier(identifier).await
    }

    async fn list_companies(&self) -> Result<Vec<Company>, StoreError> {
        self.inner.list_companies().await
    }

    async fn update_company_name(
        &self,
        id: CompanyId,
        expected: &str,
        name: &str,
    ) -> Result<Option<Company>, StoreError> {
        self.inner.update_company_name(id, expected, name).await
    }

    async fn insert_verification_result(
        &self,
        result: NewVerificationResult,
    ) -> Result<VerificationResult, StoreError> {
        self.inner.insert_verification_result(result).await
    }

    async fn list_verification_results(
        &self,
        company_id: CompanyId,
        filter: ResultFilter,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        self.inner.list_verification_results(company_id, filter).await
    }

    async fn list_results_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        self.inner.list_results_since(since).await
    }

    async fn insert_rejected_verification(
        &self,
        rejection: NewRejectedVerification,
    ) -> Result<RejectedVerification, StoreError> {
        self.inner.insert_rejected_verification(rejection).await
    }

    async fn list_rejected_verifications(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RejectedVerification>, StoreError> {
        self.inner.list_rejected_verifications(since).await
    }

    async fn insert_certificate(
        &self,
        certificate: NewCertificate,
    ) -> Result<Certificate, StoreError> {
        self.inner.insert_certificate(certificate).await
    }

    async fn list_certificates(
        &self,
        query: CertificateQuery,
    ) -> Result<Vec<Certificate>, StoreError> {
        self.inner.list_certificates(query).await
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<PurgeSummary, StoreError> {
        self.inner.purge(cutoff).await
    }
}

/// Rejects result and rejected-run writes for one source kind; everything else is
/// delegated.
pub(super) struct RejectingResultsStore {
    pub(super) inner: InMemoryMonitoringStore,
    pub(super) rejected: SourceKind,
}

#[async_trait]
impl MonitoringStore for RejectingResultsStore {
    async fn insert_company(&self, company: NewCompany) -> Result<Company, StoreError> {
        self.inner.insert_company(company).await
    }

    async fn find_company_by_identifier(
        &self,
        identifier: &TaxId,
    ) -> Result<Option<Company>, StoreError> {
        self.inner.find_company_by_identifier(identifier).await
    }

    async fn list_companies(&self) -> Result<Vec<Company>, StoreError> {
        self.inner.list_companies().await
    }

    async fn update_company_name(
        &self,
        id: CompanyId,
        expected: &str,
        name: &str,
    ) -> Result<Option<Company>, StoreError> {
        self.inner.update_company_name(id, expected, name).await
    }

    async fn insert_verification_result(
        &self,
        result: NewVerificationResult,
    ) -> Result<VerificationResult, StoreError> {
        if result.source_kind == self.rejected {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.insert_verification_result(result).await
    }

    async fn list_verification_results(
        &self,
        company_id: CompanyId,
        filter: ResultFilter,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        self.inner.list_verification_results(company_id, filter).await
    }

    async fn list_results_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        self.inner.list_results_since(since).await
    }

    async fn insert_rejected_verification(
        &self,
        rejection: NewRejectedVerification,
    ) -> Result<RejectedVerification, StoreError> {
        if rejection.source_kind == self.rejected {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.insert_rejected_verification(rejection).await
    }

    async fn list_rejected_verifications(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RejectedVerification>, StoreError> {
        self.inner.list_rejected_verifications(since).await
    }

    async fn insert_certificate(
        &self,
        certificate: NewCertificate,
    ) -> Result<Certificate, StoreError> {
        self.inner.insert_certificate(certificate).await
    }

    async fn list_certificates(
        &self,
        query: CertificateQuery,
    ) -> Result<Vec<Certificate>, StoreError> {
        self.inner.list_certificates(query).await
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<PurgeSummary, StoreError> {
        self.inner.purge(cutoff).await
    }
}

/// Store whose every call fails, as when the table service is unreachable.
pub(super) struct UnreachableStore;

fn unreachable() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl MonitoringStore for UnreachableStore {
    async fn insert_company(&self, _company: NewCompany) -> Result<Company, StoreError> {
        Err(unreachable())
    }

    async fn find_company_by_identifier(
        &self,
        _identifier: &TaxId,
    ) -> Result<Option<Company>, StoreError> {
        Err(unreachable())
    }

    async fn list_companies(&self) -> Result<Vec<Company>, StoreError> {
        Err(unreachable())
    }

    async fn update_company_name(
        &self,
        _id: CompanyId,
        _expected: &str,
        _name: &str,
    ) -> Result<Option<Company>, StoreError> {
        Err(unreachable())
    }

    async fn insert_verification_result(
        &self,
        _result: NewVerificationResult,
    ) -> Result<VerificationResult, StoreError> {
        Err(unreachable())
    }

    async fn list_verification_results(
        &self,
        _company_id: CompanyId,
        _filter: ResultFilter,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        Err(unreachable())
    }

    async fn list_results_since(
        &self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        Err(unreachable())
    }

    async fn insert_rejected_verification(
        &self,
        _rejection: NewRejectedVerification,
    ) -> Result<RejectedVerification, StoreError> {
        Err(unreachable())
    }

    async fn list_rejected_verifications(
        &self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<RejectedVerification>, StoreError> {
        Err(unreachable())
    }

    async fn insert_certificate(
        &self,
        _certificate: NewCertificate,
    ) -> Result<Certificate, StoreError> {
        Err(unreachable())
    }

    async fn list_certificates(
        &self,
        _query: CertificateQuery,
    ) -> Result<Vec<Certificate>, StoreError> {
        Err(unreachable())
    }

    async fn purge(&self, _cutoff: DateTime<Utc>) -> Result<PurgeSummary, StoreError> {
        Err(unreachable())
    }
}

/// Name lookup answering from a fixed table.
pub(super) struct TableLookup(
    pub(super) Vec<(&'static str, Result<Option<&'static str>, FailureReason>)>,
);

#[async_trait]
impl CompanyNameLookup for TableLookup {
    async fn lookup_name(&self, identifier: &TaxId) -> Result<Option<String>, SourceFailure> {
        match self.0.iter().find(|(id, _)| *id == identifier.as_str()) {
            Some((_, Ok(name))) => Ok(name.map(str::to_string)),
            Some((_, Err(reason))) => Err(SourceFailure::new(*reason, "lookup failed")),
            None => Ok(None),
        }
    }
}
