use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::certificates::{Certificate, CertificateQuery, NewCertificate};
use super::domain::{
    Company, CompanyId, NewCompany, NewRejectedVerification, NewVerificationResult, PurgeSummary,
    RejectedVerification, ResultFilter, VerificationResult,
};
use crate::identifier::TaxId;

/// Persistence boundary for companies and their verification history.
///
/// Every call may cross the network, so every call can fail with [`StoreError`].
#[async_trait]
pub trait MonitoringStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the identifier is already registered.
    async fn insert_company(&self, company: NewCompany) -> Result<Company, StoreError>;

    async fn find_company_by_identifier(
        &self,
        identifier: &TaxId,
    ) -> Result<Option<Company>, StoreError>;

    async fn list_companies(&self) -> Result<Vec<Company>, StoreError>;

    /// Compare-and-set rename: only applies while the stored name equals `expected`.
    /// Returns `None` when the guard did not match.
    async fn update_company_name(
        &self,
        id: CompanyId,
        expected: &str,
        name: &str,
    ) -> Result<Option<Company>, StoreError>;

    async fn insert_verification_result(
        &self,
        result: NewVerificationResult,
    ) -> Result<VerificationResult, StoreError>;

    /// History of one company ordered by `checked_at`, then insertion order.
    async fn list_verification_results(
        &self,
        company_id: CompanyId,
        filter: ResultFilter,
    ) -> Result<Vec<VerificationResult>, StoreError>;

    /// Results of every company checked at or after `since`, ordered like
    /// [`MonitoringStore::list_verification_results`].
    async fn list_results_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VerificationResult>, StoreError>;

    async fn insert_rejected_verification(
        &self,
        rejection: NewRejectedVerification,
    ) -> Result<RejectedVerification, StoreError>;

    /// Rejected runs recorded at or after `since`, oldest first.
    async fn list_rejected_verifications(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RejectedVerification>, StoreError>;

    async fn insert_certificate(
        &self,
        certificate: NewCertificate,
    ) -> Result<Certificate, StoreError>;

    /// Ordered by `valid_until` descending, then insertion order.
    async fn list_certificates(
        &self,
        query: CertificateQuery,
    ) -> Result<Vec<Certificate>, StoreError>;

    /// Removes results and rejected runs recorded at or before `cutoff` and certificates
    /// that lapsed before `cutoff`'s date, then companies created at or before `cutoff`
    /// that no longer own a result or a certificate.
    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<PurgeSummary, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("store returned malformed data: {0}")]
    Malformed(String),
}
