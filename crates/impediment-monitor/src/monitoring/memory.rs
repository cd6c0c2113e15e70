use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::certificates::{Certificate, CertificateQuery, NewCertificate};
use super::domain::{
    Company, CompanyId, NewCompany, NewRejectedVerification, NewVerificationResult, PurgeSummary,
    RejectedVerification, ResultFilter, VerificationResult,
};
use super::store::{MonitoringStore, StoreError};
use crate::identifier::TaxId;

/// Process-local store backing tests and the `memory` backend.
#[derive(Default, Clone)]
pub struct InMemoryMonitoringStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    companies: BTreeMap<CompanyId, Company>,
    results: Vec<VerificationResult>,
    rejections: Vec<RejectedVerification>,
    certificates: Vec<Certificate>,
    next_company_id: i64,
    next_result_id: i64,
    next_rejection_id: i64,
    next_certificate_id: i64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Timestamps handed out by this store are strictly increasing.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(stamp);
        stamp
    }
}

impl InMemoryMonitoringStore {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn company_count(&self) -> usize {
        self.state().companies.len()
    }

    pub fn result_count(&self) -> usize {
        self.state().results.len()
    }

    pub fn rejection_count(&self) -> usize {
        self.state().rejections.len()
    }
}

#[async_trait]
impl MonitoringStore for InMemoryMonitoringStore {
    async fn insert_company(&self, company: NewCompany) -> Result<Company, StoreError> {
        let mut state = self.state();
        if state
            .companies
            .values()
            .any(|existing| existing.identifier == company.identifier)
        {
            return Err(StoreError::Conflict);
        }

        state.next_company_id += 1;
        let created_at = state.tick();
        let record = Company {
            id: CompanyId(state.next_company_id),
            identifier: company.identifier,
            display_name: company.display_name,
            contract_reference: company.contract_reference,
            created_at,
        };
        state.companies.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_company_by_identifier(
        &self,
        identifier: &TaxId,
    ) -> Result<Option<Company>, StoreError> {
        Ok(self
            .state()
            .companies
            .values()
            .find(|company| &company.identifier == identifier)
            .cloned())
    }

    async fn list_companies(&self) -> Result<Vec<Company>, StoreError> {
        Ok(self.state().companies.values().cloned().collect())
    }

    async fn update_company_name(
        &self,
        id: CompanyId,
        expected: &str,
        name: &str,
    ) -> Result<Option<Company>, StoreError> {
        let mut state = self.state();
        match state.companies.get_mut(&id) {
            Some(company) if company.display_name == expected => {
                company.display_name = name.to_string();
                Ok(Some(company.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_verification_result(
        &self,
        result: NewVerificationResult,
    ) -> Result<VerificationResult, StoreError> {
        let mut state = self.state();
        if !state.companies.contains_key(&result.company_id) {
            return Err(StoreError::Rejected {
                status: 409,
                message: format!("company {} does not exist", result.company_id),
            });
        }

        state.next_result_id += 1;
        let checked_at = state.tick();
        let record = VerificationResult {
            id: state.next_result_id,
            company_id: result.company_id,
            source_kind: result.source_kind,
            regular: result.regular,
            detail: result.detail,
            checked_at,
        };
        state.results.push(record.clone());
        Ok(record)
    }

    async fn list_verification_results(
        &self,
        company_id: CompanyId,
        filter: ResultFilter,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        Ok(self
            .state()
            .results
            .iter()
            .filter(|result| result.company_id == company_id && filter.matches(result))
            .cloned()
            .collect())
    }

    async fn list_results_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        Ok(self
            .state()
            .results
            .iter()
            .filter(|result| result.checked_at >= since)
            .cloned()
            .collect())
    }

    async fn insert_rejected_verification(
        &self,
        rejection: NewRejectedVerification,
    ) -> Result<RejectedVerification, StoreError> {
        let mut state = self.state();
        state.next_rejection_id += 1;
        let checked_at = state.tick();
        let record = RejectedVerification {
            id: state.next_rejection_id,
            raw_identifier: rejection.raw_identifier,
            source_kind: rejection.source_kind,
            reason: rejection.reason,
            detail: rejection.detail,
            checked_at,
        };
        state.rejections.push(record.clone());
        Ok(record)
    }

    async fn list_rejected_verifications(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RejectedVerification>, StoreError> {
        Ok(self
            .state()
            .rejections
            .iter()
            .filter(|rejection| rejection.checked_at >= since)
            .cloned()
            .collect())
    }

    async fn insert_certificate(
        &self,
        certificate: NewCertificate,
    ) -> Result<Certificate, StoreError> {
        let mut state = self.state();
        if !state.companies.contains_key(&certificate.company_id) {
            return Err(StoreError::Rejected {
                status: 409,
                message: format!("company {} does not exist", certificate.company_id),
            });
        }

        state.next_certificate_id += 1;
        let created_at = state.tick();
        let record = Certificate {
            id: state.next_certificate_id,
            company_id: certificate.company_id,
            kind: certificate.kind,
            number: certificate.number,
            issued_on: certificate.issued_on,
            valid_until: certificate.valid_until,
            document_ref: certificate.document_ref,
            created_at,
        };
        state.certificates.push(record.clone());
        Ok(record)
    }

    async fn list_certificates(
        &self,
        query: CertificateQuery,
    ) -> Result<Vec<Certificate>, StoreError> {
        let mut certificates: Vec<Certificate> = self
            .state()
            .certificates
            .iter()
            .filter(|certificate| query.matches(certificate))
            .cloned()
            .collect();
        certificates.sort_by(|a, b| {
            b.valid_until
                .cmp(&a.valid_until)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(certificates)
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<PurgeSummary, StoreError> {
        let mut state = self.state();

        let before = state.results.len();
        state.results.retain(|result| result.checked_at > cutoff);
        let results_removed = (before - state.results.len()) as u64;

        let before = state.rejections.len();
        state
            .rejections
            .retain(|rejection| rejection.checked_at > cutoff);
        let rejections_removed = (before - state.rejections.len()) as u64;

        let cutoff_day = cutoff.date_naive();
        let before = state.certificates.len();
        state
            .certificates
            .retain(|certificate| certificate.valid_until >= cutoff_day);
        let certificates_removed = (before - state.certificates.len()) as u64;

        let owners: HashSet<CompanyId> = state
            .results
            .iter()
            .map(|result| result.company_id)
            .chain(
                state
                    .certificates
                    .iter()
                    .map(|certificate| certificate.company_id),
            )
            .collect();
        let before = state.companies.len();
        state
            .companies
            .retain(|id, company| company.created_at > cutoff || owners.contains(id));
        let companies_removed = (before - state.companies.len()) as u64;

        Ok(PurgeSummary {
            companies_removed,
            results_removed,
            rejections_removed,
            certificates_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::certificates::CertificateKind;
    use crate::monitoring::domain::SourceKind;
    use chrono::NaiveDate;

    fn tax_id() -> TaxId {
        TaxId::parse("11222333000181").expect("valid")
    }

    #[tokio::test]
    async fn duplicate_identifier_conflicts() {
        let store = InMemoryMonitoringStore::default();
        store
            .insert_company(NewCompany::placeholder(tax_id()))
            .await
            .expect("first insert");

        match store.insert_company(NewCompany::placeholder(tax_id())).await {
            Err(StoreError::Conflict) => {}
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.company_count(), 1);
    }

    #[tokio::test]
    async fn rename_only_applies_when_guard_matches() {
        let store = InMemoryMonitoringStore::default();
        let company = store
            .insert_company(NewCompany::placeholder(tax_id()))
            .await
            .expect("insert");

        let renamed = store
            .update_company_name(company.id, "someone else", "ACME")
            .await
            .expect("update call");
        assert!(renamed.is_none());

        let renamed = store
            .update_company_name(company.id, &company.display_name, "ACME")
            .await
            .expect("update call")
            .expect("guard matched");
        assert_eq!(renamed.display_name, "ACME");
    }

    #[tokio::test]
    async fn results_for_unknown_company_are_rejected() {
        let store = InMemoryMonitoringStore::default();
        let result = store
            .insert_verification_result(NewVerificationResult {
                company_id: CompanyId(42),
                source_kind: SourceKind::Ceis,
                regular: true,
                detail: "Regular".to_string(),
            })
            .await;
        assert!(matches!(result, Err(StoreError::Rejected { .. })));
    }

    #[tokio::test]
    async fn purge_keeps_rows_written_after_cutoff() {
        let store = InMemoryMonitoringStore::default();
        let old = store
            .insert_company(NewCompany::placeholder(tax_id()))
            .await
            .expect("insert");
        store
            .insert_verification_result(NewVerificationResult {
                company_id: old.id,
                source_kind: SourceKind::Ceis,
                regular: true,
                detail: "Regular".to_string(),
            })
            .await
            .expect("result");

        let cutoff = Utc::now() + Duration::seconds(1);
        let summary = store.purge(cutoff).await.expect("purge");
        assert_eq!(summary.companies_removed, 1);
        assert_eq!(summary.results_removed, 1);

        let late = store
            .insert_company(NewCompany::placeholder(tax_id()))
            .await
            .expect("insert again");
        let summary = store
            .purge(late.created_at - Duration::microseconds(1))
            .await
            .expect("purge");
        assert_eq!(summary, PurgeSummary::default());
        assert_eq!(store.company_count(), 1);
    }

    #[tokio::test]
    async fn purge_drops_old_rejections_and_lapsed_certificates() {
        let store = InMemoryMonitoringStore::default();
        store
            .insert_rejected_verification(NewRejectedVerification {
                raw_identifier: "123".to_string(),
                source_kind: SourceKind::Ceis,
                reason: "too short".to_string(),
                detail: "invalid identifier, not checked".to_string(),
            })
            .await
            .expect("rejection");
        let company = store
            .insert_company(NewCompany::placeholder(tax_id()))
            .await
            .expect("insert");
        let far_future = NaiveDate::from_ymd_opt(2999, 1, 1).expect("date");
        for valid_until in [NaiveDate::from_ymd_opt(2000, 1, 1).expect("date"), far_future] {
            store
                .insert_certificate(NewCertificate {
                    company_id: company.id,
                    kind: CertificateKind::Federal,
                    number: "A-1".to_string(),
                    issued_on: NaiveDate::from_ymd_opt(1999, 1, 1).expect("date"),
                    valid_until,
                    document_ref: None,
                })
                .await
                .expect("certificate");
        }

        let summary = store
            .purge(Utc::now() + Duration::seconds(1))
            .await
            .expect("purge");
        assert_eq!(summary.rejections_removed, 1);
        assert_eq!(summary.certificates_removed, 1);
        assert_eq!(summary.companies_removed, 0);
        assert_eq!(store.rejection_count(), 0);

        let remaining = store
            .list_certificates(CertificateQuery::default())
            .await
            .expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].valid_until, far_future);
    }

    #[tokio::test]
    async fn certificates_for_unknown_company_are_rejected() {
        let store = InMemoryMonitoringStore::default();
        let result = store
            .insert_certificate(NewCertificate {
                company_id: CompanyId(7),
                kind: CertificateKind::Fgts,
                number: "1".to_string(),
                issued_on: NaiveDate::from_ymd_opt(2025, 1, 1).expect("date"),
                valid_until: NaiveDate::from_ymd_opt(2025, 6, 1).expect("date"),
                document_ref: None,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Rejected { .. })));
    }
}
