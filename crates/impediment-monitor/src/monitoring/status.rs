//! Read-side views over the verification history: current status, history, alert feed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    aggregate_verdict, Company, CompanyId, RejectedVerification, ResultFilter, SourceKind,
    VerificationResult,
};
use super::store::{MonitoringStore, StoreError};
use crate::identifier::{InvalidIdentifier, TaxId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyStatus {
    pub company: Company,
    /// Aggregate over the latest result of every source ever checked.
    pub regular: bool,
    pub sources: Vec<VerificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// One entry of the alert feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpededCompany {
    pub company: Company,
    pub irregular_sources: Vec<VerificationResult>,
    pub last_checked_at: DateTime<Utc>,
}

/// Latest result per source, ties broken by insertion order (`id`).
pub fn latest_per_source<'a, I>(results: I) -> Vec<VerificationResult>
where
    I: IntoIterator<Item = &'a VerificationResult>,
{
    let mut latest: BTreeMap<SourceKind, &VerificationResult> = BTreeMap::new();
    for result in results {
        let newer = latest.get(&result.source_kind).map_or(true, |current| {
            (result.checked_at, result.id) > (current.checked_at, current.id)
        });
        if newer {
            latest.insert(result.source_kind, result);
        }
    }
    latest.into_values().cloned().collect()
}

pub struct MonitoringQueries<S: ?Sized> {
    store: Arc<S>,
}

impl<S> MonitoringQueries<S>
where
    S: MonitoringStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn current_status(&self, raw_identifier: &str) -> Result<CompanyStatus, QueryError> {
        let company = self.company(raw_identifier).await?;
        let history = self
            .store
            .list_verification_results(company.id, ResultFilter::default())
            .await?;
        let sources = latest_per_source(&history);

        Ok(CompanyStatus {
            regular: aggregate_verdict(sources.iter().map(|result| result.regular)),
            last_checked_at: sources.iter().map(|result| result.checked_at).max(),
            company,
            sources,
        })
    }

    pub async fn history(
        &self,
        raw_identifier: &str,
        filter: ResultFilter,
    ) -> Result<Vec<VerificationResult>, QueryError> {
        let company = self.company(raw_identifier).await?;
        Ok(self
            .store
            .list_verification_results(company.id, filter)
            .await?)
    }

    /// Companies whose current status, among sources checked since `since`, has an
    /// irregular source. Most recently checked first.
    pub async fn impeded_companies(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ImpededCompany>, QueryError> {
        let recent = self.store.list_results_since(since).await?;

        let mut by_company: HashMap<CompanyId, Vec<VerificationResult>> = HashMap::new();
        for result in recent {
            by_company.entry(result.company_id).or_default().push(result);
        }
        if by_company.is_empty() {
            return Ok(Vec::new());
        }

        let companies: HashMap<CompanyId, Company> = self
            .store
            .list_companies()
            .await?
            .into_iter()
            .map(|company| (company.id, company))
            .collect();

        let mut impeded: Vec<ImpededCompany> = by_company
            .into_iter()
            .filter_map(|(company_id, results)| {
                let latest = latest_per_source(&results);
                let last_checked_at = latest.iter().map(|result| result.checked_at).max()?;
                let irregular_sources: Vec<VerificationResult> =
                    latest.into_iter().filter(|result| !result.regular).collect();
                if irregular_sources.is_empty() {
                    return None;
                }
                let company = companies.get(&company_id)?.clone();
                Some(ImpededCompany {
                    company,
                    irregular_sources,
                    last_checked_at,
                })
            })
            .collect();

        impeded.sort_by(|a, b| {
            b.last_checked_at
                .cmp(&a.last_checked_at)
                .then_with(|| a.company.id.cmp(&b.company.id))
        });
        Ok(impeded)
    }

    /// Runs refused for an invalid identifier since `since`. Kept apart from company
    /// history, which only ever holds checked identifiers.
    pub async fn rejected_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RejectedVerification>, QueryError> {
        Ok(self.store.list_rejected_verifications(since).await?)
    }

    async fn company(&self, raw_identifier: &str) -> Result<Company, QueryError> {
        let identifier = TaxId::parse(raw_identifier)?;
        self.store
            .find_company_by_identifier(&identifier)
            .await?
            .ok_or(QueryError::UnknownCompany(identifier))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),
    #[error("company {0} is not registered")]
    UnknownCompany(TaxId),
    #[error(transparent)]
    Store(#[from] StoreError),
}
