//! Clearance certificates held per company and tracking of their expiry.
//!
//! A certificate is valid on any day up to and including `valid_until`. Status is always
//! derived from the date it is asked about, never stored.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{Company, CompanyId};
use super::registry::{CompanyRegistry, RegistryError};
use super::store::{MonitoringStore, StoreError};
use crate::identifier::{InvalidIdentifier, TaxId};

pub const DEFAULT_EXPIRY_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CertificateKind {
    #[serde(rename = "FGTS")]
    Fgts,
    #[serde(rename = "FEDERAL")]
    Federal,
    #[serde(rename = "STATE")]
    State,
    #[serde(rename = "MUNICIPAL")]
    Municipal,
    #[serde(rename = "LABOR")]
    Labor,
}

impl CertificateKind {
    pub const fn all() -> [Self; 5] {
        [
            Self::Fgts,
            Self::Federal,
            Self::State,
            Self::Municipal,
            Self::Labor,
        ]
    }

    pub const fn tag(self) -> &'static str {
        match self {
            Self::Fgts => "FGTS",
            Self::Federal => "FEDERAL",
            Self::State => "STATE",
            Self::Municipal => "MUNICIPAL",
            Self::Labor => "LABOR",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Fgts => "Severance fund (FGTS) regularity certificate",
            Self::Federal => "Federal tax clearance certificate",
            Self::State => "State tax clearance certificate",
            Self::Municipal => "Municipal tax clearance certificate",
            Self::Labor => "Labor debt clearance certificate",
        }
    }
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown certificate kind '{0}'")]
pub struct UnknownCertificateKind(pub String);

impl FromStr for CertificateKind {
    type Err = UnknownCertificateKind;

    /// Accepts the persisted tags and the registry's own names for each kind.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        let kind = match normalized.as_str() {
            "ESTADUAL" => Some(Self::State),
            "TRABALHISTA" => Some(Self::Labor),
            other => Self::all().into_iter().find(|kind| kind.tag() == other),
        };
        kind.ok_or_else(|| UnknownCertificateKind(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: i64,
    pub company_id: CompanyId,
    pub kind: CertificateKind,
    pub number: String,
    pub issued_on: NaiveDate,
    pub valid_until: NaiveDate,
    /// Where the issued document is kept, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Certificate {
    pub fn status_on(&self, today: NaiveDate) -> CertificateStatus {
        if self.valid_until >= today {
            CertificateStatus::Valid
        } else {
            CertificateStatus::Expired
        }
    }

    /// Negative once expired.
    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        (self.valid_until - today).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCertificate {
    pub company_id: CompanyId,
    pub kind: CertificateKind,
    pub number: String,
    pub issued_on: NaiveDate,
    pub valid_until: NaiveDate,
    pub document_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Valid,
    Expired,
}

/// Store-level certificate read. Date bounds are inclusive and apply to `valid_until`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateQuery {
    pub company_id: Option<CompanyId>,
    pub kind: Option<CertificateKind>,
    pub valid_from: Option<NaiveDate>,
    pub valid_through: Option<NaiveDate>,
}

impl CertificateQuery {
    pub fn matches(&self, certificate: &Certificate) -> bool {
        self.company_id.map_or(true, |id| id == certificate.company_id)
            && self.kind.map_or(true, |kind| kind == certificate.kind)
            && self
                .valid_from
                .map_or(true, |from| certificate.valid_until >= from)
            && self
                .valid_through
                .map_or(true, |through| certificate.valid_until <= through)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Expired,
    Valid,
    /// Valid today and expiring within the given number of days.
    ExpiringWithin(u32),
}

impl StatusFilter {
    /// `expired`, `valid` or `expiring`; the window only applies to `expiring`.
    pub fn parse(value: &str, window_days: u32) -> Result<Self, UnknownStatusFilter> {
        match value.trim().to_ascii_lowercase().as_str() {
            "expired" => Ok(Self::Expired),
            "valid" => Ok(Self::Valid),
            "expiring" => Ok(Self::ExpiringWithin(window_days)),
            _ => Err(UnknownStatusFilter(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown certificate status '{0}', expected expired, valid or expiring")]
pub struct UnknownStatusFilter(pub String);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateFilter {
    pub status: Option<StatusFilter>,
    pub kind: Option<CertificateKind>,
}

impl CertificateFilter {
    pub fn query(&self, today: NaiveDate) -> CertificateQuery {
        let (valid_from, valid_through) = match self.status {
            None => (None, None),
            Some(StatusFilter::Valid) => (Some(today), None),
            Some(StatusFilter::Expired) => {
                (None, Some(today.pred_opt().unwrap_or(NaiveDate::MIN)))
            }
            Some(StatusFilter::ExpiringWithin(days)) => {
                (Some(today), Some(window_end(today, days)))
            }
        };
        CertificateQuery {
            company_id: None,
            kind: self.kind,
            valid_from,
            valid_through,
        }
    }
}

fn window_end(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX)
}

/// A certificate together with what it means on the day it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateView {
    #[serde(flatten)]
    pub certificate: Certificate,
    pub status: CertificateStatus,
    pub days_remaining: i64,
}

impl CertificateView {
    pub fn on(certificate: Certificate, today: NaiveDate) -> Self {
        Self {
            status: certificate.status_on(today),
            days_remaining: certificate.days_remaining(today),
            certificate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyCertificates {
    pub company: Company,
    pub certificates: Vec<CertificateView>,
}

/// One entry of the expiry alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiringCertificate {
    pub company: Company,
    pub certificate: Certificate,
    pub days_remaining: i64,
}

/// Registration payload, addressed by identifier rather than company key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CertificateRequest {
    pub identifier: String,
    #[serde(default)]
    pub company_name: Option<String>,
    pub kind: CertificateKind,
    pub number: String,
    pub issued_on: NaiveDate,
    pub valid_until: NaiveDate,
    #[serde(default)]
    pub document_ref: Option<String>,
}

pub struct CertificateTracker<S: ?Sized> {
    store: Arc<S>,
    registry: CompanyRegistry<S>,
}

impl<S> CertificateTracker<S>
where
    S: MonitoringStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            registry: CompanyRegistry::new(Arc::clone(&store)),
            store,
        }
    }

    /// Records a certificate, registering the company when the identifier is unseen.
    pub async fn add(
        &self,
        request: CertificateRequest,
        today: NaiveDate,
    ) -> Result<CertificateView, CertificateError> {
        let identifier = TaxId::parse(&request.identifier)?;
        let number = request.number.trim();
        if number.is_empty() {
            return Err(CertificateError::MissingNumber);
        }
        if request.issued_on > request.valid_until {
            return Err(CertificateError::InvalidValidity {
                issued_on: request.issued_on,
                valid_until: request.valid_until,
            });
        }

        let company = self
            .registry
            .resolve_or_create(&identifier, request.company_name.as_deref())
            .await?;
        let certificate = self
            .store
            .insert_certificate(NewCertificate {
                company_id: company.id,
                kind: request.kind,
                number: number.to_string(),
                issued_on: request.issued_on,
                valid_until: request.valid_until,
                document_ref: request
                    .document_ref
                    .map(|reference| reference.trim().to_string())
                    .filter(|reference| !reference.is_empty()),
            })
            .await?;
        info!(
            %identifier,
            company_id = %company.id,
            kind = %certificate.kind,
            valid_until = %certificate.valid_until,
            "certificate recorded"
        );
        Ok(CertificateView::on(certificate, today))
    }

    /// Certificates matching `filter`, grouped per company. Within a group and across
    /// groups the latest `valid_until` comes first.
    pub async fn list(
        &self,
        filter: CertificateFilter,
        today: NaiveDate,
    ) -> Result<Vec<CompanyCertificates>, CertificateError> {
        let certificates = self.store.list_certificates(filter.query(today)).await?;
        if certificates.is_empty() {
            return Ok(Vec::new());
        }
        let companies = self.companies().await?;

        let mut groups: Vec<CompanyCertificates> = Vec::new();
        let mut positions: HashMap<CompanyId, usize> = HashMap::new();
        for certificate in certificates {
            let Some(company) = companies.get(&certificate.company_id) else {
                warn!(
                    company_id = %certificate.company_id,
                    certificate_id = certificate.id,
                    "certificate owner missing"
                );
                continue;
            };
            let position = *positions.entry(company.id).or_insert_with(|| {
                groups.push(CompanyCertificates {
                    company: company.clone(),
                    certificates: Vec::new(),
                });
                groups.len() - 1
            });
            groups[position]
                .certificates
                .push(CertificateView::on(certificate, today));
        }
        Ok(groups)
    }

    /// Certificates of one company, latest `valid_until` first.
    pub async fn for_company(
        &self,
        raw_identifier: &str,
        today: NaiveDate,
    ) -> Result<CompanyCertificates, CertificateError> {
        let identifier = TaxId::parse(raw_identifier)?;
        let company = self
            .store
            .find_company_by_identifier(&identifier)
            .await?
            .ok_or(CertificateError::UnknownCompany(identifier))?;
        let certificates = self
            .store
            .list_certificates(CertificateQuery {
                company_id: Some(company.id),
                ..CertificateQuery::default()
            })
            .await?
            .into_iter()
            .map(|certificate| CertificateView::on(certificate, today))
            .collect();
        Ok(CompanyCertificates {
            company,
            certificates,
        })
    }

    /// Certificates valid today that lapse within `within_days`, soonest first.
    pub async fn expiring(
        &self,
        within_days: u32,
        today: NaiveDate,
    ) -> Result<Vec<ExpiringCertificate>, CertificateError> {
        let filter = CertificateFilter {
            status: Some(StatusFilter::ExpiringWithin(within_days)),
            kind: None,
        };
        let certificates = self.store.list_certificates(filter.query(today)).await?;
        if certificates.is_empty() {
            return Ok(Vec::new());
        }
        let companies = self.companies().await?;

        let mut expiring: Vec<ExpiringCertificate> = certificates
            .into_iter()
            .filter_map(|certificate| {
                let company = companies.get(&certificate.company_id)?.clone();
                Some(ExpiringCertificate {
                    days_remaining: certificate.days_remaining(today),
                    company,
                    certificate,
                })
            })
            .collect();
        expiring.sort_by(|a, b| {
            a.certificate
                .valid_until
                .cmp(&b.certificate.valid_until)
                .then_with(|| a.certificate.id.cmp(&b.certificate.id))
        });
        Ok(expiring)
    }

    async fn companies(&self) -> Result<HashMap<CompanyId, Company>, StoreError> {
        Ok(self
            .store
            .list_companies()
            .await?
            .into_iter()
            .map(|company| (company.id, company))
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),
    #[error("certificate number is required")]
    MissingNumber,
    #[error("certificate issued on {issued_on} cannot be valid only until {valid_until}")]
    InvalidValidity {
        issued_on: NaiveDate,
        valid_until: NaiveDate,
    },
    #[error("company {0} is not registered")]
    UnknownCompany(TaxId),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("date")
    }

    fn certificate(valid_until: &str) -> Certificate {
        Certificate {
            id: 1,
            company_id: CompanyId(1),
            kind: CertificateKind::Fgts,
            number: "123".to_string(),
            issued_on: date("2025-01-01"),
            valid_until: date(valid_until),
            document_ref: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn certificate_is_valid_through_its_last_day() {
        let today = date("2025-03-10");
        assert_eq!(
            certificate("2025-03-10").status_on(today),
            CertificateStatus::Valid
        );
        assert_eq!(
            certificate("2025-03-09").status_on(today),
            CertificateStatus::Expired
        );
        assert_eq!(certificate("2025-03-25").days_remaining(today), 15);
        assert_eq!(certificate("2025-03-08").days_remaining(today), -2);
    }

    #[test]
    fn status_filters_translate_to_inclusive_bounds() {
        let today = date("2025-03-10");
        let expiring = CertificateFilter {
            status: Some(StatusFilter::ExpiringWithin(30)),
            kind: Some(CertificateKind::Labor),
        }
        .query(today);
        assert_eq!(expiring.valid_from, Some(today));
        assert_eq!(expiring.valid_through, Some(date("2025-04-09")));
        assert_eq!(expiring.kind, Some(CertificateKind::Labor));

        let expired = CertificateFilter {
            status: Some(StatusFilter::Expired),
            kind: None,
        }
        .query(today);
        assert!(expired.matches(&certificate("2025-03-09")));
        assert!(!expired.matches(&certificate("2025-03-10")));

        let valid = CertificateFilter {
            status: Some(StatusFilter::Valid),
            kind: None,
        }
        .query(today);
        assert!(valid.matches(&certificate("2025-03-10")));
        assert!(!valid.matches(&certificate("2025-03-09")));
    }

    #[test]
    fn status_filter_names_parse() {
        assert_eq!(StatusFilter::parse("Expired", 30), Ok(StatusFilter::Expired));
        assert_eq!(
            StatusFilter::parse("expiring", 15),
            Ok(StatusFilter::ExpiringWithin(15))
        );
        assert!(StatusFilter::parse("overdue", 30).is_err());
    }

    #[test]
    fn kinds_parse_tags_and_registry_names() {
        assert_eq!("fgts".parse::<CertificateKind>(), Ok(CertificateKind::Fgts));
        assert_eq!(
            "Estadual".parse::<CertificateKind>(),
            Ok(CertificateKind::State)
        );
        assert_eq!(
            " TRABALHISTA ".parse::<CertificateKind>(),
            Ok(CertificateKind::Labor)
        );
        assert!("IPTU".parse::<CertificateKind>().is_err());
    }
}
