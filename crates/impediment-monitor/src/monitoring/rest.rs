//! Store backed by a managed relational table service exposing a PostgREST API.
//!
//! Expected tables:
//! - `companies(id bigserial, identifier text unique, display_name text, contract_reference text,
//!   created_at timestamptz default now())`
//! - `verification_results(id bigserial, company_id bigint references companies(id),
//!   source_kind text, regular boolean, detail text, checked_at timestamptz default now())`
//! - `rejected_verifications(id bigserial, raw_identifier text, source_kind text, reason text,
//!   detail text, checked_at timestamptz default now())`
//! - `certificates(id bigserial, company_id bigint references companies(id), kind text,
//!   number text, issued_on date, valid_until date, document_ref text,
//!   created_at timestamptz default now())`

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::certificates::{Certificate, CertificateKind, CertificateQuery, NewCertificate};
use super::domain::{
    Company, CompanyId, NewCompany, NewRejectedVerification, NewVerificationResult, PurgeSummary,
    RejectedVerification, ResultFilter, SourceKind, VerificationResult,
};
use super::store::{MonitoringStore, StoreError};
use crate::identifier::TaxId;

const COMPANIES: &str = "companies";
const RESULTS: &str = "verification_results";
const REJECTIONS: &str = "rejected_verifications";
const CERTIFICATES: &str = "certificates";
const UNIQUE_VIOLATION: &str = "23505";

pub struct RestTableStore {
    http: Client,
    base_url: String,
}

impl RestTableStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|err| StoreError::Unavailable(format!("invalid api key header: {err}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|err| StoreError::Unavailable(format!("invalid api key header: {err}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn table(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| StoreError::Malformed(err.to_string()))
    }

    fn returning(request: RequestBuilder) -> RequestBuilder {
        request.header("Prefer", "return=representation")
    }
}

fn classify_failure(status: StatusCode, body: String) -> StoreError {
    if status == StatusCode::CONFLICT || body.contains(UNIQUE_VIOLATION) {
        return StoreError::Conflict;
    }
    if status.is_server_error() {
        return StoreError::Unavailable(format!("{status}: {}", truncate(&body)));
    }
    StoreError::Rejected {
        status: status.as_u16(),
        message: truncate(&body),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Serialize)]
struct CompanyInsert<'a> {
    identifier: &'a str,
    display_name: &'a str,
    contract_reference: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CompanyRow {
    id: i64,
    identifier: String,
    display_name: String,
    #[serde(default)]
    contract_reference: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CompanyRow> for Company {
    type Error = StoreError;

    fn try_from(row: CompanyRow) -> Result<Self, Self::Error> {
        let identifier = TaxId::parse(&row.identifier).map_err(|err| {
            StoreError::Malformed(format!("company {} has bad identifier: {err}", row.id))
        })?;
        Ok(Company {
            id: CompanyId(row.id),
            identifier,
            display_name: row.display_name,
            contract_reference: row.contract_reference,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResultRow {
    id: i64,
    company_id: i64,
    source_kind: String,
    regular: bool,
    #[serde(default)]
    detail: Option<String>,
    checked_at: DateTime<Utc>,
}

impl TryFrom<ResultRow> for VerificationResult {
    type Error = StoreError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let source_kind = row
            .source_kind
            .parse::<SourceKind>()
            .map_err(|err| StoreError::Malformed(err.to_string()))?;
        Ok(VerificationResult {
            id: row.id,
            company_id: CompanyId(row.company_id),
            source_kind,
            regular: row.regular,
            detail: row.detail.unwrap_or_default(),
            checked_at: row.checked_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RejectionRow {
    id: i64,
    raw_identifier: String,
    source_kind: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    checked_at: DateTime<Utc>,
}

impl TryFrom<RejectionRow> for RejectedVerification {
    type Error = StoreError;

    fn try_from(row: RejectionRow) -> Result<Self, Self::Error> {
        let source_kind = row
            .source_kind
            .parse::<SourceKind>()
            .map_err(|err| StoreError::Malformed(err.to_string()))?;
        Ok(RejectedVerification {
            id: row.id,
            raw_identifier: row.raw_identifier,
            source_kind,
            reason: row.reason.unwrap_or_default(),
            detail: row.detail.unwrap_or_default(),
            checked_at: row.checked_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CertificateRow {
    id: i64,
    company_id: i64,
    kind: String,
    number: String,
    issued_on: NaiveDate,
    valid_until: NaiveDate,
    #[serde(default)]
    document_ref: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CertificateRow> for Certificate {
    type Error = StoreError;

    fn try_from(row: CertificateRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<CertificateKind>()
            .map_err(|err| StoreError::Malformed(err.to_string()))?;
        Ok(Certificate {
            id: row.id,
            company_id: CompanyId(row.company_id),
            kind,
            number: row.number,
            issued_on: row.issued_on,
            valid_until: row.valid_until,
            document_ref: row.document_ref,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct OwnerRow {
    company_id: i64,
}

fn single<T>(mut rows: Vec<T>) -> Result<T, StoreError> {
    match rows.pop() {
        Some(row) if rows.is_empty() => Ok(row),
        Some(_) => Err(StoreError::Malformed("expected a single row".to_string())),
        None => Err(StoreError::Malformed("expected a row, got none".to_string())),
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl MonitoringStore for RestTableStore {
    async fn insert_company(&self, company: NewCompany) -> Result<Company, StoreError> {
        let payload = CompanyInsert {
            identifier: company.identifier.as_str(),
            display_name: &company.display_name,
            contract_reference: company.contract_reference.as_deref(),
        };
        let request = Self::returning(self.http.post(self.table(COMPANIES))).json(&payload);
        let rows: Vec<CompanyRow> = self.send(request).await?;
        single(rows)?.try_into()
    }

    async fn find_company_by_identifier(
        &self,
        identifier: &TaxId,
    ) -> Result<Option<Company>, StoreError> {
        let request = self.http.get(self.table(COMPANIES)).query(&[
            ("select", "*".to_string()),
            ("identifier", format!("eq.{identifier}")),
        ]);
        let rows: Vec<CompanyRow> = self.send(request).await?;
        rows.into_iter().next().map(Company::try_from).transpose()
    }

    async fn list_companies(&self) -> Result<Vec<Company>, StoreError> {
        let request = self
            .http
            .get(self.table(COMPANIES))
            .query(&[("select", "*"), ("order", "id.asc")]);
        let rows: Vec<CompanyRow> = self.send(request).await?;
        convert_all(rows)
    }

    async fn update_company_name(
        &self,
        id: CompanyId,
        expected: &str,
        name: &str,
    ) -> Result<Option<Company>, StoreError> {
        let request = Self::returning(self.http.patch(self.table(COMPANIES)))
            .query(&[
                ("id", format!("eq.{id}")),
                ("display_name", format!("eq.{expected}")),
            ])
            .json(&serde_json::json!({ "display_name": name }));
        let rows: Vec<CompanyRow> = self.send(request).await?;
        rows.into_iter().next().map(Company::try_from).transpose()
    }

    async fn insert_verification_result(
        &self,
        result: NewVerificationResult,
    ) -> Result<VerificationResult, StoreError> {
        let payload = serde_json::json!({
            "company_id": result.company_id.0,
            "source_kind": result.source_kind.tag(),
            "regular": result.regular,
            "detail": result.detail,
        });
        let request = Self::returning(self.http.post(self.table(RESULTS))).json(&payload);
        let rows: Vec<ResultRow> = self.send(request).await?;
        single(rows)?.try_into()
    }

    async fn list_verification_results(
        &self,
        company_id: CompanyId,
        filter: ResultFilter,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("company_id", format!("eq.{company_id}")),
            ("order", "checked_at.asc,id.asc".to_string()),
        ];
        if let Some(kind) = filter.source_kind {
            query.push(("source_kind", format!("eq.{}", kind.tag())));
        }
        if let Some(since) = filter.since {
            query.push(("checked_at", format!("gte.{}", timestamp(since))));
        }

        let request = self.http.get(self.table(RESULTS)).query(&query);
        let rows: Vec<ResultRow> = self.send(request).await?;
        convert_all(rows)
    }

    async fn list_results_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        let request = self.http.get(self.table(RESULTS)).query(&[
            ("select", "*".to_string()),
            ("checked_at", format!("gte.{}", timestamp(since))),
            ("order", "checked_at.asc,id.asc".to_string()),
        ]);
        let rows: Vec<ResultRow> = self.send(request).await?;
        convert_all(rows)
    }

    async fn insert_rejected_verification(
        &self,
        rejection: NewRejectedVerification,
    ) -> Result<RejectedVerification, StoreError> {
        let payload = serde_json::json!({
            "raw_identifier": rejection.raw_identifier,
            "source_kind": rejection.source_kind.tag(),
            "reason": rejection.reason,
            "detail": rejection.detail,
        });
        let request = Self::returning(self.http.post(self.table(REJECTIONS))).json(&payload);
        let rows: Vec<RejectionRow> = self.send(request).await?;
        single(rows)?.try_into()
    }

    async fn list_rejected_verifications(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RejectedVerification>, StoreError> {
        let request = self.http.get(self.table(REJECTIONS)).query(&[
            ("select", "*".to_string()),
            ("checked_at", format!("gte.{}", timestamp(since))),
            ("order", "checked_at.asc,id.asc".to_string()),
        ]);
        let rows: Vec<RejectionRow> = self.send(request).await?;
        convert_all(rows)
    }

    async fn insert_certificate(
        &self,
        certificate: NewCertificate,
    ) -> Result<Certificate, StoreError> {
        let payload = serde_json::json!({
            "company_id": certificate.company_id.0,
            "kind": certificate.kind.tag(),
            "number": certificate.number,
            "issued_on": certificate.issued_on,
            "valid_until": certificate.valid_until,
            "document_ref": certificate.document_ref,
        });
        let request = Self::returning(self.http.post(self.table(CERTIFICATES))).json(&payload);
        let rows: Vec<CertificateRow> = self.send(request).await?;
        single(rows)?.try_into()
    }

    async fn list_certificates(
        &self,
        query: CertificateQuery,
    ) -> Result<Vec<Certificate>, StoreError> {
        let request = self
            .http
            .get(self.table(CERTIFICATES))
            .query(&certificate_params(&query));
        let rows: Vec<CertificateRow> = self.send(request).await?;
        convert_all(rows)
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<PurgeSummary, StoreError> {
        let cutoff_day = cutoff.date_naive();
        let cutoff = timestamp(cutoff);

        let request = Self::returning(self.http.delete(self.table(RESULTS))).query(&[
            ("checked_at", format!("lte.{cutoff}")),
            ("select", "id".to_string()),
        ]);
        let removed_results: Vec<IdRow> = self.send(request).await?;
        debug!(count = removed_results.len(), "purged verification results");

        let request = Self::returning(self.http.delete(self.table(REJECTIONS))).query(&[
            ("checked_at", format!("lte.{cutoff}")),
            ("select", "id".to_string()),
        ]);
        let removed_rejections: Vec<IdRow> = self.send(request).await?;
        debug!(count = removed_rejections.len(), "purged rejected verifications");

        let request = Self::returning(self.http.delete(self.table(CERTIFICATES))).query(&[
            ("valid_until", format!("lt.{cutoff_day}")),
            ("select", "id".to_string()),
        ]);
        let removed_certificates: Vec<IdRow> = self.send(request).await?;
        debug!(count = removed_certificates.len(), "purged lapsed certificates");

        // Companies that still own results or certificates keep their record.
        let mut owners: HashSet<i64> = HashSet::new();
        for table in [RESULTS, CERTIFICATES] {
            let request = self
                .http
                .get(self.table(table))
                .query(&[("select", "company_id")]);
            let rows: Vec<OwnerRow> = self.send(request).await?;
            owners.extend(rows.into_iter().map(|row| row.company_id));
        }

        let mut query = vec![
            ("created_at", format!("lte.{cutoff}")),
            ("select", "id".to_string()),
        ];
        if !owners.is_empty() {
            let mut ids: Vec<String> = owners.iter().map(i64::to_string).collect();
            ids.sort();
            query.push(("id", format!("not.in.({})", ids.join(","))));
        }
        let request = Self::returning(self.http.delete(self.table(COMPANIES))).query(&query);
        let removed_companies: Vec<IdRow> = self.send(request).await?;
        debug!(count = removed_companies.len(), "purged companies");

        Ok(PurgeSummary {
            companies_removed: removed_companies.len() as u64,
            results_removed: removed_results.len() as u64,
            rejections_removed: removed_rejections.len() as u64,
            certificates_removed: removed_certificates.len() as u64,
        })
    }
}

fn certificate_params(query: &CertificateQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("select", "*".to_string()),
        ("order", "valid_until.desc,id.asc".to_string()),
    ];
    if let Some(company_id) = query.company_id {
        params.push(("company_id", format!("eq.{company_id}")));
    }
    if let Some(kind) = query.kind {
        params.push(("kind", format!("eq.{}", kind.tag())));
    }
    if let Some(from) = query.valid_from {
        params.push(("valid_until", format!("gte.{from}")));
    }
    if let Some(through) = query.valid_through {
        params.push(("valid_until", format!("lte.{through}")));
    }
    params
}
