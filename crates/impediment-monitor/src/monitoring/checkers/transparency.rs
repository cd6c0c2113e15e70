//! Federal transparency portal checkers (CEIS, CNEP, CEPIM) over its JSON API.
//!
//! Active-entry rules differ per register:
//! - CEIS / CNEP: a sanction restricts while `dataFimSancao` is absent, unparseable, or not
//!   before today.
//! - CEPIM: an entry restricts only while `dataFinal` parses to a date after today.
//!
//! Records that exist but are no longer active are reported as regular history.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{classify_http_error, SourceChecker, SourceFailure, SourceResult};
use crate::identifier::TaxId;
use crate::monitoring::domain::SourceKind;

const API_KEY_HEADER: &str = "chave-api-dados";
const NOT_AVAILABLE: &str = "N/A";

/// Shared HTTP client for the transparency portal endpoints.
pub struct TransparencyPortalClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_pages: u32,
}

impl TransparencyPortalClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        max_pages: u32,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            max_pages: max_pages.max(1),
        })
    }

    async fn fetch_records(
        &self,
        endpoint: &str,
        param: &str,
        identifier: &TaxId,
    ) -> Result<Vec<Value>, SourceFailure> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SourceFailure::transport("missing transparency api key"))?;
        let url = format!("{}/{endpoint}", self.base_url);
        let mut records = Vec::new();

        for page in 1..=self.max_pages {
            let response = self
                .http
                .get(&url)
                .header(API_KEY_HEADER, key)
                .header(ACCEPT, "application/json")
                .query(&[
                    (param, identifier.as_str().to_string()),
                    ("pagina", page.to_string()),
                ])
                .send()
                .await
                .map_err(|err| classify_http_error(&err))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SourceFailure::transport(format!(
                    "{endpoint} answered HTTP {status}"
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|err| classify_http_error(&err))?;
            let entries = parse_page(&body)?;
            debug!(endpoint, page, entries = entries.len(), "transparency page fetched");
            if entries.is_empty() {
                break;
            }
            records.extend(entries);
        }

        Ok(records)
    }
}

fn parse_page(body: &str) -> Result<Vec<Value>, SourceFailure> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(entries)) if entries.iter().all(Value::is_object) => Ok(entries),
        Ok(Value::Array(_)) => Err(SourceFailure::shape("array holds non-object entries")),
        Ok(_) => Err(SourceFailure::shape("expected a JSON array of records")),
        Err(err) => Err(SourceFailure::shape(format!("body is not JSON: {err}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    Ceis,
    Cnep,
    Cepim,
}

impl Register {
    fn kind(self) -> SourceKind {
        match self {
            Self::Ceis => SourceKind::Ceis,
            Self::Cnep => SourceKind::Cnep,
            Self::Cepim => SourceKind::Cepim,
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            Self::Ceis => "ceis",
            Self::Cnep => "cnep",
            Self::Cepim => "cepim",
        }
    }

    fn identifier_param(self) -> &'static str {
        match self {
            Self::Ceis | Self::Cnep => "codigoSancionado",
            Self::Cepim => "numeroInscricao",
        }
    }
}

/// API-based checker for one transparency register.
pub struct TransparencyChecker {
    register: Register,
    client: Arc<TransparencyPortalClient>,
    reference_date: Option<NaiveDate>,
}

impl TransparencyChecker {
    pub fn ceis(client: Arc<TransparencyPortalClient>) -> Self {
        Self::new(Register::Ceis, client)
    }

    pub fn cnep(client: Arc<TransparencyPortalClient>) -> Self {
        Self::new(Register::Cnep, client)
    }

    pub fn cepim(client: Arc<TransparencyPortalClient>) -> Self {
        Self::new(Register::Cepim, client)
    }

    fn new(register: Register, client: Arc<TransparencyPortalClient>) -> Self {
        Self {
            register,
            client,
            reference_date: None,
        }
    }

    /// Pin "today" for active-entry filtering.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }
}

#[async_trait]
impl SourceChecker for TransparencyChecker {
    fn kind(&self) -> SourceKind {
        self.register.kind()
    }

    async fn check(&self, identifier: &TaxId) -> Result<SourceResult, SourceFailure> {
        let records = self
            .client
            .fetch_records(
                self.register.endpoint(),
                self.register.identifier_param(),
                identifier,
            )
            .await?;
        let today = self
            .reference_date
            .unwrap_or_else(|| Utc::now().date_naive());
        interpret(self.register, records, today)
    }
}

fn interpret(
    register: Register,
    records: Vec<Value>,
    today: NaiveDate,
) -> Result<SourceResult, SourceFailure> {
    if records.is_empty() {
        return Ok(SourceResult::regular("Regular"));
    }

    let found = records.len();
    let blocks: Vec<String> = match register {
        Register::Ceis | Register::Cnep => decode::<SanctionRecord>(records)?
            .iter()
            .filter(|record| sanction_is_active(record.data_fim_sancao.as_deref(), today))
            .map(|record| match register {
                Register::Cnep => record.cnep_block(),
                _ => record.ceis_block(),
            })
            .collect(),
        Register::Cepim => decode::<CepimRecord>(records)?
            .iter()
            .filter(|record| cepim_is_active(record.data_final.as_deref(), today))
            .map(CepimRecord::block)
            .collect(),
    };

    if blocks.is_empty() {
        Ok(SourceResult::regular(format!(
            "Regular - {found} record(s) found, none active"
        )))
    } else {
        Ok(SourceResult::irregular(blocks.join("\n\n")))
    }
}

fn decode<T: for<'de> Deserialize<'de>>(records: Vec<Value>) -> Result<Vec<T>, SourceFailure> {
    records
        .into_iter()
        .map(|record| {
            serde_json::from_value(record)
                .map_err(|err| SourceFailure::shape(format!("unexpected record layout: {err}")))
        })
        .collect()
}

fn sanction_is_active(end: Option<&str>, today: NaiveDate) -> bool {
    match end.map(str::trim).filter(|value| !value.is_empty()) {
        None => true,
        Some(value) => parse_portal_date(value).map_or(true, |date| date >= today),
    }
}

fn cepim_is_active(end: Option<&str>, today: NaiveDate) -> bool {
    end.and_then(parse_portal_date)
        .map_or(false, |date| date > today)
}

/// The portal mixes `DD/MM/YYYY` and ISO dates, sometimes with a time suffix.
fn parse_portal_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(head, "%Y-%m-%d"))
        .ok()
}

fn display_date(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => NOT_AVAILABLE.to_string(),
        Some(raw) => parse_portal_date(raw)
            .map(|date| date.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|| raw.to_string()),
    }
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Some(Value::Number(number)) => number.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Field that arrives either as plain text or as a nested object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Labelled {
    Text(String),
    Object {
        #[serde(default)]
        nome: Option<String>,
        #[serde(default, rename = "descricaoResumida")]
        descricao_resumida: Option<String>,
    },
}

impl Labelled {
    fn label(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Object {
                nome,
                descricao_resumida,
            } => descricao_resumida.as_deref().or(nome.as_deref()),
        }
        .map(str::trim)
        .filter(|label| !label.is_empty())
    }
}

fn label_or_na(field: Option<&Labelled>) -> &str {
    field.and_then(Labelled::label).unwrap_or(NOT_AVAILABLE)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SanctionRecord {
    #[serde(default)]
    descricao_resumida: Option<String>,
    #[serde(default)]
    tipo_sancao: Option<Labelled>,
    #[serde(default)]
    orgao_sancionador: Option<Labelled>,
    #[serde(default)]
    data_inicio_sancao: Option<String>,
    #[serde(default)]
    data_fim_sancao: Option<String>,
    #[serde(default)]
    valor_multa: Option<Value>,
}

impl SanctionRecord {
    fn sanction(&self) -> &str {
        self.descricao_resumida
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| label_or_na(self.tipo_sancao.as_ref()))
    }

    fn ceis_block(&self) -> String {
        format!(
            "Sanction: {}\nSanctioning body: {}\nStart: {}\nEnd: {}",
            self.sanction(),
            label_or_na(self.orgao_sancionador.as_ref()),
            display_date(self.data_inicio_sancao.as_deref()),
            display_date(self.data_fim_sancao.as_deref()),
        )
    }

    fn cnep_block(&self) -> String {
        format!(
            "Sanction: {}\nSanctioning body: {}\nFine: R$ {}",
            self.sanction(),
            label_or_na(self.orgao_sancionador.as_ref()),
            display_value(self.valor_multa.as_ref()),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CepimRecord {
    #[serde(default)]
    motivo: Option<String>,
    #[serde(default)]
    orgao_superior: Option<Labelled>,
    #[serde(default)]
    numero_convenio: Option<Value>,
    #[serde(default)]
    data_final: Option<String>,
}

impl CepimRecord {
    fn block(&self) -> String {
        format!(
            "Reason: {}\nSuperior body: {}\nAgreement: {}",
            self.motivo
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .unwrap_or(NOT_AVAILABLE),
            label_or_na(self.orgao_superior.as_ref()),
            display_value(self.numero_convenio.as_ref()),
        )
    }
}
