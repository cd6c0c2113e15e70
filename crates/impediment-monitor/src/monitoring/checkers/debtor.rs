//! State debtor registry (CADIN / CFIL). Both sections come from one result page, so the
//! checkers share a [`DebtorPageSource`] and differ only in the section they read.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;

use super::{classify_http_error, SourceChecker, SourceFailure, SourceResult};
use crate::identifier::TaxId;
use crate::monitoring::domain::SourceKind;

const NO_RECORDS_PHRASE: &str = "NAO FORAM ENCONTRADOS REGISTROS";
const ERROR_MARKERS: [&str; 3] = ["ERRO", "INDISPONIVEL", "CAPTCHA"];

static SCRIPT_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
        .expect("script pattern compiles")
});
static BLOCK_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)</?(p|div|tr|br|li|ul|ol|table|thead|tbody|tfoot|h[1-6]|section|article|",
        r"header|footer|form|fieldset|body|html|head|title|center|dl|dt|dd|hr)\b[^>]*>",
    ))
    .expect("block tag pattern compiles")
});
static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebtorSection {
    Cadin,
    Cfil,
}

impl DebtorSection {
    fn marker(self) -> &'static str {
        match self {
            Self::Cadin => "CADIN:",
            Self::Cfil => "CFIL:",
        }
    }

    fn kind(self) -> SourceKind {
        match self {
            Self::Cadin => SourceKind::Cadin,
            Self::Cfil => SourceKind::Cfil,
        }
    }
}

/// What a rendered result page says about one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebtorPageState {
    NoRecords,
    RecordsFound(String),
    ErrorPage,
    SectionMissing,
}

/// Uppercase with Portuguese diacritics removed, so matching ignores both.
fn fold(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' | 'Ç' => 'C',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

pub fn interpret_debtor_page(text: &str, section: DebtorSection) -> DebtorPageState {
    match section_line(text, section) {
        Some(line) if fold(&line).contains(NO_RECORDS_PHRASE) => DebtorPageState::NoRecords,
        Some(line) => DebtorPageState::RecordsFound(line),
        None if has_error_marker(text) => DebtorPageState::ErrorPage,
        None => DebtorPageState::SectionMissing,
    }
}

/// The line carrying the section marker. A line holding nothing but the marker is
/// joined with the next non-empty line, which is where the section's verdict sits.
fn section_line(text: &str, section: DebtorSection) -> Option<String> {
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
    let line = lines.find(|line| fold(line).contains(section.marker()))?;
    if fold(line) != section.marker() {
        return Some(line.to_string());
    }
    match lines.next() {
        Some(next) if !is_section_start(next) => Some(format!("{line} {next}")),
        _ => Some(line.to_string()),
    }
}

fn is_section_start(line: &str) -> bool {
    let folded = fold(line);
    [DebtorSection::Cadin, DebtorSection::Cfil]
        .iter()
        .any(|section| folded.contains(section.marker()))
}

fn has_error_marker(text: &str) -> bool {
    fold(text)
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| ERROR_MARKERS.contains(&word))
}

/// Produces the rendered text of the registry's result page for one identifier.
#[async_trait]
pub trait DebtorPageSource: Send + Sync {
    async fn fetch_page(&self, identifier: &TaxId) -> Result<String, SourceFailure>;
}

/// Plain HTTP fetch of the result page. Pages that only render through scripts will
/// surface as [`DebtorPageState::SectionMissing`].
pub struct HttpDebtorPageSource {
    http: Client,
    url: String,
}

impl HttpDebtorPageSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl DebtorPageSource for HttpDebtorPageSource {
    async fn fetch_page(&self, identifier: &TaxId) -> Result<String, SourceFailure> {
        let response = self
            .http
            .get(&self.url)
            .query(&[("cnpj", identifier.as_str())])
            .send()
            .await
            .map_err(|err| classify_http_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceFailure::transport(format!(
                "debtor registry answered HTTP {status}"
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|err| classify_http_error(&err))?;
        debug!(bytes = html.len(), "debtor registry page fetched");
        Ok(html_to_text(&html))
    }
}

/// Block-level tags break lines; inline and cell tags only separate words, so a
/// table row or a `<strong>` verdict stays on the marker's line.
fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_BLOCKS.replace_all(html, "");
    let blocks = BLOCK_TAGS.replace_all(&without_scripts, "\n");
    let text = TAGS.replace_all(&blocks, " ");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct DebtorRegistryChecker {
    section: DebtorSection,
    pages: Arc<dyn DebtorPageSource>,
}

impl DebtorRegistryChecker {
    pub fn new(section: DebtorSection, pages: Arc<dyn DebtorPageSource>) -> Self {
        Self { section, pages }
    }
}

#[async_trait]
impl SourceChecker for DebtorRegistryChecker {
    fn kind(&self) -> SourceKind {
        self.section.kind()
    }

    async fn check(&self, identifier: &TaxId) -> Result<SourceResult, SourceFailure> {
        let page = self.pages.fetch_page(identifier).await?;
        match interpret_debtor_page(&page, self.section) {
            DebtorPageState::NoRecords => Ok(SourceResult::regular("Regular - no records found")),
            DebtorPageState::RecordsFound(line) => Ok(SourceResult::irregular(line)),
            DebtorPageState::ErrorPage => Err(SourceFailure::shape(format!(
                "registry returned an error page instead of the {} section",
                self.section.marker()
            ))),
            DebtorPageState::SectionMissing => Err(SourceFailure::shape(format!(
                "{} section not found on the result page",
                self.section.marker()
            ))),
        }
    }
}
