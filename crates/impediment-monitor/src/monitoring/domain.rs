use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::identifier::TaxId;

/// Display name given to companies created before their real name is known.
pub const PENDING_LOOKUP_NAME: &str = "Pending lookup";

/// Store-assigned company key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub i64);

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub identifier: TaxId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub fn has_placeholder_name(&self) -> bool {
        self.display_name == PENDING_LOOKUP_NAME
    }
}

/// Insert payload for a company; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCompany {
    pub identifier: TaxId,
    pub display_name: String,
    pub contract_reference: Option<String>,
}

impl NewCompany {
    pub fn placeholder(identifier: TaxId) -> Self {
        Self {
            identifier,
            display_name: PENDING_LOOKUP_NAME.to_string(),
            contract_reference: None,
        }
    }
}

/// External system queried for restriction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "CEIS")]
    Ceis,
    #[serde(rename = "CNEP")]
    Cnep,
    #[serde(rename = "CEPIM")]
    Cepim,
    #[serde(rename = "CADIN")]
    Cadin,
    #[serde(rename = "CFIL")]
    Cfil,
    #[serde(rename = "CND_FEDERAL")]
    CndFederal,
}

impl SourceKind {
    pub const fn all() -> [Self; 6] {
        [
            Self::Ceis,
            Self::Cnep,
            Self::Cepim,
            Self::Cadin,
            Self::Cfil,
            Self::CndFederal,
        ]
    }

    /// Persisted tag.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Ceis => "CEIS",
            Self::Cnep => "CNEP",
            Self::Cepim => "CEPIM",
            Self::Cadin => "CADIN",
            Self::Cfil => "CFIL",
            Self::CndFederal => "CND_FEDERAL",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Ceis => "Registry of barred and suspended companies",
            Self::Cnep => "National registry of punished companies",
            Self::Cepim => "Registry of barred non-profit entities",
            Self::Cadin => "State registry of debtors",
            Self::Cfil => "State registry of suppliers barred from tendering",
            Self::CndFederal => "Federal debt clearance certificate",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source kind '{0}'")]
pub struct UnknownSourceKind(pub String);

impl FromStr for SourceKind {
    type Err = UnknownSourceKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        Self::all()
            .into_iter()
            .find(|kind| kind.tag() == normalized)
            .ok_or_else(|| UnknownSourceKind(value.to_string()))
    }
}

/// One persisted per-source outcome. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub id: i64,
    pub company_id: CompanyId,
    pub source_kind: SourceKind,
    pub regular: bool,
    pub detail: String,
    pub checked_at: DateTime<Utc>,
}

/// Insert payload for a verification result; `checked_at` is set by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewVerificationResult {
    pub company_id: CompanyId,
    pub source_kind: SourceKind,
    pub regular: bool,
    pub detail: String,
}

/// Audit row for a run whose identifier failed validation. One row per configured
/// source; no company is attached since none was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedVerification {
    pub id: i64,
    pub raw_identifier: String,
    pub source_kind: SourceKind,
    pub reason: String,
    pub detail: String,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRejectedVerification {
    pub raw_identifier: String,
    pub source_kind: SourceKind,
    pub reason: String,
    pub detail: String,
}

/// Filter for history reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub source_kind: Option<SourceKind>,
    pub since: Option<DateTime<Utc>>,
}

impl ResultFilter {
    pub fn matches(&self, result: &VerificationResult) -> bool {
        self.source_kind
            .map_or(true, |kind| kind == result.source_kind)
            && self.since.map_or(true, |since| result.checked_at >= since)
    }
}

/// Counts reported by an administrative purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeSummary {
    pub companies_removed: u64,
    pub results_removed: u64,
    #[serde(default)]
    pub rejections_removed: u64,
    #[serde(default)]
    pub certificates_removed: u64,
}

/// Logical AND of per-source verdicts. A run with no sources is not regular.
pub fn aggregate_verdict<I>(flags: I) -> bool
where
    I: IntoIterator<Item = bool>,
{
    let mut seen = false;
    for regular in flags {
        if !regular {
            return false;
        }
        seen = true;
    }
    seen
}
