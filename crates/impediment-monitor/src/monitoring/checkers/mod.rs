//! Source checkers: one per external registry, all behind [`SourceChecker`].

mod debtor;
mod lookup;
mod transparency;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::SourceKind;
use crate::identifier::TaxId;

pub use debtor::{
    interpret_debtor_page, DebtorPageSource, DebtorPageState, DebtorRegistryChecker,
    DebtorSection, HttpDebtorPageSource,
};
pub use lookup::{CompanyNameLookup, NameProvider, PublicRegistryLookup};
pub use transparency::{TransparencyChecker, TransparencyPortalClient};

/// Normalized answer from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResult {
    pub regular: bool,
    pub detail: String,
}

impl SourceResult {
    pub fn regular(detail: impl Into<String>) -> Self {
        Self {
            regular: true,
            detail: detail.into(),
        }
    }

    pub fn irregular(detail: impl Into<String>) -> Self {
        Self {
            regular: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    TransportError,
    UnexpectedResponseShape,
    Timeout,
    NotImplemented,
}

impl FailureReason {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::TransportError => "transport_error",
            Self::UnexpectedResponseShape => "unexpected_response_shape",
            Self::Timeout => "timeout",
            Self::NotImplemented => "not_implemented",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Typed failure of a single source. Never escapes the orchestrator as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl SourceFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureReason::TransportError, message)
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::new(FailureReason::UnexpectedResponseShape, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureReason::Timeout, message)
    }

    /// Detail persisted for a source that could not be verified.
    pub fn detail(&self) -> String {
        format!("not verified ({}): {}", self.reason, self.message)
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

pub(crate) fn classify_http_error(err: &reqwest::Error) -> SourceFailure {
    if err.is_timeout() {
        SourceFailure::timeout(err.to_string())
    } else if err.is_decode() {
        SourceFailure::shape(err.to_string())
    } else {
        SourceFailure::transport(err.to_string())
    }
}

/// Contract every source variant implements.
#[async_trait]
pub trait SourceChecker: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn check(&self, identifier: &TaxId) -> Result<SourceResult, SourceFailure>;
}

/// Placeholder for sources without an automated check.
#[derive(Debug, Clone, Copy)]
pub struct NotImplementedChecker {
    kind: SourceKind,
}

impl NotImplementedChecker {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl SourceChecker for NotImplementedChecker {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn check(&self, _identifier: &TaxId) -> Result<SourceResult, SourceFailure> {
        Err(SourceFailure::new(
            FailureReason::NotImplemented,
            format!("no automated check for {}", self.kind.label()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_implemented_checker_reports_reason() {
        let checker = NotImplementedChecker::new(SourceKind::CndFederal);
        let id = TaxId::parse("11222333000181").expect("valid");
        let failure = checker.check(&id).await.expect_err("always fails");
        assert_eq!(failure.reason, FailureReason::NotImplemented);
        assert!(failure.detail().starts_with("not verified (not_implemented)"));
    }

    #[test]
    fn failure_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FailureReason::UnexpectedResponseShape).expect("json");
        assert_eq!(json, "\"unexpected_response_shape\"");
    }
}
