//! Fan-out of one verification run across every configured source.
//!
//! Per run: validate, resolve the company, check all sources concurrently (each under its
//! own timeout and concurrency cap), persist each result as it arrives, then aggregate.
//! Only a registry failure aborts a run; source and store failures are folded into the
//! report.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::batch::BatchItem;
use super::checkers::{FailureReason, SourceChecker, SourceFailure, SourceResult};
use super::domain::{
    aggregate_verdict, Company, NewRejectedVerification, NewVerificationResult, SourceKind,
};
use super::registry::{CompanyRegistry, RegistryError};
use super::store::MonitoringStore;
use crate::identifier::TaxId;

pub const INVALID_IDENTIFIER_DETAIL: &str = "invalid identifier, not checked";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub source_timeout: Duration,
    pub per_source_concurrency: usize,
    pub batch_concurrency: usize,
    pub batch_pause: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(20),
            per_source_concurrency: 2,
            batch_concurrency: 4,
            batch_pause: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Done,
    IdentifierInvalid,
}

/// Outcome of one source within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_kind: SourceKind,
    pub regular: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub persisted: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Canonical digits for valid input, the raw input otherwise.
    pub identifier: String,
    pub state: VerificationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<Company>,
    pub regular: bool,
    pub sources: Vec<SourceReport>,
    /// Sources whose result could not be written; callers may retry the write.
    pub unpersisted: Vec<SourceKind>,
}

impl VerificationReport {
    pub fn source(&self, kind: SourceKind) -> Option<&SourceReport> {
        self.sources.iter().find(|source| source.source_kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Completed { report: VerificationReport },
    Failed { identifier: String, error: String },
    Skipped { identifier: String },
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorFailure {
    #[error("could not resolve company {identifier}: {source}")]
    Registry {
        identifier: TaxId,
        #[source]
        source: RegistryError,
    },
}

struct ConfiguredSource {
    checker: Arc<dyn SourceChecker>,
    permits: Arc<Semaphore>,
}

pub struct VerificationOrchestrator<S: ?Sized> {
    registry: CompanyRegistry<S>,
    store: Arc<S>,
    sources: Vec<ConfiguredSource>,
    settings: OrchestratorSettings,
}

impl<S> VerificationOrchestrator<S>
where
    S: MonitoringStore + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        checkers: Vec<Arc<dyn SourceChecker>>,
        settings: OrchestratorSettings,
    ) -> Self {
        let permits_per_source = settings.per_source_concurrency.max(1);
        let sources = checkers
            .into_iter()
            .map(|checker| ConfiguredSource {
                checker,
                permits: Arc::new(Semaphore::new(permits_per_source)),
            })
            .collect();

        Self {
            registry: CompanyRegistry::new(Arc::clone(&store)),
            store,
            sources,
            settings,
        }
    }

    pub fn registry(&self) -> &CompanyRegistry<S> {
        &self.registry
    }

    pub fn source_kinds(&self) -> Vec<SourceKind> {
        self.sources
            .iter()
            .map(|source| source.checker.kind())
            .collect()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn verify(
        &self,
        raw_identifier: &str,
        known_name: Option<&str>,
    ) -> Result<VerificationReport, OrchestratorFailure> {
        let identifier = match TaxId::parse(raw_identifier) {
            Ok(identifier) => identifier,
            Err(err) => {
                warn!(identifier = raw_identifier, error = %err, "identifier rejected");
                return Ok(self.invalid_report(raw_identifier, err.to_string()).await);
            }
        };

        let company = self
            .registry
            .resolve_or_create(&identifier, known_name)
            .await
            .map_err(|source| {
                error!(%identifier, error = %source, "company resolution failed");
                OrchestratorFailure::Registry {
                    identifier: identifier.clone(),
                    source,
                }
            })?;
        debug!(
            %identifier,
            company_id = %company.id,
            sources = self.sources.len(),
            "checking sources"
        );

        let checks = self
            .sources
            .iter()
            .map(|source| self.check_and_persist(source, &company));
        let sources = join_all(checks).await;

        let regular = aggregate_verdict(sources.iter().map(|source| source.regular));
        let unpersisted: Vec<SourceKind> = sources
            .iter()
            .filter(|source| !source.persisted)
            .map(|source| source.source_kind)
            .collect();
        info!(
            %identifier,
            company_id = %company.id,
            regular,
            unpersisted = unpersisted.len(),
            "verification finished"
        );

        Ok(VerificationReport {
            identifier: identifier.as_str().to_string(),
            state: VerificationState::Done,
            invalid_reason: None,
            company: Some(company),
            regular,
            sources,
            unpersisted,
        })
    }

    /// Verifies `items` with bounded concurrency, returning outcomes in input order.
    /// Items not started before `cancel` fires are reported as skipped.
    pub async fn verify_batch(
        &self,
        items: Vec<BatchItem>,
        cancel: &CancellationToken,
    ) -> Vec<BatchOutcome> {
        let concurrency = self.settings.batch_concurrency.max(1);
        let pause = self.settings.batch_pause;
        let total = items.len();

        let outcomes: Vec<BatchOutcome> = stream::iter(items)
            .map(|item| async move {
                if cancel.is_cancelled() {
                    return BatchOutcome::Skipped {
                        identifier: item.identifier,
                    };
                }

                let outcome = match self.verify(&item.identifier, item.name.as_deref()).await {
                    Ok(report) => BatchOutcome::Completed { report },
                    Err(err) => BatchOutcome::Failed {
                        identifier: item.identifier,
                        error: err.to_string(),
                    },
                };
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                outcome
            })
            .buffered(concurrency)
            .collect()
            .await;

        let skipped = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, BatchOutcome::Skipped { .. }))
            .count();
        info!(total, skipped, "batch finished");
        outcomes
    }

    /// Every configured source is reported unchecked, and each is recorded as a rejected
    /// run so the attempt stays in the audit trail.
    async fn invalid_report(&self, raw_identifier: &str, reason: String) -> VerificationReport {
        let writes = self.sources.iter().map(|source| {
            let source_kind = source.checker.kind();
            let record = NewRejectedVerification {
                raw_identifier: raw_identifier.to_string(),
                source_kind,
                reason: reason.clone(),
                detail: INVALID_IDENTIFIER_DETAIL.to_string(),
            };
            async move {
                let (persisted, checked_at) =
                    match self.store.insert_rejected_verification(record).await {
                        Ok(stored) => (true, stored.checked_at),
                        Err(err) => {
                            error!(
                                identifier = raw_identifier,
                                source = %source_kind,
                                error = %err,
                                "rejected verification not persisted"
                            );
                            (false, Utc::now())
                        }
                    };
                SourceReport {
                    source_kind,
                    regular: false,
                    detail: INVALID_IDENTIFIER_DETAIL.to_string(),
                    failure: None,
                    persisted,
                    checked_at,
                }
            }
        });
        let sources: Vec<SourceReport> = join_all(writes).await;
        let unpersisted = sources
            .iter()
            .filter(|source| !source.persisted)
            .map(|source| source.source_kind)
            .collect();

        VerificationReport {
            identifier: raw_identifier.to_string(),
            state: VerificationState::IdentifierInvalid,
            invalid_reason: Some(reason),
            company: None,
            regular: false,
            sources,
            unpersisted,
        }
    }

    async fn check_and_persist(
        &self,
        source: &ConfiguredSource,
        company: &Company,
    ) -> SourceReport {
        let kind = source.checker.kind();
        let outcome = run_check(source, &company.identifier, self.settings.source_timeout).await;

        let (regular, detail, failure) = match outcome {
            Ok(SourceResult { regular, detail }) => {
                debug!(
                    identifier = %company.identifier,
                    source = %kind,
                    regular,
                    "source answered"
                );
                (regular, detail, None)
            }
            Err(failure) => {
                warn!(
                    identifier = %company.identifier,
                    source = %kind,
                    reason = %failure.reason,
                    error = %failure.message,
                    "source not verified"
                );
                (false, failure.detail(), Some(failure.reason))
            }
        };

        let record = NewVerificationResult {
            company_id: company.id,
            source_kind: kind,
            regular,
            detail: detail.clone(),
        };
        let (persisted, checked_at) = match self.store.insert_verification_result(record).await {
            Ok(stored) => (true, stored.checked_at),
            Err(err) => {
                error!(
                    identifier = %company.identifier,
                    company_id = %company.id,
                    source = %kind,
                    error = %err,
                    "verification result not persisted"
                );
                (false, Utc::now())
            }
        };

        SourceReport {
            source_kind: kind,
            regular,
            detail,
            failure,
            persisted,
            checked_at,
        }
    }
}

/// Runs one checker on its own task so a panic or hang stays contained to that source.
async fn run_check(
    source: &ConfiguredSource,
    identifier: &TaxId,
    timeout: Duration,
) -> Result<SourceResult, SourceFailure> {
    let checker = Arc::clone(&source.checker);
    let permits = Arc::clone(&source.permits);
    let identifier = identifier.clone();

    let task = tokio::spawn(async move {
        let _permit = permits
            .acquire_owned()
            .await
            .map_err(|_| SourceFailure::transport("source limiter closed"))?;
        match tokio::time::timeout(timeout, checker.check(&identifier)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SourceFailure::timeout(format!(
                "no answer within {} ms",
                timeout.as_millis()
            ))),
        }
    });

    match task.await {
        Ok(outcome) => outcome,
        Err(err) => Err(SourceFailure::transport(format!("checker aborted: {err}"))),
    }
}
