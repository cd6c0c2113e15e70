use crate::config::ConfigError;
use crate::monitoring::batch::BatchInputError;
use crate::monitoring::certificates::CertificateError;
use crate::monitoring::orchestrator::OrchestratorFailure;
use crate::monitoring::purge::PurgeError;
use crate::monitoring::sources::CheckerBuildError;
use crate::monitoring::status::QueryError;
use crate::monitoring::store::StoreError;
use crate::monitoring::registry::RegistryError;
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Store(StoreError),
    Checkers(CheckerBuildError),
    BatchInput(BatchInputError),
    Registry(RegistryError),
    Orchestrator(OrchestratorFailure),
    Query(QueryError),
    Certificate(CertificateError),
    Purge(PurgeError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Store(err) => write!(f, "store error: {}", err),
            AppError::Checkers(err) => write!(f, "source setup error: {}", err),
            AppError::BatchInput(err) => write!(f, "batch input error: {}", err),
            AppError::Registry(err) => write!(f, "registry error: {}", err),
            AppError::Orchestrator(err) => write!(f, "verification error: {}", err),
            AppError::Query(err) => write!(f, "query error: {}", err),
            AppError::Certificate(err) => write!(f, "certificate error: {}", err),
            AppError::Purge(err) => write!(f, "purge error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Checkers(err) => Some(err),
            AppError::BatchInput(err) => Some(err),
            AppError::Registry(err) => Some(err),
            AppError::Orchestrator(err) => Some(err),
            AppError::Query(err) => Some(err),
            AppError::Certificate(err) => Some(err),
            AppError::Purge(err) => Some(err),
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BatchInput(_)
            | AppError::Query(QueryError::InvalidIdentifier(_))
            | AppError::Certificate(
                CertificateError::InvalidIdentifier(_)
                | CertificateError::MissingNumber
                | CertificateError::InvalidValidity { .. },
            ) => StatusCode::BAD_REQUEST,
            AppError::Query(QueryError::UnknownCompany(_))
            | AppError::Certificate(CertificateError::UnknownCompany(_)) => StatusCode::NOT_FOUND,
            AppError::Purge(PurgeError::UnknownToken | PurgeError::Expired) => StatusCode::CONFLICT,
            AppError::Store(err)
            | AppError::Query(QueryError::Store(err))
            | AppError::Certificate(CertificateError::Store(err))
            | AppError::Purge(PurgeError::Store(err))
            | AppError::Registry(RegistryError::Store(err)) => store_status(err),
            AppError::Orchestrator(_) | AppError::Certificate(CertificateError::Registry(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Checkers(_)
            | AppError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<CheckerBuildError> for AppError {
    fn from(value: CheckerBuildError) -> Self {
        Self::Checkers(value)
    }
}

impl From<BatchInputError> for AppError {
    fn from(value: BatchInputError) -> Self {
        Self::BatchInput(value)
    }
}

impl From<RegistryError> for AppError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<OrchestratorFailure> for AppError {
    fn from(value: OrchestratorFailure) -> Self {
        Self::Orchestrator(value)
    }
}

impl From<QueryError> for AppError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<CertificateError> for AppError {
    fn from(value: CertificateError) -> Self {
        Self::Certificate(value)
    }
}

impl From<PurgeError> for AppError {
    fn from(value: PurgeError) -> Self {
        Self::Purge(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::TaxId;

    #[test]
    fn maps_domain_errors_to_status_codes() {
        let unknown = TaxId::parse("11222333000181").expect("valid");
        let cases = [
            (
                AppError::from(QueryError::UnknownCompany(unknown)),
                StatusCode::NOT_FOUND,
            ),
            (AppError::from(PurgeError::Expired), StatusCode::CONFLICT),
            (
                AppError::from(StoreError::Unavailable("down".to_string())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AppError::from(BatchInputError::Empty), StatusCode::BAD_REQUEST),
            (
                AppError::from(CertificateError::MissingNumber),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::from(ConfigError::InvalidPort),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
