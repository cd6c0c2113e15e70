use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::batch::BatchItem;
use super::certificates::{
    CertificateError, CertificateFilter, CertificateKind, CertificateRequest, StatusFilter,
    DEFAULT_EXPIRY_WINDOW_DAYS,
};
use super::domain::{ResultFilter, SourceKind};
use super::orchestrator::VerificationState;
use super::purge::PurgeError;
use super::service::MonitoringService;
use super::status::QueryError;
use super::store::{MonitoringStore, StoreError};

pub const DEFAULT_ALERT_WINDOW_DAYS: u32 = 30;

/// Router exposing verification, status, alert, certificate and purge endpoints.
pub fn monitoring_router<S>(service: Arc<MonitoringService<S>>) -> Router
where
    S: MonitoringStore + ?Sized + 'static,
{
    Router::new()
        .route("/api/v1/verifications", post(verify_handler::<S>))
        .route("/api/v1/verifications/batch", post(batch_handler::<S>))
        .route(
            "/api/v1/companies/:identifier/status",
            get(status_handler::<S>),
        )
        .route(
            "/api/v1/companies/:identifier/history",
            get(history_handler::<S>),
        )
        .route("/api/v1/alerts", get(alerts_handler::<S>))
        .route("/api/v1/rejections", get(rejections_handler::<S>))
        .route(
            "/api/v1/certificates",
            post(add_certificate_handler::<S>).get(list_certificates_handler::<S>),
        )
        .route(
            "/api/v1/certificates/expiring",
            get(expiring_certificates_handler::<S>),
        )
        .route(
            "/api/v1/companies/:identifier/certificates",
            get(company_certificates_handler::<S>),
        )
        .route("/api/v1/admin/purge", post(purge_request_handler::<S>))
        .route(
            "/api/v1/admin/purge/confirm",
            post(purge_confirm_handler::<S>),
        )
        .with_state(service)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({ "error": message.into() });
    (status, Json(payload)).into_response()
}

fn store_error_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn query_error_response(err: QueryError) -> Response {
    let status = match &err {
        QueryError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
        QueryError::UnknownCompany(_) => StatusCode::NOT_FOUND,
        QueryError::Store(store) => store_error_status(store),
    };
    error_response(status, err.to_string())
}

fn certificate_error_response(err: CertificateError) -> Response {
    let status = match &err {
        CertificateError::InvalidIdentifier(_)
        | CertificateError::MissingNumber
        | CertificateError::InvalidValidity { .. } => StatusCode::BAD_REQUEST,
        CertificateError::UnknownCompany(_) => StatusCode::NOT_FOUND,
        CertificateError::Registry(_) => StatusCode::SERVICE_UNAVAILABLE,
        CertificateError::Store(store) => store_error_status(store),
    };
    error_response(status, err.to_string())
}

#[derive(Debug, Deserialize)]
pub(crate) struct VerifyRequest {
    identifier: String,
    #[serde(default)]
    name: Option<String>,
}

pub(crate) async fn verify_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Json(request): Json<VerifyRequest>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    match service
        .orchestrator
        .verify(&request.identifier, request.name.as_deref())
        .await
    {
        Ok(report) if report.state == VerificationState::IdentifierInvalid => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(report)).into_response()
        }
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchRequest {
    items: Vec<BatchItem>,
}

pub(crate) async fn batch_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Json(request): Json<BatchRequest>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    if request.items.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "batch has no items");
    }

    let cancel = CancellationToken::new();
    let results = service
        .orchestrator
        .verify_batch(request.items, &cancel)
        .await;
    (StatusCode::OK, Json(json!({ "results": results }))).into_response()
}

pub(crate) async fn status_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Path(identifier): Path<String>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    match service.queries.current_status(&identifier).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(err) => query_error_response(err),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct HistoryParams {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    since: Option<DateTime<Utc>>,
}

pub(crate) async fn history_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Path(identifier): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    let source_kind = match params.source.as_deref().map(str::parse::<SourceKind>) {
        None => None,
        Some(Ok(kind)) => Some(kind),
        Some(Err(err)) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let filter = ResultFilter {
        source_kind,
        since: params.since,
    };

    match service.queries.history(&identifier, filter).await {
        Ok(history) => (StatusCode::OK, Json(json!({ "results": history }))).into_response(),
        Err(err) => query_error_response(err),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AlertParams {
    #[serde(default)]
    days: Option<u32>,
}

pub(crate) async fn alerts_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Query(params): Query<AlertParams>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    let days = params.days.unwrap_or(DEFAULT_ALERT_WINDOW_DAYS);
    let since = Utc::now() - Duration::days(i64::from(days));

    match service.queries.impeded_companies(since).await {
        Ok(companies) => (
            StatusCode::OK,
            Json(json!({ "since": since, "companies": companies })),
        )
            .into_response(),
        Err(err) => query_error_response(err),
    }
}

pub(crate) async fn rejections_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Query(params): Query<AlertParams>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    let days = params.days.unwrap_or(DEFAULT_ALERT_WINDOW_DAYS);
    let since = Utc::now() - Duration::days(i64::from(days));

    match service.queries.rejected_since(since).await {
        Ok(rejections) => (
            StatusCode::OK,
            Json(json!({ "since": since, "rejections": rejections })),
        )
            .into_response(),
        Err(err) => query_error_response(err),
    }
}

pub(crate) async fn add_certificate_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Json(request): Json<CertificateRequest>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    let today = Utc::now().date_naive();
    match service.certificates.add(request, today).await {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(err) => certificate_error_response(err),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CertificateParams {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    days: Option<u32>,
}

pub(crate) async fn list_certificates_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Query(params): Query<CertificateParams>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    let days = params.days.unwrap_or(DEFAULT_EXPIRY_WINDOW_DAYS);
    let status = match params.status.as_deref().map(|status| StatusFilter::parse(status, days)) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(err)) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let kind = match params.kind.as_deref().map(str::parse::<CertificateKind>) {
        None => None,
        Some(Ok(kind)) => Some(kind),
        Some(Err(err)) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let today = Utc::now().date_naive();
    match service
        .certificates
        .list(CertificateFilter { status, kind }, today)
        .await
    {
        Ok(companies) => (
            StatusCode::OK,
            Json(json!({ "today": today, "companies": companies })),
        )
            .into_response(),
        Err(err) => certificate_error_response(err),
    }
}

pub(crate) async fn expiring_certificates_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Query(params): Query<AlertParams>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    let days = params.days.unwrap_or(DEFAULT_EXPIRY_WINDOW_DAYS);
    let today = Utc::now().date_naive();

    match service.certificates.expiring(days, today).await {
        Ok(certificates) => (
            StatusCode::OK,
            Json(json!({ "today": today, "days": days, "certificates": certificates })),
        )
            .into_response(),
        Err(err) => certificate_error_response(err),
    }
}

pub(crate) async fn company_certificates_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Path(identifier): Path<String>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    let today = Utc::now().date_naive();
    match service.certificates.for_company(&identifier, today).await {
        Ok(certificates) => (StatusCode::OK, Json(certificates)).into_response(),
        Err(err) => certificate_error_response(err),
    }
}

pub(crate) async fn purge_request_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    let request = service.purge.request_purge();
    (StatusCode::ACCEPTED, Json(request)).into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct PurgeConfirmation {
    token: Uuid,
}

pub(crate) async fn purge_confirm_handler<S>(
    State(service): State<Arc<MonitoringService<S>>>,
    Json(confirmation): Json<PurgeConfirmation>,
) -> Response
where
    S: MonitoringStore + ?Sized + 'static,
{
    match service.purge.confirm_purge(confirmation.token).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err @ (PurgeError::UnknownToken | PurgeError::Expired)) => {
            error_response(StatusCode::CONFLICT, err.to_string())
        }
        Err(PurgeError::Store(err)) => error_response(store_error_status(&err), err.to_string()),
    }
}
