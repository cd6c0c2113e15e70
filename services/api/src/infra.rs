use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use impediment_monitor::config::{AppConfig, StoreBackend, StoreConfig};
use impediment_monitor::error::AppError;
use impediment_monitor::monitoring::{
    build_checkers, CertificateKind, InMemoryMonitoringStore, MonitoringService, MonitoringStore,
    RestTableStore, SourceKind,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};

pub(crate) type SharedService = Arc<MonitoringService<dyn MonitoringStore>>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn build_store(config: &StoreConfig) -> Result<Arc<dyn MonitoringStore>, AppError> {
    match &config.backend {
        StoreBackend::Memory => {
            warn!("using the in-memory store; verification history is lost on exit");
            Ok(Arc::new(InMemoryMonitoringStore::default()))
        }
        StoreBackend::Rest { url, api_key } => {
            info!(%url, "using the rest table store");
            Ok(Arc::new(RestTableStore::new(url, api_key, config.timeout)?))
        }
    }
}

pub(crate) fn build_service(config: &AppConfig) -> Result<SharedService, AppError> {
    let store = build_store(&config.store)?;
    let checkers = build_checkers(&config.sources)?;
    Ok(Arc::new(MonitoringService::new(
        store,
        checkers,
        config.orchestrator.clone(),
        config.purge_token_ttl,
    )))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn parse_source_kind(raw: &str) -> Result<SourceKind, String> {
    raw.parse::<SourceKind>().map_err(|err| err.to_string())
}

pub(crate) fn parse_certificate_kind(raw: &str) -> Result<CertificateKind, String> {
    raw.parse::<CertificateKind>().map_err(|err| err.to_string())
}

pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
