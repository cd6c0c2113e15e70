use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::monitoring::domain::SourceKind;
use crate::monitoring::orchestrator::OrchestratorSettings;

pub const DEFAULT_TRANSPARENCY_API_URL: &str =
    "https://api.portaldatransparencia.gov.br/api-de-dados";
pub const DEFAULT_DEBTOR_REGISTRY_URL: &str = "https://cadin.sefaz.rs.gov.br/";
const DEFAULT_ENABLED_SOURCES: &str = "CEIS,CNEP,CEPIM,CADIN,CFIL";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub sources: SourcesConfig,
    pub orchestrator: OrchestratorSettings,
    pub purge_token_ttl: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let orchestrator = OrchestratorSettings {
            source_timeout: Duration::from_secs(number("SOURCE_TIMEOUT_SECS", 20)?),
            per_source_concurrency: number("SOURCE_CONCURRENCY", 2)?,
            batch_concurrency: number("BATCH_CONCURRENCY", 4)?,
            batch_pause: Duration::from_millis(number("BATCH_PAUSE_MS", 0)?),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            store: StoreConfig::load()?,
            sources: SourcesConfig::load(orchestrator.source_timeout)?,
            orchestrator,
            purge_token_ttl: Duration::from_secs(number("PURGE_TOKEN_TTL_SECS", 120)?),
        })
    }
}

/// First non-blank value among `names`.
fn first_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn number<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match first_var(&[name]) {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Rest { url: String, api_key: String },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub timeout: Duration,
}

impl StoreConfig {
    fn load() -> Result<Self, ConfigError> {
        let timeout = Duration::from_secs(number("STORE_TIMEOUT_SECS", 15)?);
        let backend = match first_var(&["STORE_BACKEND"])
            .unwrap_or_else(|| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "rest" => StoreBackend::Rest {
                url: first_var(&["STORE_URL", "SUPABASE_URL"])
                    .ok_or(ConfigError::MissingSetting("STORE_URL"))?,
                api_key: first_var(&["STORE_API_KEY", "SUPABASE_KEY"])
                    .ok_or(ConfigError::MissingSetting("STORE_API_KEY"))?,
            },
            other => return Err(ConfigError::UnknownStoreBackend(other.to_string())),
        };
        Ok(Self { backend, timeout })
    }
}

/// Where and how the source checkers reach their registries.
#[derive(Debug, Clone)]
pub struct SourcesConfig {
    pub enabled: Vec<SourceKind>,
    pub transparency_api_url: String,
    pub transparency_api_key: Option<String>,
    pub transparency_max_pages: u32,
    pub debtor_registry_url: String,
    pub request_timeout: Duration,
}

impl SourcesConfig {
    fn load(request_timeout: Duration) -> Result<Self, ConfigError> {
        let enabled = parse_source_list(
            &first_var(&["ENABLED_SOURCES"]).unwrap_or_else(|| DEFAULT_ENABLED_SOURCES.to_string()),
        )?;

        Ok(Self {
            enabled,
            transparency_api_url: first_var(&["TRANSPARENCY_API_URL"])
                .unwrap_or_else(|| DEFAULT_TRANSPARENCY_API_URL.to_string()),
            transparency_api_key: first_var(&["TRANSPARENCY_API_KEY", "API_KEY"]),
            transparency_max_pages: number("TRANSPARENCY_MAX_PAGES", 5)?,
            debtor_registry_url: first_var(&["DEBTOR_REGISTRY_URL"])
                .unwrap_or_else(|| DEFAULT_DEBTOR_REGISTRY_URL.to_string()),
            request_timeout,
        })
    }
}

/// Comma separated source tags, duplicates dropped, order kept.
pub fn parse_source_list(raw: &str) -> Result<Vec<SourceKind>, ConfigError> {
    let mut kinds = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|tag| !tag.is_empty()) {
        let kind = tag
            .parse::<SourceKind>()
            .map_err(|_| ConfigError::UnknownSource(tag.to_string()))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str, value: String },
    MissingSetting(&'static str),
    UnknownStoreBackend(String),
    UnknownSource(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer, got '{value}'")
            }
            ConfigError::MissingSetting(name) => {
                write!(f, "{name} is required for the rest store backend")
            }
            ConfigError::UnknownStoreBackend(value) => {
                write!(f, "STORE_BACKEND must be 'memory' or 'rest', got '{value}'")
            }
            ConfigError::UnknownSource(tag) => write!(f, "unknown source tag '{tag}'"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
