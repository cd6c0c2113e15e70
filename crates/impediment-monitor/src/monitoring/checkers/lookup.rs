use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::{classify_http_error, SourceFailure};
use crate::identifier::TaxId;

/// Resolves the registered legal name of a company.
#[async_trait]
pub trait CompanyNameLookup: Send + Sync {
    /// `Ok(None)` means the providers answered but none knew a name.
    async fn lookup_name(&self, identifier: &TaxId) -> Result<Option<String>, SourceFailure>;
}

/// One public company-registry API: `url_template` carries a `{id}` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameProvider {
    pub url_template: String,
    pub name_field: String,
}

impl NameProvider {
    pub fn new(url_template: impl Into<String>, name_field: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            name_field: name_field.into(),
        }
    }

    fn url_for(&self, identifier: &TaxId) -> String {
        self.url_template.replace("{id}", identifier.as_str())
    }

    fn name_from(&self, body: &Value) -> Option<String> {
        body.get(&self.name_field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("https://receitaws.com.br/v1/cnpj/{id}", "nome"),
            Self::new("https://brasilapi.com.br/api/cnpj/v1/{id}", "razao_social"),
            Self::new("https://publica.cnpj.ws/cnpj/{id}", "razao_social"),
        ]
    }
}

/// Tries each provider in order, pausing between attempts; free tiers rate-limit hard.
pub struct PublicRegistryLookup {
    http: Client,
    providers: Vec<NameProvider>,
    pause: Duration,
}

impl PublicRegistryLookup {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_providers(NameProvider::defaults(), timeout, Duration::from_secs(1))
    }

    pub fn with_providers(
        providers: Vec<NameProvider>,
        timeout: Duration,
        pause: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            providers,
            pause,
        })
    }

    async fn ask(
        &self,
        provider: &NameProvider,
        identifier: &TaxId,
    ) -> Result<Option<String>, SourceFailure> {
        let response = self
            .http
            .get(provider.url_for(identifier))
            .send()
            .await
            .map_err(|err| classify_http_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceFailure::transport(format!("HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| classify_http_error(&err))?;
        Ok(provider.name_from(&body))
    }
}

#[async_trait]
impl CompanyNameLookup for PublicRegistryLookup {
    async fn lookup_name(&self, identifier: &TaxId) -> Result<Option<String>, SourceFailure> {
        let mut answered = false;
        let mut last_failure = None;

        for (attempt, provider) in self.providers.iter().enumerate() {
            if attempt > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            match self.ask(provider, identifier).await {
                Ok(Some(name)) => {
                    debug!(%identifier, provider = %provider.url_template, "company name resolved");
                    return Ok(Some(name));
                }
                Ok(None) => answered = true,
                Err(failure) => {
                    warn!(
                        %identifier,
                        provider = %provider.url_template,
                        error = %failure,
                        "name provider failed"
                    );
                    last_failure = Some(failure);
                }
            }
        }

        match last_failure {
            Some(failure) if !answered => Err(failure),
            _ => Ok(None),
        }
    }
}
