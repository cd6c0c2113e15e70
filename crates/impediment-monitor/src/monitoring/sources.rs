use std::sync::Arc;

use tracing::{info, warn};

use super::checkers::{
    DebtorPageSource, DebtorRegistryChecker, DebtorSection, HttpDebtorPageSource,
    NotImplementedChecker, SourceChecker, TransparencyChecker, TransparencyPortalClient,
};
use super::domain::SourceKind;
use crate::config::SourcesConfig;

#[derive(Debug, thiserror::Error)]
pub enum CheckerBuildError {
    #[error("could not build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// One checker per enabled source; clients are shared between sources of the same registry.
pub fn build_checkers(
    config: &SourcesConfig,
) -> Result<Vec<Arc<dyn SourceChecker>>, CheckerBuildError> {
    let mut transparency: Option<Arc<TransparencyPortalClient>> = None;
    let mut debtor_pages: Option<Arc<dyn DebtorPageSource>> = None;
    let mut checkers: Vec<Arc<dyn SourceChecker>> = Vec::with_capacity(config.enabled.len());

    if config.transparency_api_key.is_none()
        && config
            .enabled
            .iter()
            .any(|kind| matches!(kind, SourceKind::Ceis | SourceKind::Cnep | SourceKind::Cepim))
    {
        warn!(
            "no transparency api key configured; CEIS, CNEP and CEPIM will report transport errors"
        );
    }

    for kind in &config.enabled {
        let checker: Arc<dyn SourceChecker> = match kind {
            SourceKind::Ceis | SourceKind::Cnep | SourceKind::Cepim => {
                let client = match &transparency {
                    Some(client) => Arc::clone(client),
                    None => {
                        let client = Arc::new(TransparencyPortalClient::new(
                            &config.transparency_api_url,
                            config.transparency_api_key.clone(),
                            config.request_timeout,
                            config.transparency_max_pages,
                        )?);
                        transparency = Some(Arc::clone(&client));
                        client
                    }
                };
                match kind {
                    SourceKind::Ceis => Arc::new(TransparencyChecker::ceis(client)),
                    SourceKind::Cnep => Arc::new(TransparencyChecker::cnep(client)),
                    _ => Arc::new(TransparencyChecker::cepim(client)),
                }
            }
            SourceKind::Cadin | SourceKind::Cfil => {
                let pages = match &debtor_pages {
                    Some(pages) => Arc::clone(pages),
                    None => {
                        let pages: Arc<dyn DebtorPageSource> = Arc::new(HttpDebtorPageSource::new(
                            &config.debtor_registry_url,
                            config.request_timeout,
                        )?);
                        debtor_pages = Some(Arc::clone(&pages));
                        pages
                    }
                };
                let section = if *kind == SourceKind::Cadin {
                    DebtorSection::Cadin
                } else {
                    DebtorSection::Cfil
                };
                Arc::new(DebtorRegistryChecker::new(section, pages))
            }
            SourceKind::CndFederal => Arc::new(NotImplementedChecker::new(*kind)),
        };
        checkers.push(checker);
    }

    info!(
        sources = ?checkers.iter().map(|checker| checker.kind().tag()).collect::<Vec<_>>(),
        "source checkers configured"
    );
    Ok(checkers)
}
