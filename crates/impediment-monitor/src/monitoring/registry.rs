use std::sync::Arc;

use tracing::{debug, info, warn};

use super::checkers::CompanyNameLookup;
use super::domain::{Company, NewCompany, PENDING_LOOKUP_NAME};
use super::store::{MonitoringStore, StoreError};
use crate::identifier::TaxId;

/// Get-or-create access to company records keyed by identifier.
pub struct CompanyRegistry<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for CompanyRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

/// Trimmed name, or `None` for blanks and the placeholder itself.
fn confirmed_name(name: Option<&str>) -> Option<&str> {
    name.map(str::trim)
        .filter(|name| !name.is_empty() && *name != PENDING_LOOKUP_NAME)
}

impl<S> CompanyRegistry<S>
where
    S: MonitoringStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns the company for `identifier`, creating it when unseen.
    ///
    /// A known name only replaces the placeholder; a confirmed name is never overwritten.
    /// Concurrent first-time calls converge on the single stored record.
    pub async fn resolve_or_create(
        &self,
        identifier: &TaxId,
        known_name: Option<&str>,
    ) -> Result<Company, RegistryError> {
        let known_name = confirmed_name(known_name);

        let company = match self.store.find_company_by_identifier(identifier).await? {
            Some(company) => company,
            None => {
                let candidate = NewCompany {
                    identifier: identifier.clone(),
                    display_name: known_name.unwrap_or(PENDING_LOOKUP_NAME).to_string(),
                    contract_reference: None,
                };
                self.insert_or_reread(candidate).await?
            }
        };

        match known_name {
            Some(name) if company.has_placeholder_name() => self.adopt_name(company, name).await,
            _ => Ok(company),
        }
    }

    /// Explicit registration from an import. Re-registering an existing identifier behaves
    /// like [`CompanyRegistry::resolve_or_create`] with the supplied name.
    pub async fn register(
        &self,
        identifier: &TaxId,
        display_name: &str,
        contract_reference: Option<&str>,
    ) -> Result<Company, RegistryError> {
        let candidate = NewCompany {
            identifier: identifier.clone(),
            display_name: confirmed_name(Some(display_name))
                .unwrap_or(PENDING_LOOKUP_NAME)
                .to_string(),
            contract_reference: contract_reference
                .map(str::trim)
                .filter(|reference| !reference.is_empty())
                .map(str::to_string),
        };

        match self.store.insert_company(candidate).await {
            Ok(company) => {
                info!(%identifier, company_id = %company.id, "company registered");
                Ok(company)
            }
            Err(StoreError::Conflict) => {
                self.resolve_or_create(identifier, Some(display_name)).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Replaces placeholder names with names found by `lookup`. Returns how many changed.
    pub async fn reconcile_placeholders(
        &self,
        lookup: &dyn CompanyNameLookup,
    ) -> Result<usize, RegistryError> {
        let pending: Vec<Company> = self
            .store
            .list_companies()
            .await?
            .into_iter()
            .filter(Company::has_placeholder_name)
            .collect();

        let mut renamed = 0;
        for company in pending {
            match lookup.lookup_name(&company.identifier).await {
                Ok(Some(name)) => {
                    let Some(name) = confirmed_name(Some(name.as_str())) else {
                        continue;
                    };
                    if self
                        .store
                        .update_company_name(company.id, PENDING_LOOKUP_NAME, name)
                        .await?
                        .is_some()
                    {
                        info!(
                            identifier = %company.identifier,
                            company_id = %company.id,
                            "placeholder name reconciled"
                        );
                        renamed += 1;
                    }
                }
                Ok(None) => {
                    debug!(identifier = %company.identifier, "no public name found");
                }
                Err(failure) => {
                    warn!(
                        identifier = %company.identifier,
                        reason = %failure.reason,
                        error = %failure.message,
                        "name lookup failed"
                    );
                }
            }
        }

        Ok(renamed)
    }

    async fn insert_or_reread(&self, candidate: NewCompany) -> Result<Company, RegistryError> {
        let identifier = candidate.identifier.clone();
        match self.store.insert_company(candidate).await {
            Ok(company) => {
                info!(
                    %identifier,
                    company_id = %company.id,
                    name = %company.display_name,
                    "company created"
                );
                Ok(company)
            }
            Err(StoreError::Conflict) => {
                debug!(%identifier, "concurrent create detected, reading existing company");
                self.store
                    .find_company_by_identifier(&identifier)
                    .await?
                    .ok_or(RegistryError::Vanished(identifier))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn adopt_name(&self, company: Company, name: &str) -> Result<Company, RegistryError> {
        match self
            .store
            .update_company_name(company.id, PENDING_LOOKUP_NAME, name)
            .await?
        {
            Some(updated) => {
                info!(
                    identifier = %updated.identifier,
                    company_id = %updated.id,
                    "company name confirmed"
                );
                Ok(updated)
            }
            // Another writer confirmed a name first; theirs sticks.
            None => self
                .store
                .find_company_by_identifier(&company.identifier)
                .await?
                .ok_or(RegistryError::Vanished(company.identifier)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("company {0} disappeared during resolution")]
    Vanished(TaxId),
}
