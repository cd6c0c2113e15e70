//! Two-phase administrative purge: request a token, then confirm with it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::domain::PurgeSummary;
use super::store::{MonitoringStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeRequest {
    pub token: Uuid,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct PurgeCoordinator<S: ?Sized> {
    store: Arc<S>,
    ttl: Duration,
    pending: Mutex<HashMap<Uuid, PurgeRequest>>,
}

impl<S> PurgeCoordinator<S>
where
    S: MonitoringStore + ?Sized,
{
    pub fn new(store: Arc<S>, ttl: std::time::Duration) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(120));
        Self {
            store,
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<Uuid, PurgeRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues a single-use token. The request instant becomes the purge cutoff.
    pub fn request_purge(&self) -> PurgeRequest {
        let requested_at = Utc::now();
        let request = PurgeRequest {
            token: Uuid::new_v4(),
            requested_at,
            expires_at: requested_at + self.ttl,
        };

        let mut pending = self.pending();
        pending.retain(|_, existing| existing.expires_at > requested_at);
        pending.insert(request.token, request);
        info!(token = %request.token, expires_at = %request.expires_at, "purge requested");
        request
    }

    pub async fn confirm_purge(&self, token: Uuid) -> Result<PurgeSummary, PurgeError> {
        let pending = self.pending().remove(&token);
        let request = pending.ok_or(PurgeError::UnknownToken)?;

        if Utc::now() > request.expires_at {
            warn!(%token, "purge token expired");
            return Err(PurgeError::Expired);
        }

        let summary = self.store.purge(request.requested_at).await.map_err(|err| {
            warn!(%token, error = %err, "purge failed");
            PurgeError::Store(err)
        })?;
        info!(
            %token,
            companies_removed = summary.companies_removed,
            results_removed = summary.results_removed,
            rejections_removed = summary.rejections_removed,
            certificates_removed = summary.certificates_removed,
            "purge completed"
        );
        Ok(summary)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("purge token is unknown or already used")]
    UnknownToken,
    #[error("purge token expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}
