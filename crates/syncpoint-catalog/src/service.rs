//! Cached, multi-system view over the catalog adapters.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{info, warn};

use syncpoint_common::{BackupArtifact, Error, Result, SystemId};

use crate::CatalogAdapter;

/// Result of refreshing one system's listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Listing refreshed; carries the artifact count.
    Refreshed(usize),
    /// Refresh failed; the cached listing (if any) is left in place.
    Failed(String),
}

/// Per-system refresh outcomes. One system's failure never hides the
/// others' results.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub per_system: BTreeMap<SystemId, RefreshOutcome>,
}

impl RefreshReport {
    pub fn all_refreshed(&self) -> bool {
        self.per_system
            .values()
            .all(|o| matches!(o, RefreshOutcome::Refreshed(_)))
    }
}

/// Registry of catalog adapters plus the last successfully refreshed
/// listing per system. Adapters are injected at construction.
pub struct CatalogService {
    adapters: BTreeMap<SystemId, Arc<dyn CatalogAdapter>>,
    listings: RwLock<BTreeMap<SystemId, Vec<BackupArtifact>>>,
}

impl CatalogService {
    pub fn new(adapters: Vec<Arc<dyn CatalogAdapter>>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|a| (a.system_id().to_string(), a))
            .collect();
        Self {
            adapters,
            listings: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registered systems, in stable order.
    pub fn systems(&self) -> Vec<SystemId> {
        self.adapters.keys().cloned().collect()
    }

    /// Refresh one system's listing and cache it. Returns the artifact
    /// count.
    pub async fn refresh(&self, system_id: &str) -> Result<usize> {
        let adapter = self
            .adapters
            .get(system_id)
            .ok_or_else(|| Error::NotFound(format!("no catalog adapter for system {}", system_id)))?
            .clone();

        // The adapter call may block on external I/O; take the lock only
        // once the listing is in hand.
        let artifacts = adapter.list_artifacts().await?;
        let count = artifacts.len();

        let mut listings = self.listings.write().await;
        listings.insert(system_id.to_string(), artifacts);
        drop(listings);

        info!(system = %system_id, count, "catalog refreshed");
        Ok(count)
    }

    /// Refresh every registered system concurrently. Failures are
    /// reported per system and do not abort the rest.
    pub async fn refresh_all(&self) -> RefreshReport {
        let refreshes = self.adapters.keys().map(|system_id| async move {
            let outcome = match self.refresh(system_id).await {
                Ok(count) => RefreshOutcome::Refreshed(count),
                Err(e) => {
                    warn!(system = %system_id, error = %e, "catalog refresh failed");
                    RefreshOutcome::Failed(e.to_string())
                }
            };
            (system_id.clone(), outcome)
        });

        RefreshReport {
            per_system: join_all(refreshes).await.into_iter().collect(),
        }
    }

    /// The cached listing of one system, if it has been refreshed.
    pub async fn listing(&self, system_id: &str) -> Option<Vec<BackupArtifact>> {
        self.listings.read().await.get(system_id).cloned()
    }

    /// Cached listings of every refreshed system, for the matcher.
    pub async fn snapshot(&self) -> BTreeMap<SystemId, Vec<BackupArtifact>> {
        self.listings.read().await.clone()
    }

    /// Resolve one artifact against the subsystem's current listing,
    /// bypassing the cache. Restore preflight uses this to confirm the
    /// artifact still exists.
    pub async fn describe(&self, system_id: &str, artifact_id: &str) -> Result<BackupArtifact> {
        let adapter = self
            .adapters
            .get(system_id)
            .ok_or_else(|| Error::NotFound(format!("no catalog adapter for system {}", system_id)))?;
        adapter.describe(artifact_id).await
    }
}
