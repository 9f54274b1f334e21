//! Catalog adapters for Syncpoint.
//!
//! Each adapter queries one subsystem's native backup-listing capability
//! through its `SubsystemControl` and exposes a normalized, newest-first
//! artifact list. Adapters are read-only: a refresh never mutates the
//! subsystem.
//!
//! A parse failure for a single listing entry never discards the rest of
//! the listing; the entry is skipped with a warning. Only an unparsable
//! listing body fails the whole call.

pub mod object_log;
pub mod relational;
pub mod service;

pub use object_log::ObjectStoreLogAdapter;
pub use relational::RelationalClusterAdapter;
pub use service::{CatalogService, RefreshOutcome, RefreshReport};

use async_trait::async_trait;
use tracing::warn;

use syncpoint_common::{BackupArtifact, Error, Result};

/// Capability of one subsystem's catalog: list and describe.
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// The subsystem this adapter serves.
    fn system_id(&self) -> &str;

    /// Normalized artifact list, newest first.
    ///
    /// Fails with [`Error::AdapterUnavailable`] when the subsystem cannot
    /// be queried and [`Error::Parse`] when the listing body itself cannot
    /// be normalized.
    async fn list_artifacts(&self) -> Result<Vec<BackupArtifact>>;

    /// Resolve a single artifact by id against the current listing.
    async fn describe(&self, artifact_id: &str) -> Result<BackupArtifact> {
        self.list_artifacts()
            .await?
            .into_iter()
            .find(|a| a.artifact_id == artifact_id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "artifact {} on system {}",
                    artifact_id,
                    self.system_id()
                ))
            })
    }
}

/// Drop entries whose `chain_parent` resolves to an artifact that is not
/// strictly earlier. An unresolvable parent is left alone here; the
/// matcher decides what an unanchored chain means.
pub(crate) fn drop_inverted_chains(artifacts: Vec<BackupArtifact>) -> Vec<BackupArtifact> {
    let instants: std::collections::HashMap<String, chrono::DateTime<chrono::Utc>> = artifacts
        .iter()
        .map(|a| (a.artifact_id.clone(), a.created_at))
        .collect();

    artifacts
        .into_iter()
        .filter(|a| {
            let Some(parent) = &a.chain_parent else {
                return true;
            };
            match instants.get(parent) {
                Some(parent_at) if *parent_at >= a.created_at => {
                    warn!(
                        system = %a.system_id,
                        artifact = %a.artifact_id,
                        parent = %parent,
                        "dropping artifact: chain parent is not strictly earlier"
                    );
                    false
                }
                _ => true,
            }
        })
        .collect()
}

/// Newest-first ordering shared by both adapters.
pub(crate) fn sort_newest_first(artifacts: &mut [BackupArtifact]) {
    artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
