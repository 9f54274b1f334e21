//! Catalog adapter for the relational-store cluster.
//!
//! The cluster's backup tool is asked for its structured JSON listing
//! (never the free-text report): an array of entries carrying a label,
//! a backup type (`full`, `incr`, `diff`), the stop timestamp of the
//! backup, an optional size, and the prior label an incremental depends
//! on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{LocalResult, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use syncpoint_common::{ArtifactKind, BackupArtifact, Error, Result, SubsystemControl};

use crate::{drop_inverted_chains, sort_newest_first, CatalogAdapter};

/// One entry of the cluster backup tool's JSON listing.
#[derive(Debug, Deserialize)]
struct RawEntry {
    label: String,
    #[serde(rename = "type")]
    backup_type: String,
    timestamp: RawTimestamp,
    #[serde(default)]
    info: RawInfo,
    #[serde(default)]
    prior: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTimestamp {
    /// Seconds since epoch at which the backup completed
    stop: i64,
}

#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    size: Option<u64>,
}

/// Normalizes the relational cluster's backup listing.
pub struct RelationalClusterAdapter {
    system_id: String,
    control: Arc<dyn SubsystemControl>,
}

impl RelationalClusterAdapter {
    pub fn new(system_id: impl Into<String>, control: Arc<dyn SubsystemControl>) -> Self {
        Self {
            system_id: system_id.into(),
            control,
        }
    }

    fn normalize(&self, body: &str) -> Result<Vec<BackupArtifact>> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(body).map_err(|e| {
            Error::Parse(format!(
                "relational listing for {} is not a JSON array: {}",
                self.system_id, e
            ))
        })?;

        let mut artifacts = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(artifact) = self.normalize_entry(entry) {
                artifacts.push(artifact);
            }
        }

        let mut artifacts = drop_inverted_chains(artifacts);
        sort_newest_first(&mut artifacts);
        Ok(artifacts)
    }

    fn normalize_entry(&self, value: serde_json::Value) -> Option<BackupArtifact> {
        let entry: RawEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(system = %self.system_id, error = %e, "skipping malformed listing entry");
                return None;
            }
        };

        let kind = match entry.backup_type.as_str() {
            "full" => ArtifactKind::Full,
            "incr" | "diff" => ArtifactKind::Incremental,
            other => {
                warn!(
                    system = %self.system_id,
                    label = %entry.label,
                    backup_type = %other,
                    "skipping entry with unknown backup type"
                );
                return None;
            }
        };

        let created_at = match Utc.timestamp_opt(entry.timestamp.stop, 0) {
            LocalResult::Single(instant) => instant,
            _ => {
                warn!(
                    system = %self.system_id,
                    label = %entry.label,
                    stop = entry.timestamp.stop,
                    "skipping entry with out-of-range stop timestamp"
                );
                return None;
            }
        };

        let chain_parent = match kind {
            ArtifactKind::Incremental => entry.prior,
            _ => None,
        };

        Some(BackupArtifact {
            system_id: self.system_id.clone(),
            artifact_id: entry.label,
            kind,
            created_at,
            size_bytes: entry.info.size,
            chain_parent,
        })
    }
}

#[async_trait]
impl CatalogAdapter for RelationalClusterAdapter {
    fn system_id(&self) -> &str {
        &self.system_id
    }

    async fn list_artifacts(&self) -> Result<Vec<BackupArtifact>> {
        let body = self.control.list_raw_backups().await?;
        let artifacts = self.normalize(&body)?;
        debug!(
            system = %self.system_id,
            count = artifacts.len(),
            "normalized relational backup listing"
        );
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubControl {
        system_id: String,
        body: std::result::Result<String, String>,
    }

    impl StubControl {
        fn listing(body: &str) -> Arc<Self> {
            Arc::new(Self {
                system_id: "pg-main".into(),
                body: Ok(body.to_string()),
            })
        }

        fn unavailable() -> Arc<Self> {
            Arc::new(Self {
                system_id: "pg-main".into(),
                body: Err("connection refused".to_string()),
            })
        }
    }

    #[async_trait]
    impl SubsystemControl for StubControl {
        fn system_id(&self) -> &str {
            &self.system_id
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn clear_data(&self) -> Result<()> {
            Ok(())
        }
        async fn restore_artifact(&self, _artifact_id: &str) -> Result<()> {
            Ok(())
        }
        async fn is_recovering(&self) -> Result<bool> {
            Ok(false)
        }
        async fn promote(&self) -> Result<()> {
            Ok(())
        }
        async fn create_backup(&self, _kind: ArtifactKind) -> Result<BackupArtifact> {
            Err(Error::Internal("not used".into()))
        }
        async fn list_raw_backups(&self) -> Result<String> {
            self.body
                .clone()
                .map_err(|e| Error::AdapterUnavailable(e))
        }
    }

    const LISTING: &str = r#"[
        {"label": "20250801-120000F", "type": "full",
         "timestamp": {"start": 1754047800, "stop": 1754049600},
         "info": {"size": 1048576}},
        {"label": "20250801-120000F_20250801-180000I", "type": "incr",
         "timestamp": {"start": 1754070600, "stop": 1754071200},
         "info": {"size": 65536}, "prior": "20250801-120000F"}
    ]"#;

    #[tokio::test]
    async fn normalizes_full_and_incremental_entries() {
        let adapter = RelationalClusterAdapter::new("pg-main", StubControl::listing(LISTING));
        let artifacts = adapter.list_artifacts().await.unwrap();

        assert_eq!(artifacts.len(), 2);
        // Newest first.
        assert_eq!(artifacts[0].artifact_id, "20250801-120000F_20250801-180000I");
        assert_eq!(artifacts[0].kind, ArtifactKind::Incremental);
        assert_eq!(
            artifacts[0].chain_parent.as_deref(),
            Some("20250801-120000F")
        );
        assert_eq!(artifacts[1].kind, ArtifactKind::Full);
        assert_eq!(artifacts[1].size_bytes, Some(1048576));
        assert!(artifacts[1].chain_parent.is_none());
    }

    #[tokio::test]
    async fn one_bad_entry_does_not_discard_the_rest() {
        let body = r#"[
            {"label": "good", "type": "full", "timestamp": {"stop": 1754049600}},
            {"label": "bad", "type": "full"},
            {"label": "weird", "type": "lunar", "timestamp": {"stop": 1754049700}}
        ]"#;
        let adapter = RelationalClusterAdapter::new("pg-main", StubControl::listing(body));
        let artifacts = adapter.list_artifacts().await.unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].artifact_id, "good");
    }

    #[tokio::test]
    async fn unparsable_listing_is_a_parse_error() {
        let adapter = RelationalClusterAdapter::new("pg-main", StubControl::listing("not json"));
        let err = adapter.list_artifacts().await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn unreachable_subsystem_propagates() {
        let adapter = RelationalClusterAdapter::new("pg-main", StubControl::unavailable());
        let err = adapter.list_artifacts().await.unwrap_err();
        assert!(matches!(err, Error::AdapterUnavailable(_)));
    }

    #[tokio::test]
    async fn inverted_chain_is_dropped() {
        let body = r#"[
            {"label": "newer-full", "type": "full", "timestamp": {"stop": 1754090000}},
            {"label": "orphan", "type": "incr", "timestamp": {"stop": 1754080000},
             "prior": "newer-full"}
        ]"#;
        let adapter = RelationalClusterAdapter::new("pg-main", StubControl::listing(body));
        let artifacts = adapter.list_artifacts().await.unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].artifact_id, "newer-full");
    }

    #[tokio::test]
    async fn describe_resolves_by_id() {
        let adapter = RelationalClusterAdapter::new("pg-main", StubControl::listing(LISTING));
        let artifact = adapter.describe("20250801-120000F").await.unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Full);

        let missing = adapter.describe("nope").await.unwrap_err();
        assert!(matches!(missing, Error::NotFound(_)));
    }
}
