//! Catalog adapter for an object-store log-mirror bucket.
//!
//! The mirror writes two kinds of objects into its backup bucket, both
//! with the creation instant embedded in the key:
//!
//! - base snapshots:  `<prefix>-base-YYYY-MM-DD-HH-MM-SS-<suffix>`
//! - operation-log archives: `<prefix>-YYYY-MM-DD-HH-MM-SS-<suffix>`
//!
//! The native listing is one key per line. Archives are normalized as
//! incremental artifacts chained to the most recent earlier base
//! snapshot; an archive with no base snapshot before it cannot anchor a
//! restore chain and is skipped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, LocalResult, TimeZone, Utc};
use tracing::{debug, warn};

use syncpoint_common::{ArtifactKind, BackupArtifact, Error, Result, SubsystemControl};

use crate::{sort_newest_first, CatalogAdapter};

/// Normalizes a log-mirror bucket's key listing.
pub struct ObjectStoreLogAdapter {
    system_id: String,
    key_prefix: String,
    control: Arc<dyn SubsystemControl>,
}

impl ObjectStoreLogAdapter {
    pub fn new(
        system_id: impl Into<String>,
        key_prefix: impl Into<String>,
        control: Arc<dyn SubsystemControl>,
    ) -> Self {
        Self {
            system_id: system_id.into(),
            key_prefix: key_prefix.into(),
            control,
        }
    }

    fn normalize(&self, body: &str) -> Result<Vec<BackupArtifact>> {
        let mut parsed: Vec<(DateTime<Utc>, ArtifactKind, String)> = Vec::new();
        let mut candidates = 0usize;

        for line in body.lines() {
            let key = line.trim();
            if key.is_empty() || !key.starts_with(&self.key_prefix) {
                continue;
            }
            candidates += 1;
            match parse_key_instant(key) {
                Some((instant, kind)) => parsed.push((instant, kind, key.to_string())),
                None => {
                    warn!(
                        system = %self.system_id,
                        key = %key,
                        "skipping key with no parsable timestamp"
                    );
                }
            }
        }

        if candidates > 0 && parsed.is_empty() {
            return Err(Error::Parse(format!(
                "log-mirror listing for {}: none of {} keys could be normalized",
                self.system_id, candidates
            )));
        }

        // Chain archives to their anchoring snapshot, oldest first.
        parsed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut artifacts = Vec::with_capacity(parsed.len());
        let mut last_base: Option<(String, DateTime<Utc>)> = None;
        for (instant, kind, key) in parsed {
            let chain_parent = match kind {
                ArtifactKind::Base => {
                    last_base = Some((key.clone(), instant));
                    None
                }
                _ => match &last_base {
                    Some((base_key, base_at)) if *base_at < instant => Some(base_key.clone()),
                    _ => {
                        warn!(
                            system = %self.system_id,
                            key = %key,
                            "skipping log archive: no base snapshot precedes it"
                        );
                        continue;
                    }
                },
            };
            artifacts.push(BackupArtifact {
                system_id: self.system_id.clone(),
                artifact_id: key,
                kind,
                created_at: instant,
                size_bytes: None,
                chain_parent,
            });
        }

        sort_newest_first(&mut artifacts);
        Ok(artifacts)
    }
}

/// Extract the embedded `YYYY-MM-DD-HH-MM-SS` instant from a key, plus
/// whether the segment before it marks a base snapshot.
fn parse_key_instant(key: &str) -> Option<(DateTime<Utc>, ArtifactKind)> {
    let parts: Vec<&str> = key.split('-').collect();
    if parts.len() < 6 {
        return None;
    }
    for i in 0..=parts.len() - 6 {
        if parts[i].len() != 4 {
            continue;
        }
        let Ok(year) = parts[i].parse::<i32>() else {
            continue;
        };
        let fields: Option<Vec<u32>> = parts[i + 1..i + 6]
            .iter()
            .map(|p| p.parse::<u32>().ok())
            .collect();
        let Some(fields) = fields else {
            continue;
        };
        if let LocalResult::Single(instant) =
            Utc.with_ymd_and_hms(year, fields[0], fields[1], fields[2], fields[3], fields[4])
        {
            let kind = if i > 0 && parts[i - 1] == "base" {
                ArtifactKind::Base
            } else {
                ArtifactKind::Incremental
            };
            return Some((instant, kind));
        }
    }
    None
}

#[async_trait]
impl CatalogAdapter for ObjectStoreLogAdapter {
    fn system_id(&self) -> &str {
        &self.system_id
    }

    async fn list_artifacts(&self) -> Result<Vec<BackupArtifact>> {
        let body = self.control.list_raw_backups().await?;
        let artifacts = self.normalize(&body)?;
        debug!(
            system = %self.system_id,
            count = artifacts.len(),
            "normalized log-mirror listing"
        );
        Ok(artifacts)
    }
}
