//! Test doubles shared by the pipeline and orchestrator tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use syncpoint_catalog::{CatalogAdapter, CatalogService};
use syncpoint_common::{ArtifactKind, BackupArtifact, Error, Result, SubsystemControl};

/// Scripted subsystem control that records every call.
pub(crate) struct MockControl {
    system_id: String,
    calls: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
    recovering_script: Mutex<VecDeque<std::result::Result<bool, String>>>,
    cancel_on_stop: Option<Arc<AtomicBool>>,
}

impl MockControl {
    pub(crate) fn healthy(system_id: &str) -> Arc<Self> {
        Arc::new(Self {
            system_id: system_id.to_string(),
            calls: Mutex::new(Vec::new()),
            fail_on: None,
            recovering_script: Mutex::new(VecDeque::new()),
            cancel_on_stop: None,
        })
    }

    /// Fails the named method; everything before it succeeds.
    pub(crate) fn failing_at(system_id: &str, method: &'static str) -> Arc<Self> {
        Arc::new(Self {
            system_id: system_id.to_string(),
            calls: Mutex::new(Vec::new()),
            fail_on: Some(method),
            recovering_script: Mutex::new(VecDeque::new()),
            cancel_on_stop: None,
        })
    }

    /// Flips the given flag inside `stop`, landing a cancellation exactly
    /// at the following phase boundary.
    pub(crate) fn cancelling_on_stop(system_id: &str, flag: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            system_id: system_id.to_string(),
            calls: Mutex::new(Vec::new()),
            fail_on: None,
            recovering_script: Mutex::new(VecDeque::new()),
            cancel_on_stop: Some(flag),
        })
    }

    /// Queue `is_recovering` responses; once drained, polls read `false`.
    pub(crate) fn script_recovering(&self, script: Vec<std::result::Result<bool, String>>) {
        *self.recovering_script.lock().unwrap() = script.into();
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, method: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(method.to_string());
        if self.fail_on == Some(method) {
            Err(Error::Internal(format!("{} exploded", method)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SubsystemControl for MockControl {
    fn system_id(&self) -> &str {
        &self.system_id
    }

    async fn stop(&self) -> Result<()> {
        let result = self.record("stop");
        if let Some(flag) = &self.cancel_on_stop {
            flag.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn start(&self) -> Result<()> {
        self.record("start")
    }

    async fn clear_data(&self) -> Result<()> {
        self.record("clear_data")
    }

    async fn restore_artifact(&self, _artifact_id: &str) -> Result<()> {
        self.record("restore_artifact")
    }

    async fn is_recovering(&self) -> Result<bool> {
        self.record("is_recovering")?;
        match self.recovering_script.lock().unwrap().pop_front() {
            Some(Ok(recovering)) => Ok(recovering),
            Some(Err(reason)) => Err(Error::AdapterUnavailable(reason)),
            None => Ok(false),
        }
    }

    async fn promote(&self) -> Result<()> {
        self.record("promote")
    }

    async fn create_backup(&self, kind: ArtifactKind) -> Result<BackupArtifact> {
        self.record("create_backup")?;
        Ok(artifact(&self.system_id, "fresh", 1_754_049_600).into_kind(kind))
    }

    async fn list_raw_backups(&self) -> Result<String> {
        self.record("list_raw_backups")?;
        Ok("[]".to_string())
    }
}

trait IntoKind {
    fn into_kind(self, kind: ArtifactKind) -> BackupArtifact;
}

impl IntoKind for BackupArtifact {
    fn into_kind(mut self, kind: ArtifactKind) -> BackupArtifact {
        self.kind = kind;
        self
    }
}

/// Adapter serving a fixed artifact list.
pub(crate) struct StaticAdapter {
    system_id: String,
    artifacts: Vec<BackupArtifact>,
}

#[async_trait]
impl CatalogAdapter for StaticAdapter {
    fn system_id(&self) -> &str {
        &self.system_id
    }

    async fn list_artifacts(&self) -> Result<Vec<BackupArtifact>> {
        Ok(self.artifacts.clone())
    }
}

pub(crate) fn artifact(system: &str, id: &str, at: i64) -> BackupArtifact {
    BackupArtifact {
        system_id: system.to_string(),
        artifact_id: id.to_string(),
        kind: ArtifactKind::Full,
        created_at: Utc.timestamp_opt(at, 0).unwrap(),
        size_bytes: None,
        chain_parent: None,
    }
}

pub(crate) fn catalog_for(systems: Vec<(&str, Vec<BackupArtifact>)>) -> Arc<CatalogService> {
    let adapters = systems
        .into_iter()
        .map(|(system_id, artifacts)| {
            Arc::new(StaticAdapter {
                system_id: system_id.to_string(),
                artifacts,
            }) as Arc<dyn CatalogAdapter>
        })
        .collect();
    Arc::new(CatalogService::new(adapters))
}
