//! Cadence-based backup scheduling.
//!
//! Each registered system carries two cadences, one for full backups and
//! one for incrementals. Cadence comparison is elapsed wall-clock time
//! since the last recorded trigger, never alignment to a calendar
//! boundary: after downtime a missed interval fires once, immediately, on
//! the next tick, not N times. Every tick also refreshes the system's
//! catalog listing whether or not a backup fired.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use syncpoint_catalog::CatalogService;
use syncpoint_common::{ArtifactKind, Error, Result, SubsystemControl, SystemId};

/// Backup cadences for one system.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub full: Duration,
    pub incremental: Duration,
}

/// What one tick did for one system's backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupTrigger {
    /// No cadence had elapsed
    Skipped,
    /// Full backup triggered; artifact id or error
    Full(std::result::Result<String, String>),
    /// Incremental backup triggered; artifact id or error
    Incremental(std::result::Result<String, String>),
}

/// Per-system outcome of one tick.
#[derive(Debug, Clone)]
pub struct SystemTick {
    pub backup: BackupTrigger,
    /// Artifact count after refresh, or the refresh error
    pub refreshed: std::result::Result<usize, String>,
}

/// Everything one tick did, per system. One system's failure never hides
/// another's outcome.
#[derive(Debug, Default)]
pub struct TickReport {
    pub per_system: BTreeMap<SystemId, SystemTick>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    cadences: BTreeMap<SystemId, Cadence>,
    last_full: HashMap<SystemId, DateTime<Utc>>,
    last_incremental: HashMap<SystemId, DateTime<Utc>>,
}

/// Drives periodic backup creation and catalog refresh.
pub struct BackupScheduler {
    controls: BTreeMap<SystemId, Arc<dyn SubsystemControl>>,
    catalog: Arc<CatalogService>,
    state: Arc<Mutex<SchedulerState>>,
    running: Arc<RwLock<bool>>,
    tick_interval: Duration,
}

impl BackupScheduler {
    pub fn new(
        controls: Vec<Arc<dyn SubsystemControl>>,
        catalog: Arc<CatalogService>,
        tick_interval: Duration,
    ) -> Self {
        let controls = controls
            .into_iter()
            .map(|c| (c.system_id().to_string(), c))
            .collect();
        Self {
            controls,
            catalog,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            running: Arc::new(RwLock::new(false)),
            tick_interval,
        }
    }

    /// Register a system's cadences. The first tick after registration
    /// triggers a full backup immediately (no last trigger recorded yet).
    pub async fn register(
        &self,
        system_id: &str,
        cadence_full: Duration,
        cadence_incremental: Duration,
    ) -> Result<()> {
        if !self.controls.contains_key(system_id) {
            return Err(Error::Configuration(format!(
                "no subsystem control registered for {}",
                system_id
            )));
        }
        let mut state = self.state.lock().await;
        state.cadences.insert(
            system_id.to_string(),
            Cadence {
                full: cadence_full,
                incremental: cadence_incremental,
            },
        );
        info!(
            system = %system_id,
            full_secs = cadence_full.as_secs(),
            incremental_secs = cadence_incremental.as_secs(),
            "registered backup cadences"
        );
        Ok(())
    }

    /// Run one scheduling pass at the given instant.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        // Decide what fires under the lock, recording trigger times up
        // front so a slow or failing backup is not re-fired every tick.
        let plans: Vec<(SystemId, Option<ArtifactKind>)> = {
            let mut state = self.state.lock().await;
            let cadences: Vec<(SystemId, Cadence)> = state
                .cadences
                .iter()
                .map(|(id, c)| (id.clone(), *c))
                .collect();

            cadences
                .into_iter()
                .map(|(system_id, cadence)| {
                    let full_due = state
                        .last_full
                        .get(&system_id)
                        .map_or(true, |last| elapsed(*last, now) >= cadence.full);
                    let kind = if full_due {
                        state.last_full.insert(system_id.clone(), now);
                        // A fresh full starts a new chain; the incremental
                        // clock restarts with it.
                        state.last_incremental.insert(system_id.clone(), now);
                        Some(ArtifactKind::Full)
                    } else {
                        let incremental_due = state
                            .last_incremental
                            .get(&system_id)
                            .map_or(true, |last| elapsed(*last, now) >= cadence.incremental);
                        if incremental_due {
                            state.last_incremental.insert(system_id.clone(), now);
                            Some(ArtifactKind::Incremental)
                        } else {
                            None
                        }
                    };
                    (system_id, kind)
                })
                .collect()
        };

        let ticks = plans.into_iter().map(|(system_id, kind)| async move {
            let backup = match kind {
                None => BackupTrigger::Skipped,
                Some(kind) => {
                    let result = match self.controls.get(&system_id) {
                        Some(control) => control
                            .create_backup(kind)
                            .await
                            .map(|artifact| artifact.artifact_id)
                            .map_err(|e| e.to_string()),
                        None => Err(format!("no subsystem control registered for {}", system_id)),
                    };
                    match &result {
                        Ok(artifact_id) => {
                            info!(system = %system_id, kind = %kind, artifact = %artifact_id, "backup triggered")
                        }
                        Err(e) => {
                            error!(system = %system_id, kind = %kind, error = %e, "backup trigger failed")
                        }
                    }
                    match kind {
                        ArtifactKind::Incremental => BackupTrigger::Incremental(result),
                        _ => BackupTrigger::Full(result),
                    }
                }
            };

            // The catalog is refreshed regardless of whether a backup
            // fired, so new artifacts surface on the cadence of the tick.
            let refreshed = self
                .catalog
                .refresh(&system_id)
                .await
                .map_err(|e| e.to_string());
            if let Err(e) = &refreshed {
                warn!(system = %system_id, error = %e, "catalog refresh failed");
            }

            (system_id, SystemTick { backup, refreshed })
        });

        let report = TickReport {
            per_system: join_all(ticks).await.into_iter().collect(),
        };
        debug!(systems = report.per_system.len(), "scheduler tick complete");
        report
    }

    /// Start the scheduling loop.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(Error::Internal("scheduler already running".to_string()));
        }
        *running = true;
        drop(running);
        info!("backup scheduler started");

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_loop().await;
        });
        Ok(())
    }

    /// Stop the scheduling loop after its current pass.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(Error::Internal("scheduler not running".to_string()));
        }
        *running = false;
        info!("backup scheduler stopped");
        Ok(())
    }

    async fn run_loop(&self) {
        let mut ticker = interval(self.tick_interval);
        loop {
            ticker.tick().await;
            if !*self.running.read().await {
                break;
            }
            self.tick(Utc::now()).await;
        }
    }
}

impl Clone for BackupScheduler {
    fn clone(&self) -> Self {
        Self {
            controls: self.controls.clone(),
            catalog: self.catalog.clone(),
            state: self.state.clone(),
            running: self.running.clone(),
            tick_interval: self.tick_interval,
        }
    }
}

/// Wall-clock elapsed time, saturating at zero if the clock stepped back.
fn elapsed(last: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - last).to_std().unwrap_or(Duration::ZERO)
}
