//! Coordinated point-in-time backups across heterogeneous storage
//! subsystems.
//!
//! Syncpoint normalizes each subsystem's backup listing into a common
//! catalog, matches artifacts across subsystems within a bounded time
//! tolerance, durably records the chosen consistency groups, and drives
//! the multi-system restore workflow. The [`Coordinator`] is the single
//! entry point the command surface calls into.

pub mod config;

pub use config::SyncpointConfig;
pub use syncpoint_catalog::{CatalogAdapter, CatalogService, ObjectStoreLogAdapter,
    RefreshOutcome, RefreshReport, RelationalClusterAdapter};
pub use syncpoint_common::{
    ArtifactKind, BackupArtifact, ConsistencyGroup, Error, GroupMember, GroupStatus, JobOutcome,
    RestoreJob, RestorePhase, Result, SubsystemControl, SystemId,
};
pub use syncpoint_matcher::{CandidateGroup, CoordinationQuality};
pub use syncpoint_restore::{ExecuteOptions, ExecutionMode, RestoreOrchestrator, RetryPolicy};
pub use syncpoint_scheduler::{BackupScheduler, BackupTrigger, TickReport};
pub use syncpoint_store::GroupStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

/// Wires the catalog, matcher, store, orchestrator, and scheduler
/// together behind the command-surface contract. Every subsystem
/// dependency is injected at construction; nothing is resolved through
/// process-wide state.
pub struct Coordinator {
    config: SyncpointConfig,
    controls: BTreeMap<SystemId, Arc<dyn SubsystemControl>>,
    catalog: Arc<CatalogService>,
    store: Arc<GroupStore>,
    orchestrator: RestoreOrchestrator,
    scheduler: BackupScheduler,
}

impl Coordinator {
    pub async fn new(
        config: SyncpointConfig,
        adapters: Vec<Arc<dyn CatalogAdapter>>,
        controls: Vec<Arc<dyn SubsystemControl>>,
    ) -> Result<Self> {
        config.validate()?;

        let catalog = Arc::new(CatalogService::new(adapters));
        let store = Arc::new(GroupStore::open(&config.store_path).await?);
        let orchestrator = RestoreOrchestrator::new(
            store.clone(),
            catalog.clone(),
            controls.clone(),
            config.retry_policy(),
        );
        let scheduler =
            BackupScheduler::new(controls.clone(), catalog.clone(), config.tick_interval());
        let controls = controls
            .into_iter()
            .map(|c| (c.system_id().to_string(), c))
            .collect();

        info!(
            store = %config.store_path.display(),
            tolerance_secs = config.matcher.tolerance_secs,
            "coordinator ready"
        );
        Ok(Self {
            config,
            controls,
            catalog,
            store,
            orchestrator,
            scheduler,
        })
    }

    /// Trigger one backup on one subsystem, then refresh its catalog so
    /// the new artifact is immediately visible.
    pub async fn trigger_backup(&self, system_id: &str, kind: ArtifactKind) -> Result<BackupArtifact> {
        let control = self.controls.get(system_id).ok_or_else(|| {
            Error::Configuration(format!("no subsystem control registered for {}", system_id))
        })?;
        let artifact = control.create_backup(kind).await?;
        info!(system = %system_id, artifact = %artifact.artifact_id, kind = %kind, "backup created");
        self.catalog.refresh(system_id).await?;
        Ok(artifact)
    }

    /// Refresh every subsystem's listing, reporting per-system outcomes.
    pub async fn refresh_catalogs(&self) -> RefreshReport {
        self.catalog.refresh_all().await
    }

    /// Candidate consistency sets over the current catalog, with
    /// artifacts already bound to an active group left out.
    pub async fn candidate_groups(&self) -> Vec<CandidateGroup> {
        let lists = self.catalog.snapshot().await;
        let grouped = self.store.grouped_artifacts().await;
        syncpoint_matcher::propose_excluding(&lists, self.config.tolerance(), &grouped)
    }

    /// The candidate set closest to an explicit target instant.
    pub async fn candidate_group_near(&self, target: DateTime<Utc>) -> Option<CandidateGroup> {
        let lists = self.catalog.snapshot().await;
        syncpoint_matcher::propose_near(&lists, target, self.config.tolerance())
    }

    /// Durably record a candidate as a consistency group.
    pub async fn create_group(&self, candidate: &CandidateGroup) -> Result<ConsistencyGroup> {
        // A target-time candidate may legitimately sit wider than the
        // matching tolerance; the recorded tolerance covers whichever is
        // larger.
        let tolerance = self.config.tolerance().max(candidate.max_skew);
        self.store.create(candidate.members.clone(), tolerance).await
    }

    pub async fn list_groups(&self, system_id: Option<&str>) -> Vec<ConsistencyGroup> {
        self.store.list(system_id).await
    }

    pub async fn get_group(&self, group_id: &str) -> Result<ConsistencyGroup> {
        self.store.get(group_id).await
    }

    pub async fn set_group_status(
        &self,
        group_id: &str,
        status: GroupStatus,
    ) -> Result<ConsistencyGroup> {
        self.store.set_status(group_id, status).await
    }

    /// Execute the restore workflow for a group.
    pub async fn execute_restore(
        &self,
        group_id: &str,
        options: ExecuteOptions,
    ) -> Result<RestoreJob> {
        self.orchestrator.execute(group_id, options).await
    }

    pub async fn job_status(&self, job_id: &str) -> Result<RestoreJob> {
        self.orchestrator.job_status(job_id).await
    }

    pub async fn list_jobs(&self) -> Vec<RestoreJob> {
        self.orchestrator.list_jobs().await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        self.orchestrator.cancel(job_id).await
    }

    /// Register every cataloged system on the configured default cadences.
    pub async fn enable_default_schedules(&self) -> Result<()> {
        for system_id in self.catalog.systems() {
            self.scheduler
                .register(
                    &system_id,
                    self.config.cadence_full(),
                    self.config.cadence_incremental(),
                )
                .await?;
        }
        Ok(())
    }

    /// The scheduler, for per-system cadence overrides and start/stop.
    pub fn scheduler(&self) -> &BackupScheduler {
        &self.scheduler
    }
}
