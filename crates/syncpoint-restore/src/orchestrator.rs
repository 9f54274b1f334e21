//! Cross-system restore coordination.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use syncpoint_catalog::CatalogService;
use syncpoint_common::{
    Error, GroupStatus, RestoreJob, RestorePhase, Result, SubsystemControl, SystemId,
};
use syncpoint_store::GroupStore;

use crate::pipeline::SystemPipeline;
use crate::retry::RetryPolicy;

/// Cross-system ordering of a restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Independent per-system pipelines run concurrently; every system
    /// reaches its own terminal phase regardless of siblings.
    #[default]
    Parallel,
    /// Systems run one at a time in the caller-supplied target order; no
    /// further system is launched once one reports `Failed`.
    Sequential,
}

/// Options for one restore execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Subset of the group's systems to restore. `None` targets every
    /// member. The order is significant in sequential mode.
    pub targets: Option<Vec<SystemId>>,
    pub mode: ExecutionMode,
    /// Run preflight only; no destructive step is attempted.
    pub dry_run: bool,
}

struct JobHandle {
    job: Arc<RwLock<RestoreJob>>,
    cancelled: Arc<AtomicBool>,
}

/// Executes the restore workflow for a consistency group.
///
/// Receives the group store, the catalog (for preflight resolution), and
/// the subsystem controls at construction; nothing is looked up through
/// process-wide state. No automatic rollback is attempted on failure;
/// per-system outcomes are reported for operator action.
pub struct RestoreOrchestrator {
    store: Arc<GroupStore>,
    catalog: Arc<CatalogService>,
    controls: BTreeMap<SystemId, Arc<dyn SubsystemControl>>,
    verify: RetryPolicy,
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl RestoreOrchestrator {
    pub fn new(
        store: Arc<GroupStore>,
        catalog: Arc<CatalogService>,
        controls: Vec<Arc<dyn SubsystemControl>>,
        verify: RetryPolicy,
    ) -> Self {
        let controls = controls
            .into_iter()
            .map(|c| (c.system_id().to_string(), c))
            .collect();
        Self {
            store,
            catalog,
            controls,
            verify,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Run the restore workflow for `group_id` and return the finished
    /// job. The job is queryable through [`job_status`] while it runs.
    ///
    /// [`job_status`]: RestoreOrchestrator::job_status
    pub async fn execute(&self, group_id: &str, options: ExecuteOptions) -> Result<RestoreJob> {
        let group = self.store.get(group_id).await?;
        if group.status == GroupStatus::Deleted {
            return Err(Error::InvalidTransition(format!(
                "group {} is deleted and cannot be restored",
                group_id
            )));
        }

        let targets: Vec<SystemId> = match &options.targets {
            Some(targets) => targets.clone(),
            None => group.members.keys().cloned().collect(),
        };
        if targets.is_empty() {
            return Err(Error::Validation("no systems targeted for restore".to_string()));
        }

        // Resolve every member and control up front so a bad target fails
        // the call before any pipeline launches.
        let mut specs: Vec<(SystemId, String, Arc<dyn SubsystemControl>)> = Vec::new();
        for system_id in &targets {
            let member = group.members.get(system_id).ok_or_else(|| {
                Error::NotFound(format!(
                    "system {} is not a member of group {}",
                    system_id, group_id
                ))
            })?;
            let control = self
                .controls
                .get(system_id)
                .ok_or_else(|| {
                    Error::Configuration(format!(
                        "no subsystem control registered for {}",
                        system_id
                    ))
                })?
                .clone();
            specs.push((system_id.clone(), member.artifact_id.clone(), control));
        }

        let job = RestoreJob::new(group_id, &targets, options.dry_run);
        let job_id = job.job_id.clone();
        let shared = Arc::new(RwLock::new(job));
        let cancelled = Arc::new(AtomicBool::new(false));
        self.jobs.write().await.insert(
            job_id.clone(),
            JobHandle {
                job: shared.clone(),
                cancelled: cancelled.clone(),
            },
        );

        info!(
            job = %job_id,
            group = %group_id,
            mode = ?options.mode,
            targets = targets.len(),
            dry_run = options.dry_run,
            "restore job started"
        );

        match options.mode {
            ExecutionMode::Parallel => {
                let handles: Vec<_> = specs
                    .into_iter()
                    .map(|(system_id, artifact_id, control)| {
                        let pipeline = SystemPipeline {
                            system_id,
                            artifact_id,
                            control,
                            catalog: self.catalog.clone(),
                            verify: self.verify.clone(),
                            job: shared.clone(),
                            cancelled: cancelled.clone(),
                            dry_run: options.dry_run,
                        };
                        tokio::spawn(pipeline.run())
                    })
                    .collect();
                for joined in join_all(handles).await {
                    if let Err(e) = joined {
                        error!(job = %job_id, error = %e, "restore pipeline task panicked");
                    }
                }
            }
            ExecutionMode::Sequential => {
                for (system_id, artifact_id, control) in specs {
                    let halted_system = system_id.clone();
                    let pipeline = SystemPipeline {
                        system_id,
                        artifact_id,
                        control,
                        catalog: self.catalog.clone(),
                        verify: self.verify.clone(),
                        job: shared.clone(),
                        cancelled: cancelled.clone(),
                        dry_run: options.dry_run,
                    };
                    if pipeline.run().await == RestorePhase::Failed {
                        warn!(
                            job = %job_id,
                            system = %halted_system,
                            "sequential restore halted; remaining systems not launched"
                        );
                        break;
                    }
                }
            }
        }

        let finished = {
            let mut job = shared.write().await;
            job.outcome = job.graded_outcome();
            job.finished_at = Some(Utc::now());
            job.clone()
        };
        info!(job = %job_id, outcome = ?finished.outcome, "restore job finished");
        Ok(finished)
    }

    /// Current snapshot of a job, running or finished.
    pub async fn job_status(&self, job_id: &str) -> Result<RestoreJob> {
        let jobs = self.jobs.read().await;
        let handle = jobs
            .get(job_id)
            .ok_or_else(|| Error::NotFound(format!("restore job {}", job_id)))?;
        let job = handle.job.clone();
        drop(jobs);
        let snapshot = job.read().await.clone();
        Ok(snapshot)
    }

    /// Every job this orchestrator has run, for audit.
    pub async fn list_jobs(&self) -> Vec<RestoreJob> {
        let handles: Vec<Arc<RwLock<RestoreJob>>> = {
            let jobs = self.jobs.read().await;
            jobs.values().map(|h| h.job.clone()).collect()
        };
        let mut listed = Vec::with_capacity(handles.len());
        for handle in handles {
            listed.push(handle.read().await.clone());
        }
        listed.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        listed
    }

    /// Request cancellation. Takes effect at the next phase boundary of
    /// each still-running pipeline; steps already in flight complete.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let jobs = self.jobs.read().await;
        let handle = jobs
            .get(job_id)
            .ok_or_else(|| Error::NotFound(format!("restore job {}", job_id)))?;
        handle.cancelled.store(true, Ordering::SeqCst);
        info!(job = %job_id, "restore job cancellation requested");
        Ok(())
    }
}
