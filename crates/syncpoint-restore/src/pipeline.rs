//! One system's restore pipeline.
//!
//! Phases run strictly in order and are never re-entered. A failure
//! halts the pipeline at `Failed` before the next destructive step;
//! cancellation is honored only at phase boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};

use syncpoint_catalog::CatalogService;
use syncpoint_common::{Error, RestoreJob, RestorePhase, SubsystemControl, SystemId};

use crate::retry::RetryPolicy;

pub(crate) struct SystemPipeline {
    pub system_id: SystemId,
    pub artifact_id: String,
    pub control: Arc<dyn SubsystemControl>,
    pub catalog: Arc<CatalogService>,
    pub verify: RetryPolicy,
    pub job: Arc<RwLock<RestoreJob>>,
    pub cancelled: Arc<AtomicBool>,
    pub dry_run: bool,
}

impl SystemPipeline {
    /// Drive this system to a terminal phase, recording every transition
    /// in the shared job.
    pub(crate) async fn run(self) -> RestorePhase {
        // Preflight: the subsystem must answer and the artifact must still
        // resolve. Nothing destructive happens before this passes.
        if let Err(e) = self.catalog.describe(&self.system_id, &self.artifact_id).await {
            return self.fail(RestorePhase::Pending, e).await;
        }
        self.advance(RestorePhase::PreflightChecked).await;

        if self.dry_run {
            info!(system = %self.system_id, "dry run: preflight passed, destructive steps skipped");
            self.advance(RestorePhase::Done).await;
            return RestorePhase::Done;
        }

        if self.cancelled() {
            // Nothing has been touched yet; stop cleanly.
            return self
                .fail(
                    RestorePhase::PreflightChecked,
                    Error::Internal("cancelled before destructive steps".to_string()),
                )
                .await;
        }

        if let Err(e) = self.control.stop().await {
            return self.fail(RestorePhase::PreflightChecked, e).await;
        }
        self.advance(RestorePhase::ServiceStopped).await;
        if let Some(terminal) = self.cancel_with_restart(RestorePhase::ServiceStopped).await {
            return terminal;
        }

        if let Err(e) = self.control.clear_data().await {
            return self.fail(RestorePhase::ServiceStopped, e).await;
        }
        self.advance(RestorePhase::DataCleared).await;
        if let Some(terminal) = self.cancel_with_restart(RestorePhase::DataCleared).await {
            return terminal;
        }

        if let Err(e) = self.control.restore_artifact(&self.artifact_id).await {
            return self.fail(RestorePhase::DataCleared, e).await;
        }
        self.advance(RestorePhase::ArtifactRestored).await;
        if let Some(terminal) = self.cancel_with_restart(RestorePhase::ArtifactRestored).await {
            return terminal;
        }

        if let Err(e) = self.control.start().await {
            return self.fail(RestorePhase::ArtifactRestored, e).await;
        }
        self.advance(RestorePhase::ServiceStarted).await;

        // From here on the service is up again; finishing verification is
        // always safer than abandoning it, so cancellation no longer
        // interrupts.
        self.verify_and_settle().await
    }

    /// Poll the restored instance until it stops reporting a recovering
    /// role, the attempts run out, or only errors come back.
    async fn verify_and_settle(&self) -> RestorePhase {
        let mut last_poll: Option<Result<bool, Error>> = None;

        for attempt in 0..self.verify.max_attempts {
            match self.control.is_recovering().await {
                Ok(false) => {
                    self.advance(RestorePhase::Verified).await;
                    self.advance(RestorePhase::Done).await;
                    return RestorePhase::Done;
                }
                Ok(true) => last_poll = Some(Ok(true)),
                Err(e) => {
                    warn!(
                        system = %self.system_id,
                        attempt,
                        error = %e,
                        "verification poll failed"
                    );
                    last_poll = Some(Err(e));
                }
            }
            if attempt + 1 < self.verify.max_attempts {
                sleep(self.verify.delay_for(attempt)).await;
            }
        }

        match last_poll {
            // The instance answers but stays in a subordinate role after
            // the restore: promote it into active service.
            Some(Ok(true)) => {
                self.advance(RestorePhase::Verified).await;
                match self.control.promote().await {
                    Ok(()) => {
                        self.advance(RestorePhase::Promoted).await;
                        RestorePhase::Promoted
                    }
                    Err(e) => self.fail(RestorePhase::Verified, e).await,
                }
            }
            // `is_recovering() == Ok(false)` returns early inside the loop,
            // so it is never stored in `last_poll`.
            Some(Ok(false)) => unreachable!(),
            Some(Err(e)) => self.fail(RestorePhase::ServiceStarted, e).await,
            None => {
                self.fail(
                    RestorePhase::ServiceStarted,
                    Error::Internal("verification attempts exhausted with no signal".to_string()),
                )
                .await
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancellation after the service was stopped: the current step has
    /// completed, so bring the service back up before settling at
    /// `Failed` rather than leaving it stopped with no further progress.
    async fn cancel_with_restart(&self, at: RestorePhase) -> Option<RestorePhase> {
        if !self.cancelled() {
            return None;
        }
        warn!(
            system = %self.system_id,
            phase = %at,
            "cancellation requested; restarting service before stopping"
        );
        if let Err(e) = self.control.start().await {
            warn!(
                system = %self.system_id,
                error = %e,
                "service restart after cancellation failed"
            );
        }
        Some(
            self.fail(at, Error::Internal("cancelled by operator".to_string()))
                .await,
        )
    }

    async fn advance(&self, phase: RestorePhase) {
        let mut job = self.job.write().await;
        if let Some(status) = job.per_system.get_mut(&self.system_id) {
            status.phase = phase;
        }
        drop(job);
        info!(system = %self.system_id, phase = %phase, "restore phase reached");
    }

    /// Record a terminal failure. `at` is the last phase the system had
    /// reached when the step failed.
    async fn fail(&self, at: RestorePhase, source: Error) -> RestorePhase {
        let failure = Error::StepFailure {
            system_id: self.system_id.clone(),
            phase: at,
            reason: source.to_string(),
        };
        error!(system = %self.system_id, phase = %at, error = %source, "restore step failed");

        let mut job = self.job.write().await;
        if let Some(status) = job.per_system.get_mut(&self.system_id) {
            status.phase = RestorePhase::Failed;
            status.error = Some(failure.to_string());
        }
        RestorePhase::Failed
    }
}
