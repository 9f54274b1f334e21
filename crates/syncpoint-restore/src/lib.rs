//! Restore orchestration for Syncpoint.
//!
//! Resolves a consistency group into concrete artifacts and drives each
//! targeted subsystem through the restore state machine:
//!
//! `Pending -> PreflightChecked -> ServiceStopped -> DataCleared ->
//! ArtifactRestored -> ServiceStarted -> Verified -> (Promoted | Done)`
//!
//! with `Failed` reachable from every non-terminal phase. Systems run
//! concurrently by default; sequential ordering stops launching after the
//! first failure. Partial success is reported per system; there is no
//! cross-system rollback.

pub mod orchestrator;
mod pipeline;
pub mod retry;

#[cfg(test)]
mod testing;

pub use orchestrator::{ExecuteOptions, ExecutionMode, RestoreOrchestrator};
pub use retry::RetryPolicy;
