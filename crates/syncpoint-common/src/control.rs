//! The seam to external subsystem tooling.
//!
//! Every operation Syncpoint performs against a subsystem (stopping it,
//! clearing its data, restoring an artifact, promoting a recovered
//! instance, creating a backup, listing native backups) goes through
//! this trait. Implementations wrap the subsystem's own tools and are
//! injected at construction time.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ArtifactKind, BackupArtifact};

/// Control surface of one subsystem instance.
///
/// One implementation per subsystem; the registry maps `system_id` to the
/// instance bound to it. All methods may block on external I/O, so callers
/// must not hold in-memory locks across them.
#[async_trait]
pub trait SubsystemControl: Send + Sync {
    /// The subsystem this instance controls.
    fn system_id(&self) -> &str;

    /// Stop the subsystem's serving process.
    async fn stop(&self) -> Result<()>;

    /// Start the subsystem's serving process.
    async fn start(&self) -> Result<()>;

    /// Clear the subsystem's data so a restore lands on a clean slate.
    /// Destructive; only called after a confirmed stop.
    async fn clear_data(&self) -> Result<()>;

    /// Restore one artifact into the subsystem.
    async fn restore_artifact(&self, artifact_id: &str) -> Result<()>;

    /// Whether the subsystem still reports a recovering/subordinate role.
    async fn is_recovering(&self) -> Result<bool>;

    /// Promote a recovered instance into an active-serving role.
    async fn promote(&self) -> Result<()>;

    /// Trigger creation of a new backup of the given kind.
    async fn create_backup(&self, kind: ArtifactKind) -> Result<BackupArtifact>;

    /// The subsystem's native backup listing, unparsed. Catalog adapters
    /// normalize this into `BackupArtifact`s.
    async fn list_raw_backups(&self) -> Result<String>;
}
