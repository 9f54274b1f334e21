//! Common types used throughout Syncpoint.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one independently-backed-up subsystem.
pub type SystemId = String;

/// Absolute skew between two artifact creation instants.
pub fn skew(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    (a - b).abs().to_std().unwrap_or(Duration::ZERO)
}

/// Kind of backup artifact a subsystem produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Self-contained backup of the whole subsystem
    Full,
    /// Delta depending on an earlier artifact in its chain
    Incremental,
    /// Base snapshot anchoring an incremental chain
    Base,
}

impl ArtifactKind {
    /// Preference rank when breaking ties between candidates. Lower is
    /// preferred: a full restore needs no chain replay.
    pub fn preference_rank(self) -> u8 {
        match self {
            ArtifactKind::Full => 0,
            ArtifactKind::Incremental => 1,
            ArtifactKind::Base => 2,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Full => write!(f, "full"),
            ArtifactKind::Incremental => write!(f, "incremental"),
            ArtifactKind::Base => write!(f, "base"),
        }
    }
}

/// One backup unit from one subsystem, normalized out of the subsystem's
/// native listing. Immutable once observed; superseded by newer refreshes,
/// never mutated. Retention of the underlying artifact belongs to the
/// external backup tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    /// Subsystem that produced this artifact
    pub system_id: SystemId,
    /// Subsystem-native identifier, opaque to Syncpoint
    pub artifact_id: String,
    /// Artifact kind
    pub kind: ArtifactKind,
    /// Creation instant on the subsystem's clock
    pub created_at: DateTime<Utc>,
    /// Size in bytes, when the listing reports one
    pub size_bytes: Option<u64>,
    /// Artifact this one depends on, for incremental chains. Must point
    /// at a strictly earlier artifact.
    pub chain_parent: Option<String>,
}

/// The chosen artifact for one system inside a consistency group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub artifact_id: String,
    pub created_at: DateTime<Utc>,
    pub kind: ArtifactKind,
}

impl From<&BackupArtifact> for GroupMember {
    fn from(artifact: &BackupArtifact) -> Self {
        Self {
            artifact_id: artifact.artifact_id.clone(),
            created_at: artifact.created_at,
            kind: artifact.kind,
        }
    }
}

/// Lifecycle status of a consistency group. Records are archived, never
/// physically removed; `Deleted` marks intent only and the underlying
/// backup artifacts are not touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    Archived,
    Deleted,
}

impl GroupStatus {
    /// Legal transitions: `Active -> Archived` and `Active -> Deleted`.
    /// No resurrection, no self-transitions.
    pub fn can_transition_to(self, next: GroupStatus) -> bool {
        matches!(
            (self, next),
            (GroupStatus::Active, GroupStatus::Archived) | (GroupStatus::Active, GroupStatus::Deleted)
        )
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupStatus::Active => write!(f, "active"),
            GroupStatus::Archived => write!(f, "archived"),
            GroupStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// A durable binding of exactly one chosen artifact per participating
/// system, representing "these all reflect approximately the same moment".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyGroup {
    /// Unique, monotonic-time-derived identifier
    pub group_id: String,
    /// Formation instant
    pub created_at: DateTime<Utc>,
    /// At most one entry per system
    pub members: BTreeMap<SystemId, GroupMember>,
    /// Tolerance in force when the group was formed; every member pair
    /// satisfied it at formation time
    pub max_skew: Duration,
    /// Lifecycle status
    pub status: GroupStatus,
}

impl ConsistencyGroup {
    /// Largest pairwise skew between the current members.
    pub fn widest_member_skew(&self) -> Duration {
        let mut widest = Duration::ZERO;
        let members: Vec<&GroupMember> = self.members.values().collect();
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                widest = widest.max(skew(a.created_at, b.created_at));
            }
        }
        widest
    }
}

/// Per-system state of the restore pipeline.
///
/// `Failed` is reachable from every non-terminal phase; `Done`, `Promoted`
/// and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestorePhase {
    Pending,
    PreflightChecked,
    ServiceStopped,
    DataCleared,
    ArtifactRestored,
    ServiceStarted,
    Verified,
    Promoted,
    Done,
    Failed,
}

impl RestorePhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RestorePhase::Done | RestorePhase::Promoted | RestorePhase::Failed
        )
    }
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestorePhase::Pending => "pending",
            RestorePhase::PreflightChecked => "preflight-checked",
            RestorePhase::ServiceStopped => "service-stopped",
            RestorePhase::DataCleared => "data-cleared",
            RestorePhase::ArtifactRestored => "artifact-restored",
            RestorePhase::ServiceStarted => "service-started",
            RestorePhase::Verified => "verified",
            RestorePhase::Promoted => "promoted",
            RestorePhase::Done => "done",
            RestorePhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Phase plus the failure annotation, when one applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRestoreStatus {
    pub phase: RestorePhase,
    pub error: Option<String>,
}

impl SystemRestoreStatus {
    pub fn pending() -> Self {
        Self {
            phase: RestorePhase::Pending,
            error: None,
        }
    }
}

/// Aggregate outcome of a restore job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Pending,
    PartialSuccess,
    Success,
    Failed,
}

/// One execution of the restore workflow against one consistency group.
/// Mutated only by the orchestrator; retained for audit after completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreJob {
    pub job_id: String,
    pub group_id: String,
    pub per_system: BTreeMap<SystemId, SystemRestoreStatus>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: JobOutcome,
    pub dry_run: bool,
}

impl RestoreJob {
    pub fn new(group_id: &str, targets: &[SystemId], dry_run: bool) -> Self {
        let per_system = targets
            .iter()
            .map(|id| (id.clone(), SystemRestoreStatus::pending()))
            .collect();
        Self {
            job_id: Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            per_system,
            started_at: Utc::now(),
            finished_at: None,
            outcome: JobOutcome::Pending,
            dry_run,
        }
    }

    /// Grade the finished job. `Success` iff every targeted system reached
    /// a non-`Failed` terminal phase, `Failed` iff every one failed,
    /// `PartialSuccess` otherwise (including systems a halted sequential
    /// run never launched).
    pub fn graded_outcome(&self) -> JobOutcome {
        let statuses: Vec<&SystemRestoreStatus> = self.per_system.values().collect();
        if statuses.is_empty() {
            return JobOutcome::Failed;
        }
        let all_failed = statuses.iter().all(|s| s.phase == RestorePhase::Failed);
        let all_succeeded = statuses
            .iter()
            .all(|s| s.phase.is_terminal() && s.phase != RestorePhase::Failed);
        if all_failed {
            JobOutcome::Failed
        } else if all_succeeded {
            JobOutcome::Success
        } else {
            JobOutcome::PartialSuccess
        }
    }
}
