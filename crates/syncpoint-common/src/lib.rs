//! Shared types and interfaces for Syncpoint.
//!
//! This crate provides:
//! - The normalized backup catalog data model
//! - Consistency group and restore job records
//! - The error taxonomy used across the workspace
//! - The `SubsystemControl` seam to external backup tooling

pub mod control;
pub mod error;
pub mod types;

pub use control::SubsystemControl;
pub use error::{Error, Result};
pub use types::{
    skew, ArtifactKind, BackupArtifact, ConsistencyGroup, GroupMember, GroupStatus, JobOutcome,
    RestoreJob, RestorePhase, SystemId, SystemRestoreStatus,
};
