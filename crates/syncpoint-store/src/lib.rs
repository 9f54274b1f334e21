//! Durable record of chosen consistency groups.
//!
//! All groups live in a single JSON document that is loaded on open and
//! rewritten in full on every mutation. Each write goes to a temporary
//! file followed by an atomic rename, so a crash between write-start and
//! write-complete leaves the prior document intact. The document embeds
//! a checksum over the serialized group map, verified on load.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use syncpoint_common::{
    skew, ConsistencyGroup, Error, GroupMember, GroupStatus, Result, SystemId,
};

/// On-disk form of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    version: u64,
    checksum: String,
    groups: BTreeMap<String, ConsistencyGroup>,
}

#[derive(Debug, Default)]
struct StoreState {
    version: u64,
    groups: BTreeMap<String, ConsistencyGroup>,
}

/// File-backed consistency group store.
///
/// The in-memory state lock is held only for the mutation itself; the
/// persist gate serializes writers so the file always lands in mutation
/// order with the freshest state winning.
#[derive(Debug)]
pub struct GroupStore {
    state: RwLock<StoreState>,
    persist_gate: Mutex<()>,
    path: PathBuf,
}

impl GroupStore {
    /// Open (or initialize) a store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // A temp file left behind by an interrupted write never became
        // current state; discard it.
        let temp_path = path.with_extension("tmp");
        if fs::try_exists(&temp_path).await.unwrap_or(false) {
            warn!(path = %temp_path.display(), "removing stale temp snapshot");
            fs::remove_file(&temp_path).await?;
        }

        let state = if fs::try_exists(&path).await.unwrap_or(false) {
            let content = fs::read_to_string(&path).await?;
            let snapshot: StoreSnapshot = serde_json::from_str(&content)
                .map_err(|e| Error::Parse(format!("group store {}: {}", path.display(), e)))?;
            let expected = checksum_of(&snapshot.groups)?;
            if snapshot.checksum != expected {
                return Err(Error::Parse(format!(
                    "group store {}: checksum mismatch, refusing to load",
                    path.display()
                )));
            }
            info!(
                path = %path.display(),
                groups = snapshot.groups.len(),
                version = snapshot.version,
                "loaded group store"
            );
            StoreState {
                version: snapshot.version,
                groups: snapshot.groups,
            }
        } else {
            info!(path = %path.display(), "initializing empty group store");
            StoreState::default()
        };

        let store = Self {
            state: RwLock::new(state),
            persist_gate: Mutex::new(()),
            path,
        };
        store.persist().await?;
        Ok(store)
    }

    /// Record a new group. Validates the formation invariants: at least
    /// two members, every member pair within `max_skew`.
    pub async fn create(
        &self,
        members: BTreeMap<SystemId, GroupMember>,
        max_skew: Duration,
    ) -> Result<ConsistencyGroup> {
        if members.len() < 2 {
            return Err(Error::Validation(format!(
                "a consistency group needs at least two members, got {}",
                members.len()
            )));
        }
        let member_list: Vec<(&SystemId, &GroupMember)> = members.iter().collect();
        for (i, (sys_a, a)) in member_list.iter().enumerate() {
            for (sys_b, b) in &member_list[i + 1..] {
                let pair_skew = skew(a.created_at, b.created_at);
                if pair_skew > max_skew {
                    return Err(Error::Validation(format!(
                        "members {} and {} are {}s apart, beyond the {}s tolerance",
                        sys_a,
                        sys_b,
                        pair_skew.as_secs(),
                        max_skew.as_secs()
                    )));
                }
            }
        }

        let now = Utc::now();
        let group = {
            let mut state = self.state.write().await;
            let group_id = next_group_id(&state.groups, now);
            let group = ConsistencyGroup {
                group_id: group_id.clone(),
                created_at: now,
                members,
                max_skew,
                status: GroupStatus::Active,
            };
            state.groups.insert(group_id, group.clone());
            state.version += 1;
            group
        };

        self.persist().await?;
        info!(
            group = %group.group_id,
            members = group.members.len(),
            "created consistency group"
        );
        Ok(group)
    }

    /// Fetch one group by id.
    pub async fn get(&self, group_id: &str) -> Result<ConsistencyGroup> {
        self.state
            .read()
            .await
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("consistency group {}", group_id)))
    }

    /// All groups, newest first, optionally only those with a member on
    /// the given system.
    pub async fn list(&self, system_id: Option<&str>) -> Vec<ConsistencyGroup> {
        let state = self.state.read().await;
        let mut groups: Vec<ConsistencyGroup> = state
            .groups
            .values()
            .filter(|g| system_id.map_or(true, |sys| g.members.contains_key(sys)))
            .cloned()
            .collect();
        drop(state);
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        groups
    }

    /// Apply a status transition. Only `Active -> Archived` and
    /// `Active -> Deleted` are legal; anything else is the caller's bug.
    pub async fn set_status(&self, group_id: &str, status: GroupStatus) -> Result<ConsistencyGroup> {
        let group = {
            let mut state = self.state.write().await;
            let group = state
                .groups
                .get_mut(group_id)
                .ok_or_else(|| Error::NotFound(format!("consistency group {}", group_id)))?;
            if !group.status.can_transition_to(status) {
                return Err(Error::InvalidTransition(format!(
                    "group {}: {} -> {}",
                    group_id, group.status, status
                )));
            }
            group.status = status;
            let group = group.clone();
            state.version += 1;
            group
        };

        self.persist().await?;
        info!(group = %group_id, status = %status, "group status changed");
        Ok(group)
    }

    /// Member artifacts of every active group, so the matcher does not
    /// re-recommend them.
    pub async fn grouped_artifacts(&self) -> HashSet<(SystemId, String)> {
        let state = self.state.read().await;
        state
            .groups
            .values()
            .filter(|g| g.status == GroupStatus::Active)
            .flat_map(|g| {
                g.members
                    .iter()
                    .map(|(sys, m)| (sys.clone(), m.artifact_id.clone()))
            })
            .collect()
    }

    /// Write the current state to disk: temp file, then atomic rename.
    async fn persist(&self) -> Result<()> {
        let _gate = self.persist_gate.lock().await;

        // Snapshot the state after acquiring the gate so the last writer
        // always persists every mutation before it.
        let snapshot = {
            let state = self.state.read().await;
            StoreSnapshot {
                version: state.version,
                checksum: checksum_of(&state.groups)?,
                groups: state.groups.clone(),
            }
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), version = snapshot.version, "persisted group store");
        Ok(())
    }
}

/// Monotonic-time-derived id, disambiguated on same-second collision.
fn next_group_id(groups: &BTreeMap<String, ConsistencyGroup>, now: DateTime<Utc>) -> String {
    let base = format!("cg-{}", now.format("%Y%m%dT%H%M%SZ"));
    if !groups.contains_key(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let id = format!("{}-{}", base, n);
        if !groups.contains_key(&id) {
            return id;
        }
        n += 1;
    }
}

fn checksum_of(groups: &BTreeMap<String, ConsistencyGroup>) -> Result<String> {
    let json = serde_json::to_string(groups)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Hex encoding utility
mod hex {
    pub fn encode(data: impl AsRef<[u8]>) -> String {
        data.as_ref()
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect()
    }
}
