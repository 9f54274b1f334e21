//! The timestamp matcher.
//!
//! Given normalized artifact listings from N subsystems and a tolerance,
//! proposes candidate consistency sets: one artifact per system, every
//! pairwise skew within tolerance. Output is advisory; nothing here is
//! persisted and no shared state is held, so callers may run proposals
//! with unbounded concurrency.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use syncpoint_common::{skew, BackupArtifact, GroupMember, SystemId};

/// How tight a candidate's members sit together, rated from its widest
/// pairwise skew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationQuality {
    /// Widest skew within five minutes
    Excellent,
    /// Within thirty minutes
    Good,
    /// Within one hour
    Fair,
    /// Anything wider
    Poor,
}

impl CoordinationQuality {
    pub fn rate(widest_skew: Duration) -> Self {
        if widest_skew <= Duration::from_secs(300) {
            CoordinationQuality::Excellent
        } else if widest_skew <= Duration::from_secs(1800) {
            CoordinationQuality::Good
        } else if widest_skew <= Duration::from_secs(3600) {
            CoordinationQuality::Fair
        } else {
            CoordinationQuality::Poor
        }
    }
}

/// An advisory consistency set: one artifact per participating system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateGroup {
    pub members: BTreeMap<SystemId, GroupMember>,
    /// Widest pairwise skew between members
    pub max_skew: Duration,
}

impl CandidateGroup {
    pub fn quality(&self) -> CoordinationQuality {
        CoordinationQuality::rate(self.max_skew)
    }

    /// The member artifacts as `(system_id, artifact_id)` pairs.
    pub fn member_ids(&self) -> BTreeSet<(SystemId, String)> {
        self.members
            .iter()
            .map(|(sys, m)| (sys.clone(), m.artifact_id.clone()))
            .collect()
    }
}

/// Propose candidate consistency sets across the given listings.
///
/// A consistency group needs at least two members, so listings from
/// fewer than two systems produce an empty result; an empty proposal is
/// informational, not an error. Artifacts whose `chain_parent` does not
/// resolve within their own system's listing are excluded from matching.
pub fn propose(
    lists: &BTreeMap<SystemId, Vec<BackupArtifact>>,
    tolerance: Duration,
) -> Vec<CandidateGroup> {
    propose_excluding(lists, tolerance, &HashSet::new())
}

/// [`propose`], with artifacts already bound to a group left out so they
/// are not re-recommended.
pub fn propose_excluding(
    lists: &BTreeMap<SystemId, Vec<BackupArtifact>>,
    tolerance: Duration,
    exclude: &HashSet<(SystemId, String)>,
) -> Vec<CandidateGroup> {
    let systems = eligible_systems(lists, exclude);
    if systems.len() < 2 {
        return Vec::new();
    }

    let mut visited: BTreeSet<Vec<(usize, usize)>> = BTreeSet::new();
    let mut maximal: BTreeSet<Vec<(usize, usize)>> = BTreeSet::new();

    // Seed with every in-tolerance pair, then grow each seed into the
    // maximal sets it belongs to. Every member pair must itself be within
    // tolerance; two artifacts are never bridged through a third.
    for i in 0..systems.len() {
        for j in i + 1..systems.len() {
            for (ai, a) in systems[i].1.iter().enumerate() {
                for (bj, b) in systems[j].1.iter().enumerate() {
                    if skew(a.created_at, b.created_at) <= tolerance {
                        extend(
                            vec![(i, ai), (j, bj)],
                            &systems,
                            tolerance,
                            &mut visited,
                            &mut maximal,
                        );
                    }
                }
            }
        }
    }

    let mut candidates: Vec<CandidateGroup> = maximal
        .into_iter()
        .map(|set| build_candidate(&set, &systems))
        .collect();

    candidates.sort_by(|a, b| {
        let recency_a: i64 = a.members.values().map(|m| m.created_at.timestamp_millis()).sum();
        let recency_b: i64 = b.members.values().map(|m| m.created_at.timestamp_millis()).sum();
        let kind_a: u32 = a.members.values().map(|m| m.kind.preference_rank() as u32).sum();
        let kind_b: u32 = b.members.values().map(|m| m.kind.preference_rank() as u32).sum();
        recency_b
            .cmp(&recency_a)
            .then(kind_a.cmp(&kind_b))
            .then(a.max_skew.cmp(&b.max_skew))
    });

    debug!(
        candidates = candidates.len(),
        tolerance_secs = tolerance.as_secs(),
        "proposed consistency sets"
    );
    candidates
}

/// Propose the single set closest to an explicit target instant: per
/// system, the artifact nearest `target` and within `tolerance` of it.
///
/// Members are matched against the target, not against each other, so
/// the resulting `max_skew` may reach twice the tolerance.
pub fn propose_near(
    lists: &BTreeMap<SystemId, Vec<BackupArtifact>>,
    target: DateTime<Utc>,
    tolerance: Duration,
) -> Option<CandidateGroup> {
    let systems = eligible_systems(lists, &HashSet::new());

    let mut members: BTreeMap<SystemId, GroupMember> = BTreeMap::new();
    for (system_id, artifacts) in &systems {
        let closest = artifacts
            .iter()
            .map(|a| (skew(a.created_at, target), *a))
            .filter(|(delta, _)| *delta <= tolerance)
            .min_by_key(|(delta, _)| *delta);
        if let Some((_, artifact)) = closest {
            members.insert(system_id.clone(), GroupMember::from(artifact));
        }
    }

    if members.len() < 2 {
        return None;
    }
    let max_skew = widest_skew(members.values());
    Some(CandidateGroup { members, max_skew })
}

/// Per-system artifact slices that may participate in matching: excluded
/// artifacts removed, unresolvable chains removed, empty systems dropped.
fn eligible_systems<'a>(
    lists: &'a BTreeMap<SystemId, Vec<BackupArtifact>>,
    exclude: &HashSet<(SystemId, String)>,
) -> Vec<(SystemId, Vec<&'a BackupArtifact>)> {
    lists
        .iter()
        .filter_map(|(system_id, artifacts)| {
            let known: HashSet<&str> = artifacts.iter().map(|a| a.artifact_id.as_str()).collect();
            let eligible: Vec<&BackupArtifact> = artifacts
                .iter()
                .filter(|a| {
                    if exclude.contains(&(system_id.clone(), a.artifact_id.clone())) {
                        return false;
                    }
                    match &a.chain_parent {
                        Some(parent) if !known.contains(parent.as_str()) => {
                            debug!(
                                system = %system_id,
                                artifact = %a.artifact_id,
                                parent = %parent,
                                "excluding artifact with unresolvable chain parent"
                            );
                            false
                        }
                        _ => true,
                    }
                })
                .collect();
            if eligible.is_empty() {
                None
            } else {
                Some((system_id.clone(), eligible))
            }
        })
        .collect()
}

/// Grow `set` by adding, from each uncovered system, every artifact that
/// stays pairwise within tolerance. Sets that cannot grow are maximal.
fn extend(
    set: Vec<(usize, usize)>,
    systems: &[(SystemId, Vec<&BackupArtifact>)],
    tolerance: Duration,
    visited: &mut BTreeSet<Vec<(usize, usize)>>,
    maximal: &mut BTreeSet<Vec<(usize, usize)>>,
) {
    if !visited.insert(set.clone()) {
        return;
    }

    let covered: HashSet<usize> = set.iter().map(|(sys, _)| *sys).collect();
    let mut grew = false;

    for (sys_idx, (_, artifacts)) in systems.iter().enumerate() {
        if covered.contains(&sys_idx) {
            continue;
        }
        for (art_idx, artifact) in artifacts.iter().enumerate() {
            let fits = set.iter().all(|(s, a)| {
                skew(artifact.created_at, systems[*s].1[*a].created_at) <= tolerance
            });
            if fits {
                grew = true;
                let mut next = set.clone();
                next.push((sys_idx, art_idx));
                next.sort_unstable();
                extend(next, systems, tolerance, visited, maximal);
            }
        }
    }

    if !grew {
        maximal.insert(set);
    }
}

fn build_candidate(
    set: &[(usize, usize)],
    systems: &[(SystemId, Vec<&BackupArtifact>)],
) -> CandidateGroup {
    let members: BTreeMap<SystemId, GroupMember> = set
        .iter()
        .map(|(sys, art)| {
            let (system_id, artifacts) = &systems[*sys];
            (system_id.clone(), GroupMember::from(artifacts[*art]))
        })
        .collect();
    let max_skew = widest_skew(members.values());
    CandidateGroup { members, max_skew }
}

fn widest_skew<'a>(members: impl Iterator<Item = &'a GroupMember>) -> Duration {
    let members: Vec<&GroupMember> = members.collect();
    let mut widest = Duration::ZERO;
    for (i, a) in members.iter().enumerate() {
        for b in &members[i + 1..] {
            widest = widest.max(skew(a.created_at, b.created_at));
        }
    }
    widest
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use syncpoint_common::ArtifactKind;

    fn artifact(system: &str, id: &str, at: i64, kind: ArtifactKind) -> BackupArtifact {
        BackupArtifact {
            system_id: system.to_string(),
            artifact_id: id.to_string(),
            kind,
            created_at: Utc.timestamp_opt(at, 0).unwrap(),
            size_bytes: None,
            chain_parent: None,
        }
    }

    fn lists(entries: Vec<BackupArtifact>) -> BTreeMap<SystemId, Vec<BackupArtifact>> {
        let mut map: BTreeMap<SystemId, Vec<BackupArtifact>> = BTreeMap::new();
        for a in entries {
            map.entry(a.system_id.clone()).or_default().push(a);
        }
        map
    }

    #[test]
    fn two_systems_within_tolerance_match() {
        let lists = lists(vec![
            artifact("sys1", "a", 100, ArtifactKind::Full),
            artifact("sys2", "b", 101, ArtifactKind::Full),
        ]);
        let candidates = propose(&lists, Duration::from_secs(5));

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].members.len(), 2);
        assert_eq!(candidates[0].max_skew, Duration::from_secs(1));
    }

    #[test]
    fn out_of_tolerance_produces_nothing() {
        let lists = lists(vec![
            artifact("sys1", "a", 100, ArtifactKind::Full),
            artifact("sys2", "b", 200, ArtifactKind::Full),
        ]);
        assert!(propose(&lists, Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn no_transitive_bridging() {
        // sys1-sys2 and sys2-sys3 are each within tolerance, sys1-sys3 is
        // not: no three-member set, but both pairs stand on their own.
        let lists = lists(vec![
            artifact("sys1", "a", 100, ArtifactKind::Full),
            artifact("sys2", "b", 103, ArtifactKind::Full),
            artifact("sys3", "c", 106, ArtifactKind::Full),
        ]);
        let candidates = propose(&lists, Duration::from_secs(5));

        assert_eq!(candidates.len(), 2);
        for candidate in &candidates {
            assert_eq!(candidate.members.len(), 2);
        }
        let sets: Vec<BTreeSet<(SystemId, String)>> =
            candidates.iter().map(|c| c.member_ids()).collect();
        assert!(sets.iter().any(|s| s.contains(&("sys1".into(), "a".into()))
            && s.contains(&("sys2".into(), "b".into()))));
        assert!(sets.iter().any(|s| s.contains(&("sys2".into(), "b".into()))
            && s.contains(&("sys3".into(), "c".into()))));
    }

    #[test]
    fn three_systems_all_pairwise_compatible_form_one_set() {
        let lists = lists(vec![
            artifact("sys1", "a", 100, ArtifactKind::Full),
            artifact("sys2", "b", 102, ArtifactKind::Full),
            artifact("sys3", "c", 104, ArtifactKind::Full),
        ]);
        let candidates = propose(&lists, Duration::from_secs(5));

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].members.len(), 3);
        assert_eq!(candidates[0].max_skew, Duration::from_secs(4));
    }

    #[test]
    fn every_pair_in_every_candidate_is_within_tolerance() {
        let lists = lists(vec![
            artifact("sys1", "a1", 100, ArtifactKind::Full),
            artifact("sys1", "a2", 140, ArtifactKind::Full),
            artifact("sys2", "b1", 102, ArtifactKind::Full),
            artifact("sys2", "b2", 143, ArtifactKind::Full),
            artifact("sys3", "c1", 120, ArtifactKind::Full),
        ]);
        let tolerance = Duration::from_secs(10);
        for candidate in propose(&lists, tolerance) {
            let members: Vec<&GroupMember> = candidate.members.values().collect();
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    assert!(skew(a.created_at, b.created_at) <= tolerance);
                }
            }
        }
    }

    #[test]
    fn tighter_tolerance_candidates_survive_loosening() {
        let lists = lists(vec![
            artifact("sys1", "a1", 100, ArtifactKind::Full),
            artifact("sys1", "a2", 150, ArtifactKind::Full),
            artifact("sys2", "b1", 101, ArtifactKind::Full),
            artifact("sys2", "b2", 152, ArtifactKind::Full),
        ]);
        let tight = propose(&lists, Duration::from_secs(3));
        let loose = propose(&lists, Duration::from_secs(60));

        for candidate in &tight {
            let ids = candidate.member_ids();
            assert!(
                loose.iter().any(|c| ids.is_subset(&c.member_ids())),
                "tight candidate {:?} not producible under looser tolerance",
                ids
            );
        }
    }

    #[test]
    fn single_system_or_empty_input_yields_nothing() {
        assert!(propose(&BTreeMap::new(), Duration::from_secs(5)).is_empty());

        let one = lists(vec![artifact("sys1", "a", 100, ArtifactKind::Full)]);
        assert!(propose(&one, Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn unresolvable_chain_parent_excludes_artifact() {
        let mut entries = vec![
            artifact("sys1", "a", 100, ArtifactKind::Full),
            artifact("sys2", "b", 101, ArtifactKind::Incremental),
        ];
        entries[1].chain_parent = Some("vanished-base".to_string());
        let lists = lists(entries);

        assert!(propose(&lists, Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn resolvable_chain_parent_keeps_artifact() {
        let mut entries = vec![
            artifact("sys1", "a", 100, ArtifactKind::Full),
            artifact("sys2", "base", 50, ArtifactKind::Base),
            artifact("sys2", "b", 101, ArtifactKind::Incremental),
        ];
        entries[2].chain_parent = Some("base".to_string());
        let lists = lists(entries);

        let candidates = propose(&lists, Duration::from_secs(5));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].members["sys2"].artifact_id, "b");
    }

    #[test]
    fn already_grouped_artifacts_are_not_re_recommended() {
        let lists = lists(vec![
            artifact("sys1", "a", 100, ArtifactKind::Full),
            artifact("sys2", "b", 101, ArtifactKind::Full),
        ]);
        let mut exclude = HashSet::new();
        exclude.insert(("sys1".to_string(), "a".to_string()));

        assert!(propose_excluding(&lists, Duration::from_secs(5), &exclude).is_empty());
        assert_eq!(propose(&lists, Duration::from_secs(5)).len(), 1);
    }

    #[test]
    fn candidates_prefer_recent_then_full_then_tight() {
        let lists = lists(vec![
            artifact("sys1", "old-full", 100, ArtifactKind::Full),
            artifact("sys1", "new-incr", 500, ArtifactKind::Incremental),
            artifact("sys2", "old-full", 101, ArtifactKind::Full),
            artifact("sys2", "new-incr", 502, ArtifactKind::Incremental),
        ]);
        let candidates = propose(&lists, Duration::from_secs(5));

        assert_eq!(candidates.len(), 2);
        // Recency dominates kind preference.
        assert_eq!(candidates[0].members["sys1"].artifact_id, "new-incr");
        assert_eq!(candidates[1].members["sys1"].artifact_id, "old-full");
    }

    #[test]
    fn propose_near_picks_closest_within_tolerance() {
        let lists = lists(vec![
            artifact("sys1", "far", 100, ArtifactKind::Full),
            artifact("sys1", "near", 190, ArtifactKind::Full),
            artifact("sys2", "near", 210, ArtifactKind::Full),
        ]);
        let target = Utc.timestamp_opt(200, 0).unwrap();

        let candidate = propose_near(&lists, target, Duration::from_secs(30)).unwrap();
        assert_eq!(candidate.members["sys1"].artifact_id, "near");
        assert_eq!(candidate.members["sys2"].artifact_id, "near");
        assert_eq!(candidate.max_skew, Duration::from_secs(20));

        // Too tight for sys1: only one system remains, so no candidate.
        assert!(propose_near(&lists, target, Duration::from_secs(5)).is_none());
    }

    #[test]
    fn quality_rating_thresholds() {
        assert_eq!(
            CoordinationQuality::rate(Duration::from_secs(60)),
            CoordinationQuality::Excellent
        );
        assert_eq!(
            CoordinationQuality::rate(Duration::from_secs(900)),
            CoordinationQuality::Good
        );
        assert_eq!(
            CoordinationQuality::rate(Duration::from_secs(3000)),
            CoordinationQuality::Fair
        );
        assert_eq!(
            CoordinationQuality::rate(Duration::from_secs(7200)),
            CoordinationQuality::Poor
        );
    }
}
