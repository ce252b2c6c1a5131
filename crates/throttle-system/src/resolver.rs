//! Expands the user's PID/PGID list into the set of identifiers actually
//! signalled on a tick, per the group/children expansion flags.

use std::collections::{HashMap, HashSet, VecDeque};

use throttle_protocol::ThrottleError;

use crate::inspector::{pgid_of, snapshot, ProcessInfo};
use crate::target::{Target, TargetSet};

/// Resolves `users` into the live target set, given whether group and
/// descendant expansion were requested.
///
/// Prefers the fast per-PID PGID probe over a full table scan whenever
/// descendants aren't needed, per the inspector's back-end policy.
pub fn resolve(users: &[Target], group_requested: bool, children_requested: bool) -> TargetSet {
    resolve_inner(users, group_requested, children_requested, pgid_of, snapshot)
}

fn resolve_inner(
    users: &[Target],
    group_requested: bool,
    children_requested: bool,
    pgid_lookup: impl Fn(i32) -> Option<i32> + Copy,
    snapshot_fn: impl Fn() -> Result<Vec<ProcessInfo>, ThrottleError> + Copy,
) -> TargetSet {
    if !group_requested && !children_requested {
        return users.iter().copied().collect();
    }

    if !children_requested {
        return remap_to_groups_fast(users, pgid_lookup);
    }

    let rows = match snapshot_fn() {
        Ok(rows) => rows,
        Err(e) => {
            // SNAPSHOT_FAILED: degrade to the group-only fast path for this tick.
            log::warn!("process table snapshot failed, degrading to fast path: {e}");
            return resolve_inner(users, group_requested, false, pgid_lookup, snapshot_fn);
        }
    };

    let pgid_by_pid: HashMap<i32, i32> = rows.iter().map(|r| (r.pid, r.pgid)).collect();
    let children_by_parent = children_by_parent(&rows);
    let expanded = expand_descendants(users, &pgid_by_pid, &children_by_parent);

    if !group_requested {
        return expanded;
    }

    remap_to_groups(&expanded, &pgid_by_pid)
}

/// Step 2: group-only fast path. Keeps negative entries as-is; maps
/// positive PIDs to `-pgid` when the group is real (pgid > 1), otherwise
/// drops the grouping and keeps the PID ungrouped.
fn remap_to_groups_fast(users: &[Target], pgid_lookup: impl Fn(i32) -> Option<i32>) -> TargetSet {
    let mut out = TargetSet::new();
    for &t in users {
        if t.is_pgid() {
            out.insert(t);
        } else {
            match pgid_lookup(t.magnitude()) {
                Some(pgid) if pgid > 1 => out.insert(Target::pgid(pgid)),
                _ => out.insert(t),
            }
        }
    }
    out
}

fn remap_to_groups(expanded: &TargetSet, pgid_by_pid: &HashMap<i32, i32>) -> TargetSet {
    let mut out = TargetSet::new();
    for &t in expanded {
        if t.is_pgid() {
            out.insert(t);
        } else {
            match pgid_by_pid.get(&t.magnitude()).copied() {
                Some(pgid) if pgid > 1 => out.insert(Target::pgid(pgid)),
                _ => out.insert(t),
            }
        }
    }
    out
}

/// Builds the parent -> children map used for descendant BFS, augmented
/// with the detached-double-forker heuristic: a process reparented to init
/// whose PID differs from its own PGID is filed as a virtual child of its
/// group leader. This is a best-effort guess (see design notes) and no
/// correctness test relies on it beyond "doesn't loop".
fn children_by_parent(rows: &[ProcessInfo]) -> HashMap<i32, Vec<i32>> {
    let mut map: HashMap<i32, Vec<i32>> = HashMap::new();
    for row in rows {
        map.entry(row.ppid).or_default().push(row.pid);
    }
    for row in rows {
        if row.ppid == 1 && row.pid != row.pgid {
            map.entry(row.pgid).or_default().push(row.pid);
        }
    }
    map
}

/// Steps 3-4: breadth-first expansion through `children_by_parent`, seeded
/// from `users`, that never crosses into a process belonging to a PGID
/// already protected by a negative entry in `users`.
fn expand_descendants(
    users: &[Target],
    pgid_by_pid: &HashMap<i32, i32>,
    children_by_parent: &HashMap<i32, Vec<i32>>,
) -> TargetSet {
    let protected: HashSet<i32> = users
        .iter()
        .filter(|t| t.is_pgid())
        .map(|t| t.magnitude())
        .collect();

    let mut expanded = TargetSet::new();
    for &u in users {
        expanded.insert(u);
    }

    let mut visited: HashSet<i32> = users.iter().map(|t| t.magnitude()).collect();
    let mut queue: VecDeque<i32> = users.iter().map(|t| t.magnitude()).collect();

    while let Some(parent) = queue.pop_front() {
        let Some(children) = children_by_parent.get(&parent) else {
            continue;
        };
        for &child in children {
            if !visited.insert(child) {
                continue;
            }
            let child_pgid = pgid_by_pid.get(&child).copied().unwrap_or(0);
            if protected.contains(&child_pgid) {
                continue;
            }
            expanded.insert(Target::pid(child));
            queue.push_back(child);
        }
    }

    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pid: i32, ppid: i32, pgid: i32) -> ProcessInfo {
        ProcessInfo { pid, ppid, pgid }
    }

    fn no_snapshot() -> Result<Vec<ProcessInfo>, ThrottleError> {
        Err(ThrottleError::SnapshotFailed {
            reason: "unused in this test".into(),
        })
    }

    #[test]
    fn no_expansion_returns_input_unchanged() {
        let users = vec![Target::pid(10), Target::pgid(20)];
        let set = resolve_inner(&users, false, false, |_| None, no_snapshot);
        assert_eq!(set.len(), 2);
        assert!(set.contains(Target::pid(10)));
        assert!(set.contains(Target::pgid(20)));
    }

    #[test]
    fn group_only_fast_path_maps_pids_to_pgids() {
        let users = vec![Target::pid(10)];
        let set = resolve_inner(&users, true, false, |pid| (pid == 10).then_some(10), no_snapshot);
        assert_eq!(set.len(), 1);
        assert!(set.contains(Target::pgid(10)));
    }

    #[test]
    fn group_only_fast_path_drops_ungrouped_pids() {
        let users = vec![Target::pid(10)];
        let set = resolve_inner(&users, true, false, |_| Some(1), no_snapshot);
        assert!(set.contains(Target::pid(10)));
    }

    /// Scenario: PIDs `{A, B}` where A's PGID is `G` and B is a child of A,
    /// with `--children --group`. Expect the output to be exactly `{-G}` --
    /// B is never emitted separately because `G` is already a protected
    /// group.
    #[test]
    fn group_already_protecting_a_pid_absorbs_its_children() {
        let rows = vec![row(100, 1, 100), row(101, 100, 100)];
        let snapshot_fn = move || Ok(rows.clone());

        let users = vec![Target::pgid(100), Target::pid(101)];
        let set = resolve_inner(&users, true, true, |_| None, snapshot_fn);

        assert_eq!(set.len(), 1);
        assert!(set.contains(Target::pgid(100)));
    }

    #[test]
    fn children_are_discovered_and_grouped_when_not_already_protected() {
        let rows = vec![row(100, 1, 100), row(101, 100, 100)];
        let snapshot_fn = move || Ok(rows.clone());

        let users = vec![Target::pid(100)];
        let set = resolve_inner(&users, true, true, |_| None, snapshot_fn);

        assert_eq!(set.len(), 1);
        assert!(set.contains(Target::pgid(100)));
    }

    #[test]
    fn snapshot_failure_degrades_to_fast_path() {
        let users = vec![Target::pid(10)];
        let set = resolve_inner(&users, true, true, |pid| (pid == 10).then_some(10), no_snapshot);
        assert!(set.contains(Target::pgid(10)));
    }

    #[test]
    fn dedup_across_children_by_parent_and_orphan_heuristic() {
        // Same pid reachable both as a direct child and via the ppid==1
        // orphan heuristic must not be visited twice or loop.
        let rows = vec![row(1, 0, 1), row(100, 1, 100), row(101, 1, 100)];
        let snapshot_fn = move || Ok(rows.clone());
        let users = vec![Target::pid(100)];
        let set = resolve_inner(&users, false, true, |_| None, snapshot_fn);
        assert!(set.contains(Target::pid(100)));
        assert!(set.contains(Target::pid(101)));
        assert_eq!(set.len(), 2);
    }
}
