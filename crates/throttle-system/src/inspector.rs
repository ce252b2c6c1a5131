//! Resolves PIDs to PGIDs and walks parent/child relations.
//!
//! Two back-ends are offered, per the design notes: a fast single-syscall
//! probe (preferred whenever it suffices) and a full process-table
//! snapshot (needed only for descendant discovery). The process table is
//! never cached across ticks -- it can go stale the instant another
//! process forks or exits.

use sysinfo::{PidExt, ProcessExt, System, SystemExt};
use throttle_protocol::ThrottleError;

/// One row of a process-table [`snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    pub pgid: i32,
}

/// Single-syscall PGID lookup. Missing processes resolve to `None` rather
/// than an error -- by the time the caller acts on the result the process
/// may already be gone, and that's expected, not exceptional.
pub fn pgid_of(pid: i32) -> Option<i32> {
    nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(pid)))
        .ok()
        .map(|p| p.as_raw())
}

/// Full process-table scan. Considerably slower than [`pgid_of`]; used only
/// when descendant discovery is requested or the fast path can't answer.
///
/// `sysinfo` gives us the living PID set and parentage portably; the PGID of
/// each row still comes from a `getpgid` call, since process-group ids are
/// a POSIX-specific notion `sysinfo` doesn't model directly.
pub fn snapshot() -> Result<Vec<ProcessInfo>, ThrottleError> {
    let mut sys = System::new();
    sys.refresh_processes();

    let rows = sys
        .processes()
        .values()
        .map(|proc_| {
            let pid = proc_.pid().as_u32() as i32;
            let ppid = proc_.parent().map(|p| p.as_u32() as i32).unwrap_or(0);
            let pgid = pgid_of(pid).unwrap_or(0);
            ProcessInfo { pid, ppid, pgid }
        })
        .collect::<Vec<_>>();

    if rows.is_empty() {
        return Err(ThrottleError::SnapshotFailed {
            reason: "process table scan returned no processes".into(),
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgid_of_self_is_reachable() {
        let pid = std::process::id() as i32;
        assert!(pgid_of(pid).is_some());
    }

    #[test]
    fn pgid_of_missing_pid_is_none() {
        // PID 1 as `init` always exists on a real system, but a very large,
        // almost certainly unassigned PID should not.
        assert_eq!(pgid_of(i32::MAX - 1), None);
    }

    #[test]
    fn snapshot_contains_the_current_process() {
        let rows = snapshot().expect("snapshot should succeed on a live system");
        let pid = std::process::id() as i32;
        assert!(rows.iter().any(|row| row.pid == pid));
    }
}
