//! Sends STOP/CONT/TSTP/WINCH/TERM to a resolved target set.

use nix::sys::signal::{self, kill, killpg, Signal};
use nix::unistd::Pid;

use crate::target::{Target, TargetSet};

/// Delivers `signal` to every member of `targets`.
///
/// Negative targets are signalled as whole process groups. PID 1 and PID 0
/// are never valid destinations and are silently skipped rather than
/// attempted -- they should never appear in a resolved target set, but this
/// is cheap enough to assert unconditionally.
///
/// Returns the number of targets the signal was actually delivered to.
/// Partial failure is normal (the target set erodes as processes exit) and
/// is not reported as an error; only the caller's decision to keep ticking
/// depends on whether this returns zero.
pub fn send(targets: &TargetSet, signal: Signal) -> usize {
    let mut delivered = 0;
    for &target in targets {
        if send_one(target, signal) {
            delivered += 1;
        }
    }
    delivered
}

/// Delivers `signal` to a single target, refusing PID 1 and PID 0.
pub fn send_one(target: Target, signal: Signal) -> bool {
    if target.magnitude() <= 1 {
        log::warn!("refusing to signal pid/pgid {target}: init and pid 0 are never destinations");
        return false;
    }

    let result = if target.is_pgid() {
        killpg(Pid::from_raw(target.magnitude()), signal)
    } else {
        kill(Pid::from_raw(target.magnitude()), signal)
    };

    match result {
        Ok(()) => true,
        Err(errno) => {
            log::debug!("signal {signal:?} to {target} failed: {errno}");
            false
        }
    }
}

/// Zero-signal reachability probe: `true` iff the kernel still knows about
/// `target` (PID or whole group) and permits us to signal it.
pub fn probe(target: Target) -> bool {
    let result = if target.is_pgid() {
        killpg(Pid::from_raw(target.magnitude()), None)
    } else {
        kill(Pid::from_raw(target.magnitude()), None)
    };
    result.is_ok()
}

/// Re-raises `sig` at the calling process after resetting its disposition
/// to the default handler, so a parent shell observes the standard
/// `128+signo` wait-status for an interrupt this controller caught.
pub fn reraise_at_self(sig: Signal) {
    let default = signal::SigAction::new(
        signal::SigHandler::SigDfl,
        signal::SaFlags::empty(),
        signal::SigSet::empty(),
    );
    // SAFETY: restoring the default disposition before re-raising is the
    // documented way to make a caught signal observable to the parent again.
    unsafe {
        let _ = signal::sigaction(sig, &default);
    }
    let _ = kill(nix::unistd::getpid(), sig);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_one_is_never_a_destination() {
        assert!(!send_one(Target::pid(1), Signal::SIGCONT));
    }

    #[test]
    fn signalling_self_with_cont_succeeds() {
        let pid = std::process::id() as i32;
        assert!(send_one(Target::pid(pid), Signal::SIGCONT));
    }

    #[test]
    fn send_returns_zero_when_every_target_is_invalid() {
        let mut set = TargetSet::new();
        set.insert(Target::pid(1));
        assert_eq!(send(&set, Signal::SIGCONT), 0);
    }

    #[test]
    fn probe_finds_self_reachable() {
        let pid = std::process::id() as i32;
        assert!(probe(Target::pid(pid)));
    }

    #[test]
    fn probe_reports_an_unreachable_pid() {
        assert!(!probe(Target::pid(i32::MAX - 1)));
    }
}
