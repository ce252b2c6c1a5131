//! Converts the `(run, stop)` pair into a periodic STOP/CONT schedule.

use std::time::Duration;

use nix::sys::signal::Signal;

use crate::signal;
use crate::target::TargetSet;

/// What happened at the end of a [`Scheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// STOP and CONT were both delivered to at least one target; keep going.
    Continued,
    /// The resolved target set was empty; the caller should stop ticking.
    TargetSetEmpty,
    /// Every delivery in the set failed; the caller should stop ticking.
    AllDeliveriesFailed,
}

/// The target set a tick acted on, paired with what happened.
#[derive(Debug, Clone)]
pub struct TickResult {
    pub targets: TargetSet,
    pub outcome: TickOutcome,
}

/// Drives one duty cycle: sleep `run_secs`, STOP the resolved targets,
/// sleep `stop_secs`, CONT them. Ticks are meant to be called in a loop by
/// the controller lifecycle until the loop's own termination condition
/// (child reaped, or no attached PID still answers a zero-signal probe)
/// is met.
pub struct Scheduler {
    run_secs: f64,
    stop_secs: f64,
}

impl Scheduler {
    pub fn new(run_secs: f64, stop_secs: f64) -> Self {
        Self {
            run_secs,
            stop_secs,
        }
    }

    /// Runs a single tick, re-resolving the target set via `resolve` right
    /// before the STOP phase as the design requires.
    pub fn tick(&self, resolve: impl FnOnce() -> TargetSet) -> TickResult {
        sleep_interruptible(Duration::from_secs_f64(self.run_secs));

        let targets = resolve();
        if targets.is_empty() {
            return TickResult {
                targets,
                outcome: TickOutcome::TargetSetEmpty,
            };
        }

        if signal::send(&targets, Signal::SIGSTOP) == 0 {
            return TickResult {
                targets,
                outcome: TickOutcome::AllDeliveriesFailed,
            };
        }

        sleep_interruptible(Duration::from_secs_f64(self.stop_secs));

        if signal::send(&targets, Signal::SIGCONT) == 0 {
            return TickResult {
                targets,
                outcome: TickOutcome::AllDeliveriesFailed,
            };
        }

        TickResult {
            targets,
            outcome: TickOutcome::Continued,
        }
    }
}

/// Sleeps for `duration`, but -- unlike `std::thread::sleep`, which retries
/// the remainder on `EINTR` -- returns as soon as a signal interrupts it.
/// Signal handlers in this supervisor don't set `SA_RESTART`, so a caught
/// WINCH/CHLD/TSTP during a tick's sleep should shorten it, not be masked.
pub fn sleep_interruptible(duration: Duration) {
    let ts = libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };
    // SAFETY: a single nanosleep(2) call with no remainder tracking; we
    // deliberately don't resume the remaining time after an EINTR.
    unsafe {
        libc::nanosleep(&ts, std::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Target;

    #[test]
    fn empty_resolution_ends_the_tick_immediately() {
        let scheduler = Scheduler::new(0.0, 0.0);
        let result = scheduler.tick(TargetSet::new);
        assert_eq!(result.outcome, TickOutcome::TargetSetEmpty);
    }

    #[test]
    fn every_delivery_failing_ends_the_tick() {
        let scheduler = Scheduler::new(0.0, 0.0);
        let result = scheduler.tick(|| {
            let mut set = TargetSet::new();
            set.insert(Target::pid(1)); // always refused
            set
        });
        assert_eq!(result.outcome, TickOutcome::AllDeliveriesFailed);
    }

    #[test]
    fn sleep_interruptible_returns_for_a_zero_duration() {
        // Regression guard: a zero-length sleep must return promptly rather
        // than block, since `tick` calls this before every resolve.
        sleep_interruptible(Duration::from_secs(0));
    }
}
