//! Wires signal delivery into the scheduler and owns the one cleanup path
//! that must run no matter how the process is leaving: normal completion,
//! a reaped child, or a caught interrupt.
//!
//! Everything here runs on a single thread. `Signals` gives us a self-pipe
//! under the hood, so polling `pending()` between ticks is enough to learn
//! about CHLD/TSTP/CONT/WINCH/INT/TERM/USR1 (and INFO, on BSD/macOS) without
//! a dedicated listener thread -- matching the cooperative,
//! signal-interrupted-sleep model the scheduler already uses.

use std::os::fd::{AsFd, BorrowedFd};

use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use signal_hook::consts::{SIGCHLD, SIGCONT, SIGINT, SIGTERM, SIGTSTP, SIGUSR1, SIGWINCH};
use signal_hook::iterator::Signals;

use throttle_protocol::{Configuration, Mode, ThrottleError, WantGroup};

use crate::launch::{self, pty};
use crate::resolver;
use crate::scheduler::{Scheduler, TickOutcome};
use crate::signal as ctl;
use crate::target::{Target, TargetSet};

/// How the process should actually leave: either `main` maps this to a
/// plain `std::process::exit`, or the process has already been felled by a
/// re-raised signal and `main` will never see this value used.
#[derive(Debug, Clone, Copy)]
pub enum ExitOutcome {
    /// Exit cleanly, or adopt the launched child's own exit code.
    Code(i32),
    /// The launched child was killed by a signal; adopt its number.
    Signal(i32),
    /// An INT/TERM was caught; `cleanup` re-raises it at self before this
    /// is ever returned to `main`. Kept only as a typed fallback in case
    /// the re-raise is somehow masked.
    Interrupted,
}

/// Owns everything the Controller Lifecycle needs across the run: the
/// resolved configuration, the launched child (if any), the pty/termios
/// state the Cleanup routine must tear down, and the last target set the
/// signal handlers act on.
pub struct Controller {
    config: Configuration,
    original_targets: Vec<Target>,
    want_group: bool,
    launched_pid: Option<Pid>,
    foreground_terminal: Option<std::os::fd::RawFd>,
    pty_master: Option<std::os::fd::OwnedFd>,
    saved_termios: Option<(std::os::fd::RawFd, nix::sys::termios::Termios)>,
    current_targets: TargetSet,
    ever_signalled: bool,
    cleaned_up: bool,
    scheduler: Scheduler,
    signals: Signals,
    caught: Option<Signal>,
}

/// Signals the lifecycle registers with `signal-hook`. `SIGINFO` only
/// exists on the BSD family and macOS, where some shells bind the status
/// key to it instead of `SIGUSR1`.
fn watched_signals() -> Vec<i32> {
    #[allow(unused_mut)]
    let mut signals = vec![SIGCHLD, SIGTSTP, SIGCONT, SIGWINCH, SIGINT, SIGTERM, SIGUSR1];
    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    signals.push(libc::SIGINFO);
    signals
}

/// `Default` only applies once launch mode has implicitly turned grouping
/// on (4.6 step 5); attach mode leaves the tri-state exactly as given.
fn effective_want_group(want_group: WantGroup, is_launch: bool) -> bool {
    match want_group {
        WantGroup::ForceOn => true,
        WantGroup::ForceOff => false,
        WantGroup::Default => is_launch,
    }
}

impl Controller {
    pub fn new(config: Configuration) -> Result<Self, ThrottleError> {
        let is_launch = matches!(config.mode(), Mode::Launch { .. });
        let original_targets = match config.mode() {
            Mode::Attach { targets } => targets.iter().map(|&p| Target::from_raw(p)).collect(),
            Mode::Launch { .. } => Vec::new(),
        };
        let want_group = effective_want_group(config.want_group(), is_launch);
        let scheduler = Scheduler::new(config.run_secs(), config.stop_secs());
        let signals = Signals::new(watched_signals()).map_err(ThrottleError::Io)?;

        Ok(Self {
            config,
            original_targets,
            want_group,
            launched_pid: None,
            foreground_terminal: None,
            pty_master: None,
            saved_termios: None,
            current_targets: TargetSet::new(),
            ever_signalled: false,
            cleaned_up: false,
            scheduler,
            signals,
            caught: None,
        })
    }

    fn resolve_targets(&self) -> TargetSet {
        resolver::resolve(&self.original_targets, self.want_group, self.config.want_children())
    }

    /// Runs the whole lifecycle -- dry run, main loop, then Cleanup -- and
    /// returns the outcome `main` should turn into a process exit.
    pub fn run(mut self) -> ExitOutcome {
        let outcome = if self.config.dry_run() {
            self.run_dry_run()
        } else {
            match self.config.mode().clone() {
                Mode::Launch { argv } => self.run_launch(argv),
                Mode::Attach { .. } => self.run_attach(),
            }
        };
        self.cleanup();
        outcome
    }

    fn run_dry_run(&self) -> ExitOutcome {
        match self.config.mode() {
            Mode::Launch { argv } => println!("{}", argv.join(" ")),
            Mode::Attach { .. } => {
                let targets = self.resolve_targets();
                let rendered = targets
                    .iter()
                    .map(Target::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                println!("{rendered}");
            }
        }
        ExitOutcome::Code(0)
    }

    fn run_launch(&mut self, argv: Vec<String>) -> ExitOutcome {
        let want_nogroup = matches!(self.config.want_group(), WantGroup::ForceOff);
        let outcome = match launch::launch(&argv, self.config.want_tty(), want_nogroup) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("{e}");
                return ExitOutcome::Code(1);
            }
        };

        log::info!("launched pid {} (pty: {})", outcome.child_pid, outcome.pty_master.is_some());
        self.launched_pid = Some(outcome.child_pid);
        self.original_targets = vec![Target::pid(outcome.child_pid.as_raw())];
        self.want_group = effective_want_group(self.config.want_group(), true);
        self.pty_master = outcome.pty_master;
        self.saved_termios = outcome.saved_termios;
        self.foreground_terminal = outcome.foreground_terminal;

        loop {
            self.drain_signals();
            if self.caught.is_some() {
                return ExitOutcome::Interrupted;
            }
            if let Some(exit) = self.try_reap() {
                return exit;
            }

            let result = self.scheduler.tick(|| self.resolve_targets());
            self.note_tick(&result);

            self.drain_signals();
            if self.caught.is_some() {
                return ExitOutcome::Interrupted;
            }
            if let Some(exit) = self.try_reap() {
                return exit;
            }
            if matches!(result.outcome, TickOutcome::TargetSetEmpty | TickOutcome::AllDeliveriesFailed) {
                // The launched pid vanished between resolve and the next
                // WNOHANG poll; loop once more so `try_reap` catches it.
                continue;
            }
        }
    }

    fn run_attach(&mut self) -> ExitOutcome {
        loop {
            self.drain_signals();
            if self.caught.is_some() {
                return ExitOutcome::Interrupted;
            }
            if !self.any_target_reachable() {
                return ExitOutcome::Code(0);
            }

            let result = self.scheduler.tick(|| self.resolve_targets());
            self.note_tick(&result);

            self.drain_signals();
            if self.caught.is_some() {
                return ExitOutcome::Interrupted;
            }
            match result.outcome {
                TickOutcome::TargetSetEmpty | TickOutcome::AllDeliveriesFailed => {
                    return ExitOutcome::Code(0)
                }
                TickOutcome::Continued => {}
            }
        }
    }

    fn note_tick(&mut self, result: &crate::scheduler::TickResult) {
        self.current_targets = result.targets.clone();
        if matches!(result.outcome, TickOutcome::Continued) {
            self.ever_signalled = true;
        }
    }

    fn any_target_reachable(&self) -> bool {
        self.original_targets.iter().any(|&t| ctl::probe(t))
    }

    fn try_reap(&mut self) -> Option<ExitOutcome> {
        let pid = self.launched_pid?;
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => Some(ExitOutcome::Code(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => Some(ExitOutcome::Signal(sig as i32)),
            _ => None,
        }
    }

    /// Drains every signal `signal_hook` captured since the last poll and
    /// runs the corresponding 4.7 handler behavior inline, on the main
    /// thread rather than inside a real async-signal-safe handler.
    fn drain_signals(&mut self) {
        let pending: Vec<i32> = self.signals.pending().collect();
        for raw in pending {
            match raw {
                s if s == SIGCHLD => {
                    // Reaping itself happens in `try_reap`; this wakeup is
                    // enough to make the caller poll it promptly.
                }
                s if s == SIGTSTP => self.handle_tstp(),
                s if s == SIGCONT => self.handle_cont(),
                s if s == SIGWINCH => self.handle_winch(),
                s if s == SIGINT || s == SIGTERM => {
                    let signal = Signal::try_from(s).expect("signal-hook only delivers known signals");
                    log::info!("caught {signal:?}, shutting down");
                    self.caught = Some(signal);
                }
                s if s == SIGUSR1 || is_info_signal(s) => self.handle_usr1(),
                _ => {}
            }
        }
    }

    fn handle_tstp(&mut self) {
        let targets = self.resolve_targets();
        let _ = ctl::send(&targets, Signal::SIGTSTP);
        let _ = ctl::send(&targets, Signal::SIGSTOP);
        self.current_targets = targets;
        self.ever_signalled = true;
        let _ = ctl::send_one(Target::pid(std::process::id() as i32), Signal::SIGSTOP);
    }

    fn handle_cont(&mut self) {
        let _ = ctl::send(&self.current_targets, Signal::SIGCONT);
    }

    fn handle_winch(&mut self) {
        if let Some(master) = &self.pty_master {
            if let Some(term_fd) = launch::find_terminal_fd() {
                // SAFETY: borrowed only for the duration of the ioctl pair.
                let term = unsafe { BorrowedFd::borrow_raw(term_fd) };
                let _ = pty::clone_winsize(term, master.as_fd());
            }
        }
        let _ = ctl::send(&self.current_targets, Signal::SIGWINCH);
    }

    fn handle_usr1(&self) {
        let originals = self
            .original_targets
            .iter()
            .map(Target::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let current = self
            .current_targets
            .iter()
            .map(Target::to_string)
            .collect::<Vec<_>>()
            .join(",");
        eprintln!("throttle: watching [{originals}], currently signalling [{current}]");
    }

    /// Runs the 4.7 Cleanup routine. Idempotent: safe to call more than
    /// once (the main `run` path calls it exactly once, but every branch
    /// of `run` -- dry run included -- funnels through here).
    fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        self.pty_master.take();

        if self.ever_signalled {
            let _ = ctl::send(&self.current_targets, Signal::SIGCONT);
        }

        if let (Some(pid), Some(fd)) = (self.launched_pid, self.foreground_terminal) {
            if is_foreground(fd) {
                let _ = ctl::send_one(Target::pid(pid.as_raw()), Signal::SIGTERM);
            }
        }

        if let Some((fd, termios)) = self.saved_termios.take() {
            // SAFETY: `fd` is one of the standard streams, kept open for
            // the process lifetime.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            pty::restore_termios(borrowed, &termios);
        }

        if let Some(signal) = self.caught.take() {
            ctl::reraise_at_self(signal);
        }
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn is_info_signal(raw: i32) -> bool {
    raw == libc::SIGINFO
}

#[cfg(not(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn is_info_signal(_raw: i32) -> bool {
    false
}

fn is_foreground(fd: std::os::fd::RawFd) -> bool {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    matches!(
        (nix::unistd::tcgetpgrp(borrowed), nix::unistd::getpgrp()),
        (Ok(tpgrp), pgrp) if tpgrp == pgrp
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_mode_implies_grouping_by_default() {
        assert!(effective_want_group(WantGroup::Default, true));
    }

    #[test]
    fn attach_mode_does_not_imply_grouping_by_default() {
        assert!(!effective_want_group(WantGroup::Default, false));
    }

    #[test]
    fn force_off_always_wins() {
        assert!(!effective_want_group(WantGroup::ForceOff, true));
        assert!(!effective_want_group(WantGroup::ForceOff, false));
    }

    #[test]
    fn force_on_always_wins() {
        assert!(effective_want_group(WantGroup::ForceOn, false));
    }
}
