//! Forks the target command, optionally brokering a pty, and handshakes
//! with the child before handing control back to the lifecycle.

use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::Termios;
use nix::unistd::{
    close, dup2, execvp, fork, getpgrp, isatty, pipe, read, setpgid, setsid, tcgetpgrp, write,
    ForkResult, Pid,
};

use throttle_protocol::{ThrottleError, TtyMode};

use super::pty::{self, PtyPair};

/// The result of a successful launch, handed back to the controller
/// lifecycle so it can drive the scheduler and own the pty master.
pub struct LaunchOutcome {
    pub child_pid: Pid,
    pub pty_master: Option<OwnedFd>,
    pub saved_termios: Option<(RawFd, Termios)>,
    /// The terminal discovered for this launch, if any, independent of
    /// whether a pty was actually allocated. Cleanup's foreground check
    /// (4.7 step 3) needs this even for `-T`/no-pty launches.
    pub foreground_terminal: Option<RawFd>,
    /// Per 4.6 step 5: launch mode implies group targeting unless `-G`/no-group was requested.
    pub implicit_group: bool,
}

/// Finds the first of stdin, stderr, stdout (in that precedence) that
/// refers to a terminal. Also used by the lifecycle's WINCH handler to
/// re-discover the terminal for a fresh window-size clone.
pub(crate) fn find_terminal_fd() -> Option<RawFd> {
    [libc::STDIN_FILENO, libc::STDERR_FILENO, libc::STDOUT_FILENO]
        .into_iter()
        .find(|&fd| isatty(fd).unwrap_or(false))
}

fn is_foreground(fd: RawFd) -> bool {
    // SAFETY: borrowing a standard stream fd only for the duration of this check.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    matches!((tcgetpgrp(borrowed), getpgrp()), (Ok(tpgrp), pgrp) if tpgrp == pgrp)
}

fn tty_is_active(mode: TtyMode, terminal: Option<RawFd>) -> bool {
    match mode {
        TtyMode::ForceOff => false,
        TtyMode::ForceOn | TtyMode::ForceOnEvenWithoutTty => true,
        TtyMode::Auto => terminal.is_some(),
    }
}

/// Launches `argv`, throttling semantics aside; this only covers fork, pty
/// brokering, and the readiness handshake described in 4.6.
pub fn launch(
    argv: &[String],
    tty_mode: TtyMode,
    want_nogroup: bool,
) -> Result<LaunchOutcome, ThrottleError> {
    let (read_fd, write_fd) = pipe().map_err(|e| ThrottleError::PipeFailed(e.into()))?;

    let terminal = find_terminal_fd();
    let tty_active = tty_is_active(tty_mode, terminal);

    let pty = if tty_active {
        Some(pty::allocate()?)
    } else {
        None
    };

    let saved_termios = match terminal {
        Some(fd) if tty_active && is_foreground(fd) => {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            pty::save_termios(borrowed).map(|t| (fd, t))
        }
        _ => None,
    };

    // SAFETY: the child only calls async-signal-safe functions until `execvp`.
    match unsafe { fork() }.map_err(|e| ThrottleError::ForkFailed(e.into()))? {
        ForkResult::Child => {
            run_child(argv, read_fd, write_fd, pty.as_ref(), terminal, want_nogroup);
            // `run_child` never returns normally; this is belt-and-suspenders.
            unsafe { libc::_exit(127) };
        }
        ForkResult::Parent { child } => {
            let _ = close(write_fd);
            let mut ready = [0u8; 1];
            let _ = read(read_fd, &mut ready);
            let _ = close(read_fd);

            let pty_master = match pty {
                Some(PtyPair { master, slave }) => {
                    drop(slave);
                    let _ = pty::set_raw(master.as_fd());
                    Some(master)
                }
                None => None,
            };

            Ok(LaunchOutcome {
                child_pid: child,
                pty_master,
                saved_termios,
                foreground_terminal: terminal,
                implicit_group: !want_nogroup,
            })
        }
    }
}

/// Runs entirely in the forked child, between `fork` and `execvp`. Must
/// stick to async-signal-safe operations throughout.
fn run_child(
    argv: &[String],
    read_fd: RawFd,
    write_fd: RawFd,
    pty: Option<&PtyPair>,
    terminal: Option<RawFd>,
    want_nogroup: bool,
) -> ! {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGUSR1] {
        // SAFETY: resetting to the default disposition right after fork.
        unsafe {
            let _ = sigaction(sig, &default);
        }
    }
    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    // SAFETY: resetting to the default disposition right after fork.
    unsafe {
        let _ = sigaction(Signal::SIGINFO, &default);
    }

    let _ = close(read_fd);

    match pty {
        Some(PtyPair { master, slave }) => {
            let _ = setsid();
            // SAFETY: making the slave the controlling terminal of the new session.
            unsafe {
                libc::ioctl(slave.as_raw_fd(), libc::TIOCSCTTY as _, 0);
            }
            if let Some(term_fd) = terminal {
                let term = unsafe { BorrowedFd::borrow_raw(term_fd) };
                let _ = pty::clone_winsize(term, slave.as_fd());
            }
            let _ = pty::set_raw(slave.as_fd());
            for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
                let _ = dup2(slave.as_raw_fd(), fd);
            }
            let _ = close(master.as_raw_fd());
            if slave.as_raw_fd() > libc::STDERR_FILENO {
                let _ = close(slave.as_raw_fd());
            }
        }
        None if !want_nogroup => {
            let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
        }
        None => {}
    }

    let _ = write(write_fd, &[1u8]);
    let _ = close(write_fd);

    let Some(c_argv) = to_cstrings(argv) else {
        unsafe { libc::_exit(126) };
    };
    let _ = execvp(&c_argv[0], &c_argv);
    // execvp only returns on failure.
    unsafe { libc::_exit(127) };
}

fn to_cstrings(argv: &[String]) -> Option<Vec<CString>> {
    argv.iter().map(|s| CString::new(s.as_str()).ok()).collect()
}
