//! Pseudo-terminal allocation and window-size mirroring for launched
//! children. The master stays with the controller; the slave is handed to
//! the child and closed on the parent side immediately after the readiness
//! handshake so the child's exit releases the pty.

use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};

use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::termios::{self, SetArg, Termios};

use throttle_protocol::ThrottleError;

pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

pub fn allocate() -> Result<PtyPair, ThrottleError> {
    let OpenptyResult { master, slave } =
        openpty(None, None).map_err(|e| ThrottleError::PtyAllocFailed(std::io::Error::from(e)))?;
    Ok(PtyPair { master, slave })
}

/// Clones the window size from `from` (typically the controlling terminal)
/// onto `to` (the pty master or slave). Best-effort: a failure here is not
/// fatal to the run, just cosmetic.
pub fn clone_winsize(from: BorrowedFd<'_>, to: BorrowedFd<'_>) -> nix::Result<()> {
    let mut ws = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: `ws` is a plain POD struct sized to match TIOCGWINSZ/TIOCSWINSZ.
    unsafe {
        if libc::ioctl(from.as_raw_fd(), libc::TIOCGWINSZ, &mut ws) != 0 {
            return Err(nix::errno::Errno::last());
        }
        if libc::ioctl(to.as_raw_fd(), libc::TIOCSWINSZ, &ws) != 0 {
            return Err(nix::errno::Errno::last());
        }
    }
    Ok(())
}

/// Puts `fd` into raw mode (used for the pty slave in the child and the pty
/// master in the parent, matching a real terminal's usual disciplines).
pub fn set_raw(fd: BorrowedFd<'_>) -> nix::Result<()> {
    let mut attrs = termios::tcgetattr(fd)?;
    termios::cfmakeraw(&mut attrs);
    termios::tcsetattr(fd, SetArg::TCSANOW, &attrs)
}

/// Captures the current termios of `fd` for later restoration.
pub fn save_termios(fd: BorrowedFd<'_>) -> Option<Termios> {
    termios::tcgetattr(fd).ok()
}

/// Restores a previously captured termios exactly once.
pub fn restore_termios(fd: BorrowedFd<'_>, saved: &Termios) {
    let _ = termios::tcsetattr(fd, SetArg::TCSANOW, saved);
}
