use miette::Diagnostic;
use thiserror::Error;

/// Failures that can surface while building or running a supervisor.
///
/// `SIGNAL_DELIVERY_FAILED` and the recording of an interrupting signal are
/// deliberately absent here: both are informational outcomes threaded
/// through return values and `ControllerState` fields rather than `?`-able
/// errors, per the error handling design.
#[derive(Debug, Error, Diagnostic)]
pub enum ThrottleError {
    #[error("invalid configuration: {reason}")]
    #[diagnostic(code(throttle::config_invalid))]
    ConfigInvalid { reason: String },

    #[error("failed to fork the child process")]
    #[diagnostic(code(throttle::fork_failed))]
    ForkFailed(#[source] std::io::Error),

    #[error("failed to allocate a pseudo-terminal")]
    #[diagnostic(code(throttle::pty_alloc_failed))]
    PtyAllocFailed(#[source] std::io::Error),

    #[error("failed to create the readiness pipe")]
    #[diagnostic(code(throttle::pipe_failed))]
    PipeFailed(#[source] std::io::Error),

    #[error("failed to read the process table")]
    #[diagnostic(code(throttle::snapshot_failed), help("falling back to the fast pgid lookup"))]
    SnapshotFailed { reason: String },

    #[error(transparent)]
    #[diagnostic(code(throttle::io))]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ThrottleError>;
