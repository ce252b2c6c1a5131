//! OS-facing half of the supervisor: process inspection, target-set
//! resolution, signal delivery, the duty-cycle scheduler, the child
//! launcher/pty broker, and the controller lifecycle that drives all of
//! them. `throttle-protocol` holds the data model this crate consumes;
//! nothing here is reachable without a validated `Configuration`.

mod inspector;
mod launch;
mod lifecycle;
mod resolver;
mod scheduler;
mod signal;
mod target;

pub use inspector::ProcessInfo;
pub use launch::LaunchOutcome;
pub use lifecycle::{Controller, ExitOutcome};
pub use scheduler::{Scheduler, TickOutcome, TickResult};
pub use target::{Target, TargetSet};
