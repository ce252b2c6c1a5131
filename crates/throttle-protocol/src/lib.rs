mod config;
mod error;

pub use config::{Configuration, Mode, RawMode, RawOptions, TtyMode, WantGroup};
pub use error::{Result, ThrottleError};
