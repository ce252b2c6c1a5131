//! The `throttle` binary: parses the CLI surface, builds a validated
//! [`Configuration`], and drives the [`Controller`] lifecycle to an exit
//! code. Everything that actually touches the OS lives in
//! `throttle-system`; this file is just the adapter between `clap` and it.

use clap::{CommandFactory, Parser};
use log::LevelFilter;
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};

use throttle_protocol::{Configuration, RawMode, RawOptions, TtyMode, WantGroup};
use throttle_system::{Controller, ExitOutcome};

/// Throttle a command's CPU share by alternating `SIGSTOP` and `SIGCONT`.
#[derive(Parser, Debug)]
#[command(name = "throttle", version, about)]
struct RawArgs {
    /// Emit progress to the diagnostic stream.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Print what would run (or the resolved target set) and exit without signalling.
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,

    /// CPU limit as a percentage 1..99, or a fraction in (0,1].
    #[arg(short = 'l', long = "limit", value_name = "PERCENT")]
    limit: Option<f64>,

    /// Seconds to let the target run before stopping it.
    #[arg(short = 'r', long = "run", value_name = "SECONDS")]
    run: Option<f64>,

    /// Seconds to keep the target stopped before continuing it.
    #[arg(short = 's', long = "stop", value_name = "SECONDS")]
    stop: Option<f64>,

    /// PID or PGID (negative) to attach to; comma-separated or repeatable.
    #[arg(short = 'p', long = "pid", value_name = "PIDS")]
    pids: Vec<String>,

    /// Force process-group targeting on.
    #[arg(short = 'g', long = "group", conflicts_with = "no_group")]
    group: bool,

    /// Force process-group targeting off.
    #[arg(short = 'G', long = "no-group")]
    no_group: bool,

    /// Expand the target set to descendants.
    #[arg(short = 'c', long = "children")]
    children: bool,

    /// Allocate a pty for the launched command; repeat to force one even without a controlling terminal.
    #[arg(short = 't', long = "tty", action = clap::ArgAction::Count, conflicts_with = "no_tty")]
    tty: u8,

    /// Never allocate a pty for the launched command.
    #[arg(short = 'T', long = "no-tty")]
    no_tty: bool,

    /// Print the manual (long-form help) and exit.
    #[arg(short = 'H', long = "manual")]
    manual: bool,

    /// The command to launch, with its own arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl RawArgs {
    fn into_raw_options(self) -> RawOptions {
        let want_group = if self.group {
            WantGroup::ForceOn
        } else if self.no_group {
            WantGroup::ForceOff
        } else {
            WantGroup::Default
        };

        let want_tty = if self.no_tty {
            TtyMode::ForceOff
        } else {
            match self.tty {
                0 => TtyMode::Auto,
                1 => TtyMode::ForceOn,
                _ => TtyMode::ForceOnEvenWithoutTty,
            }
        };

        let mode = if self.pids.is_empty() {
            RawMode::Launch(self.command)
        } else {
            RawMode::Attach(self.pids)
        };

        RawOptions {
            mode,
            limit_pct: self.limit,
            run_secs: self.run,
            stop_secs: self.stop,
            want_group,
            want_children: self.children,
            want_tty,
            verbose: self.verbose,
            dry_run: self.dry_run,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    // A failure here just means some other logger won; diagnostics are
    // best-effort and must never stop the supervisor from running.
    let _ = TermLogger::init(level, LogConfig::default(), TerminalMode::Stderr, ColorChoice::Auto);
}

fn main() {
    let args = RawArgs::parse();

    // `clap` only synthesizes `-h`/`-V` for free; `-H`/`--manual` is a third,
    // distinct surface (the long-form help) handled by hand before anything
    // else runs.
    if args.manual {
        RawArgs::command().print_long_help().expect("stdout is writable");
        std::process::exit(0);
    }

    init_logging(args.verbose);

    let config = match Configuration::from_raw(args.into_raw_options()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("throttle: {e}");
            eprintln!("Try 'throttle --help' for usage.");
            std::process::exit(2);
        }
    };

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("throttle: {e}");
            std::process::exit(1);
        }
    };

    match controller.run() {
        ExitOutcome::Code(code) => std::process::exit(code),
        ExitOutcome::Signal(sig) => std::process::exit(sig),
        // `Controller::run`'s cleanup re-raises the caught signal before
        // returning; reaching this arm means that somehow didn't happen.
        ExitOutcome::Interrupted => std::process::exit(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_well_formed() {
        RawArgs::command().debug_assert();
    }

    #[test]
    fn presence_of_pid_flag_selects_attach_mode() {
        let args = RawArgs::parse_from(["throttle", "-p", "1234"]);
        let raw = args.into_raw_options();
        assert!(matches!(raw.mode, RawMode::Attach(pids) if pids == vec!["1234".to_string()]));
    }

    #[test]
    fn trailing_argv_selects_launch_mode() {
        let args = RawArgs::parse_from(["throttle", "--", "sleep", "5"]);
        let raw = args.into_raw_options();
        assert!(matches!(raw.mode, RawMode::Launch(argv) if argv == vec!["sleep".to_string(), "5".to_string()]));
    }

    #[test]
    fn repeated_tty_flag_forces_pty_without_a_terminal() {
        let args = RawArgs::parse_from(["throttle", "-t", "-t", "--", "cmd"]);
        let raw = args.into_raw_options();
        assert_eq!(raw.want_tty, TtyMode::ForceOnEvenWithoutTty);
    }

    #[test]
    fn manual_flag_parses_as_its_own_surface() {
        let args = RawArgs::parse_from(["throttle", "-H"]);
        assert!(args.manual);
    }

    #[test]
    fn group_and_no_group_flags_map_to_the_tri_state() {
        let forced_on = RawArgs::parse_from(["throttle", "-g", "--", "cmd"]).into_raw_options();
        assert_eq!(forced_on.want_group, WantGroup::ForceOn);

        let forced_off = RawArgs::parse_from(["throttle", "-G", "--", "cmd"]).into_raw_options();
        assert_eq!(forced_off.want_group, WantGroup::ForceOff);

        let default = RawArgs::parse_from(["throttle", "--", "cmd"]).into_raw_options();
        assert_eq!(default.want_group, WantGroup::Default);
    }
}
