use crate::error::{Result, ThrottleError};

/// What the supervisor actually controls: a freshly forked command, or a
/// list of pre-existing targets it attaches to.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Launch { argv: Vec<String> },
    Attach { targets: Vec<i32> },
}

/// Tri-state override for process-group expansion (`-g`/`-G`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WantGroup {
    #[default]
    Default,
    ForceOn,
    ForceOff,
}

/// Pty allocation policy (`-t`/`-T`, repeated `-t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtyMode {
    #[default]
    Auto,
    ForceOn,
    ForceOnEvenWithoutTty,
    ForceOff,
}

/// The validated, normalized record every other component consumes.
///
/// Built exactly once, by [`Configuration::from_raw`], and never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    mode: Mode,
    limit_pct: f64,
    run_secs: f64,
    stop_secs: f64,
    want_group: WantGroup,
    want_children: bool,
    want_tty: TtyMode,
    verbose: bool,
    dry_run: bool,
}

impl Configuration {
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn limit_pct(&self) -> f64 {
        self.limit_pct
    }

    pub fn run_secs(&self) -> f64 {
        self.run_secs
    }

    pub fn stop_secs(&self) -> f64 {
        self.stop_secs
    }

    pub fn want_group(&self) -> WantGroup {
        self.want_group
    }

    pub fn want_children(&self) -> bool {
        self.want_children
    }

    pub fn want_tty(&self) -> TtyMode {
        self.want_tty
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

/// The unvalidated shape the CLI layer hands over. One field per flag in
/// the external interface; no cross-field rule has been applied yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOptions {
    pub mode: RawMode,
    pub limit_pct: Option<f64>,
    pub run_secs: Option<f64>,
    pub stop_secs: Option<f64>,
    pub want_group: WantGroup,
    pub want_children: bool,
    pub want_tty: TtyMode,
    pub verbose: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawMode {
    Launch(Vec<String>),
    /// Raw `-p` values, possibly containing commas and repeated across flags.
    Attach(Vec<String>),
}

impl Configuration {
    /// Validates and normalizes `raw` into a [`Configuration`], probing every
    /// attach-mode PID with a zero-signal `kill` to reject unreachable ones
    /// up front.
    pub fn from_raw(raw: RawOptions) -> Result<Self> {
        Self::from_raw_with_prober(raw, default_prober)
    }

    /// Same as [`Configuration::from_raw`] but with the reachability probe
    /// injected, so tests don't need real PIDs to exercise validation.
    pub fn from_raw_with_prober(raw: RawOptions, prober: impl Fn(i32) -> bool) -> Result<Self> {
        let mode = match raw.mode {
            RawMode::Launch(argv) => {
                if argv.is_empty() {
                    return Err(ThrottleError::ConfigInvalid {
                        reason: "launch mode requires a command to run".into(),
                    });
                }
                Mode::Launch { argv }
            }
            RawMode::Attach(raw_pids) => {
                let targets = parse_targets(&raw_pids)?;
                for &pid in &targets {
                    if !prober(pid) {
                        return Err(ThrottleError::ConfigInvalid {
                            reason: format!("pid {pid} is not reachable"),
                        });
                    }
                }
                Mode::Attach { targets }
            }
        };

        let (limit_pct, run_secs, stop_secs) =
            derive_duty_cycle(raw.limit_pct, raw.run_secs, raw.stop_secs)?;

        Ok(Configuration {
            mode,
            limit_pct,
            run_secs,
            stop_secs,
            want_group: raw.want_group,
            want_children: raw.want_children,
            want_tty: raw.want_tty,
            verbose: raw.verbose,
            dry_run: raw.dry_run,
        })
    }
}

const DEFAULT_LIMIT_PCT: f64 = 50.0;
const DEFAULT_RUN_SECS: f64 = 1.0;

/// Turns the (limit, run, stop) triple the user partially supplied into a
/// fully-resolved, mutually consistent duty cycle.
fn derive_duty_cycle(
    limit_pct: Option<f64>,
    run_secs: Option<f64>,
    stop_secs: Option<f64>,
) -> Result<(f64, f64, f64)> {
    if limit_pct.is_some() && run_secs.is_some() && stop_secs.is_some() {
        return Err(ThrottleError::ConfigInvalid {
            reason: "at most two of --limit, --run and --stop may be given; \
                     the third is always derived"
                .into(),
        });
    }

    let limit_pct = limit_pct.map(|l| if l > 0.0 && l <= 1.0 { l * 100.0 } else { l });
    let limit_pct = limit_pct.unwrap_or(DEFAULT_LIMIT_PCT);
    if !(1.0..=99.0).contains(&limit_pct) {
        return Err(ThrottleError::ConfigInvalid {
            reason: format!("-l must be between 1 and 99, got {limit_pct}"),
        });
    }

    let run_secs = run_secs.unwrap_or(DEFAULT_RUN_SECS);
    if run_secs <= 0.0 {
        return Err(ThrottleError::ConfigInvalid {
            reason: format!("-r must be positive, got {run_secs}"),
        });
    }

    let stop_secs = match stop_secs {
        Some(s) => {
            if s <= 0.0 {
                return Err(ThrottleError::ConfigInvalid {
                    reason: format!("-s must be positive, got {s}"),
                });
            }
            s
        }
        None => run_secs * (100.0 / limit_pct - 1.0),
    };

    Ok((limit_pct, run_secs, stop_secs))
}

/// Splits comma-separated and repeated `-p` values into a deduplicated list
/// of signed targets, rejecting anything naming init, the idle PID, or the
/// whole-system PGID (`abs(p) <= 1`).
fn parse_targets(raw: &[String]) -> Result<Vec<i32>> {
    let mut targets = Vec::new();
    for chunk in raw.iter().flat_map(|s| s.split(',')) {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let pid: i32 = chunk.parse().map_err(|_| ThrottleError::ConfigInvalid {
            reason: format!("-p: not a valid pid or pgid: {chunk}"),
        })?;
        if pid.abs() <= 1 {
            return Err(ThrottleError::ConfigInvalid {
                reason: format!("-p: pid 1, 0 and -1 are never valid targets, got {pid}"),
            });
        }
        if !targets.contains(&pid) {
            targets.push(pid);
        }
    }
    if targets.is_empty() {
        return Err(ThrottleError::ConfigInvalid {
            reason: "attach mode requires at least one -p pid".into(),
        });
    }
    Ok(targets)
}

#[cfg(target_family = "unix")]
fn default_prober(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(target_family = "unix"))]
fn default_prober(_pid: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_attach(pids: &[&str]) -> RawOptions {
        RawOptions {
            mode: RawMode::Attach(pids.iter().map(|s| s.to_string()).collect()),
            limit_pct: None,
            run_secs: None,
            stop_secs: None,
            want_group: WantGroup::Default,
            want_children: false,
            want_tty: TtyMode::Auto,
            verbose: false,
            dry_run: false,
        }
    }

    #[test]
    fn defaults_yield_a_fifty_fifty_duty_cycle() {
        let cfg = Configuration::from_raw_with_prober(raw_attach(&["1234"]), |_| true).unwrap();
        assert_eq!(cfg.limit_pct(), 50.0);
        assert_eq!(cfg.run_secs(), 1.0);
        assert_eq!(cfg.stop_secs(), 1.0);
    }

    #[test]
    fn limit_twenty_five_derives_stop_as_three_times_run() {
        let mut raw = raw_attach(&["1234"]);
        raw.limit_pct = Some(25.0);
        raw.run_secs = Some(1.0);
        let cfg = Configuration::from_raw_with_prober(raw, |_| true).unwrap();
        assert_eq!(cfg.run_secs(), 1.0);
        assert!((cfg.stop_secs() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn fractional_limit_is_scaled_to_a_percentage() {
        let mut raw = raw_attach(&["1234"]);
        raw.limit_pct = Some(0.25);
        let cfg = Configuration::from_raw_with_prober(raw, |_| true).unwrap();
        assert_eq!(cfg.limit_pct(), 25.0);
    }

    #[test]
    fn supplying_all_three_is_always_rejected() {
        let mut raw = raw_attach(&["1234"]);
        raw.limit_pct = Some(50.0);
        raw.run_secs = Some(1.0);
        raw.stop_secs = Some(1.0);
        assert!(matches!(
            Configuration::from_raw_with_prober(raw, |_| true),
            Err(ThrottleError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn limit_out_of_range_is_rejected() {
        let mut raw = raw_attach(&["1234"]);
        raw.limit_pct = Some(100.0);
        assert!(Configuration::from_raw_with_prober(raw, |_| true).is_err());
    }

    #[test]
    fn boundary_limits_derive_extreme_duty_cycles() {
        let mut low = raw_attach(&["1234"]);
        low.limit_pct = Some(1.0);
        let cfg = Configuration::from_raw_with_prober(low, |_| true).unwrap();
        assert!((cfg.stop_secs() - 99.0).abs() < 1e-9);

        let mut high = raw_attach(&["1234"]);
        high.limit_pct = Some(99.0);
        let cfg = Configuration::from_raw_with_prober(high, |_| true).unwrap();
        assert!((cfg.stop_secs() - 1.0 / 99.0).abs() < 1e-9);
    }

    #[test]
    fn pid_one_and_zero_and_negative_one_are_rejected() {
        for bad in ["1", "0", "-1"] {
            assert!(Configuration::from_raw_with_prober(raw_attach(&[bad]), |_| true).is_err());
        }
    }

    #[test]
    fn comma_separated_and_repeated_pids_are_deduplicated() {
        let raw = raw_attach(&["1234,5678", "5678"]);
        let cfg = Configuration::from_raw_with_prober(raw, |_| true).unwrap();
        let Mode::Attach { targets } = cfg.mode() else {
            panic!("expected attach mode");
        };
        assert_eq!(targets, &[1234, 5678]);
    }

    #[test]
    fn unreachable_pid_is_rejected() {
        let raw = raw_attach(&["1234"]);
        assert!(Configuration::from_raw_with_prober(raw, |_| false).is_err());
    }

    #[test]
    fn launch_mode_requires_a_command() {
        let raw = RawOptions {
            mode: RawMode::Launch(vec![]),
            limit_pct: None,
            run_secs: None,
            stop_secs: None,
            want_group: WantGroup::Default,
            want_children: false,
            want_tty: TtyMode::Auto,
            verbose: false,
            dry_run: false,
        };
        assert!(Configuration::from_raw(raw).is_err());
    }
}
