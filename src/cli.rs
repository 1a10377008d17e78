use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use std::time::Duration;

/// Exit status for usage errors (EX_USAGE)
pub const EXIT_USAGE: i32 = 64;

/// Smallest accepted interval
pub const MIN_INTERVAL: Duration = Duration::from_micros(1);

/// Largest accepted interval (one day)
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Send ICMP ECHO_REQUEST packets to network hosts
#[derive(Parser, Debug, Clone)]
#[command(name = "pingr")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_flag = true)]
pub struct Args {
    /// DNS name or IPv4 address
    pub host: String,

    /// Show help
    #[arg(short = 'h', short_alias = '?', long = "help", action = ArgAction::Help)]
    #[allow(dead_code)]
    help: Option<bool>,

    /// Quiet output (only errors and the summary)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Print UNIX timestamps before each packet line
    #[arg(short = 'D', long = "timestamp")]
    pub timestamp: bool,

    /// Stop after <count> echo requests
    #[arg(short = 'c', long = "count")]
    pub count: Option<u64>,

    /// Seconds between echo requests (fractions allowed)
    #[arg(short = 'i', long = "interval")]
    pub interval: Option<f64>,

    /// IP time to live
    #[arg(short = 't', long = "ttl")]
    pub ttl: Option<u8>,

    /// Numeric output only (no reverse lookup of the target)
    #[arg(short = 'n', long = "numeric")]
    pub numeric: bool,

    /// Print a JSON document at exit instead of per-packet lines
    #[arg(long = "json")]
    pub json: bool,
}

impl Args {
    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.count == Some(0) {
            return Err("invalid count value".into());
        }

        if let Some(interval) = self.interval {
            interval_duration(interval)?;
        }

        if self.ttl == Some(0) {
            return Err("ttl must be between 1 and 255".into());
        }

        Ok(())
    }
}

/// Convert an interval in seconds into whole seconds plus microseconds
pub fn interval_duration(seconds: f64) -> Result<Duration, String> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("invalid interval value: {}", seconds));
    }

    if seconds > MAX_INTERVAL.as_secs_f64() {
        return Err(format!(
            "interval cannot exceed {} seconds",
            MAX_INTERVAL.as_secs()
        ));
    }

    let whole = seconds.trunc();
    let micros = ((seconds - whole) * 1_000_000.0).round() as u64;
    let interval = Duration::from_secs(whole as u64) + Duration::from_micros(micros);

    if interval < MIN_INTERVAL {
        return Err(format!("interval too small: {}", seconds));
    }
    Ok(interval)
}

/// Exit status for a failed parse (help and version are not failures)
pub fn parse_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
        _ => EXIT_USAGE,
    }
}
