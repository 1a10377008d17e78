use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cli::{Args, interval_duration};
use crate::export::ReportStyle;
use crate::prefs::Prefs;

pub const DEFAULT_TTL: u8 = 64;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Runtime options derived from CLI args and the defaults file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Echo requests to send (None = until interrupted)
    pub count: Option<u64>,
    /// Interval between echo requests
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// IP time to live
    pub ttl: u8,
    pub quiet: bool,
    pub verbose: bool,
    pub timestamps: bool,
    /// Enable reverse DNS lookup of the target
    pub dns_enabled: bool,
    pub json: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            count: None,
            interval: DEFAULT_INTERVAL,
            ttl: DEFAULT_TTL,
            quiet: false,
            verbose: false,
            timestamps: false,
            dns_enabled: true,
            json: false,
        }
    }
}

impl Options {
    /// Merge validated args over file defaults
    pub fn resolve(args: &Args, prefs: &Prefs) -> Result<Self, String> {
        let interval = match args.interval.or(prefs.interval) {
            Some(secs) => interval_duration(secs)?,
            None => DEFAULT_INTERVAL,
        };

        let ttl = args.ttl.or(prefs.ttl).unwrap_or(DEFAULT_TTL);
        if ttl == 0 {
            return Err("ttl must be between 1 and 255".into());
        }

        Ok(Self {
            count: args.count,
            interval,
            ttl,
            quiet: args.quiet,
            verbose: args.verbose,
            timestamps: args.timestamp,
            dns_enabled: !(args.numeric || prefs.numeric.unwrap_or(false)),
            json: args.json,
        })
    }

    pub fn report_style(&self) -> ReportStyle {
        ReportStyle {
            quiet: self.quiet,
            verbose: self.verbose,
            timestamps: self.timestamps,
        }
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
