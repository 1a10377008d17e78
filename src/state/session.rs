use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::state::rtt::{RttSamples, RttSummary};

/// ICMP response classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IcmpResponseType {
    EchoReply,
    DestUnreachable(u8),
    SourceQuench,
    Redirect(u8),
    TimeExceeded(u8),
    ParameterProblem(u8),
}

impl IcmpResponseType {
    /// Classify an ICMP type/code pair (None for types that are neither an
    /// echo reply nor an error carrying the original datagram)
    pub fn from_type_code(icmp_type: u8, code: u8) -> Option<Self> {
        match icmp_type {
            0 => Some(Self::EchoReply),
            3 => Some(Self::DestUnreachable(code)),
            4 => Some(Self::SourceQuench),
            5 => Some(Self::Redirect(code)),
            11 => Some(Self::TimeExceeded(code)),
            12 => Some(Self::ParameterProblem(code)),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Self::EchoReply)
    }


    /// Human-readable description
    pub fn describe(&self) -> String {
        match *self {
            Self::EchoReply => "Echo Reply".to_string(),
            Self::DestUnreachable(code) => match code {
                0 => "Destination Net Unreachable".to_string(),
                1 => "Destination Host Unreachable".to_string(),
                2 => "Destination Protocol Unreachable".to_string(),
                3 => "Destination Port Unreachable".to_string(),
                4 => "Frag needed".to_string(),
                5 => "Source Route Failed".to_string(),
                6 => "Destination Net Unknown".to_string(),
                7 => "Destination Host Unknown".to_string(),
                8 => "Source Host Isolated".to_string(),
                9 => "Destination Net Prohibited".to_string(),
                10 => "Destination Host Prohibited".to_string(),
                11 => "Destination Net Unreachable for Type of Service".to_string(),
                12 => "Destination Host Unreachable for Type of Service".to_string(),
                13 => "Packet filtered".to_string(),
                14 => "Precedence Violation".to_string(),
                15 => "Precedence Cutoff".to_string(),
                _ => format!("Dest Unreachable, Bad Code: {}", code),
            },
            Self::SourceQuench => "Source Quench".to_string(),
            Self::Redirect(code) => match code {
                0 => "Redirect Network".to_string(),
                1 => "Redirect Host".to_string(),
                2 => "Redirect Type of Service and Network".to_string(),
                3 => "Redirect Type of Service and Host".to_string(),
                _ => format!("Redirect, Bad Code: {}", code),
            },
            Self::TimeExceeded(0) => "Time to live exceeded".to_string(),
            Self::TimeExceeded(1) => "Frag reassembly time exceeded".to_string(),
            Self::TimeExceeded(code) => format!("Time exceeded, Bad Code: {}", code),
            Self::ParameterProblem(code) => format!("Parameter problem: pointer/code {}", code),
        }
    }
}

/// Target being pinged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Host string as given on the command line
    pub original: String,
    pub resolved: Ipv4Addr,
    /// Dotted-decimal form of `resolved`
    pub canonical: String,
    /// Reverse-DNS name, if looked up and found
    pub hostname: Option<String>,
}

impl TargetInfo {
    pub fn new(original: String, resolved: Ipv4Addr) -> Self {
        Self {
            original,
            resolved,
            canonical: resolved.to_string(),
            hostname: None,
        }
    }

    /// Name used when printing packets from `addr`
    pub fn display_for(&self, addr: Ipv4Addr) -> String {
        match self.hostname {
            Some(ref name) if addr == self.resolved => format!("{} ({})", name, addr),
            _ => addr.to_string(),
        }
    }
}

/// Run-wide counters, owned by the probe loop
#[derive(Debug)]
pub struct ProbeStats {
    /// Echo requests transmitted
    pub sent: u64,
    /// Echo replies matched to this process
    pub ok: u64,
    /// All matched datagrams (replies and ICMP errors)
    pub received: u64,
    pub started_at: DateTime<Utc>,
    pub start: Instant,
    pub last_send: Option<Instant>,
    /// Wall time from start to stop, set once when the run ends
    pub elapsed: Option<Duration>,
    pub rtts: RttSamples,
}

impl Default for ProbeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeStats {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            sent: 0,
            ok: 0,
            received: 0,
            started_at: Utc::now(),
            start,
            last_send: None,
            elapsed: None,
            rtts: RttSamples::new(),
        }
    }

    pub fn record_sent(&mut self, now: Instant) {
        self.sent += 1;
        self.last_send = Some(now);
    }

    /// Count a matched echo reply
    pub fn record_reply(&mut self) {
        self.ok += 1;
        self.received += 1;
    }

    /// Count a matched ICMP error (no effect on `ok` or RTTs)
    pub fn record_error(&mut self) {
        self.received += 1;
    }

    pub fn errors(&self) -> u64 {
        self.received - self.ok
    }

    /// Stamp the end of the run (first call wins)
    pub fn record_end(&mut self, elapsed: Duration) {
        if self.elapsed.is_none() {
            self.elapsed = Some(elapsed);
        }
    }

    /// Loss percentage over matched echo replies
    pub fn loss_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            (1.0 - (self.ok as f64 / self.sent as f64)) * 100.0
        }
    }

    /// Reduce the run to its summary and release the sample sequence
    pub fn finish(&mut self) -> RunSummary {
        let rtt = self.rtts.finalize();
        let summary = RunSummary {
            started_at: self.started_at,
            transmitted: self.sent,
            received: self.ok,
            errors: self.errors(),
            loss_pct: self.loss_pct(),
            elapsed: self.elapsed.unwrap_or_else(|| self.start.elapsed()),
            rtt,
        };
        self.rtts.clear();
        summary
    }
}

/// Aggregate results handed to the reporter at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub transmitted: u64,
    /// Matched echo replies
    pub received: u64,
    /// Matched ICMP error packets
    pub errors: u64,
    pub loss_pct: f64,
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
    /// Absent when no reply matched
    pub rtt: Option<RttSummary>,
}

/// Serde helper for Duration (milliseconds as float)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_secs_f64() * 1000.0).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(ms / 1000.0))
    }
}
