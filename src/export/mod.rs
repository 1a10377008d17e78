pub mod json;
pub mod report;

pub use json::*;
pub use report::*;

use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::probe::QuotedDatagram;
use crate::state::{IcmpResponseType, RunSummary, TargetInfo};

/// One matched datagram, as handed to the reporting boundary
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub source: Ipv4Addr,
    /// Bytes after the IP header
    pub bytes: usize,
    /// TTL of the received datagram
    pub ttl: u8,
    pub response_type: IcmpResponseType,
    pub sequence: u16,
    /// Round-trip time, echo replies only
    pub rtt: Option<Duration>,
    /// Wall-clock receive time since the UNIX epoch
    pub received_at: Duration,
    /// Original datagram quoted by an ICMP error
    pub quoted: Option<QuotedDatagram>,
}

/// Output switches shared by reporters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportStyle {
    /// Suppress per-reply lines (errors are still shown)
    pub quiet: bool,
    /// Identifier in the banner, quoted header dump on errors
    pub verbose: bool,
    /// Prefix packet lines with the UNIX receive time
    pub timestamps: bool,
}

/// Consumer of run events
pub trait Reporter {
    /// Called once before the first send
    fn start(&mut self, target: &TargetInfo, identifier: u16) -> io::Result<()>;

    /// Called for every datagram the matcher accepted
    fn packet(&mut self, target: &TargetInfo, event: &PacketEvent) -> io::Result<()>;

    /// Called once after the run ends, on every path that got past setup
    fn finish(&mut self, target: &TargetInfo, summary: &RunSummary) -> io::Result<()>;
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn start(&mut self, target: &TargetInfo, identifier: u16) -> io::Result<()> {
        (**self).start(target, identifier)
    }

    fn packet(&mut self, target: &TargetInfo, event: &PacketEvent) -> io::Result<()> {
        (**self).packet(target, event)
    }

    fn finish(&mut self, target: &TargetInfo, summary: &RunSummary) -> io::Result<()> {
        (**self).finish(target, summary)
    }
}

/// Format a duration as `msec.frac` with three fractional digits
pub fn format_ms(d: Duration) -> String {
    let micros = d.as_micros();
    format!("{}.{:03}", micros / 1000, micros % 1000)
}
