use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::net::Ipv4Addr;

use crate::export::{PacketEvent, Reporter};
use crate::state::{IcmpResponseType, RunSummary, TargetInfo};

/// One accepted datagram in the JSON document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketRecord {
    pub sequence: u16,
    pub from: Ipv4Addr,
    pub bytes: usize,
    pub ttl: u8,
    pub response_type: IcmpResponseType,
    pub description: String,
    /// Round-trip time in milliseconds, echo replies only
    pub rtt_ms: Option<f64>,
    /// UNIX receive time in microseconds
    pub received_at_us: u64,
}

impl From<&PacketEvent> for PacketRecord {
    fn from(event: &PacketEvent) -> Self {
        Self {
            sequence: event.sequence,
            from: event.source,
            bytes: event.bytes,
            ttl: event.ttl,
            response_type: event.response_type,
            description: event.response_type.describe(),
            rtt_ms: event.rtt.map(|d| d.as_secs_f64() * 1000.0),
            received_at_us: event.received_at.as_micros() as u64,
        }
    }
}

/// Full JSON document written when the run ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub target: TargetInfo,
    pub identifier: u16,
    pub summary: RunSummary,
    pub packets: Vec<PacketRecord>,
}

/// Collects events and writes one JSON document on finish
pub struct JsonReporter<W: Write> {
    writer: W,
    identifier: u16,
    packets: Vec<PacketRecord>,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            identifier: 0,
            packets: Vec::new(),
        }
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn start(&mut self, _target: &TargetInfo, identifier: u16) -> io::Result<()> {
        self.identifier = identifier;
        Ok(())
    }

    fn packet(&mut self, _target: &TargetInfo, event: &PacketEvent) -> io::Result<()> {
        self.packets.push(PacketRecord::from(event));
        Ok(())
    }

    fn finish(&mut self, target: &TargetInfo, summary: &RunSummary) -> io::Result<()> {
        let report = JsonReport {
            target: target.clone(),
            identifier: self.identifier,
            summary: summary.clone(),
            packets: std::mem::take(&mut self.packets),
        };
        serde_json::to_writer_pretty(&mut self.writer, &report)?;
        writeln!(self.writer)?;
        self.writer.flush()
    }
}
