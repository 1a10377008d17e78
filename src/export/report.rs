use std::io::{self, Write};

use crate::export::{PacketEvent, ReportStyle, Reporter, format_ms};
use crate::probe::{ECHO_PACKET_SIZE, ICMP_BODY_SIZE, QuotedDatagram};
use crate::state::{RunSummary, TargetInfo};

/// Line-oriented console output in the classic ping layout
pub struct ConsoleReporter<W: Write> {
    writer: W,
    style: ReportStyle,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(writer: W, style: ReportStyle) -> Self {
        Self { writer, style }
    }

    fn write_timestamp(&mut self, event: &PacketEvent) -> io::Result<()> {
        if self.style.timestamps {
            write!(
                self.writer,
                "[{}.{:06}] ",
                event.received_at.as_secs(),
                event.received_at.subsec_micros()
            )?;
        }
        Ok(())
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn start(&mut self, target: &TargetInfo, identifier: u16) -> io::Result<()> {
        write!(
            self.writer,
            "PING {} ({}): {} data bytes",
            target.original, target.canonical, ICMP_BODY_SIZE
        )?;
        if self.style.verbose {
            write!(self.writer, ", id {:#06x} = {}", identifier, identifier)?;
        }
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn packet(&mut self, target: &TargetInfo, event: &PacketEvent) -> io::Result<()> {
        let from = target.display_for(event.source);

        if !event.response_type.is_error() {
            if self.style.quiet {
                return Ok(());
            }
            self.write_timestamp(event)?;
            write!(
                self.writer,
                "{} bytes from {}: icmp_seq={} ttl={}",
                event.bytes, from, event.sequence, event.ttl
            )?;
            if let Some(rtt) = event.rtt {
                write!(self.writer, " time={} ms", format_ms(rtt))?;
            }
            writeln!(self.writer)?;
        } else {
            self.write_timestamp(event)?;
            writeln!(
                self.writer,
                "{} bytes from {}: {}",
                event.bytes,
                from,
                event.response_type.describe()
            )?;
            if self.style.verbose {
                if let Some(ref quoted) = event.quoted {
                    write_quoted_dump(&mut self.writer, quoted)?;
                }
            }
        }
        self.writer.flush()
    }

    fn finish(&mut self, target: &TargetInfo, summary: &RunSummary) -> io::Result<()> {
        writeln!(self.writer)?;
        writeln!(self.writer, "--- {} ping statistics ---", target.original)?;
        write!(
            self.writer,
            "{} packets transmitted, {} packets received, ",
            summary.transmitted, summary.received
        )?;
        if summary.errors > 0 {
            write!(self.writer, "+{} errors, ", summary.errors)?;
        }
        writeln!(
            self.writer,
            "{}% packet loss, time {}ms",
            summary.loss_pct as u32,
            summary.elapsed.as_millis()
        )?;

        if let Some(rtt) = summary.rtt {
            writeln!(
                self.writer,
                "round-trip min/avg/max/stddev = {}/{}/{}/{} ms",
                format_ms(rtt.min),
                format_ms(rtt.mean),
                format_ms(rtt.max),
                format_ms(rtt.stddev)
            )?;
        }
        self.writer.flush()
    }
}

/// Hex and decoded dump of the datagram quoted by an ICMP error
fn write_quoted_dump<W: Write>(w: &mut W, quoted: &QuotedDatagram) -> io::Result<()> {
    let ip = &quoted.ip;

    writeln!(w, "IP Hdr Dump:")?;
    for pair in ip.raw.chunks(2) {
        match pair {
            [hi, lo] => write!(w, " {:02x}{:02x}", hi, lo)?,
            [hi] => write!(w, " {:02x}", hi)?,
            _ => {}
        }
    }
    writeln!(w)?;
    writeln!(
        w,
        "Vr HL TOS  Len   ID Flg  off TTL Pro  cks      Src\tDst\tData"
    )?;
    writeln!(
        w,
        " {:x}  {:x}  {:02x} {:04x} {:04x}   {:x} {:04x}  {:02x}  {:02x} {:04x} {}  {}",
        ip.version,
        ip.ihl,
        ip.tos,
        ip.total_length,
        ip.identification,
        ip.flags,
        ip.fragment_offset,
        ip.ttl,
        ip.protocol,
        ip.checksum,
        ip.source,
        ip.destination
    )?;
    writeln!(
        w,
        "ICMP: type {:x}, code {:x}, size {}, id {:#06x}, seq {:#06x}",
        quoted.icmp_type, quoted.icmp_code, ECHO_PACKET_SIZE, quoted.identifier, quoted.sequence
    )
}
