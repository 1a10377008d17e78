use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::Options;
use crate::engine::scheduler::{RunFlags, Scheduler};
use crate::export::{PacketEvent, Reporter};
use crate::probe::{
    IcmpBody, RECV_BUFFER_SIZE, Transport, Verdict, decode_received, encode_echo_request,
    get_identifier, match_reply, send_error, wall_clock,
};
use crate::state::{ProbeStats, RunSummary, TargetInfo};

/// Single-threaded driver: send when due, receive once, check for stop
pub struct ProbeLoop<T: Transport, R: Reporter> {
    transport: T,
    reporter: R,
    target: TargetInfo,
    identifier: u16,
    scheduler: Scheduler,
    stats: ProbeStats,
    sequence: u16,
    buffer: Vec<u8>,
}

impl<T: Transport, R: Reporter> ProbeLoop<T, R> {
    /// Set up a run; timers are spawned on `runtime`
    pub fn new(transport: T, reporter: R, target: TargetInfo, options: &Options, runtime: Handle) -> Self {
        let start = Instant::now();
        let flags = Arc::new(RunFlags::new(start));
        Self {
            transport,
            reporter,
            target,
            identifier: get_identifier(),
            scheduler: Scheduler::new(options.interval, options.count, flags, runtime),
            stats: ProbeStats::starting_at(start),
            sequence: 0,
            buffer: vec![0u8; RECV_BUFFER_SIZE],
        }
    }

    /// Override the identity tag (defaults to the low 16 bits of the pid)
    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    /// Flags to hand to the interrupt handler
    pub fn flags(&self) -> Arc<RunFlags> {
        self.scheduler.flags()
    }

    /// Cancelled once the run is over, whichever way it ends
    pub fn cancel_token(&self) -> CancellationToken {
        self.scheduler.cancel_token()
    }

    /// Run to completion
    ///
    /// On a clean stop the summary goes to the reporter and is returned. On
    /// a fatal error the samples are still released and the error returned;
    /// the transport is dropped (socket closed) in both cases.
    pub fn run(mut self) -> Result<RunSummary> {
        self.reporter
            .start(&self.target, self.identifier)
            .context("Failed to write report")?;

        let outcome = self.drive();

        let now = Instant::now();
        self.scheduler.stop(now);
        let flags = self.scheduler.flags();
        self.stats
            .record_end(flags.end_elapsed().unwrap_or_else(|| now - self.stats.start));
        let summary = self.stats.finish();

        outcome?;

        log::debug!(
            "run finished: {} sent, {} received, {} errors",
            summary.transmitted,
            summary.received,
            summary.errors
        );
        self.reporter
            .finish(&self.target, &summary)
            .context("Failed to write report")?;
        Ok(summary)
    }

    fn drive(&mut self) -> Result<()> {
        while self.scheduler.is_running() {
            if self.scheduler.take_send_due(self.stats.sent) {
                self.send_next()?;
            }

            let timeout = self.scheduler.poll_timeout(Instant::now());
            self.receive_one(timeout)?;

            let now = Instant::now();
            if self.scheduler.should_stop(&self.stats, now) {
                self.scheduler.stop(now);
            }
        }
        Ok(())
    }

    fn send_next(&mut self) -> Result<()> {
        let packet = encode_echo_request(self.identifier, self.sequence)?;
        let now = Instant::now();

        self.transport
            .send_echo(&packet, self.target.resolved)
            .map_err(send_error)?;

        log::debug!(
            "sent echo request id={:#06x} seq={} to {}",
            self.identifier,
            self.sequence,
            self.target.resolved
        );
        self.stats.record_sent(now);
        self.sequence = self.sequence.wrapping_add(1);
        self.scheduler.arm(now);
        Ok(())
    }

    fn receive_one(&mut self, timeout: Duration) -> Result<()> {
        let Some(len) = self
            .transport
            .recv_datagram(&mut self.buffer, timeout)
            .context("recvmsg failed")?
        else {
            return Ok(());
        };

        let packet = match decode_received(&self.buffer[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                log::trace!("dropping datagram: {}", e);
                return Ok(());
            }
        };

        let matched = match match_reply(&packet, self.identifier) {
            Verdict::Accepted(matched) => matched,
            Verdict::Rejected(reason) => {
                log::trace!(
                    "ignoring ICMP type {} from {}: {}",
                    packet.icmp_type,
                    packet.source,
                    reason
                );
                return Ok(());
            }
        };

        let received_at = wall_clock()?;
        let rtt = if matched.response_type.is_error() {
            self.stats.record_error();
            None
        } else {
            self.stats.record_reply();
            match matched.sent_at {
                Some(sent_at) => Some(self.stats.rtts.record_sample(sent_at, received_at)),
                None => {
                    log::debug!("echo reply seq={} carries no timestamp", matched.sequence);
                    None
                }
            }
        };

        log::debug!(
            "accepted {:?} seq={} from {}",
            matched.response_type,
            matched.sequence,
            packet.source
        );

        let quoted = match packet.body {
            IcmpBody::Error { quoted } => quoted,
            _ => None,
        };
        let event = PacketEvent {
            source: packet.source,
            bytes: packet.icmp_len,
            ttl: packet.ttl,
            response_type: matched.response_type,
            sequence: matched.sequence,
            rtt,
            received_at,
            quoted,
        };
        self.reporter
            .packet(&self.target, &event)
            .context("Failed to write report")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::icmp::testutil::*;
    use std::collections::VecDeque;
    use std::io;
    use std::net::Ipv4Addr;

    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 100);

    /// Replies to every request at once, or fails the send
    struct EchoTransport {
        inbox: VecDeque<Vec<u8>>,
        fail_send: Option<io::ErrorKind>,
        fail_recv: bool,
    }

    impl EchoTransport {
        fn new() -> Self {
            Self {
                inbox: VecDeque::new(),
                fail_send: None,
                fail_recv: false,
            }
        }
    }

    impl Transport for EchoTransport {
        fn send_echo(&mut self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
            if let Some(kind) = self.fail_send {
                return Err(io::Error::from(kind));
            }
            self.inbox.push_back(wrap_ipv4(dest, LOCAL, 61, &reply_to(packet)));
            Ok(packet.len())
        }

        fn recv_datagram(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
            if self.fail_recv {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
            match self.inbox.pop_front() {
                Some(datagram) => {
                    buf[..datagram.len()].copy_from_slice(&datagram);
                    Ok(Some(datagram.len()))
                }
                None => {
                    std::thread::sleep(timeout);
                    Ok(None)
                }
            }
        }
    }

    struct NullReporter;

    impl Reporter for NullReporter {
        fn start(&mut self, _: &TargetInfo, _: u16) -> io::Result<()> {
            Ok(())
        }
        fn packet(&mut self, _: &TargetInfo, _: &PacketEvent) -> io::Result<()> {
            Ok(())
        }
        fn finish(&mut self, _: &TargetInfo, _: &RunSummary) -> io::Result<()> {
            Ok(())
        }
    }

    fn options(count: u64, interval_ms: u64) -> Options {
        Options {
            count: Some(count),
            interval: Duration::from_millis(interval_ms),
            ..Default::default()
        }
    }

    fn target() -> TargetInfo {
        TargetInfo::new(TARGET.to_string(), TARGET)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_counted_run_receives_every_reply() {
        let probe = ProbeLoop::new(
            EchoTransport::new(),
            NullReporter,
            target(),
            &options(3, 20),
            Handle::current(),
        )
        .with_identifier(0x0101);

        let summary = tokio::task::spawn_blocking(move || probe.run())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.transmitted, 3);
        assert_eq!(summary.received, 3);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.loss_pct, 0.0);
        assert!(summary.rtt.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_permission_denied_is_fatal() {
        let mut transport = EchoTransport::new();
        transport.fail_send = Some(io::ErrorKind::PermissionDenied);
        let probe = ProbeLoop::new(
            transport,
            NullReporter,
            target(),
            &options(1, 20),
            Handle::current(),
        );
        let token = probe.cancel_token();

        let err = tokio::task::spawn_blocking(move || probe.run())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "socket access error. Are you trying to ping broadcast ?"
        );
        assert!(token.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_receive_failure_is_fatal() {
        let mut transport = EchoTransport::new();
        transport.fail_recv = true;
        let probe = ProbeLoop::new(
            transport,
            NullReporter,
            target(),
            &options(1, 20),
            Handle::current(),
        );
        let err = tokio::task::spawn_blocking(move || probe.run())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.to_string(), "recvmsg failed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_interrupt_stops_unbounded_run() {
        let opts = Options {
            count: None,
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let probe = ProbeLoop::new(
            EchoTransport::new(),
            NullReporter,
            target(),
            &opts,
            Handle::current(),
        );
        let flags = probe.flags();

        let handle = tokio::task::spawn_blocking(move || probe.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        flags.interrupt();

        let summary = handle.await.unwrap().unwrap();
        assert!(summary.transmitted >= 1);
        assert!(summary.received <= summary.transmitted);
        assert_eq!(Some(summary.elapsed), flags.end_elapsed());
    }
}
