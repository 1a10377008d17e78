//! Integration tests for the send→receive→match→statistics pipeline
//!
//! These tests drive the probe loop through scripted transports that
//! behave like a loopback interface or a filtered destination, without
//! requiring raw socket privileges.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use pingr::config::Options;
use pingr::engine::ProbeLoop;
use pingr::export::{ConsoleReporter, JsonReport, JsonReporter, PacketEvent, ReportStyle, Reporter};
use pingr::probe::{ICMP_ECHO_REPLY, ICMP_HEADER_SIZE, IPV4_HEADER_SIZE, Transport, internet_checksum};
use pingr::state::{IcmpResponseType, RunSummary, TargetInfo};

const OUR_ID: u16 = 0x5150;
const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 9, 8, 7);
const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 9, 8, 100);

/// Prepend a 20-byte IPv4 header to an ICMP message
fn wrap_ipv4(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8, icmp: &[u8]) -> Vec<u8> {
    let mut packet = vec![0u8; IPV4_HEADER_SIZE];
    packet[0] = 0x45;
    let total = (IPV4_HEADER_SIZE + icmp.len()) as u16;
    packet[2..4].copy_from_slice(&total.to_be_bytes());
    packet[8] = ttl;
    packet[9] = 1; // ICMP
    packet[12..16].copy_from_slice(&src.octets());
    packet[16..20].copy_from_slice(&dst.octets());
    let cksum = internet_checksum(&packet);
    packet[10..12].copy_from_slice(&cksum.to_be_bytes());
    packet.extend_from_slice(icmp);
    packet
}

/// Loopback: the kernel hands us our own request, then the reply
struct LoopbackTransport {
    inbox: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Transport for LoopbackTransport {
    fn send_echo(&mut self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
        self.sent.lock().push(packet.to_vec());

        self.inbox.push_back(wrap_ipv4(dest, dest, 64, packet));

        let mut reply = packet.to_vec();
        reply[0] = ICMP_ECHO_REPLY;
        reply[2] = 0;
        reply[3] = 0;
        let cksum = internet_checksum(&reply);
        reply[2..4].copy_from_slice(&cksum.to_be_bytes());
        self.inbox.push_back(wrap_ipv4(dest, dest, 64, &reply));

        Ok(packet.len())
    }

    fn recv_datagram(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        deliver(&mut self.inbox, buf, timeout)
    }
}

/// A router answers every request with Destination Host Unreachable
struct UnreachableTransport {
    inbox: VecDeque<Vec<u8>>,
}

impl Transport for UnreachableTransport {
    fn send_echo(&mut self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
        let original = wrap_ipv4(LOCAL, dest, 64, packet);

        let mut icmp = vec![0u8; ICMP_HEADER_SIZE];
        icmp[0] = 3;
        icmp[1] = 1;
        icmp.extend_from_slice(&original[..IPV4_HEADER_SIZE + ICMP_HEADER_SIZE]);
        let cksum = internet_checksum(&icmp);
        icmp[2..4].copy_from_slice(&cksum.to_be_bytes());

        self.inbox.push_back(wrap_ipv4(ROUTER, LOCAL, 254, &icmp));
        Ok(packet.len())
    }

    fn recv_datagram(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        deliver(&mut self.inbox, buf, timeout)
    }
}

fn deliver(inbox: &mut VecDeque<Vec<u8>>, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
    match inbox.pop_front() {
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

/// Records everything that reaches the reporting boundary
#[derive(Clone, Default)]
struct CaptureReporter {
    events: Arc<Mutex<Vec<PacketEvent>>>,
    summary: Arc<Mutex<Option<RunSummary>>>,
}

impl Reporter for CaptureReporter {
    fn start(&mut self, _target: &TargetInfo, identifier: u16) -> io::Result<()> {
        assert_eq!(identifier, OUR_ID);
        Ok(())
    }

    fn packet(&mut self, _target: &TargetInfo, event: &PacketEvent) -> io::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn finish(&mut self, _target: &TargetInfo, summary: &RunSummary) -> io::Result<()> {
        *self.summary.lock() = Some(summary.clone());
        Ok(())
    }
}

fn options(count: u64) -> Options {
    Options {
        count: Some(count),
        interval: Duration::from_millis(50),
        ..Default::default()
    }
}

async fn run_loop<T, R>(transport: T, reporter: R, target: TargetInfo, opts: Options) -> anyhow::Result<RunSummary>
where
    T: Transport + Send + 'static,
    R: Reporter + Send + 'static,
{
    let probe = ProbeLoop::new(
        transport,
        reporter,
        target,
        &opts,
        tokio::runtime::Handle::current(),
    )
    .with_identifier(OUR_ID);
    tokio::task::spawn_blocking(move || probe.run())
        .await
        .expect("probe loop panicked")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_loopback_single_echo() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = LoopbackTransport {
        inbox: VecDeque::new(),
        sent: Arc::clone(&sent),
    };
    let reporter = CaptureReporter::default();
    let target = TargetInfo::new("localhost".to_string(), Ipv4Addr::LOCALHOST);

    let summary = run_loop(transport, reporter.clone(), target, options(1))
        .await
        .unwrap();

    // Exactly one request on the wire: type 8, our id, sequence 0, 64 bytes
    let sent = sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), 64);
    assert_eq!(sent[0][0], 8);
    assert_eq!(&sent[0][4..6], &OUR_ID.to_be_bytes());
    assert_eq!(&sent[0][6..8], &[0, 0]);
    assert_eq!(internet_checksum(&sent[0]), 0);

    // The looped-back request was ignored; only the reply was reported
    let events = reporter.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].response_type, IcmpResponseType::EchoReply);
    assert_eq!(events[0].sequence, 0);
    assert_eq!(events[0].bytes, 64);
    assert!(events[0].rtt.is_some());

    assert_eq!(summary.transmitted, 1);
    assert_eq!(summary.received, 1);
    assert_eq!(summary.loss_pct, 0.0);
    let rtt = summary.rtt.expect("one sample recorded");
    assert_eq!(rtt.min, rtt.max);
    assert_eq!(rtt.stddev, Duration::ZERO);

    assert!(reporter.summary.lock().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_destination() {
    let transport = UnreachableTransport {
        inbox: VecDeque::new(),
    };
    let reporter = CaptureReporter::default();
    let target = TargetInfo::new("192.0.2.55".to_string(), Ipv4Addr::new(192, 0, 2, 55));

    let summary = run_loop(transport, reporter.clone(), target, options(1))
        .await
        .unwrap();

    let events = reporter.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].response_type, IcmpResponseType::DestUnreachable(1));
    assert_eq!(events[0].source, ROUTER);
    assert!(events[0].rtt.is_none());
    let quoted = events[0].quoted.as_ref().expect("quoted request");
    assert_eq!(quoted.identifier, OUR_ID);

    assert_eq!(summary.transmitted, 1);
    assert_eq!(summary.received, 0);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.loss_pct, 100.0);
    assert!(summary.rtt.is_none());
    // The run waited out one interval for a reply
    assert!(summary.elapsed >= Duration::from_millis(50));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_loopback_console_output() {
    let transport = LoopbackTransport {
        inbox: VecDeque::new(),
        sent: Arc::new(Mutex::new(Vec::new())),
    };
    let out = Arc::new(Mutex::new(Vec::new()));
    let reporter = ConsoleReporter::new(SharedBuf(Arc::clone(&out)), ReportStyle::default());
    let target = TargetInfo::new("localhost".to_string(), Ipv4Addr::LOCALHOST);

    run_loop(transport, reporter, target, options(2)).await.unwrap();

    let text = String::from_utf8(out.lock().clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "PING localhost (127.0.0.1): 56 data bytes");
    assert!(lines[1].starts_with("64 bytes from 127.0.0.1: icmp_seq=0 ttl=64 time="));
    assert!(lines[2].starts_with("64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time="));
    assert_eq!(lines[3], "");
    assert_eq!(lines[4], "--- localhost ping statistics ---");
    assert!(lines[5].starts_with("2 packets transmitted, 2 packets received, 0% packet loss, time "));
    assert!(lines[6].starts_with("round-trip min/avg/max/stddev = "));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_json_output() {
    let transport = UnreachableTransport {
        inbox: VecDeque::new(),
    };
    let out = Arc::new(Mutex::new(Vec::new()));
    let reporter = JsonReporter::new(SharedBuf(Arc::clone(&out)));
    let target = TargetInfo::new("192.0.2.55".to_string(), Ipv4Addr::new(192, 0, 2, 55));

    run_loop(transport, reporter, target, options(2)).await.unwrap();

    let report: JsonReport = serde_json::from_slice(&out.lock()).unwrap();
    assert_eq!(report.identifier, OUR_ID);
    assert_eq!(report.summary.transmitted, 2);
    assert_eq!(report.summary.received, 0);
    assert_eq!(report.summary.errors, 2);
    assert!(report.summary.rtt.is_none());
    assert_eq!(report.packets.len(), 2);
    assert_eq!(report.packets[1].sequence, 1);
    assert_eq!(report.packets[0].description, "Destination Host Unreachable");
}

/// Writer shared between the reporter (moved into the loop) and the test
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
