use anyhow::{Context, Result, anyhow};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Shortest receive deadline handed to the kernel (a zero timeout means "block forever")
pub const MIN_RECV_TIMEOUT: Duration = Duration::from_millis(1);

/// Send/receive seam between the probe loop and the network
///
/// The raw socket is the production implementation; tests substitute a
/// scripted transport so the loop runs without privileges.
pub trait Transport {
    /// Transmit one ICMP message to `dest`, returning the bytes written
    fn send_echo(&mut self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize>;

    /// Wait up to `timeout` for one datagram (IP header included)
    ///
    /// Returns `Ok(None)` when nothing arrived before the deadline.
    fn recv_datagram(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

/// Check that a raw ICMP socket can be opened
pub fn check_permissions() -> Result<()> {
    if create_raw_icmp_socket().is_ok() {
        return Ok(());
    }

    let binary_path = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "pingr".to_string());

    Err(anyhow!(
        "Insufficient permissions for raw sockets.\n\n\
         Fix options:\n\
         \u{2022} Run with sudo: sudo pingr <host>\n\
         \u{2022} Add capability: sudo setcap cap_net_raw+ep {}",
        binary_path
    ))
}

/// Create a raw IPv4 ICMP socket
fn create_raw_icmp_socket() -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Map a transmit failure to an operator-facing error
///
/// EACCES on a raw socket almost always means the destination is a
/// broadcast address without SO_BROADCAST.
pub fn send_error(err: io::Error) -> anyhow::Error {
    if err.kind() == io::ErrorKind::PermissionDenied {
        anyhow!("socket access error. Are you trying to ping broadcast ?")
    } else {
        anyhow!(err).context("sendto failed")
    }
}

/// Raw IPv4 ICMP socket, closed when dropped
#[derive(Debug)]
pub struct RawIcmpSocket {
    socket: Socket,
    ttl: u8,
}

impl RawIcmpSocket {
    /// Open the socket with the given IP time-to-live
    pub fn open(ttl: u8) -> Result<Self> {
        let socket = create_raw_icmp_socket().context("Failed to create raw ICMP socket")?;
        socket
            .set_ttl(ttl as u32)
            .with_context(|| format!("Failed to set IP_TTL to {}", ttl))?;

        log::debug!("opened raw ICMP socket (ttl {})", ttl);
        Ok(Self { socket, ttl })
    }

}

impl Transport for RawIcmpSocket {
    fn send_echo(&mut self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
        let addr = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(dest, 0)));
        self.socket.send_to(packet, &addr)
    }

    fn recv_datagram(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        self.socket
            .set_read_timeout(Some(timeout.max(MIN_RECV_TIMEOUT)))?;

        match (&self.socket).read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if is_no_data(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for RawIcmpSocket {
    fn drop(&mut self) {
        log::debug!("closing raw ICMP socket (ttl {})", self.ttl);
    }
}

/// Receive outcomes that mean "nothing this poll" rather than failure
pub fn is_no_data(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
