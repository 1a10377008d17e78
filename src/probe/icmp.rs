use anyhow::{Context, Result};
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::{MutablePacket, Packet};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Minimum IPv4 header size (IHL = 5)
pub const IPV4_HEADER_SIZE: usize = 20;
/// Echo body size (standard ping)
pub const ICMP_BODY_SIZE: usize = 56;
/// Full echo request as handed to the socket
pub const ECHO_PACKET_SIZE: usize = ICMP_HEADER_SIZE + ICMP_BODY_SIZE;
/// Send timestamp at the start of the body: seconds (8 bytes) + microseconds (8 bytes)
pub const TIMESTAMP_SIZE: usize = 16;
/// Receive buffer size (one Ethernet MTU)
pub const RECV_BUFFER_SIZE: usize = 1500;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;

const IPPROTO_ICMP: u8 = 1;
const MICROS_PER_SEC: u64 = 1_000_000;

/// Get process identifier for ICMP identification field
pub fn get_identifier() -> u16 {
    std::process::id() as u16
}

/// Current wall-clock time as a duration since the UNIX epoch
pub fn wall_clock() -> Result<Duration> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("Failed to read the system clock (time is before the UNIX epoch)")
}

/// Internet checksum (RFC 1071)
///
/// Sums big-endian 16-bit words, pads an odd trailing byte with a zero low
/// byte, folds the carries back in twice and returns the one's complement.
/// Summing a buffer that already carries its checksum yields zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    sum = (sum >> 16) + (sum & 0xFFFF);
    sum += sum >> 16;
    !(sum as u16)
}

/// Build an ICMP Echo Request stamped with the current wall-clock time
///
/// Fails only if the clock cannot be read.
pub fn encode_echo_request(identifier: u16, sequence: u16) -> Result<Vec<u8>> {
    let now = wall_clock()?;
    build_echo_request(identifier, sequence, now)
}

/// Build an ICMP Echo Request carrying an explicit send timestamp
///
/// Layout:
/// - Bytes 0-7: ICMP header (type 8, code 0, checksum, identifier, sequence)
/// - Bytes 8-15: send time, whole seconds since the epoch
/// - Bytes 16-23: send time, microsecond remainder
/// - Bytes 24+: zero padding up to the fixed body size
pub fn build_echo_request(identifier: u16, sequence: u16, sent_at: Duration) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; ECHO_PACKET_SIZE];
    let mut packet = MutableEchoRequestPacket::new(&mut buffer)
        .context("Echo request buffer shorter than an ICMP header")?;

    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    packet.payload_mut()[..TIMESTAMP_SIZE].copy_from_slice(&encode_timestamp(sent_at));

    let cksum = internet_checksum(packet.packet());
    packet.set_checksum(cksum);

    Ok(buffer)
}

fn encode_timestamp(ts: Duration) -> [u8; TIMESTAMP_SIZE] {
    let mut out = [0u8; TIMESTAMP_SIZE];
    out[0..8].copy_from_slice(&ts.as_secs().to_be_bytes());
    out[8..16].copy_from_slice(&(ts.subsec_micros() as u64).to_be_bytes());
    out
}

/// Read a send timestamp back from an echo body (None if short or garbled)
fn decode_timestamp(body: &[u8]) -> Option<Duration> {
    let secs = u64::from_be_bytes(body.get(0..8)?.try_into().ok()?);
    let micros = u64::from_be_bytes(body.get(8..16)?.try_into().ok()?);
    if micros >= MICROS_PER_SEC {
        return None;
    }
    Some(Duration::from_secs(secs) + Duration::from_micros(micros))
}

/// Why a received datagram could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer shorter than the headers it claims to carry
    Truncated { len: usize, needed: usize },
    /// IP version nibble is not 4
    NotIpv4(u8),
    /// IP protocol field is not ICMP
    NotIcmp(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len, needed } => {
                write!(f, "truncated datagram ({} bytes, need {})", len, needed)
            }
            Self::NotIpv4(version) => write!(f, "not an IPv4 datagram (version {})", version),
            Self::NotIcmp(protocol) => write!(f, "not ICMP (protocol {})", protocol),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decoded view of an IPv4 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4HeaderView {
    /// Header bytes as received (options included)
    pub raw: Vec<u8>,
    pub version: u8,
    /// Header length in 32-bit words
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4HeaderView {
    fn from_packet(ip: &Ipv4Packet<'_>, raw: &[u8]) -> Self {
        Self {
            raw: raw.to_vec(),
            version: ip.get_version(),
            ihl: ip.get_header_length(),
            tos: (ip.get_dscp() << 2) | ip.get_ecn(),
            total_length: ip.get_total_length(),
            identification: ip.get_identification(),
            flags: ip.get_flags(),
            fragment_offset: ip.get_fragment_offset(),
            ttl: ip.get_ttl(),
            protocol: ip.get_next_level_protocol().0,
            checksum: ip.get_checksum(),
            source: ip.get_source(),
            destination: ip.get_destination(),
        }
    }
}

/// Original datagram quoted inside an ICMP error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedDatagram {
    pub ip: Ipv4HeaderView,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub identifier: u16,
    pub sequence: u16,
}

/// ICMP message body, by kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpBody {
    /// Echo request or reply
    Echo {
        identifier: u16,
        sequence: u16,
        /// Send timestamp carried in the body, if present
        sent_at: Option<Duration>,
    },
    /// Error message; `quoted` is None when the embedded original is
    /// missing, short, or not ICMP
    Error { quoted: Option<QuotedDatagram> },
    /// Any other ICMP type
    Other,
}

/// A received raw-socket datagram split into IP and ICMP views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// TTL from the received IP header
    pub ttl: u8,
    /// Bytes following the IP header
    pub icmp_len: usize,
    pub icmp_type: u8,
    pub icmp_code: u8,
    /// ICMP checksum verifies over the whole message
    pub checksum_valid: bool,
    pub body: IcmpBody,
}

/// Decode a datagram read from a raw IPv4 ICMP socket (IP header included)
///
/// The IP header length comes from the IHL field, so headers carrying
/// options are skipped correctly.
pub fn decode_received(buffer: &[u8]) -> Result<ParsedPacket, DecodeError> {
    let (ip, ihl) = split_ipv4(buffer)?;

    let protocol = ip.get_next_level_protocol().0;
    if protocol != IPPROTO_ICMP {
        return Err(DecodeError::NotIcmp(protocol));
    }

    if buffer.len() < ihl + ICMP_HEADER_SIZE {
        return Err(DecodeError::Truncated {
            len: buffer.len(),
            needed: ihl + ICMP_HEADER_SIZE,
        });
    }

    let icmp_data = &buffer[ihl..];
    let icmp = IcmpPacket::new(icmp_data).ok_or(DecodeError::Truncated {
        len: buffer.len(),
        needed: ihl + ICMP_HEADER_SIZE,
    })?;
    let icmp_type = icmp.get_icmp_type().0;
    let icmp_code = icmp.get_icmp_code().0;

    let body = match icmp_type {
        ICMP_ECHO_REPLY | ICMP_ECHO_REQUEST => IcmpBody::Echo {
            identifier: u16::from_be_bytes([icmp_data[4], icmp_data[5]]),
            sequence: u16::from_be_bytes([icmp_data[6], icmp_data[7]]),
            sent_at: decode_timestamp(&icmp_data[ICMP_HEADER_SIZE..]),
        },
        // Destination unreachable, source quench, redirect, time exceeded, parameter problem
        3 | 4 | 5 | 11 | 12 => IcmpBody::Error {
            quoted: decode_quoted(&icmp_data[ICMP_HEADER_SIZE..]),
        },
        _ => IcmpBody::Other,
    };

    Ok(ParsedPacket {
        source: ip.get_source(),
        destination: ip.get_destination(),
        ttl: ip.get_ttl(),
        icmp_len: icmp_data.len(),
        icmp_type,
        icmp_code,
        checksum_valid: internet_checksum(icmp_data) == 0,
        body,
    })
}

/// Validate the IPv4 header at the start of `data`, returning it and its length in bytes
fn split_ipv4(data: &[u8]) -> Result<(Ipv4Packet<'_>, usize), DecodeError> {
    let ip = Ipv4Packet::new(data).ok_or(DecodeError::Truncated {
        len: data.len(),
        needed: IPV4_HEADER_SIZE,
    })?;

    let version = ip.get_version();
    if version != 4 {
        return Err(DecodeError::NotIpv4(version));
    }

    let ihl = (ip.get_header_length() as usize) * 4;
    if ihl < IPV4_HEADER_SIZE || data.len() < ihl {
        return Err(DecodeError::Truncated {
            len: data.len(),
            needed: ihl.max(IPV4_HEADER_SIZE),
        });
    }

    Ok((ip, ihl))
}

/// Decode the original IP + ICMP headers quoted after an ICMP error header
fn decode_quoted(payload: &[u8]) -> Option<QuotedDatagram> {
    let (ip, ihl) = split_ipv4(payload).ok()?;
    if ip.get_next_level_protocol().0 != IPPROTO_ICMP {
        return None;
    }

    let original = payload.get(ihl..ihl + ICMP_HEADER_SIZE)?;
    Some(QuotedDatagram {
        ip: Ipv4HeaderView::from_packet(&ip, &payload[..ihl]),
        icmp_type: original[0],
        icmp_code: original[1],
        identifier: u16::from_be_bytes([original[4], original[5]]),
        sequence: u16::from_be_bytes([original[6], original[7]]),
    })
}
