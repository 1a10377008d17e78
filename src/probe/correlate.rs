use crate::probe::icmp::{IcmpBody, ParsedPacket, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST};
use crate::state::IcmpResponseType;
use std::fmt;
use std::time::Duration;

/// A received packet that belongs to this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedResponse {
    pub response_type: IcmpResponseType,
    /// Sequence from the reply, or from the quoted request for errors
    pub sequence: u16,
    /// Send timestamp echoed back in a reply body
    pub sent_at: Option<Duration>,
}

/// Why a received packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Echo request (our own probe looped back, or someone pinging us)
    EchoRequest,
    /// Identifier belongs to another ICMP conversation
    ForeignIdentifier(u16),
    /// Echo reply whose checksum does not verify
    BadChecksum,
    /// ICMP type we do not track, or an error without a usable quoted ICMP header
    Unidentifiable(u8),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EchoRequest => write!(f, "echo request"),
            Self::ForeignIdentifier(id) => write!(f, "foreign identifier {:#06x}", id),
            Self::BadChecksum => write!(f, "bad checksum"),
            Self::Unidentifiable(t) => write!(f, "unidentifiable ICMP type {}", t),
        }
    }
}

/// Outcome of matching one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(MatchedResponse),
    Rejected(RejectReason),
}

/// Decide whether `packet` belongs to the conversation tagged `identifier`
///
/// Echo replies are owned by their identifier field. ICMP errors are owned
/// by the identifier of the echo request they quote. Sequence numbers are
/// reported but not used for ownership, so a duplicate or late reply with
/// our identifier is accepted like any other.
pub fn match_reply(packet: &ParsedPacket, identifier: u16) -> Verdict {
    if packet.icmp_type == ICMP_ECHO_REQUEST {
        return Verdict::Rejected(RejectReason::EchoRequest);
    }

    let Some(response_type) = IcmpResponseType::from_type_code(packet.icmp_type, packet.icmp_code)
    else {
        return Verdict::Rejected(RejectReason::Unidentifiable(packet.icmp_type));
    };

    match &packet.body {
        IcmpBody::Echo {
            identifier: id,
            sequence,
            sent_at,
        } if packet.icmp_type == ICMP_ECHO_REPLY => {
            if *id != identifier {
                return Verdict::Rejected(RejectReason::ForeignIdentifier(*id));
            }
            if !packet.checksum_valid {
                return Verdict::Rejected(RejectReason::BadChecksum);
            }
            Verdict::Accepted(MatchedResponse {
                response_type,
                sequence: *sequence,
                sent_at: *sent_at,
            })
        }
        IcmpBody::Error {
            quoted: Some(original),
        } => {
            // Only our own echo requests can be quoted back at us
            if original.icmp_type != ICMP_ECHO_REQUEST {
                return Verdict::Rejected(RejectReason::Unidentifiable(packet.icmp_type));
            }
            if original.identifier != identifier {
                return Verdict::Rejected(RejectReason::ForeignIdentifier(original.identifier));
            }
            Verdict::Accepted(MatchedResponse {
                response_type,
                sequence: original.sequence,
                sent_at: None,
            })
        }
        _ => Verdict::Rejected(RejectReason::Unidentifiable(packet.icmp_type)),
    }
}
