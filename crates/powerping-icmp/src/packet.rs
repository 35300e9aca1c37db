//! ICMP packet building and parsing.
//!
//! Wire layout is `type(1) code(1) checksum(2) payload(N)`. Echo packets
//! carry the identifier and sequence number in the first four payload bytes.

use crate::checksum::checksum;
use std::net::Ipv4Addr;
use thiserror::Error;

pub const ECHO_REPLY: u8 = 0;
pub const DESTINATION_UNREACHABLE: u8 = 3;
pub const SOURCE_QUENCH: u8 = 4;
pub const REDIRECT: u8 = 5;
pub const ECHO_REQUEST: u8 = 8;
pub const TIME_EXCEEDED: u8 = 11;

/// type, code and checksum
pub const ICMP_HEADER_SIZE: usize = 4;

pub const MIN_IP_HEADER_SIZE: usize = 20;

const IPPROTO_ICMP: u8 = 1;

/// Unused word in front of the quoted datagram of an error report.
const ERROR_REPORT_UNUSED: usize = 4;

/// Human readable name of an ICMP message type.
pub fn type_name(icmp_type: u8) -> &'static str {
    match icmp_type {
        ECHO_REPLY => "Echo Reply",
        DESTINATION_UNREACHABLE => "Destination Unreachable",
        SOURCE_QUENCH => "Source Quench",
        REDIRECT => "Redirect",
        ECHO_REQUEST => "Echo Request",
        9 => "Router Advertisement",
        10 => "Router Solicitation",
        TIME_EXCEEDED => "Time Exceeded",
        12 => "Parameter Problem",
        13 => "Timestamp Request",
        14 => "Timestamp Reply",
        _ => "Unknown",
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet truncated: {len} bytes, need at least {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("not an IPv4 packet (version {0})")]
    NotIpv4(u8),
    #[error("invalid IPv4 header length of {0} bytes")]
    BadHeaderLength(usize),
}

/// The echo request an ICMP error report was generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedEcho {
    pub destination: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpPacket {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub payload: Vec<u8>,
}

impl IcmpPacket {
    /// Builds a packet with a freshly computed checksum.
    pub fn new(icmp_type: u8, code: u8, payload: Vec<u8>) -> Self {
        let mut packet = Self {
            icmp_type,
            code,
            checksum: 0,
            payload,
        };
        packet.checksum = packet.compute_checksum();
        packet
    }

    pub fn echo(icmp_type: u8, code: u8, identifier: u16, sequence: u16, message: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(4 + message.len());
        payload.extend_from_slice(&identifier.to_be_bytes());
        payload.extend_from_slice(&sequence.to_be_bytes());
        payload.extend_from_slice(message);
        Self::new(icmp_type, code, payload)
    }

    /// Checksum over the whole packet with the checksum field zeroed.
    pub fn compute_checksum(&self) -> u16 {
        checksum(&self.frame(0))
    }

    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    pub fn encode(&self) -> Vec<u8> {
        self.frame(self.compute_checksum())
    }

    /// Parses a bare ICMP message (no IP header in front).
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < ICMP_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                len: bytes.len(),
                needed: ICMP_HEADER_SIZE,
            });
        }

        Ok(Self {
            icmp_type: bytes[0],
            code: bytes[1],
            checksum: u16::from_be_bytes([bytes[2], bytes[3]]),
            payload: bytes[ICMP_HEADER_SIZE..].to_vec(),
        })
    }

    pub fn identifier(&self) -> Option<u16> {
        self.payload.get(0..2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn sequence(&self) -> Option<u16> {
        self.payload.get(2..4).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    /// Payload after the echo identifier and sequence.
    pub fn message(&self) -> &[u8] {
        self.payload.get(4..).unwrap_or_default()
    }

    pub fn wire_len(&self) -> usize {
        ICMP_HEADER_SIZE + self.payload.len()
    }

    fn frame(&self, checksum: u16) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.wire_len());
        frame.push(self.icmp_type);
        frame.push(self.code);
        frame.extend_from_slice(&checksum.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// Length of the IPv4 header at the front of `buffer`, read from its IHL field.
pub fn ip_header_len(buffer: &[u8]) -> Result<usize, DecodeError> {
    let first = *buffer.first().ok_or(DecodeError::Truncated {
        len: 0,
        needed: MIN_IP_HEADER_SIZE,
    })?;

    let version = first >> 4;
    if version != 4 {
        return Err(DecodeError::NotIpv4(version));
    }

    let len = (first & 0x0F) as usize * 4;
    if len < MIN_IP_HEADER_SIZE {
        return Err(DecodeError::BadHeaderLength(len));
    }
    if buffer.len() < len {
        return Err(DecodeError::Truncated {
            len: buffer.len(),
            needed: len,
        });
    }

    Ok(len)
}

/// An ICMP packet as delivered by a raw socket, IPv4 header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    pub source: Ipv4Addr,
    pub ttl: u8,
    pub packet: IcmpPacket,
}

impl ReceivedPacket {
    pub fn decode(buffer: &[u8]) -> Result<Self, DecodeError> {
        let header_len = ip_header_len(buffer)?;
        let packet = IcmpPacket::decode(&buffer[header_len..]).map_err(|_| DecodeError::Truncated {
            len: buffer.len(),
            needed: header_len + ICMP_HEADER_SIZE,
        })?;

        Ok(Self {
            source: Ipv4Addr::new(buffer[12], buffer[13], buffer[14], buffer[15]),
            ttl: buffer[8],
            packet,
        })
    }

    pub fn is_error_report(&self) -> bool {
        matches!(
            self.packet.icmp_type,
            DESTINATION_UNREACHABLE | SOURCE_QUENCH | REDIRECT | TIME_EXCEEDED
        )
    }

    /// Reads the offending datagram quoted in an error report: its IPv4
    /// header followed by at least the first eight bytes of its ICMP message.
    /// `None` for anything that is not an error report about an ICMP packet.
    pub fn quoted_echo(&self) -> Option<QuotedEcho> {
        if !self.is_error_report() {
            return None;
        }
        let original = self.packet.payload.get(ERROR_REPORT_UNUSED..)?;
        let header_len = ip_header_len(original).ok()?;
        if original[9] != IPPROTO_ICMP {
            return None;
        }
        let icmp = original.get(header_len..header_len + 8)?;

        Some(QuotedEcho {
            destination: Ipv4Addr::new(original[16], original[17], original[18], original[19]),
            identifier: u16::from_be_bytes([icmp[4], icmp[5]]),
            sequence: u16::from_be_bytes([icmp[6], icmp[7]]),
        })
    }
}
