//! ICMPv4 echo packet codec.

pub mod checksum;
pub mod packet;

pub use checksum::{checksum, verify_checksum};
pub use packet::{
    ip_header_len, type_name, DecodeError, IcmpPacket, QuotedEcho, ReceivedPacket,
    DESTINATION_UNREACHABLE, ECHO_REPLY, ECHO_REQUEST, ICMP_HEADER_SIZE, MIN_IP_HEADER_SIZE,
    REDIRECT, SOURCE_QUENCH, TIME_EXCEEDED,
};
