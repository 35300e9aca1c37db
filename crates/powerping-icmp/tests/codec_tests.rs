use powerping_icmp::{
    checksum, verify_checksum, DecodeError, IcmpPacket, QuotedEcho, ReceivedPacket,
    DESTINATION_UNREACHABLE, ECHO_REPLY, ECHO_REQUEST, TIME_EXCEEDED,
};
use std::net::Ipv4Addr;

fn ipv4_header(ihl_words: u8, source: [u8; 4], ttl: u8) -> Vec<u8> {
    let mut header = vec![0u8; ihl_words as usize * 4];
    header[0] = 0x40 | ihl_words;
    header[8] = ttl;
    header[9] = 1;
    header[12..16].copy_from_slice(&source);
    header
}

#[test]
fn encode_then_decode_preserves_fields() {
    let packets = [
        IcmpPacket::echo(ECHO_REQUEST, 0, 0x1234, 1, b"R U Dead Yet?"),
        IcmpPacket::echo(ECHO_REQUEST, 3, 0xFFFF, u16::MAX, b"odd"),
        IcmpPacket::echo(13, 0, 0, 0, &[]),
    ];

    for packet in packets {
        let wire = packet.encode();
        assert!(verify_checksum(&wire));

        let decoded = IcmpPacket::decode(&wire).unwrap();
        assert_eq!(decoded.icmp_type, packet.icmp_type);
        assert_eq!(decoded.code, packet.code);
        assert_eq!(decoded.payload, packet.payload);
        assert_eq!(decoded.checksum, packet.checksum);
        assert!(decoded.checksum_valid());
    }
}

#[test]
fn checksum_is_computed_with_field_zeroed() {
    let packet = IcmpPacket::echo(ECHO_REQUEST, 0, 1, 2, b"abc");
    let mut wire = packet.encode();
    wire[2] = 0;
    wire[3] = 0;
    assert_eq!(checksum(&wire), packet.checksum);
}

#[test]
fn decode_skips_ip_options() {
    let reply = IcmpPacket::echo(ECHO_REPLY, 0, 0x0102, 9, b"payload");

    for ihl in [5u8, 6, 15] {
        let mut buffer = ipv4_header(ihl, [10, 0, 0, 42], 57);
        buffer.extend_from_slice(&reply.encode());

        let received = ReceivedPacket::decode(&buffer).unwrap();
        assert_eq!(received.source, Ipv4Addr::new(10, 0, 0, 42));
        assert_eq!(received.ttl, 57);
        assert_eq!(received.packet.sequence(), Some(9));
        assert_eq!(received.packet.message(), b"payload");
        assert!(!received.is_error_report());
    }
}

#[test]
fn decode_rejects_short_icmp_section() {
    let mut buffer = ipv4_header(5, [10, 0, 0, 1], 64);
    buffer.extend_from_slice(&[ECHO_REPLY, 0, 0]);

    assert_eq!(
        ReceivedPacket::decode(&buffer),
        Err(DecodeError::Truncated { len: 23, needed: 24 })
    );
    assert!(IcmpPacket::decode(&[0, 0]).is_err());
}

#[test]
fn time_exceeded_is_an_error_report() {
    let mut buffer = ipv4_header(5, [192, 168, 0, 1], 255);
    buffer.extend_from_slice(&IcmpPacket::new(TIME_EXCEEDED, 0, vec![0; 28]).encode());

    let received = ReceivedPacket::decode(&buffer).unwrap();
    assert!(received.is_error_report());
}

fn error_report(
    icmp_type: u8,
    quoted_ihl: u8,
    protocol: u8,
    destination: [u8; 4],
    original: &[u8],
) -> Vec<u8> {
    let mut quoted = ipv4_header(quoted_ihl, [10, 0, 0, 100], 1);
    quoted[9] = protocol;
    quoted[16..20].copy_from_slice(&destination);
    quoted.extend_from_slice(original);

    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&quoted);
    let mut buffer = ipv4_header(5, [192, 168, 0, 1], 255);
    buffer.extend_from_slice(&IcmpPacket::new(icmp_type, 1, payload).encode());
    buffer
}

#[test]
fn error_reports_expose_the_quoted_echo_request() {
    let request = IcmpPacket::echo(ECHO_REQUEST, 0, 0x0A0B, 42, b"R U Dead Yet?").encode();

    for ihl in [5u8, 7] {
        let buffer = error_report(DESTINATION_UNREACHABLE, ihl, 1, [10, 0, 0, 9], &request[..8]);
        let quoted = ReceivedPacket::decode(&buffer).unwrap().quoted_echo();

        assert_eq!(
            quoted,
            Some(QuotedEcho {
                destination: Ipv4Addr::new(10, 0, 0, 9),
                identifier: 0x0A0B,
                sequence: 42,
            })
        );
    }
}

#[test]
fn reports_about_other_traffic_have_no_quoted_echo() {
    let udp_header = [0x30, 0x39, 0x00, 0x35, 0x00, 0x08, 0x00, 0x00];
    let udp = error_report(DESTINATION_UNREACHABLE, 5, 17, [10, 9, 9, 9], &udp_header);
    assert_eq!(ReceivedPacket::decode(&udp).unwrap().quoted_echo(), None);

    let request = IcmpPacket::echo(ECHO_REQUEST, 0, 1, 1, &[]).encode();
    let cut_short = error_report(TIME_EXCEEDED, 5, 1, [10, 0, 0, 9], &request[..6]);
    assert_eq!(ReceivedPacket::decode(&cut_short).unwrap().quoted_echo(), None);

    let reply = IcmpPacket::echo(ECHO_REPLY, 0, 1, 1, &[0; 32]);
    let mut buffer = ipv4_header(5, [10, 0, 0, 9], 64);
    buffer.extend_from_slice(&reply.encode());
    assert_eq!(ReceivedPacket::decode(&buffer).unwrap().quoted_echo(), None);
}
