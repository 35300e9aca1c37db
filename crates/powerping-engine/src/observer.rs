use powerping_icmp::IcmpPacket;
use powerping_model::{PingAttributes, PingResults};
use std::error::Error;
use std::net::Ipv4Addr;
use std::time::Duration;

/// A reply matched to an outstanding request.
#[derive(Debug, Clone, Copy)]
pub struct Reply<'a> {
    pub sequence: u16,
    pub source: Ipv4Addr,
    pub ttl: u8,
    pub packet: &'a IcmpPacket,
    pub rtt: Duration,
    /// Bytes read from the socket, IP header included.
    pub bytes: usize,
}

/// Lifecycle callbacks emitted by a ping session. Every method defaults to
/// a no-op so renderers only implement what they display.
pub trait PingObserver {
    fn on_start(&mut self, _attributes: &PingAttributes, _target: Ipv4Addr) {}

    fn on_request(&mut self, _sequence: u16, _packet: &IcmpPacket) {}

    fn on_reply(&mut self, _reply: &Reply<'_>) {}

    fn on_timeout(&mut self, _sequence: u16) {}

    /// Called once per completed iteration with the running totals.
    fn on_results_update(&mut self, _results: &PingResults) {}

    fn on_finish(&mut self, _results: &PingResults) {}

    fn on_error(&mut self, _message: &str, _error: Option<&(dyn Error + 'static)>, _fatal: bool) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl PingObserver for NullObserver {}
