use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Response time recorded when an iteration produced no reply.
pub const NO_REPLY: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Good,
    Error,
    Other,
}

impl PacketClass {
    pub fn of(icmp_type: u8) -> Self {
        match icmp_type {
            0 => Self::Good,
            // destination unreachable, source quench, redirect, time exceeded
            3 | 4 | 5 | 11 => Self::Error,
            _ => Self::Other,
        }
    }
}

/// Running statistics for one probing session.
///
/// Counters never wrap: an increment past `u64::MAX` leaves the counter at
/// its maximum and sets `has_overflowed`, which stays set for the rest of
/// the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingResults {
    pub sent: u64,
    pub received: u64,
    pub lost: u64,
    pub good_packets: u64,
    pub error_packets: u64,
    pub other_packets: u64,
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
    pub avg_time: f64,
    pub current_time: f64,
    pub total_time: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub total_run_time: Duration,
    pub has_overflowed: bool,
    pub cancelled: bool,
    #[serde(skip)]
    clock: Option<Instant>,
    #[serde(skip)]
    stopped: bool,
}

impl PingResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if self.clock.is_some() {
            return;
        }
        self.clock = Some(Instant::now());
        self.start_time = Some(Utc::now());
    }

    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        if let Some(started) = self.clock {
            self.total_run_time = started.elapsed();
            self.stopped = true;
        }
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_some() && !self.stopped
    }

    /// Elapsed session time; live while running, frozen after `stop`.
    pub fn elapsed(&self) -> Duration {
        match self.clock {
            Some(started) if !self.stopped => started.elapsed(),
            _ => self.total_run_time,
        }
    }

    pub fn record_sent(&mut self) {
        increment(&mut self.sent, &mut self.has_overflowed);
    }

    pub fn record_received(&mut self) {
        increment(&mut self.received, &mut self.has_overflowed);
    }

    pub fn record_lost(&mut self) {
        increment(&mut self.lost, &mut self.has_overflowed);
    }

    /// Records a round trip in milliseconds, or `NO_REPLY`.
    ///
    /// The average divides by `received`, so a reply must be counted with
    /// `record_received` before its time is saved.
    pub fn save_response_time(&mut self, ms: f64) {
        if ms < 0.0 {
            self.current_time = 0.0;
            return;
        }

        self.current_time = ms;
        self.min_time = Some(self.min_time.map_or(ms, |min| min.min(ms)));
        self.max_time = Some(self.max_time.map_or(ms, |max| max.max(ms)));
        self.total_time += ms;
        self.avg_time = self.total_time / self.received.max(1) as f64;
    }

    pub fn count_packet_type(&mut self, icmp_type: u8) {
        self.count_class(PacketClass::of(icmp_type));
    }

    pub fn count_class(&mut self, class: PacketClass) {
        let counter = match class {
            PacketClass::Good => &mut self.good_packets,
            PacketClass::Error => &mut self.error_packets,
            PacketClass::Other => &mut self.other_packets,
        };
        increment(counter, &mut self.has_overflowed);
    }

    /// Counts a reply end to end: received, bucket and response time.
    pub fn record_reply(&mut self, icmp_type: u8, rtt_ms: f64) {
        self.record_received();
        self.count_packet_type(icmp_type);
        self.save_response_time(rtt_ms);
    }

    pub fn record_no_reply(&mut self) {
        self.record_lost();
        self.save_response_time(NO_REPLY);
    }

    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.lost as f64 / self.sent as f64 * 100.0
    }
}

fn increment(counter: &mut u64, overflowed: &mut bool) {
    match counter.checked_add(1) {
        Some(value) => *counter = value,
        None => *overflowed = true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_reply_types() {
        assert_eq!(PacketClass::of(0), PacketClass::Good);
        for ty in [3, 4, 5, 11] {
            assert_eq!(PacketClass::of(ty), PacketClass::Error);
        }
        assert_eq!(PacketClass::of(8), PacketClass::Other);
        assert_eq!(PacketClass::of(13), PacketClass::Other);
    }

    #[test]
    fn three_identical_replies() {
        let mut results = PingResults::new();
        for _ in 0..3 {
            results.record_sent();
            results.record_reply(0, 10.0);
        }

        assert_eq!(results.sent, 3);
        assert_eq!(results.received, 3);
        assert_eq!(results.lost, 0);
        assert_eq!(results.min_time, Some(10.0));
        assert_eq!(results.max_time, Some(10.0));
        assert_eq!(results.avg_time, 10.0);
        assert_eq!(results.good_packets, 3);
    }

    #[test]
    fn no_reply_zeroes_current_but_keeps_extrema() {
        let mut results = PingResults::new();
        results.record_sent();
        results.record_reply(0, 4.0);
        results.record_sent();
        results.record_reply(0, 8.0);
        results.record_sent();
        results.record_no_reply();

        assert_eq!(results.current_time, 0.0);
        assert_eq!(results.min_time, Some(4.0));
        assert_eq!(results.max_time, Some(8.0));
        assert_eq!(results.avg_time, 6.0);
        assert_eq!(results.received + results.lost, results.sent);
    }

    #[test]
    fn overflow_is_sticky_and_does_not_wrap() {
        let mut results = PingResults::new();
        results.good_packets = u64::MAX;
        results.error_packets = u64::MAX;
        results.other_packets = u64::MAX;

        results.count_packet_type(0);
        assert!(results.has_overflowed);
        assert_eq!(results.good_packets, u64::MAX);

        results.count_packet_type(11);
        results.count_packet_type(42);
        assert_eq!(results.error_packets, u64::MAX);
        assert_eq!(results.other_packets, u64::MAX);

        results.record_sent();
        assert_eq!(results.sent, 1);
        assert!(results.has_overflowed);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut results = PingResults::new();
        assert!(!results.is_running());
        results.start();
        let first = results.start_time;
        results.start();
        assert_eq!(results.start_time, first);
        assert!(results.is_running());

        results.stop();
        let frozen = results.elapsed();
        results.stop();
        assert_eq!(results.elapsed(), frozen);
        assert!(!results.is_running());
    }

    #[test]
    fn snapshot_serialises_counters() {
        let mut results = PingResults::new();
        results.record_sent();
        results.record_reply(3, 1.5);

        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["sent"], 1);
        assert_eq!(json["error_packets"], 1);
        assert_eq!(json["min_time"], 1.5);

        let decoded: PingResults = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.received, 1);
    }
}
