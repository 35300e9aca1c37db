//! The send / await-reply / classify / wait loop of one ping session.
//!
//! Each iteration moves through `Sending -> AwaitingReply -> {Replied |
//! TimedOut | SendError} -> IntervalWait`. Iterations never overlap, so the
//! running statistics always describe completed request/reply pairs.
//!
//! Cancellation is observed at the top of every iteration and during the
//! interval wait. A blocking receive is not interruptible, so a session can
//! take up to one `timeout_ms` to notice that its token fired.

use crate::cancel::CancellationToken;
use crate::clock::{Clock, MonotonicClock};
use crate::observer::{PingObserver, Reply};
use crate::resolve::{resolve_cancellable, HostResolver, SystemResolver};
use crate::socket::{is_timeout, IcmpSocket, SocketFactory, SocketOptions};
use powerping_icmp::{DecodeError, IcmpPacket, ReceivedPacket, ECHO_REPLY};
use powerping_model::{ConfigError, PacketClass, PingAttributes, PingResults};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid ping attributes: {0}")]
    Config(#[from] ConfigError),
    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("could not open a raw ICMP socket (this usually needs elevated privileges): {0}")]
    SocketCreation(#[source] io::Error),
}

enum Outcome {
    Replied {
        received: ReceivedPacket,
        bytes: usize,
        rtt: Duration,
    },
    TimedOut,
    Malformed(DecodeError),
    SendFailed(io::Error),
    ReceiveFailed(io::Error),
}

pub struct PingEngine<F> {
    factory: F,
    token: CancellationToken,
    resolver: Arc<dyn HostResolver>,
    clock: Arc<dyn Clock>,
    identifier: u16,
}

impl<F: SocketFactory> PingEngine<F> {
    pub fn new(factory: F, token: CancellationToken) -> Self {
        Self {
            factory,
            token,
            resolver: Arc::new(SystemResolver::new()),
            clock: Arc::new(MonotonicClock),
            identifier: std::process::id() as u16,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// Runs one session to completion, cancellation or fatal setup failure.
    ///
    /// Only configuration, resolution and socket creation errors are
    /// returned; everything that goes wrong inside an iteration is counted
    /// in the results and reported through `on_error`.
    pub fn run(
        &self,
        attributes: &PingAttributes,
        observer: &mut dyn PingObserver,
    ) -> Result<PingResults, EngineError> {
        attributes.validate()?;

        let mut results = PingResults::new();

        let target = match resolve_cancellable(&self.resolver, &attributes.target, &self.token) {
            Ok(Some(target)) => target,
            Ok(None) => {
                results.cancelled = true;
                observer.on_finish(&results);
                return Ok(results);
            }
            Err(source) => {
                let err = EngineError::Resolve {
                    host: attributes.target.clone(),
                    source,
                };
                observer.on_error(&err.to_string(), Some(&err), true);
                return Err(err);
            }
        };

        let mut socket = match self.factory.open(&SocketOptions::from_attributes(attributes)) {
            Ok(socket) => socket,
            Err(source) => {
                let err = EngineError::SocketCreation(source);
                observer.on_error(&err.to_string(), Some(&err), true);
                return Err(err);
            }
        };

        info!(
            %target,
            count = attributes.count,
            continuous = attributes.continuous,
            "ping session started"
        );
        results.start();
        observer.on_start(attributes, target);

        let timeout = Duration::from_millis(attributes.timeout_ms);
        let mut buffer = vec![0u8; attributes.receive_buffer_size];
        let mut rng = rand::thread_rng();
        let mut sequence: u16 = 1;
        let mut iteration: u64 = 0;

        loop {
            if self.token.is_cancelled() {
                results.cancelled = true;
                break;
            }
            if !attributes.continuous && iteration >= attributes.count {
                break;
            }
            iteration += 1;

            let message = if attributes.random_message {
                random_message(&mut rng, attributes.message_bytes().len())
            } else {
                attributes.message_bytes()
            };
            let packet = IcmpPacket::echo(
                attributes.icmp_type,
                attributes.icmp_code,
                self.identifier,
                sequence,
                &message,
            );
            observer.on_request(sequence, &packet);

            let sent_at = self.clock.now();
            let outcome = match socket.send_to(&packet.encode(), target) {
                Ok(_) => self.await_reply(
                    &mut socket,
                    &mut buffer,
                    target,
                    attributes.icmp_type,
                    sequence,
                    sent_at,
                    timeout,
                ),
                Err(err) => Outcome::SendFailed(err),
            };
            results.record_sent();

            match outcome {
                Outcome::Replied {
                    received,
                    bytes,
                    rtt,
                } => {
                    let rtt_ms = rtt.as_nanos() as f64 / 1_000_000.0;
                    results.record_reply(received.packet.icmp_type, rtt_ms);
                    debug!(
                        sequence,
                        icmp_type = received.packet.icmp_type,
                        rtt_ms,
                        "reply"
                    );
                    observer.on_reply(&Reply {
                        sequence,
                        source: received.source,
                        ttl: received.ttl,
                        packet: &received.packet,
                        rtt,
                        bytes,
                    });
                }
                Outcome::TimedOut => {
                    results.record_no_reply();
                    debug!(sequence, "request timed out");
                    observer.on_timeout(sequence);
                }
                Outcome::Malformed(err) => {
                    results.record_no_reply();
                    results.count_class(PacketClass::Other);
                    warn!(sequence, "malformed reply: {err}");
                    observer.on_error(&format!("malformed reply: {err}"), Some(&err), false);
                }
                Outcome::SendFailed(err) => {
                    results.record_no_reply();
                    warn!(sequence, "send failed: {err}");
                    observer.on_error(&format!("send failed: {err}"), Some(&err), false);
                }
                Outcome::ReceiveFailed(err) => {
                    results.record_no_reply();
                    warn!(sequence, "receive failed: {err}");
                    observer.on_error(&format!("receive failed: {err}"), Some(&err), false);
                }
            }

            observer.on_results_update(&results);
            sequence = sequence.wrapping_add(1);

            if !attributes.continuous && iteration >= attributes.count {
                break;
            }
            if self.token.sleep(next_interval(attributes, &mut rng)) {
                results.cancelled = true;
                break;
            }
        }

        drop(socket);
        results.stop();
        info!(
            %target,
            sent = results.sent,
            received = results.received,
            lost = results.lost,
            cancelled = results.cancelled,
            "ping session finished"
        );
        observer.on_finish(&results);

        Ok(results)
    }

    /// Reads until the reply to `sequence` arrives or `timeout` has passed
    /// since `sent_at`. Unrelated ICMP traffic re-arms the receive with the
    /// remaining time.
    #[allow(clippy::too_many_arguments)]
    fn await_reply(
        &self,
        socket: &mut F::Socket,
        buffer: &mut [u8],
        target: Ipv4Addr,
        sent_type: u8,
        sequence: u16,
        sent_at: Instant,
        timeout: Duration,
    ) -> Outcome {
        let deadline = sent_at + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return Outcome::TimedOut;
            }

            let bytes = match socket.recv(buffer, remaining) {
                Ok(bytes) => bytes,
                Err(err) if is_timeout(&err) => return Outcome::TimedOut,
                Err(err) => return Outcome::ReceiveFailed(err),
            };

            let received = match ReceivedPacket::decode(&buffer[..bytes]) {
                Ok(received) => received,
                Err(err) => return Outcome::Malformed(err),
            };

            if self.answers(&received, target, sent_type, sequence) {
                return Outcome::Replied {
                    received,
                    bytes,
                    rtt: self.clock.now().saturating_duration_since(sent_at),
                };
            }
            trace!(
                source = %received.source,
                icmp_type = received.packet.icmp_type,
                "skipping unrelated packet"
            );
        }
    }

    fn answers(
        &self,
        received: &ReceivedPacket,
        target: Ipv4Addr,
        sent_type: u8,
        sequence: u16,
    ) -> bool {
        let packet = &received.packet;
        let ours = packet.identifier() == Some(self.identifier)
            && packet.sequence() == Some(sequence);

        // a raw socket sees reports about every datagram this host sends
        if received.is_error_report() {
            return received.quoted_echo().is_some_and(|quoted| {
                quoted.destination == target
                    && quoted.identifier == self.identifier
                    && quoted.sequence == sequence
            });
        }
        if packet.icmp_type == ECHO_REPLY {
            return received.source == target && ours;
        }
        // raw sockets also see our own request on loopback
        if packet.icmp_type == sent_type && ours {
            return false;
        }
        received.source == target
    }
}

fn random_message(rng: &mut impl Rng, len: usize) -> Vec<u8> {
    rng.sample_iter(&Alphanumeric).take(len).collect()
}

fn next_interval(attributes: &PingAttributes, rng: &mut impl Rng) -> Duration {
    let ms = match attributes.random_interval {
        Some(range) => rng.gen_range(range.min_ms..=range.max_ms),
        None => attributes.interval_ms,
    };
    Duration::from_millis(ms)
}
