use crate::cancel::CancellationToken;
use crate::engine::EngineError;
use crate::socket::{is_timeout, IcmpSocket, SocketFactory, SocketOptions};
use powerping_icmp::{DecodeError, ReceivedPacket};
use std::io;
use std::time::Duration;
use tracing::{info, warn};

/// Receive slice used while listening; bounds how long cancellation takes.
const LISTEN_SLICE: Duration = Duration::from_millis(250);

const LISTEN_BUFFER: usize = 5096;

pub trait ListenObserver {
    fn on_packet(&mut self, packet: &ReceivedPacket, bytes: usize);

    fn on_malformed(&mut self, _error: &DecodeError) {}

    fn on_error(&mut self, _error: &io::Error) {}
}

/// Reports every ICMP packet arriving on a raw socket until cancelled.
pub struct Listener<F> {
    factory: F,
    token: CancellationToken,
}

impl<F: SocketFactory> Listener<F> {
    pub fn new(factory: F, token: CancellationToken) -> Self {
        Self { factory, token }
    }

    /// Returns the number of well-formed packets seen.
    pub fn run(&self, observer: &mut dyn ListenObserver) -> Result<u64, EngineError> {
        let mut socket = self
            .factory
            .open(&SocketOptions::default())
            .map_err(EngineError::SocketCreation)?;
        let mut buffer = vec![0u8; LISTEN_BUFFER];
        let mut seen = 0u64;

        info!("listening for ICMP traffic");
        while !self.token.is_cancelled() {
            let bytes = match socket.recv(&mut buffer, LISTEN_SLICE) {
                Ok(bytes) => bytes,
                Err(err) if is_timeout(&err) => continue,
                Err(err) => {
                    warn!("receive failed: {err}");
                    observer.on_error(&err);
                    self.token.sleep(LISTEN_SLICE);
                    continue;
                }
            };

            match ReceivedPacket::decode(&buffer[..bytes]) {
                Ok(packet) => {
                    seen += 1;
                    observer.on_packet(&packet, bytes);
                }
                Err(err) => observer.on_malformed(&err),
            }
        }
        info!(seen, "listener stopped");

        Ok(seen)
    }
}
