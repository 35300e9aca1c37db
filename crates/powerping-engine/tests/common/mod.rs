#![allow(dead_code)]

use powerping_engine::{HostResolver, IcmpSocket, ManualClock, SocketFactory, SocketOptions};
use powerping_icmp::{IcmpPacket, DESTINATION_UNREACHABLE, ECHO_REPLY, ECHO_REQUEST};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);
const ELSEWHERE: Ipv4Addr = Ipv4Addr::new(10, 9, 9, 9);
const IPPROTO_ICMP: u8 = 1;
const IPPROTO_UDP: u8 = 17;

/// What the fake network does with the next request.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Duration),
    /// The gateway reports the request itself as undeliverable.
    Unreachable(Duration),
    /// A port-unreachable about an unrelated UDP datagram arrives before
    /// the echo reply.
    ForeignUnreachableThenReply(Duration),
    /// An echo reply for an older sequence arrives first.
    StaleThenReply(Duration),
    Timeout,
    Garbage,
    SendError,
    RecvError,
}

#[derive(Clone)]
pub struct FakeNetwork {
    clock: Arc<ManualClock>,
    script: Arc<Mutex<VecDeque<Step>>>,
    live: Arc<HashSet<Ipv4Addr>>,
    idle_delay: Duration,
    fail_open: bool,
    gateway_noise: bool,
    pub opened: Arc<AtomicUsize>,
    pub sent: Arc<AtomicUsize>,
}

impl FakeNetwork {
    pub fn scripted(clock: Arc<ManualClock>, steps: Vec<Step>) -> Self {
        Self {
            clock,
            script: Arc::new(Mutex::new(steps.into())),
            live: Arc::new(HashSet::new()),
            idle_delay: Duration::ZERO,
            fail_open: false,
            gateway_noise: false,
            opened: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hosts in `live` answer every request; everything else times out
    /// after `idle_delay` of real time.
    pub fn with_live_hosts(live: impl IntoIterator<Item = Ipv4Addr>, idle_delay: Duration) -> Self {
        Self {
            live: Arc::new(live.into_iter().collect()),
            idle_delay,
            ..Self::scripted(Arc::new(ManualClock::new()), Vec::new())
        }
    }

    /// Dead hosts are reported unreachable instead of staying silent, and
    /// every socket also sees the report generated for another worker's
    /// request before the answer to its own.
    pub fn with_gateway_noise(mut self) -> Self {
        self.gateway_noise = true;
        self
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::scripted(Arc::new(ManualClock::new()), Vec::new())
        }
    }
}

impl SocketFactory for FakeNetwork {
    type Socket = FakeSocket;

    fn open(&self, _options: &SocketOptions) -> io::Result<FakeSocket> {
        if self.fail_open {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSocket {
            network: self.clone(),
            last_sent: None,
            queued: VecDeque::new(),
            step: None,
        })
    }
}

pub struct FakeSocket {
    network: FakeNetwork,
    last_sent: Option<(IcmpPacket, Ipv4Addr)>,
    queued: VecDeque<Vec<u8>>,
    step: Option<Step>,
}

impl IcmpSocket for FakeSocket {
    fn send_to(&mut self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize> {
        let step = self.network.script.lock().unwrap().pop_front();
        if let Some(Step::SendError) = step {
            return Err(io::Error::new(io::ErrorKind::Other, "network is unreachable"));
        }
        self.network.sent.fetch_add(1, Ordering::SeqCst);
        self.last_sent = Some((IcmpPacket::decode(packet).unwrap(), target));
        self.step = step;
        Ok(packet.len())
    }

    fn recv(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if let Some(datagram) = self.queued.pop_front() {
            return Ok(copy_into(buffer, &datagram));
        }

        let (request, target) = self
            .last_sent
            .clone()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;

        let step = match self.step.take() {
            Some(step) => step,
            None if self.network.live.contains(&target) && self.network.gateway_noise => {
                self.queued.push_back(echo_reply(&request, target, 0));
                let elsewhere = IcmpPacket::echo(
                    ECHO_REQUEST,
                    0,
                    request.identifier().unwrap().wrapping_add(1),
                    request.sequence().unwrap(),
                    &[],
                );
                return Ok(copy_into(
                    buffer,
                    &unreachable(ELSEWHERE, IPPROTO_ICMP, &elsewhere.encode()),
                ));
            }
            None if self.network.live.contains(&target) => Step::Reply(Duration::from_millis(1)),
            None if self.network.gateway_noise => Step::Unreachable(Duration::from_millis(1)),
            None => {
                thread::sleep(self.network.idle_delay.min(timeout));
                Step::Timeout
            }
        };

        match step {
            Step::Reply(rtt) => {
                self.network.clock.advance(rtt);
                Ok(copy_into(buffer, &echo_reply(&request, target, 0)))
            }
            Step::Unreachable(rtt) => {
                self.network.clock.advance(rtt);
                Ok(copy_into(
                    buffer,
                    &unreachable(target, IPPROTO_ICMP, &request.encode()),
                ))
            }
            Step::ForeignUnreachableThenReply(rtt) => {
                self.network.clock.advance(rtt);
                self.queued.push_back(echo_reply(&request, target, 0));
                let udp_header = [0x30, 0x39, 0x00, 0x35, 0x00, 0x08, 0x00, 0x00];
                Ok(copy_into(buffer, &unreachable(ELSEWHERE, IPPROTO_UDP, &udp_header)))
            }
            Step::StaleThenReply(rtt) => {
                self.network.clock.advance(rtt);
                self.queued.push_back(echo_reply(&request, target, 0));
                Ok(copy_into(buffer, &echo_reply(&request, target, 1)))
            }
            Step::Timeout => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Step::Garbage => Ok(copy_into(buffer, &[0x45, 0, 0])),
            Step::RecvError => Err(io::Error::new(io::ErrorKind::Other, "connection refused")),
            Step::SendError => unreachable!("send errors are consumed by send_to"),
        }
    }
}

/// Echo reply for `request`, with its sequence moved back by `stale`.
fn echo_reply(request: &IcmpPacket, source: Ipv4Addr, stale: u16) -> Vec<u8> {
    let reply = IcmpPacket::echo(
        ECHO_REPLY,
        0,
        request.identifier().unwrap(),
        request.sequence().unwrap().wrapping_sub(stale),
        request.message(),
    );
    datagram(source, &reply)
}

/// Host-unreachable from the gateway quoting the first eight bytes of
/// `original`, which was sent to `destination` over `protocol`.
fn unreachable(destination: Ipv4Addr, protocol: u8, original: &[u8]) -> Vec<u8> {
    let mut quoted = vec![0u8; 20];
    quoted[0] = 0x45;
    quoted[8] = 1;
    quoted[9] = protocol;
    quoted[16..20].copy_from_slice(&destination.octets());
    quoted.extend_from_slice(&original[..original.len().min(8)]);

    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&quoted);
    datagram(GATEWAY, &IcmpPacket::new(DESTINATION_UNREACHABLE, 1, payload))
}

fn datagram(source: Ipv4Addr, packet: &IcmpPacket) -> Vec<u8> {
    let mut bytes = vec![0u8; 20];
    bytes[0] = 0x45;
    bytes[8] = 64;
    bytes[9] = 1;
    bytes[12..16].copy_from_slice(&source.octets());
    bytes.extend_from_slice(&packet.encode());
    bytes
}

fn copy_into(buffer: &mut [u8], datagram: &[u8]) -> usize {
    let len = datagram.len().min(buffer.len());
    buffer[..len].copy_from_slice(&datagram[..len]);
    len
}

pub struct NamingResolver;

impl HostResolver for NamingResolver {
    fn resolve(&self, host: &str) -> io::Result<Ipv4Addr> {
        host.parse()
            .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "unknown host"))
    }

    fn reverse(&self, address: Ipv4Addr) -> Option<String> {
        Some(format!("host-{}.lan", address.octets()[3]))
    }
}
