use powerping_model::PingAttributes;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tracing::warn;

/// Shortest receive timeout handed to the OS; zero would mean "block forever".
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    pub ttl: u8,
    pub dont_fragment: bool,
}

impl SocketOptions {
    pub fn from_attributes(attributes: &PingAttributes) -> Self {
        Self {
            ttl: attributes.ttl,
            dont_fragment: attributes.dont_fragment,
        }
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            ttl: 255,
            dont_fragment: false,
        }
    }
}

/// One exclusively owned ICMP socket.
pub trait IcmpSocket {
    fn send_to(&mut self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize>;

    /// Blocks for at most `timeout` waiting for the next datagram. The
    /// returned bytes start with the IPv4 header.
    fn recv(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

pub trait SocketFactory {
    type Socket: IcmpSocket;

    fn open(&self, options: &SocketOptions) -> io::Result<Self::Socket>;
}

pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawSocketFactory;

impl SocketFactory for RawSocketFactory {
    type Socket = RawIcmpSocket;

    fn open(&self, options: &SocketOptions) -> io::Result<RawIcmpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_ttl(options.ttl as u32)?;
        if options.dont_fragment {
            if let Err(err) = set_dont_fragment(&socket) {
                warn!("could not set don't-fragment: {err}");
            }
        }
        Ok(RawIcmpSocket { socket })
    }
}

#[derive(Debug)]
pub struct RawIcmpSocket {
    socket: Socket,
}

impl IcmpSocket for RawIcmpSocket {
    fn send_to(&mut self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize> {
        let address = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(target, 0)));
        self.socket.send_to(packet, &address)
    }

    fn recv(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.socket
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        self.socket.read(buffer)
    }
}

#[cfg(target_os = "linux")]
fn set_dont_fragment(socket: &Socket) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let value: libc::c_int = libc::IP_PMTUDISC_DO;
    // SAFETY: the fd is owned by `socket` for the duration of the call and
    // the option value points at a live c_int of the advertised size.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MTU_DISCOVER,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn set_dont_fragment(_socket: &Socket) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "don't-fragment is only supported on Linux",
    ))
}
