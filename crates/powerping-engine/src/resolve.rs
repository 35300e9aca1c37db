use crate::cancel::CancellationToken;
use std::io;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::Resolver;

/// How often a pending lookup checks for cancellation.
const RESOLVE_POLL: Duration = Duration::from_millis(50);

pub trait HostResolver: Send + Sync {
    /// Blocking forward lookup to the first IPv4 address of `host`.
    fn resolve(&self, host: &str) -> io::Result<Ipv4Addr>;

    fn reverse(&self, address: Ipv4Addr) -> Option<String>;
}

/// Forward lookups through the platform resolver, reverse lookups through
/// trust-dns using the system configuration.
#[derive(Default)]
pub struct SystemResolver {
    reverse: OnceLock<Option<Mutex<Resolver>>>,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn reverse_resolver(&self) -> Option<&Mutex<Resolver>> {
        self.reverse
            .get_or_init(|| match Resolver::from_system_conf() {
                Ok(resolver) => Some(Mutex::new(resolver)),
                Err(err) => {
                    warn!("reverse lookups disabled: {err}");
                    None
                }
            })
            .as_ref()
    }
}

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<Ipv4Addr> {
        if let Ok(address) = host.parse::<Ipv4Addr>() {
            return Ok(address);
        }

        (host, 0)
            .to_socket_addrs()?
            .find_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no IPv4 address found for {host}"),
                )
            })
    }

    fn reverse(&self, address: Ipv4Addr) -> Option<String> {
        let resolver = self
            .reverse_resolver()?
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match resolver.reverse_lookup(IpAddr::V4(address)) {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Err(err) => {
                debug!("reverse lookup for {address} failed: {err}");
                None
            }
        }
    }
}

/// Resolves `host` on a helper thread so the caller can give up when
/// `token` fires. Returns `Ok(None)` on cancellation; the abandoned lookup
/// finishes in the background and its result is dropped.
pub fn resolve_cancellable(
    resolver: &Arc<dyn HostResolver>,
    host: &str,
    token: &CancellationToken,
) -> io::Result<Option<Ipv4Addr>> {
    if let Ok(address) = host.parse::<Ipv4Addr>() {
        return Ok(Some(address));
    }

    let (tx, rx) = mpsc::channel();
    let resolver = Arc::clone(resolver);
    let owned_host = host.to_string();
    thread::spawn(move || {
        let _ = tx.send(resolver.resolve(&owned_host));
    });

    loop {
        if token.is_cancelled() {
            return Ok(None);
        }
        match rx.recv_timeout(RESOLVE_POLL) {
            Ok(result) => return result.map(Some),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "resolver thread exited without an answer",
                ))
            }
        }
    }
}
