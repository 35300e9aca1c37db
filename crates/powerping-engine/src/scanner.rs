//! Concurrent discovery of live hosts across an address range.
//!
//! The range is cut into contiguous partitions, one per worker thread. Each
//! worker owns its own engine and socket and probes its partition one host at
//! a time. The only state shared between workers is the list of discovered
//! hosts (locked for one push) and the scanned counter (atomic).

use crate::cancel::CancellationToken;
use crate::engine::{EngineError, PingEngine};
use crate::observer::NullObserver;
use crate::range::{parse_range, RangeError};
use crate::rate_limiter::RateLimiter;
use crate::resolve::{HostResolver, SystemResolver};
use crate::socket::SocketFactory;
use powerping_model::{HostInformation, PingAttributes};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub workers: usize,
    pub timeout_ms: u64,
    pub poll_interval: Duration,
    pub progress_interval: Duration,
    pub resolve_hostnames: bool,
    /// Cloned for every probed host; target, count and timing are overridden.
    pub template: PingAttributes,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            workers: 20,
            timeout_ms: 500,
            poll_interval: Duration::from_millis(100),
            progress_interval: Duration::from_millis(500),
            resolve_hostnames: true,
            template: PingAttributes::default(),
        }
    }
}

impl ScanSettings {
    fn probe_attributes(&self, address: Ipv4Addr) -> PingAttributes {
        let mut attributes = self.template.for_target(address.to_string());
        attributes.count = 1;
        attributes.continuous = false;
        attributes.interval_ms = 0;
        attributes.random_interval = None;
        attributes.timeout_ms = self.timeout_ms;
        attributes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub scanned: usize,
    pub found: usize,
    pub total: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Discovered hosts in completion order.
    pub hosts: Vec<HostInformation>,
    pub scanned: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// False when cancellation cut the scan short.
    pub completed: bool,
}

pub trait ScanObserver {
    fn on_progress(&mut self, _progress: &ScanProgress) {}

    fn on_finish(&mut self, _report: &ScanReport) {}
}

impl ScanObserver for NullObserver {}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Splits `items` into at most `workers` contiguous, nearly equal chunks.
pub fn partition<T>(items: &[T], workers: usize) -> Vec<&[T]> {
    if items.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, items.len());
    items.chunks(items.len().div_ceil(workers)).collect()
}

pub struct Scanner<F> {
    factory: F,
    token: CancellationToken,
    resolver: Arc<dyn HostResolver>,
}

impl<F> Scanner<F>
where
    F: SocketFactory + Clone + Sync,
{
    pub fn new(factory: F, token: CancellationToken) -> Self {
        Self {
            factory,
            token,
            resolver: Arc::new(SystemResolver::new()),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn scan(
        &self,
        range: &str,
        settings: &ScanSettings,
        observer: &mut dyn ScanObserver,
    ) -> Result<ScanReport, ScanError> {
        let addresses = parse_range(range)?;
        settings
            .probe_attributes(Ipv4Addr::UNSPECIFIED)
            .validate()
            .map_err(EngineError::from)?;

        let total = addresses.len();
        let found = Mutex::new(Vec::new());
        let scanned = AtomicUsize::new(0);
        let started = Instant::now();
        info!(range, total, workers = settings.workers, "scan started");

        thread::scope(|scope| {
            let handles: Vec<_> = partition(&addresses, settings.workers)
                .into_iter()
                .enumerate()
                .map(|(index, chunk)| {
                    let found = &found;
                    let scanned = &scanned;
                    scope.spawn(move || self.scan_partition(index, chunk, settings, found, scanned))
                })
                .collect();

            let mut limiter = RateLimiter::new(settings.progress_interval);
            loop {
                let finished = handles.iter().all(|handle| handle.is_finished());
                if finished || limiter.request_run() {
                    observer.on_progress(&ScanProgress {
                        scanned: scanned.load(Ordering::Relaxed),
                        found: found.lock().unwrap_or_else(PoisonError::into_inner).len(),
                        total,
                        elapsed: started.elapsed(),
                    });
                }
                if finished {
                    break;
                }
                thread::sleep(settings.poll_interval);
            }

            let mut first_error = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        first_error.get_or_insert(err);
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            first_error.map_or(Ok(()), Err)
        })?;

        let mut hosts = found.into_inner().unwrap_or_else(PoisonError::into_inner);
        if settings.resolve_hostnames {
            for host in &mut hosts {
                if self.token.is_cancelled() {
                    break;
                }
                host.hostname = self.resolver.reverse(host.address);
            }
        }

        let scanned = scanned.into_inner();
        let report = ScanReport {
            hosts,
            scanned,
            total,
            elapsed: started.elapsed(),
            completed: !self.token.is_cancelled() && scanned == total,
        };
        info!(
            found = report.hosts.len(),
            scanned,
            completed = report.completed,
            "scan finished"
        );
        observer.on_finish(&report);

        Ok(report)
    }

    fn scan_partition(
        &self,
        index: usize,
        chunk: &[Ipv4Addr],
        settings: &ScanSettings,
        found: &Mutex<Vec<HostInformation>>,
        scanned: &AtomicUsize,
    ) -> Result<(), EngineError> {
        let identifier = (std::process::id() as u16).wrapping_add(index as u16);
        let engine = PingEngine::new(self.factory.clone(), self.token.clone())
            .with_resolver(Arc::clone(&self.resolver))
            .with_identifier(identifier);

        for &address in chunk {
            if self.token.is_cancelled() {
                debug!(worker = index, "abandoning partition");
                break;
            }

            match engine.run(&settings.probe_attributes(address), &mut NullObserver) {
                Ok(results) => {
                    if results.good_packets > 0 {
                        found
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(HostInformation::new(address, results.current_time));
                    }
                    if results.sent == 0 {
                        continue;
                    }
                }
                Err(err @ EngineError::SocketCreation(_)) => return Err(err),
                Err(err) => warn!(%address, "probe failed: {err}"),
            }
            scanned.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerping_model::IntervalRange;

    #[test]
    fn per_host_attributes_keep_packet_options_and_force_one_shot() {
        let mut template = PingAttributes::default();
        template.ttl = 16;
        template.message = "scan".to_string();
        template.icmp_type = 13;
        template.receive_buffer_size = 512;
        template.count = 50;
        template.continuous = true;
        template.interval_ms = 1000;
        template.random_interval = Some(IntervalRange {
            min_ms: 10,
            max_ms: 20,
        });
        template.timeout_ms = 3000;
        let settings = ScanSettings {
            timeout_ms: 250,
            template,
            ..ScanSettings::default()
        };

        let attributes = settings.probe_attributes(Ipv4Addr::new(192, 168, 1, 7));

        assert_eq!(attributes.target, "192.168.1.7");
        assert_eq!(attributes.ttl, 16);
        assert_eq!(attributes.message, "scan");
        assert_eq!(attributes.icmp_type, 13);
        assert_eq!(attributes.receive_buffer_size, 512);
        assert_eq!(attributes.count, 1);
        assert!(!attributes.continuous);
        assert_eq!(attributes.interval_ms, 0);
        assert_eq!(attributes.random_interval, None);
        assert_eq!(attributes.timeout_ms, 250);
    }
}
