//! ICMP probing engine: ping sessions, raw listening and range scans.

pub mod cancel;
pub mod clock;
pub mod engine;
pub mod listen;
pub mod observer;
pub mod range;
pub mod rate_limiter;
pub mod resolve;
pub mod scanner;
pub mod socket;

pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use engine::{EngineError, PingEngine};
pub use listen::{ListenObserver, Listener};
pub use observer::{NullObserver, PingObserver, Reply};
pub use range::{parse_range, RangeError, MAX_RANGE_SIZE};
pub use rate_limiter::RateLimiter;
pub use resolve::{resolve_cancellable, HostResolver, SystemResolver};
pub use scanner::{
    partition, ScanError, ScanObserver, ScanProgress, ScanReport, ScanSettings, Scanner,
};
pub use socket::{IcmpSocket, RawIcmpSocket, RawSocketFactory, SocketFactory, SocketOptions};
