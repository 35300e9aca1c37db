//! Shared data structures for PowerPing.

pub mod attributes;
pub mod host;
pub mod results;

pub use attributes::{BeepMode, ConfigError, IntervalRange, PingAttributes};
pub use host::HostInformation;
pub use results::{PacketClass, PingResults, NO_REPLY};
