use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A host discovered by a scan. The hostname is filled in afterwards by
/// the reverse lookup pass, if one runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInformation {
    pub address: Ipv4Addr,
    pub hostname: Option<String>,
    pub latency_ms: f64,
}

impl HostInformation {
    pub fn new(address: Ipv4Addr, latency_ms: f64) -> Self {
        Self {
            address,
            hostname: None,
            latency_ms,
        }
    }
}
