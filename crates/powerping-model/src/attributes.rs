use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of an IPv4 header without options plus the fixed ICMP echo header.
const MIN_RECEIVE_BUFFER: usize = 20 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeepMode {
    #[default]
    Off,
    OnTimeout,
    OnReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ttl must be between 1 and 255")]
    ZeroTtl,
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("count must be greater than zero unless running continuously")]
    ZeroCount,
    #[error("receive buffer of {0} bytes cannot hold an IPv4 and ICMP header")]
    BufferTooSmall(usize),
    #[error("random interval bounds are inverted ({min_ms}ms > {max_ms}ms)")]
    InvertedInterval { min_ms: u64, max_ms: u64 },
    #[error("target must not be empty")]
    EmptyTarget,
}

/// Per-run probing configuration. Cloned for every scanned host, never
/// mutated while a session is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingAttributes {
    pub target: String,
    pub message: String,
    pub ttl: u8,
    pub timeout_ms: u64,
    pub interval_ms: u64,
    pub count: u64,
    pub continuous: bool,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub receive_buffer_size: usize,
    pub dont_fragment: bool,
    #[serde(default)]
    pub beep: BeepMode,
    #[serde(default)]
    pub random_message: bool,
    #[serde(default)]
    pub random_interval: Option<IntervalRange>,
    #[serde(default)]
    pub artificial_message_size: Option<usize>,
}

impl Default for PingAttributes {
    fn default() -> Self {
        Self {
            target: String::new(),
            message: "R U Dead Yet?".to_string(),
            ttl: 255,
            timeout_ms: 5000,
            interval_ms: 1000,
            count: 5,
            continuous: false,
            icmp_type: 8,
            icmp_code: 0,
            receive_buffer_size: 5096,
            dont_fragment: false,
            beep: BeepMode::Off,
            random_message: false,
            random_interval: None,
            artificial_message_size: None,
        }
    }
}

impl PingAttributes {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Copy of these attributes aimed at another target.
    pub fn for_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        if self.ttl == 0 {
            return Err(ConfigError::ZeroTtl);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.count == 0 && !self.continuous {
            return Err(ConfigError::ZeroCount);
        }
        if self.receive_buffer_size < MIN_RECEIVE_BUFFER {
            return Err(ConfigError::BufferTooSmall(self.receive_buffer_size));
        }
        if let Some(range) = self.random_interval {
            if range.min_ms > range.max_ms {
                return Err(ConfigError::InvertedInterval {
                    min_ms: range.min_ms,
                    max_ms: range.max_ms,
                });
            }
        }
        Ok(())
    }

    /// Payload bytes for the configured message, honouring the artificial size.
    pub fn message_bytes(&self) -> Vec<u8> {
        let mut bytes = self.message.as_bytes().to_vec();
        if let Some(size) = self.artificial_message_size {
            bytes.resize(size, 0);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_once_target_is_set() {
        assert_eq!(
            PingAttributes::default().validate(),
            Err(ConfigError::EmptyTarget)
        );
        assert!(PingAttributes::new("127.0.0.1").validate().is_ok());
    }

    #[test]
    fn zero_count_is_allowed_when_continuous() {
        let mut attrs = PingAttributes::new("10.0.0.1");
        attrs.count = 0;
        assert_eq!(attrs.validate(), Err(ConfigError::ZeroCount));

        attrs.continuous = true;
        assert!(attrs.validate().is_ok());
    }

    #[test]
    fn rejects_small_buffer_and_inverted_interval() {
        let mut attrs = PingAttributes::new("10.0.0.1");
        attrs.receive_buffer_size = 16;
        assert_eq!(attrs.validate(), Err(ConfigError::BufferTooSmall(16)));

        attrs.receive_buffer_size = 1024;
        attrs.random_interval = Some(IntervalRange {
            min_ms: 900,
            max_ms: 100,
        });
        assert!(matches!(
            attrs.validate(),
            Err(ConfigError::InvertedInterval { .. })
        ));
    }

    #[test]
    fn artificial_size_pads_and_truncates() {
        let mut attrs = PingAttributes::new("10.0.0.1");
        attrs.message = "abc".to_string();
        attrs.artificial_message_size = Some(5);
        assert_eq!(attrs.message_bytes(), b"abc\0\0".to_vec());

        attrs.artificial_message_size = Some(2);
        assert_eq!(attrs.message_bytes(), b"ab".to_vec());
    }

    #[test]
    fn for_target_keeps_everything_else() {
        let mut template = PingAttributes::new("unused");
        template.timeout_ms = 250;
        let copy = template.for_target("192.168.1.7");
        assert_eq!(copy.target, "192.168.1.7");
        assert_eq!(copy.timeout_ms, 250);
        assert_eq!(template.target, "unused");
    }
}
