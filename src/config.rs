//! Connection and listener configuration
//!
//! All durations are (de)serialized as integer milliseconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        address: String,
        reason: String,
    },

    #[error("Invalid value for '{field}': {value}\nReason: {reason}\nSuggestion: {suggestion}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
        suggestion: String,
    },
}

impl ConfigError {
    fn invalid(field: &str, value: impl ToString, reason: &str, suggestion: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
            suggestion: suggestion.to_string(),
        }
    }
}

/// Per-connection buffering and send behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Initial receive buffer capacity
    pub receive_buffer_size: usize,
    /// Receive buffer limit; exceeding it closes the connection
    pub max_receive_buffer: usize,
    /// Upper bound for length-prefixed strings
    pub max_string_length: usize,
    /// TCP_NODELAY option
    pub nodelay: bool,
    /// Flush interval for joined packet groups
    #[serde(with = "millis")]
    pub join_interval: Duration,
    /// Joined buffer is flushed before it grows past this size
    pub max_joined_size: usize,
    /// Outbound connect timeout
    #[serde(with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
    /// Free-list limit of every typed pool
    pub max_cached_per_type: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: 8192,
            max_receive_buffer: 1024 * 1024,
            max_string_length: 64 * 1024,
            nodelay: true,
            join_interval: Duration::from_millis(333),
            max_joined_size: 64 * 1024,
            connect_timeout: Some(Duration::from_secs(10)),
            max_cached_per_type: 1024,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receive_buffer_size == 0 {
            return Err(ConfigError::invalid(
                "receive_buffer_size",
                0,
                "must be > 0",
                "set a positive value like 8192",
            ));
        }
        if self.max_receive_buffer < self.receive_buffer_size {
            return Err(ConfigError::invalid(
                "max_receive_buffer",
                self.max_receive_buffer,
                "must not be smaller than receive_buffer_size",
                "raise max_receive_buffer or lower receive_buffer_size",
            ));
        }
        if self.join_interval.is_zero() {
            return Err(ConfigError::invalid(
                "join_interval",
                "0ms",
                "must be > 0",
                "use the default of 333ms",
            ));
        }
        if self.max_joined_size == 0 {
            return Err(ConfigError::invalid(
                "max_joined_size",
                0,
                "must be > 0",
                "set a positive value like 65536",
            ));
        }
        Ok(())
    }

    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    pub fn with_max_receive_buffer(mut self, size: usize) -> Self {
        self.max_receive_buffer = size;
        self
    }

    pub fn with_max_string_length(mut self, len: usize) -> Self {
        self.max_string_length = len;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_join_interval(mut self, interval: Duration) -> Self {
        self.join_interval = interval;
        self
    }

    pub fn with_max_joined_size(mut self, size: usize) -> Self {
        self.max_joined_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_cached_per_type(mut self, max: usize) -> Self {
        self.max_cached_per_type = max;
        self
    }
}

/// Listener (accept loop) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listen backlog
    pub backlog: u32,
    /// Whether to allow address reuse
    pub reuse_addr: bool,
    /// Pause after a failed accept before the next attempt
    #[serde(with = "millis")]
    pub accept_error_backoff: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            backlog: 1024,
            reuse_addr: true,
            accept_error_backoff: Duration::from_millis(100),
        }
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 {
            return Err(ConfigError::invalid("backlog", 0, "must be > 0", "set a positive value like 1024"));
        }
        Ok(())
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_reuse_addr(mut self, reuse: bool) -> Self {
        self.reuse_addr = reuse;
        self
    }

    pub fn with_accept_error_backoff(mut self, backoff: Duration) -> Self {
        self.accept_error_backoff = backoff;
        self
    }
}

/// Parse a socket address, mapping failures to [`ConfigError::InvalidAddress`]
pub fn parse_socket_addr(address: &str) -> Result<std::net::SocketAddr, ConfigError> {
    address.parse().map_err(|e: std::net::AddrParseError| ConfigError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
