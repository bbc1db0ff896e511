use std::fmt;

use crate::ConnectionId;

/// 连接关闭原因
///
/// `Display` 输出即传给 `ConnectionState::on_close` 的人类可读原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// 对端关闭（读到 0 字节）
    ConnectionLost,
    /// 读写出错
    Io(String),
    /// 数据包解码失败
    Decode(String),
    /// 帧错误或协议约束被破坏（原因原样输出）
    Protocol(String),
    /// 应用层处理器失败
    HandlerFailed(String),
    /// 调用方主动关闭
    Requested(String),
    /// 所属 core 正在关闭
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ConnectionLost => f.write_str("Connection lost"),
            CloseReason::Io(reason) => write!(f, "I/O error: {}", reason),
            CloseReason::Decode(reason) => write!(f, "Decode error: {}", reason),
            CloseReason::Protocol(reason) => f.write_str(reason),
            CloseReason::HandlerFailed(reason) => write!(f, "Packet handler failed: {}", reason),
            CloseReason::Requested(reason) => f.write_str(reason),
            CloseReason::Shutdown => f.write_str("Shutting down"),
        }
    }
}

/// 统一传输错误类型
#[derive(Debug, thiserror::Error, Clone)]
pub enum TransportError {
    /// 绑定/监听失败 - 启动期致命错误
    #[error("Failed to bind {address}: {reason}")]
    Bind {
        address: String,
        reason: String,
    },

    /// 主动连接失败
    #[error("Failed to connect to {address}: {reason}")]
    Connect {
        address: String,
        reason: String,
    },

    /// 连接相关错误
    #[error("Connection error: {reason} (retryable: {retryable})")]
    Connection {
        reason: String,
        retryable: bool,
    },

    /// 协议相关错误
    #[error("Protocol error ({protocol}): {reason}")]
    Protocol {
        protocol: String,
        reason: String,
    },

    /// 连接已进入关闭流程，不再接受发送
    #[error("Connection {connection} is closed")]
    Closed {
        connection: ConnectionId,
    },

    /// 配置相关错误
    #[error("Configuration error in field '{field}': {reason}")]
    Configuration {
        field: String,
        reason: String,
    },

}

impl TransportError {
    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Bind { .. } => false,
            TransportError::Connect { .. } => true,
            TransportError::Connection { retryable, .. } => *retryable,
            TransportError::Protocol { .. } => false,
            TransportError::Closed { .. } => false,
            TransportError::Configuration { .. } => false,
        }
    }

    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::Bind { .. } => "BIND_ERROR",
            TransportError::Connect { .. } => "CONNECT_ERROR",
            TransportError::Connection { .. } => "CONNECTION_ERROR",
            TransportError::Protocol { .. } => "PROTOCOL_ERROR",
            TransportError::Closed { .. } => "CLOSED",
            TransportError::Configuration { .. } => "CONFIG_ERROR",
        }
    }
}

/// 便利构造函数
impl TransportError {
    pub fn bind_error(address: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::Bind {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn connect_error(address: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::Connect {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn connection_error(reason: impl Into<String>, retryable: bool) -> Self {
        Self::Connection {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn protocol_error(protocol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            protocol: protocol.into(),
            reason: reason.into(),
        }
    }

    pub fn config_error(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 从标准IO错误转换
impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        let retryable = matches!(
            error.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        );

        TransportError::Connection {
            reason: format!("IO error: {}", error),
            retryable,
        }
    }
}

impl From<crate::packet::DecodeError> for TransportError {
    fn from(error: crate::packet::DecodeError) -> Self {
        TransportError::protocol_error("packet", error.to_string())
    }
}

impl From<crate::config::ConfigError> for TransportError {
    fn from(error: crate::config::ConfigError) -> Self {
        match error {
            crate::config::ConfigError::InvalidValue { field, reason, .. } => {
                TransportError::Configuration { field, reason }
            }
            crate::config::ConfigError::InvalidAddress { address, reason } => TransportError::Configuration {
                field: "address".to_string(),
                reason: format!("{}: {}", address, reason),
            },
        }
    }
}
