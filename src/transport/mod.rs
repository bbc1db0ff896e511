//! 传输层抽象
//!
//! 连接只依赖 [`Transport`]（任意 `AsyncRead + AsyncWrite` 流），
//! TCP、本地 IPC 和内存流共用同一套连接代码；监听端通过 [`Acceptor`] 接入。

pub mod ipc;
pub mod tcp;

use std::fmt;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// 可承载连接的字节流
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// 连接端点
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp(SocketAddr),
    /// 本地 IPC 名称
    Ipc(String),
    /// 进程内流（测试、嵌入）
    Memory(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            Endpoint::Ipc(name) => write!(f, "ipc://{}", name),
            Endpoint::Memory(name) => write!(f, "memory://{}", name),
        }
    }
}

/// 接受入站流
///
/// `accept` 返回错误时监听循环会记录日志并在退避后重试，不会停止。
#[async_trait]
pub trait Acceptor: Send + 'static {
    type Stream: Transport;

    async fn accept(&mut self) -> io::Result<(Self::Stream, Endpoint)>;

    /// 实际绑定的端点
    fn local_endpoint(&self) -> Endpoint;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let addr: SocketAddr = "127.0.0.1:2593".parse().unwrap();
        assert_eq!(Endpoint::Tcp(addr).to_string(), "tcp://127.0.0.1:2593");
        assert_eq!(Endpoint::Ipc("aux".into()).to_string(), "ipc://aux");
    }
}
