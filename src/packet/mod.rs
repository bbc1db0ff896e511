//! 数据包模型
//!
//! 线上格式：每个数据包以 1 字节 id 开头，随后是各类型自行定义的字段。
//! - 入站数据包实现 [`IncomingPacket`]：从缓冲中解码自身，解码成功后处理
//! - 出站数据包实现 [`OutgoingPacket`]：编码进 [`PacketGroup`] 后整体发送
//!
//! 两类数据包都来自 [`Pool`](crate::pool::Pool)，用完后自动重置并归还。

mod group;
mod reader;
mod writer;

pub use group::{FreePacketGroup, PacketGroup};
pub use reader::{PacketReader, DEFAULT_MAX_STRING_LENGTH};
pub use writer::PacketWriter;

use crate::connection::Connection;
use crate::pool::{Poolable, Pooled};
use crate::state::ConnectionState;

/// 解码错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// 缓冲在字段中间结束，等待更多数据
    #[error("Incomplete packet: {needed} more byte(s) needed")]
    Incomplete { needed: usize },

    /// 数据不可能合法，连接应当关闭
    #[error("Malformed packet: {0}")]
    Malformed(String),
}

/// `IncomingPacket::read` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPacketResult {
    /// 解码完成，交给 `handle`
    Success,
    /// 数据不足，保留缓冲等待下一次读取
    NeedMoreData,
    /// 跳过已消费的字节，不处理该数据包
    DiscardSingle,
    /// 丢弃当前缓冲中的全部数据
    DiscardAll,
}

/// 入站数据包
///
/// `read` 从 id 之后的位置开始解码。`handle` 以值的方式拿到 `Pooled<Self>`：
/// 处理器若把它移交给延迟任务，数据包会一直存活；否则 `handle` 返回时即归还到池中。
pub trait IncomingPacket<S: ConnectionState>: Poolable {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError>;

    fn handle(packet: Pooled<Self>, conn: &Connection<S>, state: &mut S) -> anyhow::Result<()>;
}

/// [`IncomingPacket`] 的对象安全形式，协议表按 id 构造出的就是它
pub trait DynIncomingPacket<S: ConnectionState>: Send {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError>;

    fn handle(self: Box<Self>, conn: &Connection<S>, state: &mut S) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

impl<S, P> DynIncomingPacket<S> for Pooled<P>
where
    S: ConnectionState,
    P: IncomingPacket<S>,
{
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        <P as IncomingPacket<S>>::read(&mut **self, reader)
    }

    fn handle(self: Box<Self>, conn: &Connection<S>, state: &mut S) -> anyhow::Result<()> {
        <P as IncomingPacket<S>>::handle(*self, conn, state)
    }

    fn name(&self) -> &'static str {
        short_type_name::<P>()
    }
}

/// 出站数据包
pub trait OutgoingPacket: Poolable {
    /// 线上 id
    const ID: u8;

    /// 编码 id 之后的字段
    fn write(&self, writer: &mut PacketWriter<'_>);

    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

/// 去掉模块路径的类型名，用于日志
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(index) => &full[index + 2..],
        None => full,
    }
}
