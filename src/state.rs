//! 连接状态契约
//!
//! 每个连接绑定一个应用层状态对象，由 [`Core`](crate::engine::Core) 的状态工厂创建，
//! 整个生命周期都由连接的驱动任务独占持有，因此无需加锁。

use std::io;

use bytes::BytesMut;

use crate::connection::Connection;
use crate::error::CloseReason;

/// 应用层的每连接状态
pub trait ConnectionState: Sized + Send + 'static {
    /// 连接建立后、开始读取前调用；可以在这里发送首个数据包
    fn on_init(&mut self, _conn: &Connection<Self>) {}

    /// 连接关闭时调用，每个连接恰好一次
    fn on_close(&mut self, _reason: &CloseReason) {}

    /// 加密钩子，`on_init` 之后查询一次
    fn encryption(&mut self) -> Option<Box<dyn Encryption>> {
        None
    }

    /// 压缩钩子，`on_init` 之后查询一次
    fn compression(&mut self) -> Option<Box<dyn Compression>> {
        None
    }

    /// 是否允许把连续的发送单元合并后定时写出
    fn packet_groups_joining_allowed(&self) -> bool {
        false
    }
}

/// 加密握手结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionInit {
    /// 启用加密；前 `consumed` 字节是握手数据
    UseEncryption { consumed: usize },
    /// 对端不加密；前 `consumed` 字节是握手数据
    NoEncryption { consumed: usize },
    /// 握手数据不完整
    NeedMoreData,
    /// 握手数据非法，关闭连接
    Invalid,
}

/// 可插拔的流加密
///
/// 握手完成前发送数据会导致连接关闭。
pub trait Encryption: Send {
    /// 用已收到的数据尝试完成握手
    fn init(&mut self, data: &[u8]) -> EncryptionInit;

    /// 解密 `src` 并追加到 `dst`
    fn decrypt(&mut self, src: &[u8], dst: &mut BytesMut);

    /// 加密 `src` 并追加到 `dst`
    fn encrypt(&mut self, src: &[u8], dst: &mut BytesMut);
}

/// 可插拔的流压缩（出站先压缩后加密，入站先解密后解压）
pub trait Compression: Send {
    fn compress(&mut self, src: &[u8], dst: &mut BytesMut) -> io::Result<()>;

    fn decompress(&mut self, src: &[u8], dst: &mut BytesMut) -> io::Result<()>;
}
