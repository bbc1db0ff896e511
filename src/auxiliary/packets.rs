//! 辅助链路数据包
//!
//! 每个类型都同时实现出站与入站：发送方编码，接收方解码并处理。
//!
//! | id | 方向 | 类型 |
//! |----|------|------|
//! | 0x01 | 辅助服务器 → 游戏服务器 | [`SetLogStreamingPacket`] |
//! | 0x02 | 辅助服务器 → 游戏服务器 | [`RequestAccountLoginPacket`] |
//! | 0x03 | 辅助服务器 → 游戏服务器 | [`ConsoleCommandLinePacket`] |
//! | 0x01 | 游戏服务器 → 辅助服务器 | [`IdentifyGameServerPacket`] |
//! | 0x02 | 游戏服务器 → 辅助服务器 | [`LogStringPacket`] |
//! | 0x03 | 游戏服务器 → 辅助服务器 | [`ReplyAccountLoginPacket`] |
//! | 0x04 | 游戏服务器 → 辅助服务器 | [`StartupFinishedPacket`] |
//! | 0x05 | 游戏服务器 → 辅助服务器 | [`ConsoleWriteLinePacket`] |

use super::state::{AuxLinkEvent, AuxLinkState, GameLinkEvent, GameLinkState};
use crate::connection::Connection;
use crate::packet::{DecodeError, IncomingPacket, OutgoingPacket, PacketReader, PacketWriter, ReadPacketResult};
use crate::pool::{Poolable, Pooled};

/// 打开或关闭日志转发
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetLogStreamingPacket {
    pub enabled: bool,
}

impl SetLogStreamingPacket {
    pub fn prepare(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Poolable for SetLogStreamingPacket {
    fn reset(&mut self) {
        self.enabled = false;
    }
}

impl OutgoingPacket for SetLogStreamingPacket {
    const ID: u8 = 0x01;

    fn write(&self, writer: &mut PacketWriter<'_>) {
        writer.encode_bool(self.enabled);
    }
}

impl IncomingPacket<GameLinkState> for SetLogStreamingPacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.enabled = reader.decode_bool()?;
        Ok(ReadPacketResult::Success)
    }

    fn handle(packet: Pooled<Self>, conn: &Connection<GameLinkState>, state: &mut GameLinkState) -> anyhow::Result<()> {
        state.log_switch().set(packet.enabled);
        tracing::debug!("📝 日志转发: {} ({})", if packet.enabled { "开启" } else { "关闭" }, conn.id());
        state.emit(GameLinkEvent::LogStreaming {
            connection: conn.id(),
            enabled: packet.enabled,
        });
        Ok(())
    }
}

/// 控制台账号登录请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAccountLoginPacket {
    pub console_id: i32,
    pub acc_name: String,
    pub password: String,
}

impl RequestAccountLoginPacket {
    pub fn prepare(&mut self, console_id: i32, acc_name: &str, password: &str) {
        self.console_id = console_id;
        self.acc_name.push_str(acc_name);
        self.password.push_str(password);
    }
}

impl Poolable for RequestAccountLoginPacket {
    fn reset(&mut self) {
        self.console_id = 0;
        self.acc_name.clear();
        self.password.clear();
    }
}

impl OutgoingPacket for RequestAccountLoginPacket {
    const ID: u8 = 0x02;

    fn write(&self, writer: &mut PacketWriter<'_>) {
        writer.encode_int(self.console_id);
        writer.encode_utf8_string(&self.acc_name);
        writer.encode_utf8_string(&self.password);
    }
}

impl IncomingPacket<GameLinkState> for RequestAccountLoginPacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.console_id = reader.decode_int()?;
        self.acc_name = reader.decode_utf8_string()?;
        self.password = reader.decode_utf8_string()?;
        Ok(ReadPacketResult::Success)
    }

    fn handle(mut packet: Pooled<Self>, conn: &Connection<GameLinkState>, state: &mut GameLinkState) -> anyhow::Result<()> {
        state.emit(GameLinkEvent::LoginRequested {
            connection: conn.id(),
            console_id: packet.console_id,
            acc_name: std::mem::take(&mut packet.acc_name),
            password: std::mem::take(&mut packet.password),
        });
        Ok(())
    }
}

/// 控制台命令
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleCommandLinePacket {
    pub console_id: i32,
    pub acc_name: String,
    pub password: String,
    pub command: String,
}

impl ConsoleCommandLinePacket {
    pub fn prepare(&mut self, console_id: i32, acc_name: &str, password: &str, command: &str) {
        self.console_id = console_id;
        self.acc_name.push_str(acc_name);
        self.password.push_str(password);
        self.command.push_str(command);
    }
}

impl Poolable for ConsoleCommandLinePacket {
    fn reset(&mut self) {
        self.console_id = 0;
        self.acc_name.clear();
        self.password.clear();
        self.command.clear();
    }
}

impl OutgoingPacket for ConsoleCommandLinePacket {
    const ID: u8 = 0x03;

    fn write(&self, writer: &mut PacketWriter<'_>) {
        writer.encode_int(self.console_id);
        writer.encode_utf8_string(&self.acc_name);
        writer.encode_utf8_string(&self.password);
        writer.encode_utf8_string(&self.command);
    }
}

impl IncomingPacket<GameLinkState> for ConsoleCommandLinePacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.console_id = reader.decode_int()?;
        self.acc_name = reader.decode_utf8_string()?;
        self.password = reader.decode_utf8_string()?;
        self.command = reader.decode_utf8_string()?;
        Ok(ReadPacketResult::Success)
    }

    fn handle(mut packet: Pooled<Self>, conn: &Connection<GameLinkState>, state: &mut GameLinkState) -> anyhow::Result<()> {
        state.emit(GameLinkEvent::Command {
            connection: conn.id(),
            console_id: packet.console_id,
            acc_name: std::mem::take(&mut packet.acc_name),
            password: std::mem::take(&mut packet.password),
            command: std::mem::take(&mut packet.command),
        });
        Ok(())
    }
}

/// 游戏服务器自报工作目录
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifyGameServerPacket {
    pub working_dir: String,
}

impl IdentifyGameServerPacket {
    pub fn prepare(&mut self, working_dir: &str) {
        self.working_dir.push_str(working_dir);
    }
}

impl Poolable for IdentifyGameServerPacket {
    fn reset(&mut self) {
        self.working_dir.clear();
    }
}

impl OutgoingPacket for IdentifyGameServerPacket {
    const ID: u8 = 0x01;

    fn write(&self, writer: &mut PacketWriter<'_>) {
        writer.encode_utf8_string(&self.working_dir);
    }
}

impl IncomingPacket<AuxLinkState> for IdentifyGameServerPacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.working_dir = reader.decode_utf8_string()?;
        Ok(ReadPacketResult::Success)
    }

    fn handle(mut packet: Pooled<Self>, conn: &Connection<AuxLinkState>, state: &mut AuxLinkState) -> anyhow::Result<()> {
        tracing::info!("🪪 游戏服务器已识别: {} ({})", packet.working_dir, conn.id());
        state.set_identified(&packet.working_dir);
        state.emit(AuxLinkEvent::Identified {
            connection: conn.id(),
            working_dir: std::mem::take(&mut packet.working_dir),
        });
        Ok(())
    }
}

/// 一行日志
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStringPacket {
    pub line: String,
}

impl LogStringPacket {
    pub fn prepare(&mut self, line: &str) {
        self.line.push_str(line);
    }
}

impl Poolable for LogStringPacket {
    fn reset(&mut self) {
        self.line.clear();
    }
}

impl OutgoingPacket for LogStringPacket {
    const ID: u8 = 0x02;

    fn write(&self, writer: &mut PacketWriter<'_>) {
        writer.encode_utf8_string(&self.line);
    }
}

impl IncomingPacket<AuxLinkState> for LogStringPacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.line = reader.decode_utf8_string()?;
        Ok(ReadPacketResult::Success)
    }

    /// 数据包本身随事件交给应用层，应用层丢弃事件时才归还到池中
    fn handle(packet: Pooled<Self>, conn: &Connection<AuxLinkState>, state: &mut AuxLinkState) -> anyhow::Result<()> {
        state.emit(AuxLinkEvent::Log {
            connection: conn.id(),
            packet,
        });
        Ok(())
    }
}

/// 控制台登录结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyAccountLoginPacket {
    pub console_id: i32,
    pub acc_name: String,
    pub success: bool,
}

impl ReplyAccountLoginPacket {
    pub fn prepare(&mut self, console_id: i32, acc_name: &str, success: bool) {
        self.console_id = console_id;
        self.acc_name.push_str(acc_name);
        self.success = success;
    }
}

impl Poolable for ReplyAccountLoginPacket {
    fn reset(&mut self) {
        self.console_id = 0;
        self.acc_name.clear();
        self.success = false;
    }
}

impl OutgoingPacket for ReplyAccountLoginPacket {
    const ID: u8 = 0x03;

    fn write(&self, writer: &mut PacketWriter<'_>) {
        writer.encode_int(self.console_id);
        writer.encode_utf8_string(&self.acc_name);
        writer.encode_bool(self.success);
    }
}

impl IncomingPacket<AuxLinkState> for ReplyAccountLoginPacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.console_id = reader.decode_int()?;
        self.acc_name = reader.decode_utf8_string()?;
        self.success = reader.decode_bool()?;
        Ok(ReadPacketResult::Success)
    }

    fn handle(mut packet: Pooled<Self>, conn: &Connection<AuxLinkState>, state: &mut AuxLinkState) -> anyhow::Result<()> {
        state.emit(AuxLinkEvent::LoginReplied {
            connection: conn.id(),
            console_id: packet.console_id,
            acc_name: std::mem::take(&mut packet.acc_name),
            success: packet.success,
        });
        Ok(())
    }
}

/// 游戏服务器启动完成
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupFinishedPacket;

impl Poolable for StartupFinishedPacket {
    fn reset(&mut self) {}
}

impl OutgoingPacket for StartupFinishedPacket {
    const ID: u8 = 0x04;

    fn write(&self, _writer: &mut PacketWriter<'_>) {}
}

impl IncomingPacket<AuxLinkState> for StartupFinishedPacket {
    fn read(&mut self, _reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        Ok(ReadPacketResult::Success)
    }

    fn handle(_packet: Pooled<Self>, conn: &Connection<AuxLinkState>, state: &mut AuxLinkState) -> anyhow::Result<()> {
        tracing::info!("✅ 游戏服务器启动完成 ({})", conn.id());
        state.emit(AuxLinkEvent::StartupFinished { connection: conn.id() });
        Ok(())
    }
}

/// 写到指定控制台的一行输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleWriteLinePacket {
    pub console_id: i32,
    pub line: String,
}

impl ConsoleWriteLinePacket {
    pub fn prepare(&mut self, console_id: i32, line: &str) {
        self.console_id = console_id;
        self.line.push_str(line);
    }
}

impl Poolable for ConsoleWriteLinePacket {
    fn reset(&mut self) {
        self.console_id = 0;
        self.line.clear();
    }
}

impl OutgoingPacket for ConsoleWriteLinePacket {
    const ID: u8 = 0x05;

    fn write(&self, writer: &mut PacketWriter<'_>) {
        writer.encode_int(self.console_id);
        writer.encode_utf8_string(&self.line);
    }
}

impl IncomingPacket<AuxLinkState> for ConsoleWriteLinePacket {
    fn read(&mut self, reader: &mut PacketReader<'_>) -> Result<ReadPacketResult, DecodeError> {
        self.console_id = reader.decode_int()?;
        self.line = reader.decode_utf8_string()?;
        Ok(ReadPacketResult::Success)
    }

    fn handle(mut packet: Pooled<Self>, conn: &Connection<AuxLinkState>, state: &mut AuxLinkState) -> anyhow::Result<()> {
        state.emit(AuxLinkEvent::ConsoleLine {
            connection: conn.id(),
            console_id: packet.console_id,
            line: std::mem::take(&mut packet.line),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketGroup;

    fn body<P: OutgoingPacket>(packet: &P) -> Vec<u8> {
        let mut group = PacketGroup::new();
        group.add(packet);
        group.as_bytes().to_vec()
    }

    #[test]
    fn test_login_request_wire_format() {
        let mut packet = RequestAccountLoginPacket::default();
        packet.prepare(7, "consoleA", "pw");
        let bytes = body(&packet);

        let mut expected = vec![0x02, 0, 0, 0, 7, 0, 0, 0, 8];
        expected.extend_from_slice(b"consoleA");
        expected.extend_from_slice(&[0, 0, 0, 2]);
        expected.extend_from_slice(b"pw");
        assert_eq!(bytes, expected);

        let mut decoded = RequestAccountLoginPacket::default();
        let mut reader = PacketReader::new(&bytes[1..]);
        let result = IncomingPacket::<GameLinkState>::read(&mut decoded, &mut reader).unwrap();
        assert_eq!(result, ReadPacketResult::Success);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_command_with_empty_and_long_strings() {
        let long = "x".repeat(10_000);
        let mut packet = ConsoleCommandLinePacket::default();
        packet.prepare(-1, "", &long, "resync");
        let bytes = body(&packet);

        let mut decoded = ConsoleCommandLinePacket::default();
        let mut reader = PacketReader::new(&bytes[1..]);
        IncomingPacket::<GameLinkState>::read(&mut decoded, &mut reader).unwrap();
        assert_eq!(decoded, packet);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_reply_truncated_is_incomplete() {
        let mut packet = ReplyAccountLoginPacket::default();
        packet.prepare(3, "admin", true);
        let bytes = body(&packet);

        let mut decoded = ReplyAccountLoginPacket::default();
        let mut reader = PacketReader::new(&bytes[1..bytes.len() - 1]);
        let err = IncomingPacket::<AuxLinkState>::read(&mut decoded, &mut reader).unwrap_err();
        assert_eq!(err, DecodeError::Incomplete { needed: 1 });
    }

    #[test]
    fn test_reset_clears_fields() {
        let mut packet = ConsoleWriteLinePacket::default();
        packet.prepare(9, "hello");
        packet.reset();
        assert_eq!(packet, ConsoleWriteLinePacket::default());
        assert_eq!(body(&StartupFinishedPacket), vec![0x04]);
    }
}
