//! 辅助链路两端的连接状态与应用层事件

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::packets::{
    ConsoleCommandLinePacket, ConsoleWriteLinePacket, IdentifyGameServerPacket, LogStringPacket,
    ReplyAccountLoginPacket, RequestAccountLoginPacket, SetLogStreamingPacket,
};
use crate::connection::Connection;
use crate::error::{CloseReason, TransportError};
use crate::packet::{FreePacketGroup, PacketGroup};
use crate::pool::Pooled;
use crate::state::ConnectionState;
use crate::ConnectionId;

/// 日志转发开关，由辅助服务器通过 [`SetLogStreamingPacket`] 控制
#[derive(Debug, Clone, Default)]
pub struct LogSwitch(Arc<AtomicBool>);

impl LogSwitch {
    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

/// 游戏服务器一侧收到的事件
#[derive(Debug)]
pub enum GameLinkEvent {
    /// 链路已建立，身份数据包已发出
    Connected(GameLink),
    LogStreaming {
        connection: ConnectionId,
        enabled: bool,
    },
    LoginRequested {
        connection: ConnectionId,
        console_id: i32,
        acc_name: String,
        password: String,
    },
    Command {
        connection: ConnectionId,
        console_id: i32,
        acc_name: String,
        password: String,
        command: String,
    },
    Disconnected {
        connection: ConnectionId,
        reason: CloseReason,
    },
}

/// 游戏服务器一侧的连接状态
pub struct GameLinkState {
    working_dir: String,
    log_switch: LogSwitch,
    events: mpsc::UnboundedSender<GameLinkEvent>,
    connection: Option<ConnectionId>,
}

impl GameLinkState {
    pub fn new(working_dir: impl Into<String>, events: mpsc::UnboundedSender<GameLinkEvent>) -> Self {
        Self {
            working_dir: working_dir.into(),
            log_switch: LogSwitch::default(),
            events,
            connection: None,
        }
    }

    pub(crate) fn log_switch(&self) -> &LogSwitch {
        &self.log_switch
    }

    pub(crate) fn emit(&self, event: GameLinkEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("📭 游戏服务器事件无人接收");
        }
    }
}

impl ConnectionState for GameLinkState {
    fn on_init(&mut self, conn: &Connection<Self>) {
        self.connection = Some(conn.id());

        let mut identify = conn.acquire::<IdentifyGameServerPacket>();
        identify.prepare(&self.working_dir);
        if let Err(e) = conn.send_single_packet(identify) {
            tracing::warn!("⚠️ 发送身份数据包失败 ({}): {}", conn.id(), e);
        }

        self.emit(GameLinkEvent::Connected(GameLink {
            conn: conn.clone(),
            log_switch: self.log_switch.clone(),
        }));
    }

    fn on_close(&mut self, reason: &CloseReason) {
        if let Some(connection) = self.connection {
            self.emit(GameLinkEvent::Disconnected {
                connection,
                reason: reason.clone(),
            });
        }
    }
}

/// 游戏服务器一侧的发送句柄
#[derive(Debug, Clone)]
pub struct GameLink {
    conn: Connection<GameLinkState>,
    log_switch: LogSwitch,
}

impl GameLink {
    pub fn connection(&self) -> &Connection<GameLinkState> {
        &self.conn
    }

    pub fn is_log_streaming(&self) -> bool {
        self.log_switch.is_enabled()
    }

    /// 转发一行日志；未开启转发时不发送并返回 `false`
    pub fn send_log_line(&self, line: &str) -> Result<bool, TransportError> {
        if !self.log_switch.is_enabled() {
            return Ok(false);
        }
        let mut packet = self.conn.acquire::<LogStringPacket>();
        packet.prepare(line);
        self.conn.send_single_packet(packet)?;
        Ok(true)
    }

    pub fn reply_account_login(&self, console_id: i32, acc_name: &str, success: bool) -> Result<(), TransportError> {
        let mut packet = self.conn.acquire::<ReplyAccountLoginPacket>();
        packet.prepare(console_id, acc_name, success);
        self.conn.send_single_packet(packet)
    }

    pub fn write_console_line(&self, console_id: i32, line: &str) -> Result<(), TransportError> {
        let mut packet = self.conn.acquire::<ConsoleWriteLinePacket>();
        packet.prepare(console_id, line);
        self.conn.send_single_packet(packet)
    }

    /// 多行输出作为一个组发送，在线上保持相邻
    pub fn write_console_lines<'a>(
        &self,
        console_id: i32,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), TransportError> {
        let mut group = PacketGroup::new();
        for line in lines {
            let mut packet = self.conn.acquire::<ConsoleWriteLinePacket>();
            packet.prepare(console_id, line);
            group.add_packet(packet);
        }
        self.conn.send_packet_group(group)
    }

    pub fn send_startup_finished(&self, group: &FreePacketGroup) -> Result<(), TransportError> {
        self.conn.send_free_group(group)
    }
}

/// 辅助服务器一侧收到的事件
#[derive(Debug)]
pub enum AuxLinkEvent {
    Connected(AuxLink),
    Identified {
        connection: ConnectionId,
        working_dir: String,
    },
    /// 数据包随事件一起交出，事件被丢弃时归还到池中
    Log {
        connection: ConnectionId,
        packet: Pooled<LogStringPacket>,
    },
    LoginReplied {
        connection: ConnectionId,
        console_id: i32,
        acc_name: String,
        success: bool,
    },
    StartupFinished {
        connection: ConnectionId,
    },
    ConsoleLine {
        connection: ConnectionId,
        console_id: i32,
        line: String,
    },
    Disconnected {
        connection: ConnectionId,
        reason: CloseReason,
    },
}

/// 辅助服务器一侧的连接状态
pub struct AuxLinkState {
    events: mpsc::UnboundedSender<AuxLinkEvent>,
    working_dir: Option<String>,
    connection: Option<ConnectionId>,
}

impl AuxLinkState {
    pub fn new(events: mpsc::UnboundedSender<AuxLinkEvent>) -> Self {
        Self {
            events,
            working_dir: None,
            connection: None,
        }
    }

    /// 游戏服务器报告的工作目录
    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    pub(crate) fn set_identified(&mut self, working_dir: &str) {
        self.working_dir = Some(working_dir.to_string());
    }

    pub(crate) fn emit(&self, event: AuxLinkEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("📭 辅助服务器事件无人接收");
        }
    }
}

impl ConnectionState for AuxLinkState {
    fn on_init(&mut self, conn: &Connection<Self>) {
        self.connection = Some(conn.id());
        self.emit(AuxLinkEvent::Connected(AuxLink { conn: conn.clone() }));
    }

    fn on_close(&mut self, reason: &CloseReason) {
        if let Some(connection) = self.connection {
            self.emit(AuxLinkEvent::Disconnected {
                connection,
                reason: reason.clone(),
            });
        }
    }
}

/// 辅助服务器一侧的发送句柄
#[derive(Debug, Clone)]
pub struct AuxLink {
    conn: Connection<AuxLinkState>,
}

impl AuxLink {
    pub fn connection(&self) -> &Connection<AuxLinkState> {
        &self.conn
    }

    pub fn set_log_streaming(&self, enabled: bool) -> Result<(), TransportError> {
        let mut packet = self.conn.acquire::<SetLogStreamingPacket>();
        packet.prepare(enabled);
        self.conn.send_single_packet(packet)
    }

    pub fn request_account_login(&self, console_id: i32, acc_name: &str, password: &str) -> Result<(), TransportError> {
        let mut packet = self.conn.acquire::<RequestAccountLoginPacket>();
        packet.prepare(console_id, acc_name, password);
        self.conn.send_single_packet(packet)
    }

    pub fn send_console_command(
        &self,
        console_id: i32,
        acc_name: &str,
        password: &str,
        command: &str,
    ) -> Result<(), TransportError> {
        let mut packet = self.conn.acquire::<ConsoleCommandLinePacket>();
        packet.prepare(console_id, acc_name, password, command);
        self.conn.send_single_packet(packet)
    }
}
