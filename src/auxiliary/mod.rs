//! 游戏服务器与辅助服务器之间的进程间链路
//!
//! 辅助服务器负责远程控制台：它转发控制台登录和命令，
//! 游戏服务器回复登录结果、控制台输出，并在开启时转发日志。

mod packets;
mod state;

pub use packets::{
    ConsoleCommandLinePacket, ConsoleWriteLinePacket, IdentifyGameServerPacket, LogStringPacket,
    ReplyAccountLoginPacket, RequestAccountLoginPacket, SetLogStreamingPacket, StartupFinishedPacket,
};
pub use state::{AuxLink, AuxLinkEvent, AuxLinkState, GameLink, GameLinkEvent, GameLinkState, LogSwitch};

use crate::packet::{FreePacketGroup, OutgoingPacket, PacketGroup};
use crate::pool::Pools;
use crate::protocol::PacketTable;

/// 游戏服务器一侧的入站协议
pub fn game_link_protocol(pools: &Pools) -> PacketTable<GameLinkState> {
    PacketTable::builder(pools)
        .register::<SetLogStreamingPacket>(SetLogStreamingPacket::ID)
        .register::<RequestAccountLoginPacket>(RequestAccountLoginPacket::ID)
        .register::<ConsoleCommandLinePacket>(ConsoleCommandLinePacket::ID)
        .build()
}

/// 辅助服务器一侧的入站协议
pub fn aux_link_protocol(pools: &Pools) -> PacketTable<AuxLinkState> {
    PacketTable::builder(pools)
        .register::<IdentifyGameServerPacket>(IdentifyGameServerPacket::ID)
        .register::<LogStringPacket>(LogStringPacket::ID)
        .register::<ReplyAccountLoginPacket>(ReplyAccountLoginPacket::ID)
        .register::<StartupFinishedPacket>(StartupFinishedPacket::ID)
        .register::<ConsoleWriteLinePacket>(ConsoleWriteLinePacket::ID)
        .build()
}

/// 启动完成通知，只编码一次，可发给任意多个连接
pub fn startup_finished_group(pools: &Pools) -> FreePacketGroup {
    PacketGroup::single(pools.acquire::<StartupFinishedPacket>()).free()
}
