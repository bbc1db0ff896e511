/// 辅助链路演示
///
/// 同一进程内启动辅助服务器（监听）与游戏服务器（连接），
/// 走一遍登录、控制台命令、日志转发和启动完成通知。
///
/// 运行：`RUST_LOG=packetlink=debug cargo run --example aux_link`
use packetlink::auxiliary::{
    aux_link_protocol, game_link_protocol, startup_finished_group, AuxLinkEvent, AuxLinkState, GameLinkEvent,
    GameLinkState,
};
use packetlink::config::parse_socket_addr;
use packetlink::{CloseReason, Connector, Core, Endpoint, Listener, Pools, TransportError};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), TransportError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("packetlink=info")))
        .init();

    println!("🚀 辅助链路演示");

    // 1. 辅助服务器
    let aux_pools = Pools::default();
    let (aux_tx, mut aux_events) = mpsc::unbounded_channel();
    let aux_core = Core::builder(aux_link_protocol(&aux_pools), move || AuxLinkState::new(aux_tx.clone()))
        .with_pools(aux_pools)
        .build()?;
    let listener = Listener::new(aux_core.clone());
    let addr = match listener.bind_tcp(parse_socket_addr("127.0.0.1:0")?)? {
        Endpoint::Tcp(addr) => addr,
        other => unreachable!("TCP 监听返回了 {}", other),
    };
    println!("✅ 辅助服务器监听: {}", addr);

    // 2. 游戏服务器
    let game_pools = Pools::default();
    let startup_finished = startup_finished_group(&game_pools);
    let (game_tx, mut game_events) = mpsc::unbounded_channel();
    let game_core = Core::builder(game_link_protocol(&game_pools), move || {
        GameLinkState::new("/srv/sphere", game_tx.clone())
    })
    .with_pools(game_pools)
    .build()?;
    Connector::new(game_core.clone()).connect_tcp(addr).await?;

    // 游戏服务器：响应登录与命令
    let game_task = tokio::spawn(async move {
        let mut link = None;
        while let Some(event) = game_events.recv().await {
            match event {
                GameLinkEvent::Connected(l) => {
                    println!("🎮 游戏服务器已连接: {}", l.connection().id());
                    link = Some(l);
                }
                GameLinkEvent::LogStreaming { enabled, .. } => {
                    println!("🎮 日志转发: {}", enabled);
                }
                GameLinkEvent::LoginRequested {
                    console_id,
                    acc_name,
                    password,
                    ..
                } => {
                    let Some(link) = &link else { continue };
                    let success = password == "secret";
                    link.reply_account_login(console_id, &acc_name, success)?;
                    link.send_log_line(&format!("console {} login: {}", console_id, acc_name))?;
                }
                GameLinkEvent::Command { console_id, command, .. } => {
                    let Some(link) = &link else { continue };
                    link.write_console_lines(console_id, [format!("> {}", command).as_str(), "players online: 0"])?;
                    link.send_startup_finished(&startup_finished)?;
                }
                GameLinkEvent::Disconnected { reason, .. } => {
                    println!("🎮 游戏服务器断开: {}", reason);
                    break;
                }
            }
        }
        Ok::<(), TransportError>(())
    });

    // 3. 辅助服务器：登录并发送命令
    while let Some(event) = aux_events.recv().await {
        match event {
            AuxLinkEvent::Connected(link) => {
                link.set_log_streaming(true)?;
                link.request_account_login(1, "admin", "secret")?;
                link.send_console_command(1, "admin", "secret", "status")?;
            }
            AuxLinkEvent::Identified { working_dir, .. } => println!("🛰️ 游戏服务器工作目录: {}", working_dir),
            AuxLinkEvent::LoginReplied { acc_name, success, .. } => {
                println!("🛰️ 登录 {}: {}", acc_name, if success { "成功" } else { "失败" })
            }
            AuxLinkEvent::Log { packet, .. } => println!("🛰️ [log] {}", packet.line),
            AuxLinkEvent::ConsoleLine { console_id, line, .. } => println!("🛰️ [console {}] {}", console_id, line),
            AuxLinkEvent::StartupFinished { .. } => {
                println!("🛰️ 游戏服务器启动完成");
                aux_core.shutdown(CloseReason::Shutdown);
            }
            AuxLinkEvent::Disconnected { reason, .. } => {
                println!("🛰️ 辅助链路断开: {}", reason);
                break;
            }
        }
    }

    if let Ok(result) = game_task.await {
        result?;
    }
    listener.unbind().await;
    println!("🎉 演示结束");
    Ok(())
}
