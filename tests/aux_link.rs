/// 辅助链路集成测试
///
/// 测试目标：
/// 1. 并发发送时每个数据包组在线上保持相邻
/// 2. 并发关闭时 on_close 只调用一次，第一个原因生效
/// 3. 日志转发开关与关闭后的发送行为
/// 4. 超过解码上限的字符串在发送端被拒绝，链路保持可用
mod common;

use std::collections::HashSet;

use common::*;
use packetlink::auxiliary::{aux_link_protocol, AuxLinkEvent, AuxLinkState, GameLinkEvent, SetLogStreamingPacket};
use packetlink::{
    CloseReason, ConnectionConfig, Connector, Core, Endpoint, PacketReader, Pools, TransportError,
    DEFAULT_MAX_STRING_LENGTH,
};
use tokio::io::AsyncWriteExt;

/// 解析游戏服务器发出的字节流：身份数据包之后全是控制台输出
fn parse_console_lines(bytes: &[u8]) -> Vec<(i32, String)> {
    let mut reader = PacketReader::new(bytes);
    assert_eq!(reader.decode_byte().expect("缺少身份数据包"), 0x01);
    assert_eq!(reader.decode_utf8_string().expect("身份数据包不完整"), "/srv/game");

    let mut lines = Vec::new();
    while !reader.is_empty() {
        assert_eq!(reader.decode_byte().expect("数据包 id"), 0x05);
        let console_id = reader.decode_int().expect("console_id");
        let line = reader.decode_utf8_string().expect("line");
        lines.push((console_id, line));
    }
    lines
}

#[tokio::test]
async fn test_groups_stay_adjacent_under_concurrent_sends() -> Result<(), TransportError> {
    println!("🧪 测试并发发送时数据包组保持相邻");

    const TASKS: i32 = 8;
    const ROUNDS: usize = 20;
    const GROUP: usize = 4;

    let h = game_harness(64 * 1024, ConnectionConfig::default()).await;
    let mut senders = Vec::new();
    for task in 0..TASKS {
        let link = h.link.clone();
        senders.push(tokio::spawn(async move {
            for round in 0..ROUNDS {
                let lines: Vec<String> = (0..GROUP).map(|i| format!("{}-{}", round, i)).collect();
                link.write_console_lines(task, lines.iter().map(String::as_str))?;
                link.write_console_line(999, "single")?;
                tokio::task::yield_now().await;
            }
            Ok::<(), TransportError>(())
        }));
    }
    for sender in senders {
        sender.await.expect("发送任务失败")?;
    }

    h.conn.close(CloseReason::Requested("done".into()));
    let received = tokio::time::timeout(WAIT, h.received)
        .await
        .expect("读取未结束")
        .expect("读取任务失败");
    let lines = parse_console_lines(&received);
    assert_eq!(lines.len(), TASKS as usize * ROUNDS * (GROUP + 1));

    let mut groups = HashSet::new();
    let mut index = 0;
    while index < lines.len() {
        let (console_id, line) = &lines[index];
        if *console_id == 999 {
            assert_eq!(line, "single");
            index += 1;
            continue;
        }
        let round = line.split('-').next().expect("轮次").to_string();
        for i in 0..GROUP {
            let (id, text) = &lines[index + i];
            assert_eq!(id, console_id, "组被其他数据包打断");
            assert_eq!(text, &format!("{}-{}", round, i));
        }
        assert!(groups.insert((*console_id, round)));
        index += GROUP;
    }
    assert_eq!(groups.len(), TASKS as usize * ROUNDS);

    println!("✅ 数据包组相邻测试通过");
    Ok(())
}

#[tokio::test]
async fn test_on_close_runs_once_under_concurrent_closes() -> Result<(), TransportError> {
    println!("🧪 测试并发关闭");

    let mut h = game_harness(64 * 1024, ConnectionConfig::default()).await;
    let mut closers = Vec::new();
    for i in 0..16 {
        let conn = h.conn.clone();
        closers.push(tokio::spawn(async move {
            conn.close(CloseReason::Requested(format!("closer-{}", i)))
        }));
    }
    h.peer.shutdown().await?;

    let mut winners = 0;
    for closer in closers {
        if closer.await.expect("关闭任务失败") {
            winners += 1;
        }
    }
    assert!(winners <= 1, "最多一个关闭调用生效");

    let reason = match next_event(&mut h.events).await {
        GameLinkEvent::Disconnected { reason, .. } => reason,
        other => panic!("应当断开连接: {:?}", other),
    };
    tokio::time::timeout(WAIT, h.conn.closed()).await.expect("连接未关闭");
    assert_eq!(h.conn.close_reason(), Some(reason.clone()));
    if winners == 1 {
        assert!(reason.to_string().starts_with("closer-"));
    } else {
        assert_eq!(reason, CloseReason::ConnectionLost);
    }

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(h.events.try_recv().is_err(), "on_close 只能调用一次");
    assert_eq!(h.core.connection_count(), 0);

    println!("✅ 并发关闭测试通过");
    Ok(())
}

#[tokio::test]
async fn test_log_streaming_switch() -> Result<(), TransportError> {
    println!("🧪 测试日志转发开关");

    let mut h = game_harness(64 * 1024, ConnectionConfig::default()).await;
    assert!(!h.link.is_log_streaming());
    assert!(!h.link.send_log_line("before")?);

    h.peer.write_all(&encode(&SetLogStreamingPacket { enabled: true })).await?;
    match next_event(&mut h.events).await {
        GameLinkEvent::LogStreaming { enabled, .. } => assert!(enabled),
        other => panic!("意外的事件: {:?}", other),
    }
    assert!(h.link.is_log_streaming());
    assert!(h.link.send_log_line("after")?);

    h.conn.close(CloseReason::Requested("done".into()));
    let received = tokio::time::timeout(WAIT, h.received)
        .await
        .expect("读取未结束")
        .expect("读取任务失败");
    let mut reader = PacketReader::new(&received);
    assert_eq!(reader.decode_byte().expect("id"), 0x01);
    reader.decode_utf8_string().expect("working_dir");
    assert_eq!(reader.decode_byte().expect("id"), 0x02);
    assert_eq!(reader.decode_utf8_string().expect("line"), "after");
    assert!(reader.is_empty());

    println!("✅ 日志转发开关测试通过");
    Ok(())
}

#[tokio::test]
async fn test_send_after_close_fails() -> Result<(), TransportError> {
    println!("🧪 测试关闭后发送");

    let h = game_harness(64 * 1024, ConnectionConfig::default()).await;
    assert!(h.conn.close(CloseReason::Requested("Login timed out.".into())));
    assert!(!h.conn.close(CloseReason::Shutdown), "第二次关闭不应生效");

    match h.link.write_console_line(1, "late") {
        Err(TransportError::Closed { connection }) => assert_eq!(connection, h.conn.id()),
        other => panic!("关闭后发送应当失败: {:?}", other),
    }
    tokio::time::timeout(WAIT, h.conn.closed()).await.expect("连接未关闭");
    assert_eq!(
        h.conn.close_reason().map(|reason| reason.to_string()),
        Some("Login timed out.".to_string())
    );

    println!("✅ 关闭后发送测试通过");
    Ok(())
}

#[tokio::test]
async fn test_oversized_log_line_is_refused() -> Result<(), TransportError> {
    println!("🧪 测试超长日志行");

    let (game_core, mut game_events) = game_core(ConnectionConfig::default());
    let aux_pools = Pools::default();
    let (aux_tx, mut aux_events) = tokio::sync::mpsc::unbounded_channel();
    let aux_core = Core::builder(aux_link_protocol(&aux_pools), move || AuxLinkState::new(aux_tx.clone()))
        .with_pools(aux_pools)
        .build()?;

    let (game_io, aux_io) = tokio::io::duplex(256 * 1024);
    Connector::new(game_core).connect_with(game_io, Endpoint::Memory("game".into()))?;
    Connector::new(aux_core).connect_with(aux_io, Endpoint::Memory("aux".into()))?;

    let game = match next_event(&mut game_events).await {
        GameLinkEvent::Connected(link) => link,
        other => panic!("第一个事件应当是 Connected: {:?}", other),
    };
    let aux = match next_event(&mut aux_events).await {
        AuxLinkEvent::Connected(link) => link,
        other => panic!("第一个事件应当是 Connected: {:?}", other),
    };
    aux.set_log_streaming(true)?;
    loop {
        if let GameLinkEvent::LogStreaming { enabled, .. } = next_event(&mut game_events).await {
            assert!(enabled);
            break;
        }
    }

    // 超出上限一个字节：发送端拒绝，连接不关闭
    let too_long = "x".repeat(DEFAULT_MAX_STRING_LENGTH + 1);
    match game.send_log_line(&too_long) {
        Err(err @ TransportError::Protocol { .. }) => {
            assert!(err.to_string().contains("exceeds limit"), "{}", err);
        }
        other => panic!("超长日志行应当被拒绝: {:?}", other),
    }
    assert!(game.connection().is_open());

    // 恰好等于上限的日志行完整到达
    let longest = "y".repeat(DEFAULT_MAX_STRING_LENGTH);
    assert!(game.send_log_line(&longest)?);
    loop {
        match next_event(&mut aux_events).await {
            AuxLinkEvent::Log { packet, .. } => {
                assert_eq!(packet.line.len(), DEFAULT_MAX_STRING_LENGTH);
                assert!(packet.line.bytes().all(|b| b == b'y'));
                break;
            }
            AuxLinkEvent::Disconnected { reason, .. } => panic!("辅助链路被关闭: {}", reason),
            _ => continue,
        }
    }
    assert!(aux.connection().is_open());

    println!("✅ 超长日志行测试通过");
    Ok(())
}
