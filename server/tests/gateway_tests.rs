//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! End-to-end gateway scenarios over loopback sockets

use futures::StreamExt;
use icsgate_protocol::{
    BufferPool, ChallengeToken, Frame, FrameReader, FrameWriter, IcsTimestamp, MessageType,
};
use icsgate_server::{CommandStatus, Gateway, GatewayConfig, MemoryPersistence};
use icsgate_service::transport::{FrameSink, FrameStream, TcpSink, tcp_transport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{Duration, sleep, timeout};

const CENTER: &str = r#"
    [server]
    mode = "center"
    site_id = "ICS-HQ"
    terminal_tcp = "127.0.0.1:0"
    web = "127.0.0.1:0"
    site_link = "127.0.0.1:0"
    heartbeat_interval = 30

    [pool]
    chunk_size = 8192
    chunk_count = 256
"#;

struct Peer {
    frames: FrameStream,
    sink: TcpSink,
    pool: BufferPool,
    seq: u16,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        let pool = BufferPool::new(8192, 16);
        let stream = TcpStream::connect(addr).await.unwrap();
        let (frames, sink) = tcp_transport(stream, &pool);
        Self {
            frames,
            sink,
            pool,
            seq: 0,
        }
    }

    async fn send(&mut self, kind: MessageType, build: impl FnOnce(&mut FrameWriter)) -> u16 {
        self.seq += 1;
        let mut writer = FrameWriter::request(&self.pool, kind).unwrap();
        build(&mut writer);
        self.sink.send_frame(&writer.finish(self.seq)).await.unwrap();
        self.seq
    }

    async fn recv(&mut self) -> Frame {
        timeout(Duration::from_secs(5), self.frames.next())
            .await
            .expect("no frame in time")
            .expect("stream ended")
            .unwrap()
    }

    /// True once the gateway has closed this peer
    async fn closed(&mut self) -> bool {
        timeout(Duration::from_secs(10), async {
            while let Some(Ok(_)) = self.frames.next().await {}
        })
        .await
        .is_ok()
    }

    async fn login(&mut self, device: &str, password: &str) -> (String, u16) {
        let seq = self
            .send(MessageType::TerminalAuth, |w| {
                w.put_short_str(device).unwrap();
                w.put_short_str(password).unwrap();
            })
            .await;
        let reply = self.recv().await;
        assert!(reply.is_ack());
        assert_eq!(reply.kind(), Some(MessageType::TerminalAuth));
        assert_eq!(reply.header().ack_seq, seq);
        let mut r = reply.reader();
        let status = r.get_short_str().unwrap();
        let heartbeat = r.get_u16().unwrap();
        r.assert_empty().unwrap();
        (status, heartbeat)
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn center(db: &Arc<MemoryPersistence>) -> Gateway {
    let config = GatewayConfig::from_toml_str(CENTER).unwrap();
    Gateway::start(config, db.clone()).await.unwrap()
}

fn business(w: &mut FrameWriter, seq: u32) {
    w.put_u32(seq).unwrap();
    w.put_timestamp(&IcsTimestamp::now()).unwrap();
    w.put_u16(0x0011).unwrap();
    w.put_u32(42_000).unwrap();
    w.put_u32(12_000).unwrap();
    w.put_u32(30_000).unwrap();
    w.put_short_str("CARD-7").unwrap();
    w.put_short_str("AB-123").unwrap();
}

fn web_status(frame: &Frame) -> (u32, String) {
    let mut r = frame.reader();
    let command = r.get_u32().unwrap();
    let status = r.get_short_str().unwrap();
    r.assert_empty().unwrap();
    (command, status)
}

#[tokio::test]
async fn test_terminal_auth_scenario() {
    let db = Arc::new(MemoryPersistence::new().with_device("GW001", "secret"));
    let gateway = center(&db).await;
    let mut terminal = Peer::connect(gateway.bound().terminal_tcp).await;

    assert_eq!(terminal.login("GW001", "secret").await, ("ok".to_string(), 30));
    assert_eq!(terminal.login("GW001", "secret").await, ("ok".to_string(), 30));
    assert_eq!(db.call_count("authenticate_device"), 1);
    assert_eq!(db.call_count("record_online"), 1);
    assert_eq!(gateway.context().terminals().len(), 1);

    assert_eq!(terminal.login("GW002", "secret").await.0, "failed");
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bad_credentials_allow_retry() {
    let db = Arc::new(MemoryPersistence::new().with_device("GW001", "secret"));
    let gateway = center(&db).await;
    let mut terminal = Peer::connect(gateway.bound().terminal_tcp).await;

    assert_eq!(terminal.login("GW001", "wrong").await.0, "failed");
    assert!(gateway.context().terminals().is_empty());
    assert_eq!(terminal.login("GW001", "secret").await.0, "ok");
    assert!(db.is_online("GW001"));
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_report_before_auth_closes() {
    let db = Arc::new(MemoryPersistence::new());
    let gateway = center(&db).await;
    let mut terminal = Peer::connect(gateway.bound().terminal_tcp).await;

    terminal.send(MessageType::Heartbeat, |_| {}).await;
    assert!(terminal.closed().await);
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_business_report_is_idempotent() {
    let db = Arc::new(MemoryPersistence::new().with_device("GW001", "secret"));
    let gateway = center(&db).await;
    let mut terminal = Peer::connect(gateway.bound().terminal_tcp).await;
    terminal.login("GW001", "secret").await;

    terminal
        .send(MessageType::BusinessReport, |w| business(w, 77))
        .await;
    let first = terminal.recv().await;
    assert_eq!(FrameReader::new(first.body()).get_u32().unwrap(), 77);

    terminal
        .send(MessageType::BusinessReport, |w| business(w, 77))
        .await;
    let second = terminal.recv().await;
    assert!(second.is_ack());
    assert!(second.body().is_empty());

    assert_eq!(db.call_count("record_business"), 1);
    let rows = db.business_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "GW001");
    assert_eq!(rows[0].1.net, 30_000);
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_clock_sync_echoes_client_time() {
    let db = Arc::new(MemoryPersistence::new().with_device("GW001", "secret"));
    let gateway = center(&db).await;
    let mut terminal = Peer::connect(gateway.bound().terminal_tcp).await;
    terminal.login("GW001", "secret").await;

    let sent = IcsTimestamp::now();
    terminal
        .send(MessageType::ClockSync, |w| w.put_timestamp(&sent).unwrap())
        .await;
    let reply = terminal.recv().await;
    let mut r = reply.reader();
    assert_eq!(r.get_timestamp().unwrap(), sent);
    r.get_timestamp().unwrap();
    r.get_timestamp().unwrap();
    r.assert_empty().unwrap();
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_login_replaces_session() {
    let db = Arc::new(MemoryPersistence::new().with_device("GW001", "secret"));
    let gateway = center(&db).await;
    let mut first = Peer::connect(gateway.bound().terminal_tcp).await;
    let mut second = Peer::connect(gateway.bound().terminal_tcp).await;

    first.login("GW001", "secret").await;
    second.login("GW001", "secret").await;
    assert!(first.closed().await);

    assert_eq!(gateway.context().terminals().len(), 1);
    assert!(db.is_online("GW001"));
    assert_eq!(db.call_count("record_offline"), 0);

    second.send(MessageType::Heartbeat, |_| {}).await;
    assert!(second.recv().await.is_ack());
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_upgrade_fragments_are_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firmware.bin");
    std::fs::write(&path, (0u8..10).collect::<Vec<_>>()).unwrap();
    let db = Arc::new(
        MemoryPersistence::new()
            .with_device("GW001", "secret")
            .with_file(7, path.clone()),
    );
    let gateway = center(&db).await;
    let mut terminal = Peer::connect(gateway.bound().terminal_tcp).await;
    terminal.login("GW001", "secret").await;

    let fragment = |offset: u32, length: u16| {
        move |w: &mut FrameWriter| {
            w.put_u32(7).unwrap();
            w.put_u32(offset).unwrap();
            w.put_u16(length).unwrap();
        }
    };

    terminal
        .send(MessageType::UpgradeFragment, fragment(4, 100))
        .await;
    let reply = terminal.recv().await;
    let mut r = reply.reader();
    assert_eq!(r.get_u32().unwrap(), 7);
    assert_eq!(r.get_u32().unwrap(), 4);
    assert_eq!(r.get_long_bytes().unwrap(), &[4, 5, 6, 7, 8, 9]);
    r.assert_empty().unwrap();

    // Out of bounds: no reply, the connection survives.
    terminal
        .send(MessageType::UpgradeFragment, fragment(11, 1))
        .await;
    terminal.send(MessageType::Heartbeat, |_| {}).await;
    let next = terminal.recv().await;
    assert_eq!(next.kind(), Some(MessageType::Heartbeat));
    assert!(db.upgrade_states().is_empty());
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_web_forward_to_terminal() {
    let db = Arc::new(MemoryPersistence::new().with_device("GW001", "secret"));
    let gateway = center(&db).await;
    let mut terminal = Peer::connect(gateway.bound().terminal_tcp).await;
    terminal.login("GW001", "secret").await;
    let mut web = Peer::connect(gateway.bound().web.unwrap()).await;

    let query = [1u8, 0x10, 0x00];
    web.send(MessageType::WebForwardToTerminal, |w| {
        w.put_u32(9).unwrap();
        w.put_short_str("GW001").unwrap();
        w.put_u16(MessageType::ParamQuery.as_u16()).unwrap();
        w.put_long_bytes(&query).unwrap();
    })
    .await;
    assert_eq!(web_status(&web.recv().await), (9, "ok".to_string()));

    let forwarded = terminal.recv().await;
    assert!(!forwarded.is_ack());
    assert_eq!(forwarded.kind(), Some(MessageType::ParamQuery));
    assert_eq!(forwarded.body(), &query);
    assert_eq!(db.command_status(9), Some(CommandStatus::Delivered));

    web.send(MessageType::WebForwardToTerminal, |w| {
        w.put_u32(10).unwrap();
        w.put_short_str("GW404").unwrap();
        w.put_u16(MessageType::ParamQuery.as_u16()).unwrap();
        w.put_long_bytes(&query).unwrap();
    })
    .await;
    assert_eq!(web_status(&web.recv().await), (10, "failed".to_string()));
    assert_eq!(db.command_status(10), Some(CommandStatus::Failed));
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_web_unknown_type_closes() {
    let db = Arc::new(MemoryPersistence::new());
    let gateway = center(&db).await;
    let mut web = Peer::connect(gateway.bound().web.unwrap()).await;

    web.send(MessageType::Heartbeat, |_| {}).await;
    assert!(web.closed().await);
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_proxy_relays_to_center() {
    let center_db = Arc::new(
        MemoryPersistence::new()
            .with_translation("PROXY-1", "T1", "LOCAL-1"),
    );
    let center = center(&center_db).await;
    let link = center.bound().site_link.unwrap();

    let proxy_config = GatewayConfig::from_toml_str(&format!(
        r#"
        [server]
        mode = "proxy"
        site_id = "PROXY-1"
        terminal_tcp = "127.0.0.1:0"
        center = "{link}"
        heartbeat_interval = 30
        "#
    ))
    .unwrap();
    let proxy_db = Arc::new(
        MemoryPersistence::new()
            .with_device("T1", "pw")
            .with_device("T2", "pw"),
    );
    let proxy = Gateway::start(proxy_config, proxy_db.clone()).await.unwrap();

    eventually(|| proxy.context().center_link().is_some()).await;
    eventually(|| center_db.is_site_online("PROXY-1")).await;

    let mut t1 = Peer::connect(proxy.bound().terminal_tcp).await;
    assert_eq!(t1.login("T1", "pw").await.0, "ok");
    eventually(|| center_db.is_online("LOCAL-1")).await;

    t1.send(MessageType::BusinessReport, |w| business(w, 5)).await;
    t1.recv().await;
    eventually(|| center_db.business_rows().len() == 1).await;
    assert_eq!(center_db.business_rows()[0].0, "LOCAL-1");
    assert_eq!(proxy_db.business_rows().len(), 1);

    // T2 has no translation at the center: dropped there, link unaffected.
    let mut t2 = Peer::connect(proxy.bound().terminal_tcp).await;
    t2.login("T2", "pw").await;
    t2.send(MessageType::BusinessReport, |w| business(w, 6)).await;
    t2.recv().await;
    t1.send(MessageType::BusinessReport, |w| business(w, 7)).await;
    t1.recv().await;
    eventually(|| center_db.business_rows().len() == 2).await;
    assert!(center_db.business_rows().iter().all(|(device, _)| device == "LOCAL-1"));
    assert_eq!(center.context().sites().len(), 1);

    // Center to remote terminal through the web tier.
    let mut web = Peer::connect(center.bound().web.unwrap()).await;
    web.send(MessageType::WebForwardToRemoteTerminal, |w| {
        w.put_u32(31).unwrap();
        w.put_short_str("PROXY-1").unwrap();
        w.put_short_str("LOCAL-1").unwrap();
        w.put_u16(MessageType::ParamQuery.as_u16()).unwrap();
        w.put_long_bytes(&[1, 0x10, 0x00]).unwrap();
    })
    .await;
    assert_eq!(web_status(&web.recv().await), (31, "ok".to_string()));
    let forwarded = t1.recv().await;
    assert_eq!(forwarded.kind(), Some(MessageType::ParamQuery));
    eventually(|| center_db.command_status(31) == Some(CommandStatus::Delivered)).await;

    proxy.shutdown().await.unwrap();
    center.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_site_handshake_with_raw_peer() {
    let db = Arc::new(MemoryPersistence::new());
    let gateway = center(&db).await;
    let mut peer = Peer::connect(gateway.bound().site_link.unwrap()).await;

    let challenge = peer.recv().await;
    assert_eq!(challenge.kind(), Some(MessageType::SiteChallenge));
    let mut r = challenge.reader();
    assert_eq!(r.get_short_str().unwrap(), "ICS-HQ");
    let token = ChallengeToken {
        secs: r.get_u32().unwrap(),
        millis: r.get_u16().unwrap(),
    };

    peer.send(MessageType::SiteChallengeEcho, |w| {
        w.put_u32(token.secs).unwrap();
        w.put_u16(token.millis).unwrap();
    })
    .await;
    let ours = ChallengeToken::now();
    peer.send(MessageType::SiteChallenge, |w| {
        w.put_short_str("PROXY-9").unwrap();
        w.put_u32(ours.secs).unwrap();
        w.put_u16(ours.millis).unwrap();
    })
    .await;

    let echo = peer.recv().await;
    assert_eq!(echo.kind(), Some(MessageType::SiteChallengeEcho));
    let mut r = echo.reader();
    assert_eq!(r.get_u32().unwrap(), ours.secs);
    assert_eq!(r.get_u16().unwrap(), ours.millis);

    eventually(|| db.is_site_online("PROXY-9")).await;
    assert!(gateway.context().sites().find("PROXY-9").is_some());

    drop(peer);
    eventually(|| !db.is_site_online("PROXY-9")).await;
    assert!(gateway.context().sites().is_empty());
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_site_link_rejects_traffic_before_handshake() {
    let db = Arc::new(MemoryPersistence::new());
    let gateway = center(&db).await;
    let mut peer = Peer::connect(gateway.bound().site_link.unwrap()).await;

    peer.send(MessageType::SiteHeartbeat, |_| {}).await;
    assert!(peer.closed().await);
    assert!(gateway.context().sites().is_empty());
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_silent_site_link_times_out() {
    let db = Arc::new(MemoryPersistence::new());
    let gateway = center(&db).await;
    let mut peer = Peer::connect(gateway.bound().site_link.unwrap()).await;

    assert_eq!(peer.recv().await.kind(), Some(MessageType::SiteChallenge));
    assert!(peer.closed().await);
    assert!(!db.is_site_online("PROXY-9"));
    gateway.shutdown().await.unwrap();
}

fn site_command(w: &mut FrameWriter, command: u32, enterprise: &str) {
    w.put_u32(command).unwrap();
    w.put_short_str(enterprise).unwrap();
}

/// A proxy accepting site links and a center that knows its address, both
/// with a one second heartbeat
async fn dialable_pair() -> (Gateway, Arc<MemoryPersistence>, Gateway) {
    let proxy_config = GatewayConfig::from_toml_str(
        r#"
        [server]
        mode = "proxy"
        site_id = "PROXY-1"
        terminal_tcp = "127.0.0.1:0"
        site_link = "127.0.0.1:0"
        heartbeat_interval = 1
        "#,
    )
    .unwrap();
    let proxy = Gateway::start(proxy_config, Arc::new(MemoryPersistence::new()))
        .await
        .unwrap();

    let center_db = Arc::new(
        MemoryPersistence::new().with_site("PROXY-1", proxy.bound().site_link.unwrap()),
    );
    let fast = CENTER.replace("heartbeat_interval = 30", "heartbeat_interval = 1");
    let config = GatewayConfig::from_toml_str(&fast).unwrap();
    let center = Gateway::start(config, center_db.clone()).await.unwrap();
    (center, center_db, proxy)
}

async fn web_command(
    gateway: &Gateway,
    kind: MessageType,
    command: u32,
    enterprise: &str,
) -> (u32, String) {
    let mut web = Peer::connect(gateway.bound().web.unwrap()).await;
    web.send(kind, |w| site_command(w, command, enterprise)).await;
    web_status(&web.recv().await)
}

#[tokio::test]
async fn test_web_opened_site_link_stays_up() {
    let (center, center_db, proxy) = dialable_pair().await;

    let status = web_command(&center, MessageType::WebConnectRemote, 1, "PROXY-1").await;
    assert_eq!(status, (1, "ok".to_string()));
    eventually(|| center.context().sites().len() == 1 && proxy.context().sites().len() == 1).await;
    eventually(|| center_db.is_site_online("PROXY-1")).await;
    assert_eq!(center_db.command_status(1), Some(CommandStatus::Delivered));

    // Several idle windows of the proxy's supervision (2 x 1s).
    sleep(Duration::from_secs(5)).await;
    assert_eq!(center.context().sites().len(), 1);
    assert_eq!(proxy.context().sites().len(), 1);
    assert!(center_db.is_site_online("PROXY-1"));

    let again = web_command(&center, MessageType::WebConnectRemote, 2, "PROXY-1").await;
    assert_eq!(again, (2, "ok".to_string()));
    assert_eq!(center_db.command_status(2), Some(CommandStatus::Delivered));
    assert_eq!(center.context().sites().len(), 1);

    center.shutdown().await.unwrap();
    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_web_disconnect_closes_site_link() {
    let (center, center_db, proxy) = dialable_pair().await;

    web_command(&center, MessageType::WebConnectRemote, 1, "PROXY-1").await;
    eventually(|| center_db.is_site_online("PROXY-1")).await;

    let status = web_command(&center, MessageType::WebDisconnectRemote, 3, "PROXY-1").await;
    assert_eq!(status, (3, "ok".to_string()));
    assert_eq!(center_db.command_status(3), Some(CommandStatus::Delivered));
    eventually(|| center.context().sites().is_empty() && !center_db.is_site_online("PROXY-1")).await;
    eventually(|| proxy.context().sites().is_empty()).await;

    center.shutdown().await.unwrap();
    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_web_site_commands_for_unknown_site_fail() {
    let db = Arc::new(MemoryPersistence::new());
    let gateway = center(&db).await;

    let connect = web_command(&gateway, MessageType::WebConnectRemote, 4, "NOWHERE").await;
    assert_eq!(connect, (4, "failed".to_string()));
    assert_eq!(db.command_status(4), Some(CommandStatus::Failed));

    let disconnect = web_command(&gateway, MessageType::WebDisconnectRemote, 5, "NOWHERE").await;
    assert_eq!(disconnect, (5, "failed".to_string()));
    assert_eq!(db.command_status(5), Some(CommandStatus::Failed));
    assert!(gateway.context().sites().is_empty());

    gateway.shutdown().await.unwrap();
}
