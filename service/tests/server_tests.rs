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

//! End-to-end tests for IcsServer over loopback sockets

use async_trait::async_trait;
use futures::StreamExt;
use icsgate_protocol::{BufferPool, Frame, FrameWriter, MessageType};
use icsgate_service::transport::{FrameSink, FrameStream, TcpSink, tcp_transport};
use icsgate_service::{
    GatewayError, HandlerFactory, IcsConnection, IcsServer, Result, Role, RoleHandler,
    ServerConfig,
};
use std::sync::Arc;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

/// Answers every request with its own body
struct Echo(Role);

#[async_trait]
impl RoleHandler for Echo {
    fn role(&self) -> Role {
        self.0
    }

    async fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>> {
        let mut reply = conn.response(frame)?;
        reply.put_raw(frame.body())?;
        Ok(Some(reply))
    }
}

/// Accepts only TerminalAuth before authentication
struct Gatekeeper;

#[async_trait]
impl RoleHandler for Gatekeeper {
    fn role(&self) -> Role {
        Role::Terminal
    }

    async fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>> {
        if frame.kind() == Some(MessageType::TerminalAuth) {
            conn.bind_identity("GW001");
            return Ok(Some(conn.response(frame)?));
        }
        if !conn.is_authenticated() {
            return Err(GatewayError::Unauthenticated {
                message_type: frame.message_type(),
            });
        }
        Ok(None)
    }
}

/// Reports the type of every request it receives
struct Collect(mpsc::UnboundedSender<u16>);

#[async_trait]
impl RoleHandler for Collect {
    fn role(&self) -> Role {
        Role::RemoteProxy
    }

    async fn handle(&mut self, _conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>> {
        let _ = self.0.send(frame.message_type());
        Ok(None)
    }
}

fn echo(role: Role) -> Arc<dyn HandlerFactory> {
    Arc::new(move |_: &IcsConnection| -> Box<dyn RoleHandler> { Box::new(Echo(role)) })
}

fn small_config() -> ServerConfig {
    ServerConfig::default().with_pool(icsgate_service::PoolConfig::new(512, 64))
}

async fn client(addr: std::net::SocketAddr, pool: &BufferPool) -> (FrameStream, TcpSink) {
    let stream = TcpStream::connect(addr).await.unwrap();
    tcp_transport(stream, pool)
}

fn heartbeat(pool: &BufferPool, seq: u16, payload: &[u8]) -> Frame {
    let mut writer = FrameWriter::request(pool, MessageType::Heartbeat).unwrap();
    writer.put_raw(payload).unwrap();
    writer.finish(seq)
}

#[tokio::test]
async fn test_tcp_echo() {
    let server = IcsServer::new(small_config()).unwrap();
    let addr = server
        .listen_tcp(Role::Web, "127.0.0.1:0".parse().unwrap(), echo(Role::Web))
        .await
        .unwrap();

    let pool = BufferPool::new(512, 8);
    let (mut frames, mut sink) = client(addr, &pool).await;
    sink.send_frame(&heartbeat(&pool, 7, b"ping")).await.unwrap();

    let reply = timeout(Duration::from_secs(5), frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(reply.is_ack());
    assert_eq!(reply.header().ack_seq, 7);
    assert_eq!(reply.send_seq(), 1);
    assert_eq!(reply.body(), b"ping");

    assert_eq!(server.snapshot().active_connections, 1);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_max_connections_rejects_extra_peers() {
    let server = IcsServer::new(small_config().with_max_connections(1)).unwrap();
    let addr = server
        .listen_tcp(Role::Web, "127.0.0.1:0".parse().unwrap(), echo(Role::Web))
        .await
        .unwrap();
    let pool = BufferPool::new(512, 8);

    let (mut first, mut first_sink) = client(addr, &pool).await;
    first_sink.send_frame(&heartbeat(&pool, 1, b"a")).await.unwrap();
    timeout(Duration::from_secs(5), first.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let (mut second, _second_sink) = client(addr, &pool).await;
    let ended = timeout(Duration::from_secs(5), second.next()).await.unwrap();
    assert!(!matches!(ended, Some(Ok(_))));
    assert_eq!(server.metrics().snapshot().rejected_connections, 1);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_connection_times_out() {
    let config = small_config()
        .with_heartbeat_interval(1)
        .with_timeout_threshold(1);
    let server = IcsServer::new(config).unwrap();
    let addr = server
        .listen_tcp(Role::Web, "127.0.0.1:0".parse().unwrap(), echo(Role::Web))
        .await
        .unwrap();
    let pool = BufferPool::new(512, 8);

    let (mut frames, _sink) = client(addr, &pool).await;
    let ended = timeout(Duration::from_secs(10), frames.next()).await.unwrap();
    assert!(!matches!(ended, Some(Ok(_))));

    while server.snapshot().active_connections > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_request_before_auth_closes_connection() {
    let server = IcsServer::new(small_config()).unwrap();
    let factory: Arc<dyn HandlerFactory> =
        Arc::new(|_: &IcsConnection| -> Box<dyn RoleHandler> { Box::new(Gatekeeper) });
    let addr = server
        .listen_tcp(Role::Terminal, "127.0.0.1:0".parse().unwrap(), factory)
        .await
        .unwrap();
    let pool = BufferPool::new(512, 8);

    let (mut frames, mut sink) = client(addr, &pool).await;
    let report = FrameWriter::request(&pool, MessageType::BusinessReport)
        .unwrap()
        .finish(1);
    sink.send_frame(&report).await.unwrap();

    let ended = timeout(Duration::from_secs(5), frames.next()).await.unwrap();
    assert!(!matches!(ended, Some(Ok(_))));
    assert_eq!(server.metrics().snapshot().protocol_errors, 1);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_udp_peer_gets_its_own_connection() {
    let server = IcsServer::new(small_config()).unwrap();
    let addr = server
        .listen_udp(Role::Terminal, "127.0.0.1:0".parse().unwrap(), echo(Role::Terminal))
        .await
        .unwrap();
    let pool = BufferPool::new(512, 8);

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(heartbeat(&pool, 3, b"udp").as_bytes(), addr)
        .await
        .unwrap();

    let mut buf = [0u8; 512];
    let (len, from) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, addr);
    let reply = Frame::decode(&pool, &buf[..len]).unwrap();
    assert_eq!(reply.header().ack_seq, 3);
    assert_eq!(reply.body(), b"udp");

    let connections = server.manager().infos();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].peer_addr, socket.local_addr().unwrap());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_outbound_link_reaches_listener() {
    let center = IcsServer::new(small_config()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let factory: Arc<dyn HandlerFactory> = Arc::new(move |_: &IcsConnection| -> Box<dyn RoleHandler> {
        Box::new(Collect(tx.clone()))
    });
    let addr = center
        .listen_tcp(Role::RemoteProxy, "127.0.0.1:0".parse().unwrap(), factory)
        .await
        .unwrap();

    let proxy = IcsServer::new(small_config()).unwrap();
    let link = proxy
        .connect_tcp(Role::Center, addr, echo(Role::Center))
        .await
        .unwrap();
    link.send(link.request(MessageType::SiteHeartbeat).unwrap())
        .unwrap();

    let received = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(received, Some(MessageType::SiteHeartbeat.as_u16()));

    proxy.shutdown().await.unwrap();
    center.shutdown().await.unwrap();
}
