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

//! Gateway server
//!
//! [`IcsServer`] owns the frame pool, the connection manager and the interval
//! timer shared by all listeners. Each listener or outbound connect is bound
//! to a [`Role`] and a [`HandlerFactory`] that builds the handler for every
//! connection it produces.

use crate::transport::{UdpSink, datagram_stream, tcp_transport};
use crate::{
    ConnectionManager, ConnectionOptions, GatewayError, HandlerFactory, IcsConnection,
    IntervalTimer, Result, Role, ServerConfig, ServerMetrics, ServerSnapshot,
};
use bytes::Bytes;
use icsgate_protocol::consts::MAX_FRAME_SIZE;
use icsgate_protocol::{BufferPool, Frame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Everything a listener task needs to admit and start connections
#[derive(Clone)]
struct Admission {
    manager: Arc<ConnectionManager>,
    metrics: Arc<ServerMetrics>,
    timer: IntervalTimer,
    pool: BufferPool,
    options: ConnectionOptions,
    max_connections: usize,
    heartbeat_interval: u32,
}

impl Admission {
    /// Create a connection unless the server is full
    fn admit(&self, role: Role, peer: SocketAddr) -> Option<(IcsConnection, mpsc::Receiver<Frame>)> {
        if self.manager.connection_count() >= self.max_connections {
            warn!(%peer, %role, max = self.max_connections, "connection rejected, server full");
            self.metrics.connection_rejected();
            return None;
        }
        Some(IcsConnection::new(
            self.manager.next_connection_id(),
            peer,
            role,
            self.pool.clone(),
            self.options,
        ))
    }

    /// Put a connection under idle supervision
    fn supervise(&self, connection: &IcsConnection) {
        let interval = self.heartbeat_interval;
        let connection = connection.clone();
        self.timer.add(interval, move || connection.timeout(interval));
    }
}

/// Multi-listener gateway server
///
/// # Example
///
/// ```no_run
/// use icsgate_service::{IcsServer, Role, ServerConfig};
/// # use icsgate_service::{HandlerFactory, IcsConnection, RoleHandler};
/// # fn factory() -> std::sync::Arc<dyn HandlerFactory> { unimplemented!() }
///
/// # async fn run() -> icsgate_service::Result<()> {
/// let server = IcsServer::new(ServerConfig::default())?;
/// let addr = server.listen_tcp(Role::Terminal, "0.0.0.0:9100".parse().unwrap(), factory()).await?;
/// println!("terminals on {addr}");
/// server.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct IcsServer {
    config: ServerConfig,
    admission: Admission,
    shutdown: CancellationToken,
    listeners: Mutex<Vec<(Role, SocketAddr)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl IcsServer {
    /// Create a server, allocating the frame pool
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate().map_err(GatewayError::Other)?;
        let metrics = Arc::new(ServerMetrics::new());
        let admission = Admission {
            manager: Arc::new(ConnectionManager::new(metrics.clone(), config.write_timeout)),
            metrics,
            timer: IntervalTimer::new(),
            pool: config.pool.build(),
            options: ConnectionOptions {
                send_queue_depth: config.send_queue_depth,
                timeout_threshold: config.timeout_threshold,
            },
            max_connections: config.max_connections,
            heartbeat_interval: config.heartbeat_interval,
        };
        Ok(Self {
            config,
            admission,
            shutdown: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        })
    }

    /// Accept TCP connections for `role` on `addr`
    ///
    /// Returns the bound address, which differs from `addr` when binding port 0.
    #[instrument(skip(self, factory))]
    pub async fn listen_tcp(
        &self,
        role: Role,
        addr: SocketAddr,
        factory: Arc<dyn HandlerFactory>,
    ) -> Result<SocketAddr> {
        if !self.is_running() {
            return Err(GatewayError::ServerNotRunning);
        }
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(%role, addr = %local, "tcp listener bound");

        let admission = self.admission.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        let Some((connection, queue)) = admission.admit(role, peer) else {
                            continue;
                        };
                        let _ = stream.set_nodelay(true);
                        debug!(%peer, %role, id = %connection.id(), "accepted");
                        let (frames, sink) = tcp_transport(stream, &admission.pool);
                        admission.supervise(&connection);
                        let handler = factory.create(&connection);
                        admission.manager.spawn(connection, queue, frames, sink, handler);
                    }
                    Err(e) => {
                        error!(%role, error = %e, "accept failed");
                        admission.metrics.connection_error();
                    }
                }
            }
            debug!(%role, "tcp listener stopped");
        });

        self.listeners.lock().push((role, local));
        self.tasks.lock().push(handle);
        Ok(local)
    }

    /// Serve UDP peers for `role` on `addr`
    ///
    /// Every source address becomes its own connection, fed one datagram per
    /// frame. A peer whose connection has closed starts a fresh one with its
    /// next datagram.
    #[instrument(skip(self, factory))]
    pub async fn listen_udp(
        &self,
        role: Role,
        addr: SocketAddr,
        factory: Arc<dyn HandlerFactory>,
    ) -> Result<SocketAddr> {
        if !self.is_running() {
            return Err(GatewayError::ServerNotRunning);
        }
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local = socket.local_addr()?;
        info!(%role, addr = %local, "udp listener bound");

        let admission = self.admission.clone();
        let shutdown = self.shutdown.clone();
        let depth = self.config.send_queue_depth.max(1);
        let handle = tokio::spawn(async move {
            let mut peers: HashMap<SocketAddr, mpsc::Sender<Bytes>> = HashMap::new();
            let mut buf = vec![0u8; MAX_FRAME_SIZE];
            loop {
                let received = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    received = socket.recv_from(&mut buf) => received,
                };
                let (len, peer) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(%role, error = %e, "udp receive failed");
                        continue;
                    }
                };
                let datagram = Bytes::copy_from_slice(&buf[..len]);

                if let Some(tx) = peers.get(&peer) {
                    match tx.try_send(datagram.clone()) {
                        Ok(()) => continue,
                        Err(TrySendError::Full(_)) => {
                            warn!(%peer, "peer backlog full, datagram dropped");
                            continue;
                        }
                        Err(TrySendError::Closed(_)) => {
                            peers.remove(&peer);
                        }
                    }
                }

                peers.retain(|_, tx| !tx.is_closed());
                let Some((connection, queue)) = admission.admit(role, peer) else {
                    continue;
                };
                debug!(%peer, %role, id = %connection.id(), "new datagram peer");
                let (tx, rx) = mpsc::channel(depth);
                let _ = tx.try_send(datagram);
                let frames = datagram_stream(rx, admission.pool.clone());
                let sink = UdpSink::new(socket.clone(), peer);
                admission.supervise(&connection);
                let handler = factory.create(&connection);
                admission.manager.spawn(connection, queue, frames, sink, handler);
                peers.insert(peer, tx);
            }
            debug!(%role, "udp listener stopped");
        });

        self.listeners.lock().push((role, local));
        self.tasks.lock().push(handle);
        Ok(local)
    }

    /// Open an outbound TCP connection for `role`
    ///
    /// Outbound links are not idle-supervised; their handlers keep them alive.
    #[instrument(skip(self, factory))]
    pub async fn connect_tcp(
        &self,
        role: Role,
        addr: SocketAddr,
        factory: Arc<dyn HandlerFactory>,
    ) -> Result<IcsConnection> {
        if !self.is_running() {
            return Err(GatewayError::ServerNotRunning);
        }
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| GatewayError::ConnectTimeout(addr))??;
        let _ = stream.set_nodelay(true);

        let (connection, queue) = self
            .admission
            .admit(role, addr)
            .ok_or(GatewayError::MaxConnectionsReached(self.config.max_connections))?;
        info!(%addr, %role, id = %connection.id(), "connected");
        let (frames, sink) = tcp_transport(stream, &self.admission.pool);
        let handler = factory.create(&connection);
        self.admission
            .manager
            .spawn(connection.clone(), queue, frames, sink, handler);
        Ok(connection)
    }

    /// Stop all listeners, timer chains and connections
    pub async fn shutdown(&self) -> Result<()> {
        if !self.is_running() {
            return Err(GatewayError::ServerNotRunning);
        }
        info!("shutting down");
        self.shutdown.cancel();
        self.admission.timer.shutdown();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.admission
            .manager
            .shutdown(self.config.shutdown_timeout)
            .await;
        self.listeners.lock().clear();
        info!("shutdown complete");
        Ok(())
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Get the current server snapshot
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            active_connections: self.admission.manager.connection_count(),
            total_connections: self.admission.metrics.total_connections(),
            listeners: self.listeners.lock().clone(),
            timer_chains: self.admission.timer.active_chains(),
            free_buffers: self.admission.pool.available(),
            uptime: self.started_at.elapsed(),
            started_at: self.started_at,
        }
    }

    /// Get server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.admission.metrics.clone()
    }

    /// Shared interval timer
    pub fn timer(&self) -> &IntervalTimer {
        &self.admission.timer
    }

    /// Shared frame pool
    pub fn pool(&self) -> &BufferPool {
        &self.admission.pool
    }

    /// Get the connection manager
    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.admission.manager.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl std::fmt::Debug for IcsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcsServer")
            .field("listeners", &*self.listeners.lock())
            .field("connections", &self.admission.manager.connection_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for IcsServer {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("IcsServer dropped while running, stopping listeners");
            self.shutdown.cancel();
            self.admission.timer.shutdown();
        }
    }
}
