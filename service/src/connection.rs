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

//! Connection handle
//!
//! An [`IcsConnection`] is a cheap, cloneable handle shared by the registry,
//! the read worker, the writer task and the interval timer. None of them owns
//! the socket outright; the connection is torn down when its cancellation
//! token fires and the last handle is dropped.
//!
//! Frames leave the connection through a bounded queue drained by a single
//! writer task, so at most one frame is ever in flight on the transport.

use crate::{ConnectionId, ConnectionInfo, ConnectionState, GatewayError, Result, Role};
use icsgate_protocol::{BufferPool, Frame, FrameWriter, MessageType, ResourceError};
use metrics::counter;
use parking_lot::RwLock;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Per-connection limits
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Frames that may wait in the send queue
    pub send_queue_depth: usize,
    /// Idle checks tolerated before the connection is closed
    pub timeout_threshold: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            send_queue_depth: 64,
            timeout_threshold: 2,
        }
    }
}

struct ConnectionInner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    role: Role,
    created_at: Instant,
    name: RwLock<String>,
    identity: RwLock<Option<String>>,
    state: AtomicU8,
    send_seq: AtomicU16,
    idle_ticks: AtomicU32,
    options: ConnectionOptions,
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    pool: BufferPool,

    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

/// A gateway connection
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct IcsConnection {
    inner: Arc<ConnectionInner>,
}

impl IcsConnection {
    /// Create a connection and the receiving end of its send queue.
    ///
    /// The receiver belongs to whatever drains frames onto the transport;
    /// in tests it doubles as a loopback to inspect what was sent.
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        role: Role,
        pool: BufferPool,
        options: ConnectionOptions,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(options.send_queue_depth.max(1));
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer_addr,
                role,
                created_at: Instant::now(),
                name: RwLock::new(peer_addr.to_string()),
                identity: RwLock::new(None),
                state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
                send_seq: AtomicU16::new(0),
                idle_ticks: AtomicU32::new(0),
                options,
                tx,
                cancel: CancellationToken::new(),
                pool,
                bytes_sent: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                frames_sent: AtomicU64::new(0),
                frames_received: AtomicU64::new(0),
            }),
        };
        (connection, rx)
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Get the peer role
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Display name: the peer address, or `identity@peer` once authenticated
    pub fn name(&self) -> String {
        self.inner.name.read().clone()
    }

    /// The authenticated identity, if any
    pub fn identity(&self) -> Option<String> {
        self.inner.identity.read().clone()
    }

    /// Check if the peer has authenticated
    pub fn is_authenticated(&self) -> bool {
        self.inner.identity.read().is_some()
    }

    /// The buffer pool frames for this connection are drawn from
    pub fn pool(&self) -> &BufferPool {
        &self.inner.pool
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Move to a live state. Ignored once the connection is closing.
    pub fn set_state(&self, state: ConnectionState) {
        let _ = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!ConnectionState::from_u8(current).is_terminal()).then_some(state.as_u8())
            });
    }

    /// Check if the connection is still usable
    pub fn is_valid(&self) -> bool {
        !self.state().is_terminal() && !self.inner.cancel.is_cancelled()
    }

    /// Record a successful authentication: rename to `identity@peer` and
    /// become [`ConnectionState::Active`].
    pub fn bind_identity(&self, identity: &str) {
        *self.inner.identity.write() = Some(identity.to_string());
        *self.inner.name.write() = format!("{identity}@{}", self.inner.peer_addr);
        self.set_state(ConnectionState::Active);
        info!(connection = %self.name(), role = %self.role(), "authenticated");
    }

    /// Check if `other` is a handle to this same connection
    pub fn same(&self, other: &IcsConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start a request frame
    pub fn request(&self, message_type: MessageType) -> Result<FrameWriter> {
        Ok(FrameWriter::request(&self.inner.pool, message_type)?)
    }

    /// Start the response to `request`
    pub fn response(&self, request: &Frame) -> Result<FrameWriter> {
        Ok(FrameWriter::response(&self.inner.pool, request)?)
    }

    fn next_send_seq(&self) -> u16 {
        self.inner
            .send_seq
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    /// Seal `writer` with the next send sequence number and queue it.
    ///
    /// Never waits: a full queue fails with [`ResourceError::SendQueueFull`]
    /// and the frame is dropped.
    pub fn send(&self, writer: FrameWriter) -> Result<()> {
        if !self.is_valid() {
            return Err(GatewayError::ConnectionClosed);
        }
        let frame = writer.finish(self.next_send_seq());
        let len = frame.len() as u64;
        match self.inner.tx.try_send(frame) {
            Ok(()) => {
                trace!(connection = %self.name(), len, "frame queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("icsgate.frames.dropped").increment(1);
                warn!(connection = %self.name(), "send queue full, dropping frame");
                Err(ResourceError::SendQueueFull {
                    depth: self.inner.options.send_queue_depth,
                }
                .into())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(GatewayError::ConnectionClosed),
        }
    }

    /// Note a decoded frame: resets the idle counter.
    pub fn touch(&self, frame_len: usize) {
        self.inner.idle_ticks.store(0, Ordering::Relaxed);
        self.inner.frames_received.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_received
            .fetch_add(frame_len as u64, Ordering::Relaxed);
        counter!("icsgate.frames.received").increment(1);
    }

    /// Note a frame written to the transport
    pub fn record_sent(&self, frame_len: usize) {
        self.inner.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_sent
            .fetch_add(frame_len as u64, Ordering::Relaxed);
        counter!("icsgate.frames.sent").increment(1);
    }

    /// Idle check, driven by the interval timer.
    ///
    /// Returns the interval until the next check, or 0 once the connection
    /// has been closed, by this check or otherwise.
    pub fn timeout(&self, interval: u32) -> u32 {
        if !self.is_valid() {
            return 0;
        }
        let ticks = self.inner.idle_ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if ticks > self.inner.options.timeout_threshold {
            warn!(connection = %self.name(), ticks, "idle timeout");
            counter!("icsgate.connections.timed_out").increment(1);
            self.close(ConnectionState::TimedOut);
            return 0;
        }
        interval
    }

    /// Called by the registry when a newer connection claims this identity.
    pub fn replaced(&self) {
        info!(connection = %self.name(), "replaced by a newer session");
        self.close(ConnectionState::Replaced);
    }

    /// Close the connection, recording `state` as the reason.
    ///
    /// Only the first close wins; later calls keep the original reason.
    pub fn close(&self, state: ConnectionState) {
        let previous = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!ConnectionState::from_u8(current).is_terminal()).then_some(state.as_u8())
            });
        if previous.is_ok() {
            debug!(connection = %self.name(), reason = %state, "closing");
        }
        self.inner.cancel.cancel();
    }

    /// Resolves once the connection has been closed
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Token cancelled when the connection closes
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Take a snapshot of the connection
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.inner.id,
            name: self.name(),
            role: self.inner.role,
            state: self.state(),
            peer_addr: self.inner.peer_addr,
            identity: self.identity(),
            created_at: self.inner.created_at,
            bytes_sent: self.inner.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.inner.bytes_received.load(Ordering::Relaxed),
            frames_sent: self.inner.frames_sent.load(Ordering::Relaxed),
            frames_received: self.inner.frames_received.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for IcsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcsConnection")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(depth: usize) -> (IcsConnection, mpsc::Receiver<Frame>) {
        IcsConnection::new(
            ConnectionId::new(1),
            "10.0.0.7:4000".parse().unwrap(),
            Role::Terminal,
            BufferPool::new(256, 16),
            ConnectionOptions {
                send_queue_depth: depth,
                timeout_threshold: 2,
            },
        )
    }

    #[test]
    fn test_bind_identity_renames() {
        let (conn, _rx) = connection(4);
        assert_eq!(conn.name(), "10.0.0.7:4000");
        conn.set_state(ConnectionState::Authenticating);
        conn.bind_identity("GW001");
        assert_eq!(conn.name(), "GW001@10.0.0.7:4000");
        assert_eq!(conn.identity().as_deref(), Some("GW001"));
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn test_send_assigns_sequence_in_order() {
        let (conn, mut rx) = connection(4);
        for _ in 0..3 {
            conn.send(conn.request(MessageType::Heartbeat).unwrap())
                .unwrap();
        }
        let seqs: Vec<u16> = (0..3).map(|_| rx.try_recv().unwrap().send_seq()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_full_queue_drops_frame() {
        let (conn, _rx) = connection(1);
        conn.send(conn.request(MessageType::Heartbeat).unwrap())
            .unwrap();
        let err = conn
            .send(conn.request(MessageType::Heartbeat).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Resource(ResourceError::SendQueueFull { depth: 1 })
        ));
        assert!(conn.is_valid());
    }

    #[test]
    fn test_timeout_after_threshold() {
        let (conn, _rx) = connection(4);
        assert_eq!(conn.timeout(30), 30);
        assert_eq!(conn.timeout(30), 30);
        assert_eq!(conn.timeout(30), 0);
        assert_eq!(conn.state(), ConnectionState::TimedOut);
        assert!(!conn.is_valid());
    }

    #[test]
    fn test_touch_resets_idle_counter() {
        let (conn, _rx) = connection(4);
        assert_eq!(conn.timeout(30), 30);
        assert_eq!(conn.timeout(30), 30);
        conn.touch(20);
        assert_eq!(conn.timeout(30), 30);
        assert_eq!(conn.timeout(30), 30);
        assert!(conn.is_valid());
    }

    #[test]
    fn test_first_close_reason_wins() {
        let (conn, _rx) = connection(4);
        conn.replaced();
        conn.close(ConnectionState::Errored);
        assert_eq!(conn.state(), ConnectionState::Replaced);
        conn.set_state(ConnectionState::Active);
        assert_eq!(conn.state(), ConnectionState::Replaced);
        assert!(matches!(
            conn.send(conn.request(MessageType::Heartbeat).unwrap()),
            Err(GatewayError::ConnectionClosed)
        ));
    }
}
