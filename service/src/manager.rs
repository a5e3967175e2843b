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

//! Connection manager
//!
//! The ConnectionManager is responsible for:
//! - Assigning connection ids
//! - Spawning and tracking the read and write workers of every connection
//! - Forgetting connections once their workers finish
//! - Graceful shutdown coordination

use crate::transport::{FrameSink, FrameStream};
use crate::{
    ConnectionId, ConnectionInfo, ConnectionState, ConnectionWorker, IcsConnection, RoleHandler,
    SendWorker, ServerMetrics,
};
use dashmap::DashMap;
use icsgate_protocol::Frame;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Managed connection entry
struct ManagedConnection {
    connection: IcsConnection,
    worker_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

/// Tracks every live connection of a server
pub struct ConnectionManager {
    connections: Arc<DashMap<ConnectionId, ManagedConnection>>,
    next_id: AtomicU64,
    metrics: Arc<ServerMetrics>,
    write_timeout: Duration,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(metrics: Arc<ServerMetrics>, write_timeout: Duration) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            metrics,
            write_timeout,
        }
    }

    /// Reserve the next connection id
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Start the workers of a new connection and track it until they finish
    pub fn spawn<S: FrameSink>(
        &self,
        connection: IcsConnection,
        queue: mpsc::Receiver<Frame>,
        frames: FrameStream,
        sink: S,
        handler: Box<dyn RoleHandler>,
    ) {
        let id = connection.id();
        let writer = SendWorker::new(connection.clone(), queue, sink, self.write_timeout);
        let worker = ConnectionWorker::new(
            connection.clone(),
            handler,
            frames,
            self.metrics.clone(),
        );

        // The worker waits until its entry is tracked so cleanup cannot run first.
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let connections = self.connections.clone();
        let metrics = self.metrics.clone();
        let worker_handle = tokio::spawn(async move {
            let _ = ready_rx.await;
            worker.run().await;
            connections.remove(&id);
            metrics.connection_closed();
        });
        let writer_handle = tokio::spawn(writer.run());

        self.connections.insert(
            id,
            ManagedConnection {
                connection,
                worker_handle,
                writer_handle,
            },
        );
        self.metrics.connection_opened();
        let _ = ready_tx.send(());
    }

    /// Get a connection by id
    pub fn get(&self, id: ConnectionId) -> Option<IcsConnection> {
        self.connections
            .get(&id)
            .map(|entry| entry.connection.clone())
    }

    /// Number of tracked connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot every tracked connection
    pub fn infos(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| entry.connection.info())
            .collect()
    }

    /// Close one connection, returning whether it was tracked
    pub fn close(&self, id: ConnectionId) -> bool {
        match self.connections.get(&id) {
            Some(entry) => {
                entry.connection.close(ConnectionState::Closed);
                true
            }
            None => false,
        }
    }

    /// Close every connection and wait up to `grace` for the workers to exit
    pub async fn shutdown(&self, grace: Duration) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        debug!(count = ids.len(), "closing connections");

        let mut handles = Vec::with_capacity(ids.len() * 2);
        for id in ids {
            if let Some((_, managed)) = self.connections.remove(&id) {
                managed.connection.close(ConnectionState::Closed);
                handles.push(managed.worker_handle);
                handles.push(managed.writer_handle);
            }
        }

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let joined = tokio::time::timeout(grace, futures_util::future::join_all(handles)).await;
        if joined.is_err() {
            warn!("workers did not stop in time, aborting");
            for handle in aborts {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connection_count())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionOptions, Result, Role};
    use async_trait::async_trait;
    use futures::{StreamExt, stream};
    use icsgate_protocol::{BufferPool, FrameWriter};

    struct Idle;

    #[async_trait]
    impl RoleHandler for Idle {
        fn role(&self) -> Role {
            Role::Web
        }

        async fn handle(
            &mut self,
            _conn: &IcsConnection,
            _frame: &Frame,
        ) -> Result<Option<FrameWriter>> {
            Ok(None)
        }
    }

    struct NullSink;

    #[async_trait]
    impl FrameSink for NullSink {
        async fn send_frame(&mut self, _frame: &Frame) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Arc::new(ServerMetrics::new()), Duration::from_secs(1))
    }

    fn connection(manager: &ConnectionManager) -> (IcsConnection, mpsc::Receiver<Frame>) {
        IcsConnection::new(
            manager.next_connection_id(),
            "127.0.0.1:9000".parse().unwrap(),
            Role::Web,
            BufferPool::new(64, 4),
            ConnectionOptions::default(),
        )
    }

    #[test]
    fn test_ids_are_monotonic() {
        let manager = manager();
        let a = manager.next_connection_id();
        let b = manager.next_connection_id();
        assert!(b.as_u64() > a.as_u64());
    }

    #[tokio::test]
    async fn test_finished_connection_is_forgotten() {
        let manager = manager();
        let (conn, rx) = connection(&manager);
        let id = conn.id();
        manager.spawn(conn, rx, stream::empty().boxed(), NullSink, Box::new(Idle));

        while manager.connection_count() > 0 {
            tokio::task::yield_now().await;
        }
        assert!(manager.get(id).is_none());
        assert_eq!(manager.metrics.active_connections(), 0);
        assert_eq!(manager.metrics.total_connections(), 1);
    }

    #[tokio::test]
    async fn test_close_and_shutdown() {
        let manager = manager();
        let (a, rx_a) = connection(&manager);
        let (b, rx_b) = connection(&manager);
        manager.spawn(a.clone(), rx_a, stream::pending().boxed(), NullSink, Box::new(Idle));
        manager.spawn(b.clone(), rx_b, stream::pending().boxed(), NullSink, Box::new(Idle));
        assert_eq!(manager.connection_count(), 2);
        assert_eq!(manager.infos().len(), 2);

        assert!(manager.close(a.id()));
        a.closed().await;

        manager.shutdown(Duration::from_secs(1)).await;
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(b.state(), ConnectionState::Closed);
    }
}
