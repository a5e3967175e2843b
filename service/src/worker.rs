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

//! Connection workers
//!
//! Each connection runs two tasks:
//! - [`ConnectionWorker`] reads frames, hands requests to the role handler and
//!   queues the responses.
//! - [`SendWorker`] drains the send queue onto the transport one frame at a
//!   time.
//!
//! Either task stopping closes the connection, which stops the other.

use crate::transport::{FrameSink, FrameStream};
use crate::{ConnectionState, IcsConnection, RoleHandler, ServerMetrics};
use futures::StreamExt;
use icsgate_protocol::Frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info_span, trace, warn};

/// Outcome of one dispatched frame
enum Flow {
    Continue,
    Stop,
}

/// Read side of a connection
pub struct ConnectionWorker {
    connection: IcsConnection,
    handler: Box<dyn RoleHandler>,
    frames: FrameStream,
    metrics: Arc<ServerMetrics>,
}

impl ConnectionWorker {
    /// Create a worker reading `frames` for `connection`
    pub fn new(
        connection: IcsConnection,
        handler: Box<dyn RoleHandler>,
        frames: FrameStream,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            connection,
            handler,
            frames,
            metrics,
        }
    }

    /// Run the worker until the connection closes
    ///
    /// The role handler's `on_error` runs afterwards unless the connection
    /// was replaced.
    pub async fn run(mut self) {
        let span = info_span!(
            "connection",
            id = %self.connection.id(),
            role = %self.connection.role(),
            peer = %self.connection.peer_addr()
        );
        async move {
            let initial = if self.connection.role().requires_auth() {
                ConnectionState::Authenticating
            } else {
                ConnectionState::Active
            };
            self.connection.set_state(initial);

            match self.handler.on_connect(&self.connection).await {
                Ok(()) => self.event_loop().await,
                Err(e) => {
                    error!(connection = %self.connection.name(), error = %e, "connect hook failed");
                    self.connection.close(ConnectionState::Errored);
                }
            }

            // Peer hung up or the server is stopping.
            self.connection.close(ConnectionState::Closed);
            if self.connection.state() != ConnectionState::Replaced {
                self.handler.on_error(&self.connection).await;
            }
            debug!(
                connection = %self.connection.name(),
                state = %self.connection.state(),
                "worker finished"
            );
        }
        .instrument(span)
        .await;
    }

    async fn event_loop(&mut self) {
        loop {
            select! {
                biased;
                _ = self.connection.closed() => return,
                next = self.frames.next() => match next {
                    None => {
                        debug!(connection = %self.connection.name(), "peer closed");
                        return;
                    }
                    Some(Err(e)) if e.is_fatal() => {
                        error!(connection = %self.connection.name(), error = %e, "stream failed");
                        self.metrics.protocol_error();
                        self.connection.close(ConnectionState::Errored);
                        return;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %self.connection.name(), error = %e, "frame dropped");
                    }
                    Some(Ok(frame)) => {
                        if let Flow::Stop = self.dispatch(frame).await {
                            return;
                        }
                    }
                },
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Flow {
        self.connection.touch(frame.len());
        if frame.is_ack() {
            trace!(
                connection = %self.connection.name(),
                message_type = frame.message_type(),
                ack_seq = frame.header().ack_seq,
                "response discarded"
            );
            return Flow::Continue;
        }

        match self.handler.handle(&self.connection, &frame).await {
            Ok(Some(response)) => {
                if let Err(e) = self.connection.send(response) {
                    warn!(connection = %self.connection.name(), error = %e, "response not sent");
                }
                Flow::Continue
            }
            Ok(None) => Flow::Continue,
            Err(e) if e.is_fatal() => {
                error!(
                    connection = %self.connection.name(),
                    message_type = frame.message_type(),
                    error = %e,
                    "fatal error, closing"
                );
                self.metrics.protocol_error();
                self.connection.close(ConnectionState::Errored);
                Flow::Stop
            }
            Err(e) => {
                warn!(
                    connection = %self.connection.name(),
                    message_type = frame.message_type(),
                    error = %e,
                    "message failed"
                );
                self.metrics.handler_error();
                Flow::Continue
            }
        }
    }
}

impl std::fmt::Debug for ConnectionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWorker")
            .field("connection", &self.connection)
            .field("role", &self.handler.role())
            .finish()
    }
}

/// Write side of a connection
pub struct SendWorker<S> {
    connection: IcsConnection,
    queue: mpsc::Receiver<Frame>,
    sink: S,
    write_timeout: Duration,
}

impl<S: FrameSink> SendWorker<S> {
    /// Create a writer draining `queue` into `sink`
    pub fn new(
        connection: IcsConnection,
        queue: mpsc::Receiver<Frame>,
        sink: S,
        write_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            queue,
            sink,
            write_timeout,
        }
    }

    /// Write queued frames until the connection closes
    pub async fn run(mut self) {
        loop {
            select! {
                biased;
                _ = self.connection.closed() => break,
                next = self.queue.recv() => {
                    let Some(frame) = next else { break };
                    match timeout(self.write_timeout, self.sink.send_frame(&frame)).await {
                        Ok(Ok(())) => self.connection.record_sent(frame.len()),
                        Ok(Err(e)) => {
                            warn!(connection = %self.connection.name(), error = %e, "write failed");
                            self.connection.close(ConnectionState::Errored);
                            break;
                        }
                        Err(_) => {
                            warn!(connection = %self.connection.name(), "write timed out");
                            self.connection.close(ConnectionState::Errored);
                            break;
                        }
                    }
                }
            }
        }
        self.queue.close();
        self.sink.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionId, ConnectionOptions, GatewayError, Result, Role};
    use async_trait::async_trait;
    use futures::stream;
    use icsgate_protocol::{BufferPool, FrameWriter, MessageType, ProtocolError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct Recorder {
        handled: Arc<AtomicUsize>,
        errors: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RoleHandler for Recorder {
        fn role(&self) -> Role {
            Role::Terminal
        }

        async fn handle(
            &mut self,
            conn: &IcsConnection,
            frame: &Frame,
        ) -> Result<Option<FrameWriter>> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            match frame.kind() {
                Some(MessageType::Heartbeat) => Ok(Some(conn.response(frame)?)),
                Some(MessageType::LogReport) => {
                    Err(ProtocolError::TrailingData { remaining: 1 }.into())
                }
                _ => Err(GatewayError::Unauthenticated {
                    message_type: frame.message_type(),
                }),
            }
        }

        async fn on_error(&mut self, _conn: &IcsConnection) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request(pool: &BufferPool, kind: MessageType, seq: u16) -> Result<Frame> {
        Ok(FrameWriter::request(pool, kind)?.finish(seq))
    }

    fn ack(pool: &BufferPool) -> Result<Frame> {
        let req = request(pool, MessageType::Heartbeat, 9)?;
        Ok(FrameWriter::response(pool, &req)?.finish(1))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_dispatch_policy() {
        let pool = BufferPool::new(128, 32);
        let (conn, mut rx) = IcsConnection::new(
            ConnectionId::new(1),
            "127.0.0.1:7000".parse().unwrap(),
            Role::Terminal,
            pool.clone(),
            ConnectionOptions::default(),
        );
        let frames = stream::iter(vec![
            request(&pool, MessageType::Heartbeat, 1),
            ack(&pool),
            request(&pool, MessageType::LogReport, 2),
            request(&pool, MessageType::Heartbeat, 3),
            request(&pool, MessageType::BusinessReport, 4),
            request(&pool, MessageType::Heartbeat, 5),
        ])
        .boxed();
        let handled = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let recorder = Recorder {
            handled: handled.clone(),
            errors: errors.clone(),
        };

        ConnectionWorker::new(conn.clone(), Box::new(recorder), frames, Arc::new(ServerMetrics::new()))
            .run()
            .await;

        // The ack is discarded; the unauthenticated business report is fatal.
        assert_eq!(handled.load(Ordering::SeqCst), 4);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(conn.state(), ConnectionState::Errored);

        let acks: Vec<u16> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| frame.header().ack_seq)
            .collect();
        assert_eq!(acks, vec![1, 3]);
        assert!(logs_contain("message failed"));
        assert!(logs_contain("fatal error, closing"));
    }

    #[tokio::test]
    async fn test_replaced_connection_skips_error_hook() {
        let pool = BufferPool::new(128, 8);
        let (conn, _rx) = IcsConnection::new(
            ConnectionId::new(2),
            "127.0.0.1:7001".parse().unwrap(),
            Role::Terminal,
            pool,
            ConnectionOptions::default(),
        );
        let errors = Arc::new(AtomicUsize::new(0));
        let recorder = Recorder {
            handled: Arc::new(AtomicUsize::new(0)),
            errors: errors.clone(),
        };
        let worker = ConnectionWorker::new(
            conn.clone(),
            Box::new(recorder),
            stream::pending().boxed(),
            Arc::new(ServerMetrics::new()),
        );
        let task = tokio::spawn(worker.run());
        tokio::task::yield_now().await;
        conn.replaced();
        task.await.unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(conn.state(), ConnectionState::Replaced);
    }

    struct VecSink(Arc<parking_lot::Mutex<Vec<u16>>>);

    #[async_trait]
    impl FrameSink for VecSink {
        async fn send_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
            self.0.lock().push(frame.send_seq());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_worker_preserves_order() {
        let pool = BufferPool::new(128, 16);
        let (conn, rx) = IcsConnection::new(
            ConnectionId::new(3),
            "127.0.0.1:7002".parse().unwrap(),
            Role::Web,
            pool,
            ConnectionOptions::default(),
        );
        for _ in 0..5 {
            conn.send(conn.request(MessageType::Heartbeat).unwrap())
                .unwrap();
        }
        let written = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let task = tokio::spawn(
            SendWorker::new(conn.clone(), rx, VecSink(written.clone()), Duration::from_secs(1))
                .run(),
        );
        while written.lock().len() < 5 {
            tokio::task::yield_now().await;
        }
        conn.close(ConnectionState::Closed);
        task.await.unwrap();
        assert_eq!(*written.lock(), vec![1, 2, 3, 4, 5]);
        assert_eq!(conn.info().frames_sent, 5);
    }
}
