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

//! Transports
//!
//! A transport is split into a [`FrameStream`] of decoded frames, read by the
//! connection worker, and a [`FrameSink`] the writer task drains the send
//! queue into. TCP reassembles frames from the byte stream with
//! [`IcsCodec`]; UDP treats every datagram as exactly one frame.

use crate::{GatewayError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use icsgate_protocol::{BufferPool, Frame, IcsCodec};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

/// Decoded frames from a peer
pub type FrameStream = BoxStream<'static, Result<Frame>>;

/// Write side of a transport
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one sealed frame
    async fn send_frame(&mut self, frame: &Frame) -> io::Result<()>;

    /// Release the transport once the connection is done
    async fn shutdown(&mut self) {}
}

/// Write half of a TCP stream
#[derive(Debug)]
pub struct TcpSink(OwnedWriteHalf);

#[async_trait]
impl FrameSink for TcpSink {
    async fn send_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.0.write_all(frame.as_bytes()).await
    }

    async fn shutdown(&mut self) {
        let _ = self.0.shutdown().await;
    }
}

/// Split a TCP stream into a frame stream and a sink
pub fn tcp_transport(stream: TcpStream, pool: &BufferPool) -> (FrameStream, TcpSink) {
    let (read, write) = stream.into_split();
    let frames = FramedRead::new(read, IcsCodec::new(pool.clone()))
        .map(|item| item.map_err(GatewayError::from))
        .boxed();
    (frames, TcpSink(write))
}

/// One peer of a shared UDP socket
#[derive(Debug, Clone)]
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpSink {
    /// Sink sending to `peer` over `socket`
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }
}

#[async_trait]
impl FrameSink for UdpSink {
    async fn send_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.socket.send_to(frame.as_bytes(), self.peer).await?;
        Ok(())
    }
}

/// Decode datagrams routed to one peer, one frame per datagram
pub fn datagram_stream(datagrams: mpsc::Receiver<Bytes>, pool: BufferPool) -> FrameStream {
    stream::unfold((datagrams, pool), |(mut datagrams, pool)| async move {
        let datagram = datagrams.recv().await?;
        let item = Frame::decode(&pool, &datagram).map_err(GatewayError::from);
        Some((item, (datagrams, pool)))
    })
    .boxed()
}
