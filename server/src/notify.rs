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

//! Event notification sink

use icsgate_protocol::Frame;
use metrics::counter;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Fire-and-forget delivery of sealed frames to a subscriber
pub trait NotificationSink: Send + Sync + 'static {
    /// Deliver `frame`; failures are logged, never returned
    fn push(&self, frame: &Frame);
}

/// Sends each notification as one UDP datagram
#[derive(Debug)]
pub struct UdpNotifier {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpNotifier {
    /// Bind an ephemeral socket for sending to `target`
    pub async fn bind(target: SocketAddr) -> std::io::Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse()
        } else {
            "[::]:0".parse()
        }
        .map_err(std::io::Error::other)?;
        let socket = UdpSocket::bind(local).await?;
        debug!(%target, local = %socket.local_addr()?, "notifier bound");
        Ok(Self { socket, target })
    }

    /// Subscriber address
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl NotificationSink for UdpNotifier {
    fn push(&self, frame: &Frame) {
        match self.socket.try_send_to(frame.as_bytes(), self.target) {
            Ok(_) => counter!("icsgate.notify.sent").increment(1),
            Err(e) => {
                counter!("icsgate.notify.dropped").increment(1);
                warn!(target = %self.target, error = %e, "notification dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icsgate_protocol::{BufferPool, FrameWriter, MessageType};
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_delivers_datagram() {
        let subscriber = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let notifier = UdpNotifier::bind(subscriber.local_addr().unwrap())
            .await
            .unwrap();

        let pool = BufferPool::new(128, 2);
        let mut w = FrameWriter::request(&pool, MessageType::EventPush).unwrap();
        w.put_short_str("GW001").unwrap();
        let frame = w.finish(1);
        notifier.push(&frame);

        let mut buf = [0u8; 128];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], frame.as_bytes());
    }
}
