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

//! Core types for the gateway service

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Unique identifier for a connection (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state (stored as atomic u8 for lock-free state management)
///
/// ```text
/// Connecting -> Authenticating -> Active -> { Replaced | TimedOut | Errored } -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket accepted, worker not yet running
    Connecting = 0,
    /// Waiting for the peer to authenticate
    Authenticating = 1,
    /// Authenticated, or a role without authentication
    Active = 2,
    /// A newer connection claimed the same identity
    Replaced = 3,
    /// No valid message within the timeout window
    TimedOut = 4,
    /// Closed after a fatal error
    Errored = 5,
    /// Closed by the peer or by the server
    Closed = 6,
}

impl ConnectionState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Authenticating,
            2 => Self::Active,
            3 => Self::Replaced,
            4 => Self::TimedOut,
            5 => Self::Errored,
            _ => Self::Closed,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the connection has left the live states for good
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Replaced | Self::TimedOut | Self::Errored | Self::Closed
        )
    }

    /// Check if the connection may carry business traffic
    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Active => write!(f, "active"),
            Self::Replaced => write!(f, "replaced"),
            Self::TimedOut => write!(f, "timed-out"),
            Self::Errored => write!(f, "errored"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// The kind of peer a connection talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// A field terminal
    Terminal,
    /// The web back-end
    Web,
    /// A proxy site, seen from the center
    RemoteProxy,
    /// The center, seen from a proxy site
    Center,
}

impl Role {
    /// Check if peers of this role must authenticate before anything else
    pub fn requires_auth(self) -> bool {
        !matches!(self, Self::Web)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal => write!(f, "terminal"),
            Self::Web => write!(f, "web"),
            Self::RemoteProxy => write!(f, "remote-proxy"),
            Self::Center => write!(f, "center"),
        }
    }
}

/// Connection information snapshot (for non-blocking queries)
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Display name, `peer` or `identity@peer`
    pub name: String,
    /// Peer role
    pub role: Role,
    /// Current state
    pub state: ConnectionState,
    /// Peer address
    pub peer_addr: SocketAddr,
    /// Authenticated identity, if any
    pub identity: Option<String>,
    /// When the connection was created
    pub created_at: Instant,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total frames sent
    pub frames_sent: u64,
    /// Total frames received
    pub frames_received: u64,
}

impl ConnectionInfo {
    /// Get the connection duration
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Server snapshot for non-blocking debug information
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Number of live connections
    pub active_connections: usize,
    /// Total connections since server start
    pub total_connections: u64,
    /// Bound listeners
    pub listeners: Vec<(Role, SocketAddr)>,
    /// Running interval timer chains
    pub timer_chains: usize,
    /// Free buffers in the frame pool
    pub free_buffers: usize,
    /// Server uptime
    pub uptime: Duration,
    /// Server start time
    pub started_at: Instant,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IcsServer {{ active: {}, total: {}, listeners: {}, free buffers: {}, uptime: {:?} }}",
            self.active_connections,
            self.total_connections,
            self.listeners.len(),
            self.free_buffers,
            self.uptime
        )
    }
}
