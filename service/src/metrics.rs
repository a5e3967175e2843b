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

//! Connection and error counters
//!
//! The server keeps its own counts so tests and [`IcsServer`] snapshots can
//! read them back, and mirrors every change to the `metrics` facade under
//! `icsgate.connections.*` and `icsgate.errors.*` for whatever recorder the
//! binary installs.
//!
//! [`IcsServer`]: crate::IcsServer

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the listeners, the connection manager and every worker
#[derive(Debug, Default)]
pub struct ServerMetrics {
    opened: AtomicU64,
    open: AtomicU64,
    rejected: AtomicU64,
    socket_errors: AtomicU64,
    protocol_errors: AtomicU64,
    handler_errors: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection was admitted and its worker started
    pub fn connection_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.open.fetch_add(1, Ordering::Relaxed);
        counter!("icsgate.connections.opened").increment(1);
        gauge!("icsgate.connections.open").increment(1.0);
    }

    /// A worker finished and its connection left the manager
    pub fn connection_closed(&self) {
        self.open.fetch_sub(1, Ordering::Relaxed);
        gauge!("icsgate.connections.open").decrement(1.0);
    }

    /// An accept was turned away at `max_connections`
    pub fn connection_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("icsgate.connections.rejected").increment(1);
    }

    pub fn active_connections(&self) -> u64 {
        self.open.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Accept or socket failure
    pub fn connection_error(&self) {
        self.socket_errors.fetch_add(1, Ordering::Relaxed);
        counter!("icsgate.errors.socket").increment(1);
    }

    /// Undecodable stream or fatal handler error; the connection is closed
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        counter!("icsgate.errors.protocol").increment(1);
    }

    /// A handler rejected one message and the connection stays up
    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
        counter!("icsgate.errors.handler").increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.opened.load(Ordering::Relaxed),
            active_connections: self.open.load(Ordering::Relaxed),
            rejected_connections: self.rejected.load(Ordering::Relaxed),
            connection_errors: self.socket_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub connection_errors: u64,
    pub protocol_errors: u64,
    pub handler_errors: u64,
}
