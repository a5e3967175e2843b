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

//! Server configuration
//!
//! # Example
//!
//! ```
//! use icsgate_service::{PoolConfig, ServerConfig};
//! use std::time::Duration;
//!
//! let config = ServerConfig::default()
//!     .with_max_connections(500)
//!     .with_heartbeat_interval(30)
//!     .with_pool(PoolConfig::new(8192, 2048));
//! assert!(config.validate().is_ok());
//! ```

use icsgate_protocol::BufferPool;
use icsgate_protocol::consts::{MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use std::time::Duration;

/// Sizing of the shared frame buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Size of each buffer; also the largest frame accepted
    pub chunk_size: usize,
    /// Number of buffers, fixed for the life of the process
    pub chunk_count: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            chunk_count: 1024,
        }
    }
}

impl PoolConfig {
    /// A pool of `chunk_count` buffers of `chunk_size` bytes
    pub fn new(chunk_size: usize, chunk_count: usize) -> Self {
        Self {
            chunk_size,
            chunk_count,
        }
    }

    /// Allocate the pool
    pub fn build(&self) -> BufferPool {
        BufferPool::new(self.chunk_size, self.chunk_count)
    }
}

/// Server configuration
///
/// This structure contains all configuration options for the gateway server.
/// Use the builder pattern methods to customize the configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of concurrent connections across all listeners
    pub max_connections: usize,

    /// Frames a connection may have queued for sending
    pub send_queue_depth: usize,

    /// Seconds between idle checks; zero disables idle supervision
    pub heartbeat_interval: u32,

    /// Idle checks without traffic before a connection is closed
    ///
    /// The effective idle window is `timeout_threshold * heartbeat_interval`.
    pub timeout_threshold: u32,

    /// Timeout for outbound connects
    pub connect_timeout: Duration,

    /// Timeout for a single frame write
    pub write_timeout: Duration,

    /// Timeout for graceful shutdown
    ///
    /// The server will wait this long for connections to close gracefully before
    /// forcing them to close.
    pub shutdown_timeout: Duration,

    /// Frame buffer pool sizing
    pub pool: PoolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            send_queue_depth: 64,
            heartbeat_interval: 30,
            timeout_threshold: 2,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            pool: PoolConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-connection send queue depth
    pub fn with_send_queue_depth(mut self, depth: usize) -> Self {
        self.send_queue_depth = depth;
        self
    }

    /// Set the heartbeat interval in seconds
    pub fn with_heartbeat_interval(mut self, secs: u32) -> Self {
        self.heartbeat_interval = secs;
        self
    }

    /// Set the number of silent intervals tolerated
    pub fn with_timeout_threshold(mut self, threshold: u32) -> Self {
        self.timeout_threshold = threshold;
        self
    }

    /// Set the outbound connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the write timeout duration
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the shutdown timeout duration
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the buffer pool sizing
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Validate the configuration
    ///
    /// Returns an error message if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.send_queue_depth == 0 {
            return Err("send_queue_depth must be greater than 0".to_string());
        }
        if self.timeout_threshold == 0 {
            return Err("timeout_threshold must be greater than 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        if self.write_timeout.is_zero() {
            return Err("write_timeout must be greater than 0".to_string());
        }
        if self.pool.chunk_count == 0 {
            return Err("pool chunk_count must be greater than 0".to_string());
        }
        if self.pool.chunk_size < MIN_FRAME_SIZE || self.pool.chunk_size > MAX_FRAME_SIZE {
            return Err(format!(
                "pool chunk_size must be between {MIN_FRAME_SIZE} and {MAX_FRAME_SIZE}"
            ));
        }
        Ok(())
    }
}
