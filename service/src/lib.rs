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

//! ICS Gateway Service
//!
//! Connection plumbing shared by every gateway role:
//!
//! - Multiple TCP and UDP listeners on one server, each bound to a [`Role`]
//! - Outbound TCP links to peer gateways
//! - A single writer per connection behind a bounded send queue
//! - Identity registries where a newer session replaces the older one
//! - An interval timer driving idle supervision and handshake deadlines
//! - Lock-free metrics and monitoring
//!
//! # Architecture
//!
//! ```text
//! IcsServer ── IntervalTimer
//!     ↓
//! ConnectionManager
//!     ↓
//! ConnectionWorker → RoleHandler
//!     ↓
//! IcsConnection → send queue → SendWorker → transport
//! ```
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use icsgate_protocol::{Frame, FrameWriter};
//! use icsgate_service::{IcsConnection, IcsServer, Result, Role, RoleHandler, ServerConfig};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl RoleHandler for Echo {
//!     fn role(&self) -> Role {
//!         Role::Web
//!     }
//!
//!     async fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>> {
//!         let mut reply = conn.response(frame)?;
//!         reply.put_raw(frame.body())?;
//!         Ok(Some(reply))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = IcsServer::new(ServerConfig::default())?;
//!     let factory = |_: &IcsConnection| -> Box<dyn RoleHandler> { Box::new(Echo) };
//!     server
//!         .listen_tcp(Role::Web, "0.0.0.0:9200".parse().unwrap(), Arc::new(factory))
//!         .await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await
//! }
//! ```

mod config;
mod connection;
mod error;
mod handler;
mod manager;
mod metrics;
mod registry;
mod server;
mod timer;
pub mod transport;
mod types;
mod worker;

pub use config::{PoolConfig, ServerConfig};
pub use connection::{ConnectionOptions, IcsConnection};
pub use error::{
    AuthError, GatewayError, PersistenceError, Result, RoutingError, UpgradeError,
};
pub use handler::{HandlerFactory, RoleHandler};
pub use manager::ConnectionManager;
pub use self::metrics::{MetricsSnapshot, ServerMetrics};
pub use registry::SessionRegistry;
pub use server::IcsServer;
pub use timer::IntervalTimer;
pub use types::{ConnectionId, ConnectionInfo, ConnectionState, Role, ServerSnapshot};
pub use worker::{ConnectionWorker, SendWorker};
