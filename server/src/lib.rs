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

//! # ICS Gateway Server
//!
//! The gateway application built on [`icsgate_service`]: role handlers for
//! terminals, the web back-end and site links, plus the collaborators they
//! call into.
//!
//! ## Deployment modes
//!
//! A **center** accepts terminals and the web back-end and opens site links
//! to proxies on request of the web tier. A **proxy** accepts terminals of its
//! own site, relays their reports to the center over a site link and
//! delivers the center's commands to its terminals.
//!
//! ## Collaborators
//!
//! - [`Persistence`]: blocking stored-procedure calls, run off the reactor
//! - [`FileCache`]: memory-mapped upgrade images
//! - [`NotificationSink`]: fire-and-forget event pushes
//! - [`IdentityTranslator`]: remote/local identity directory with a cache
//!
//! ## Example
//!
//! ```no_run
//! use icsgate_server::{Gateway, GatewayConfig, MemoryPersistence};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), icsgate_server::StartupError> {
//! let config = GatewayConfig::load("/etc/icsconf.toml")?;
//! let persistence = MemoryPersistence::from_config(&config)
//!     .map_err(|e| icsgate_server::StartupError::Persistence(e.to_string()))?;
//! let gateway = Gateway::start(config, Arc::new(persistence)).await?;
//! tokio::signal::ctrl_c().await.ok();
//! gateway.shutdown().await
//! # }
//! ```

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]

mod config;
mod context;
mod error;
mod files;
mod gateway;
mod notify;
mod persistence;
pub mod report;
pub mod roles;
mod translate;

pub use self::config::{
    DeviceEntry, FileEntry, GatewayConfig, LoggingSection, Mode, NotifySection, PoolSection,
    ServerSection, SiteEntry, TranslationEntry, UpgradeSection,
};
pub use self::context::GatewayContext;
pub use self::error::{ConfigError, StartupError};
pub use self::files::{FileCache, FileInfo, MappedFileCache, clamp_fragment};
pub use self::gateway::{BoundAddrs, Gateway};
pub use self::notify::{NotificationSink, UdpNotifier};
pub use self::persistence::{
    CommandStatus, MemoryPersistence, Persistence, PersistenceResult, UpgradeState,
};
pub use self::translate::IdentityTranslator;
