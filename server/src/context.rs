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

//! Shared gateway state
//!
//! One [`GatewayContext`] is built at startup and handed to every role
//! handler. It carries the collaborators, both session registries and the
//! server the handlers open outbound links through.

use crate::config::{GatewayConfig, Mode};
use crate::files::{FileCache, FileInfo};
use crate::notify::NotificationSink;
use crate::persistence::{CommandStatus, Persistence, PersistenceResult};
use crate::report::EventReport;
use crate::translate::{IdentityTranslator, blocking};
use icsgate_protocol::{FrameWriter, MessageType};
use icsgate_service::{
    IcsConnection, IcsServer, IntervalTimer, PersistenceError, Result, RoutingError,
    SessionRegistry, UpgradeError,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tracing::{debug, warn};

/// Everything role handlers share
pub struct GatewayContext {
    mode: Mode,
    site_id: String,
    heartbeat_interval: u32,
    max_segment: usize,
    persistence: Arc<dyn Persistence>,
    files: Arc<dyn FileCache>,
    notifier: Option<Arc<dyn NotificationSink>>,
    translator: IdentityTranslator,
    terminals: SessionRegistry,
    sites: SessionRegistry,
    center: RwLock<Option<String>>,
    push_seq: AtomicU16,
    server: Arc<IcsServer>,
}

impl GatewayContext {
    /// Assemble the context
    pub fn new(
        config: &GatewayConfig,
        server: Arc<IcsServer>,
        persistence: Arc<dyn Persistence>,
        files: Arc<dyn FileCache>,
        notifier: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self {
            mode: config.server.mode,
            site_id: config.server.site_id.clone(),
            heartbeat_interval: config.server.heartbeat_interval,
            max_segment: config.upgrade.max_segment,
            translator: IdentityTranslator::new(persistence.clone()),
            persistence,
            files,
            notifier,
            terminals: SessionRegistry::new("terminals"),
            sites: SessionRegistry::new("sites"),
            center: RwLock::new(None),
            push_seq: AtomicU16::new(0),
            server,
        }
    }

    /// Center or proxy
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Enterprise id announced on site links
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Heartbeat interval in seconds
    pub fn heartbeat_interval(&self) -> u32 {
        self.heartbeat_interval
    }

    /// Largest upgrade fragment served
    pub fn max_segment(&self) -> usize {
        self.max_segment
    }

    /// Authenticated terminals
    pub fn terminals(&self) -> &SessionRegistry {
        &self.terminals
    }

    /// Authenticated site links, keyed by enterprise id
    pub fn sites(&self) -> &SessionRegistry {
        &self.sites
    }

    /// Remote/local identity directory
    pub fn translator(&self) -> &IdentityTranslator {
        &self.translator
    }

    /// The server all connections belong to
    pub fn server(&self) -> &Arc<IcsServer> {
        &self.server
    }

    /// Shared interval timer
    pub fn timer(&self) -> &IntervalTimer {
        self.server.timer()
    }

    /// Run a persistence call on the blocking pool
    pub async fn db<T, F>(&self, f: F) -> std::result::Result<T, PersistenceError>
    where
        F: FnOnce(&dyn Persistence) -> PersistenceResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let persistence = self.persistence.clone();
        blocking(move || f(persistence.as_ref())).await
    }

    /// Load an upgrade file on the blocking pool
    pub async fn file_info(&self, file_id: u32) -> std::result::Result<Arc<FileInfo>, UpgradeError> {
        let files = self.files.clone();
        tokio::task::spawn_blocking(move || files.file_info(file_id))
            .await
            .map_err(|e| UpgradeError::FileUnavailable {
                file_id,
                reason: e.to_string(),
            })?
    }

    /// Remember the authenticated center link (proxy mode)
    pub fn set_center(&self, site: Option<String>) {
        *self.center.write() = site;
    }

    /// Forget the center link if it is still `site`
    pub fn clear_center(&self, site: &str) {
        let mut center = self.center.write();
        if center.as_deref() == Some(site) {
            *center = None;
        }
    }

    /// The authenticated center link, if any
    pub fn center_link(&self) -> Option<IcsConnection> {
        let site = self.center.read().clone()?;
        self.sites.find(&site)
    }

    /// Relay a terminal message to the center as `SiteForwardToIcs`
    pub fn relay_to_center(&self, device: &str, message_type: u16, body: &[u8]) {
        let Some(link) = self.center_link() else {
            debug!(device, message_type, "no center link, relay skipped");
            return;
        };
        let sent = link.request(MessageType::SiteForwardToIcs).and_then(|mut w| {
            w.put_short_str(device)?;
            w.put_u16(message_type)?;
            w.put_long_bytes(body)?;
            link.send(w)
        });
        if let Err(e) = sent {
            warn!(device, message_type, link = %link.name(), error = %e, "relay to center failed");
        }
    }

    /// Re-dispatch a message to a locally connected terminal
    ///
    /// The message keeps its original type ID and body; only the envelope
    /// around it is dropped.
    pub fn forward_to_terminal(&self, device: &str, message_type: u16, body: &[u8]) -> Result<()> {
        let target = self.terminals.find(device).ok_or_else(|| RoutingError::NotConnected {
            identity: device.to_string(),
        })?;
        let mut w = FrameWriter::with_raw_type(target.pool(), message_type)?;
        w.put_raw(body)?;
        target.send(w)
    }

    /// Record the outcome of a web command, logging instead of failing
    pub async fn command_status(&self, command: u32, status: CommandStatus) {
        if let Err(e) = self
            .db(move |db| db.record_command_status(command, status))
            .await
        {
            warn!(command, %status, error = %e, "command status not recorded");
        }
    }

    /// Tell the center a local terminal came online or went offline
    pub fn notify_center(&self, kind: MessageType, device: &str) {
        let Some(link) = self.center_link() else {
            return;
        };
        let sent = link.request(kind).and_then(|mut w| {
            w.put_short_str(device)?;
            link.send(w)
        });
        if let Err(e) = sent {
            warn!(device, kind = kind.name(), error = %e, "presence notice to center failed");
        }
    }

    /// Push an event summary to the notification sink, if one is configured
    pub fn push_event(&self, device: &str, event: &EventReport) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let built = FrameWriter::request(self.server.pool(), MessageType::EventPush)
            .map_err(icsgate_protocol::CodecError::from)
            .and_then(|mut w| {
                event.encode_push(device, &mut w)?;
                Ok(w)
            });
        match built {
            Ok(w) => notifier.push(&w.finish(self.push_seq.fetch_add(1, Ordering::Relaxed))),
            Err(e) => warn!(device, error = %e, "event push not built"),
        }
    }
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("mode", &self.mode)
            .field("site_id", &self.site_id)
            .field("terminals", &self.terminals.len())
            .field("sites", &self.sites.len())
            .finish()
    }
}
