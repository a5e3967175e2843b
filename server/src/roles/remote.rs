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

//! Remote proxy role
//!
//! The center's view of a site link. Once the handshake completes the link
//! is registered under the proxy's enterprise id and carries the proxy's
//! terminal traffic, which is translated to local identities and processed
//! as if the terminal were connected here. The link sends its own
//! heartbeats: a proxy closes idle links it accepted.

use super::handshake::{SiteHandshake, Step, keep_alive};
use super::terminal::ReportProcessor;
use crate::context::GatewayContext;
use crate::persistence::CommandStatus;
use async_trait::async_trait;
use icsgate_protocol::{Frame, FrameWriter, MessageType};
use icsgate_service::{IcsConnection, Result, Role, RoleHandler, RoutingError};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Handler for one site link on the center side
pub struct RemoteProxyHandler {
    ctx: Arc<GatewayContext>,
    handshake: SiteHandshake,
    site: Option<String>,
    devices: HashMap<String, ReportProcessor>,
}

impl RemoteProxyHandler {
    /// Create a handler for a new site link
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            handshake: SiteHandshake::default(),
            site: None,
            devices: HashMap::new(),
        }
    }

    async fn linked(&mut self, conn: &IcsConnection, site: String) {
        conn.bind_identity(&site);
        self.ctx.sites().add(&site, conn.clone());
        keep_alive(&self.ctx, conn);
        let enterprise = site.clone();
        if let Err(e) = self
            .ctx
            .db(move |db| db.record_site_online(&enterprise))
            .await
        {
            warn!(%site, error = %e, "site online state not recorded");
        }
        self.site = Some(site);
    }

    /// Resolve the proxy's identity for one of its terminals
    async fn local_identity(&self, site: &str, remote: &str) -> Option<String> {
        match self.ctx.translator().to_local(site, remote).await {
            Ok(Some(local)) => Some(local),
            Ok(None) => {
                let err = RoutingError::IdentityNotFound {
                    site: site.to_string(),
                    identity: remote.to_string(),
                };
                warn!(error = %err, "forwarded message dropped");
                counter!("icsgate.forward.dropped").increment(1);
                None
            }
            Err(e) => {
                warn!(site, remote, error = %e, "identity lookup failed, message dropped");
                counter!("icsgate.forward.dropped").increment(1);
                None
            }
        }
    }

    async fn forwarded_report(&mut self, site: &str, frame: &Frame) -> Result<()> {
        let mut r = frame.reader();
        let remote = r.get_short_str()?;
        let inner = r.get_u16()?;
        let body = r.get_long_bytes()?;
        r.assert_empty()?;

        let Some(kind) = MessageType::from_u16(inner).filter(|kind| kind.is_terminal()) else {
            warn!(site, remote = %remote, inner, "unknown forwarded message type ignored");
            return Ok(());
        };
        let Some(device) = self.local_identity(site, &remote).await else {
            return Ok(());
        };
        let processor = self.devices.entry(device.clone()).or_default();
        match processor.process(&self.ctx, &device, kind, body).await {
            Ok(_) => trace!(site, %device, kind = kind.name(), "forwarded report processed"),
            Err(e) => warn!(site, %device, kind = kind.name(), error = %e, "forwarded report failed"),
        }
        Ok(())
    }

    async fn presence(&mut self, conn: &IcsConnection, site: &str, frame: &Frame, online: bool) -> Result<()> {
        let mut r = frame.reader();
        let remote = r.get_short_str()?;
        r.assert_empty()?;

        let Some(device) = self.local_identity(site, &remote).await else {
            return Ok(());
        };
        let (owner, peer) = (device.clone(), conn.peer_addr());
        let recorded = if online {
            self.ctx.db(move |db| db.record_online(&owner, peer)).await
        } else {
            self.devices.remove(&device);
            self.ctx.db(move |db| db.record_offline(&owner)).await
        };
        match recorded {
            Ok(()) => debug!(site, %device, online, "remote terminal presence"),
            Err(e) => warn!(site, %device, online, error = %e, "remote presence not recorded"),
        }
        Ok(())
    }

    async fn forward_response(&self, frame: &Frame) -> Result<()> {
        let mut r = frame.reader();
        let command = r.get_u32()?;
        let result = r.get_u8()?;
        r.assert_empty()?;

        let status = if result == 0 {
            CommandStatus::Delivered
        } else {
            CommandStatus::Failed
        };
        debug!(command, %status, "site forward response");
        self.ctx.command_status(command, status).await;
        Ok(())
    }
}

#[async_trait]
impl RoleHandler for RemoteProxyHandler {
    fn role(&self) -> Role {
        Role::RemoteProxy
    }

    async fn on_connect(&mut self, conn: &IcsConnection) -> Result<()> {
        self.handshake.start(&self.ctx, conn)
    }

    async fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>> {
        let Some(site) = self.site.clone() else {
            if let Step::Complete(site) = self.handshake.handle(conn, frame)? {
                self.linked(conn, site).await;
            }
            return Ok(None);
        };

        match frame.kind() {
            Some(MessageType::SiteForwardToIcs) => self.forwarded_report(&site, frame).await?,
            Some(MessageType::SiteTerminalOnline) => self.presence(conn, &site, frame, true).await?,
            Some(MessageType::SiteTerminalOffline) => {
                self.presence(conn, &site, frame, false).await?
            }
            Some(MessageType::SiteForwardResponse) => self.forward_response(frame).await?,
            Some(MessageType::SiteHeartbeat) => trace!(%site, "site heartbeat"),
            _ => warn!(%site, message_type = frame.message_type(), "unexpected message on site link ignored"),
        }
        Ok(None)
    }

    async fn on_error(&mut self, conn: &IcsConnection) {
        let Some(site) = self.site.take() else {
            return;
        };
        if !self.ctx.sites().remove_if_current(&site, conn) {
            return;
        }
        let enterprise = site.clone();
        if let Err(e) = self
            .ctx
            .db(move |db| db.record_site_offline(&enterprise))
            .await
        {
            warn!(%site, error = %e, "site offline state not recorded");
        }
        info!(%site, "site link down");
    }
}

impl std::fmt::Debug for RemoteProxyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxyHandler")
            .field("site", &self.site)
            .field("devices", &self.devices.len())
            .finish()
    }
}
