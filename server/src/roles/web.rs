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

//! Web role
//!
//! The web tier issues commands without authenticating. Every command is
//! answered at once with its command number and `ok` or `failed`; whether a
//! forwarded message was delivered is recorded through persistence.

use crate::context::GatewayContext;
use crate::persistence::CommandStatus;
use async_trait::async_trait;
use icsgate_protocol::{Frame, FrameWriter, MessageType, ProtocolError};
use icsgate_service::{
    ConnectionState, GatewayError, IcsConnection, Result, Role, RoleHandler, RoutingError,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const STATUS_OK: &str = "ok";
const STATUS_FAILED: &str = "failed";

/// Handler for one web connection
pub struct WebHandler {
    ctx: Arc<GatewayContext>,
}

impl WebHandler {
    /// Create a handler for a new web connection
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self { ctx }
    }

    async fn forward_local(&self, command: u32, frame: &Frame) -> Result<bool> {
        let mut r = frame.reader();
        r.skip(4)?;
        let device = r.get_short_str()?;
        let inner = r.get_u16()?;
        let body = r.get_long_bytes()?;
        r.assert_empty()?;

        match self.ctx.forward_to_terminal(&device, inner, body) {
            Ok(()) => {
                debug!(command, %device, inner, "forwarded to terminal");
                self.ctx
                    .command_status(command, CommandStatus::Delivered)
                    .await;
                Ok(true)
            }
            Err(e) => {
                warn!(command, %device, inner, error = %e, "forward to terminal failed");
                self.ctx.command_status(command, CommandStatus::Failed).await;
                Ok(false)
            }
        }
    }

    async fn connect_remote(&self, command: u32, frame: &Frame) -> Result<bool> {
        let mut r = frame.reader();
        r.skip(4)?;
        let enterprise = r.get_short_str()?;
        r.assert_empty()?;

        if self.ctx.sites().find(&enterprise).is_some() {
            debug!(command, %enterprise, "site already linked");
            self.ctx
                .command_status(command, CommandStatus::Delivered)
                .await;
            return Ok(true);
        }
        let site = enterprise.clone();
        let address = match self.ctx.db(move |db| db.site_address(&site)).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                let err = RoutingError::SiteUnresolved { site: enterprise };
                warn!(command, error = %err, "connect refused");
                self.ctx.command_status(command, CommandStatus::Failed).await;
                return Ok(false);
            }
            Err(e) => {
                warn!(command, %enterprise, error = %e, "site address lookup failed");
                self.ctx.command_status(command, CommandStatus::Failed).await;
                return Ok(false);
            }
        };

        let factory = super::remote_proxy(self.ctx.clone());
        match self
            .ctx
            .server()
            .connect_tcp(Role::RemoteProxy, address, factory)
            .await
        {
            Ok(link) => {
                info!(command, %enterprise, %address, link = %link.name(), "site link opened");
                self.ctx
                    .command_status(command, CommandStatus::Delivered)
                    .await;
                Ok(true)
            }
            Err(e) => {
                warn!(command, %enterprise, %address, error = %e, "site link not opened");
                self.ctx.command_status(command, CommandStatus::Failed).await;
                Ok(false)
            }
        }
    }

    async fn disconnect_remote(&self, command: u32, frame: &Frame) -> Result<bool> {
        let mut r = frame.reader();
        r.skip(4)?;
        let enterprise = r.get_short_str()?;
        r.assert_empty()?;

        // The link handler unregisters itself and records the site offline.
        let Some(link) = self.ctx.sites().find(&enterprise) else {
            debug!(command, %enterprise, "no such site link");
            self.ctx.command_status(command, CommandStatus::Failed).await;
            return Ok(false);
        };
        info!(command, %enterprise, link = %link.name(), "closing site link");
        link.close(ConnectionState::Closed);
        self.ctx
            .command_status(command, CommandStatus::Delivered)
            .await;
        Ok(true)
    }

    async fn forward_remote(&self, command: u32, frame: &Frame) -> Result<bool> {
        let mut r = frame.reader();
        r.skip(4)?;
        let enterprise = r.get_short_str()?;
        let device = r.get_short_str()?;
        let inner = r.get_u16()?;
        let body = r.get_long_bytes()?;
        r.assert_empty()?;

        // Recorded first so the site's delivery report cannot be overwritten.
        self.ctx.command_status(command, CommandStatus::Sent).await;
        let sent = self
            .send_remote(command, &enterprise, &device, inner, body)
            .await;
        match sent {
            Ok(()) => {
                debug!(command, %enterprise, %device, inner, "forwarded to site");
                Ok(true)
            }
            Err(e) => {
                warn!(command, %enterprise, %device, error = %e, "forward to site failed");
                self.ctx.command_status(command, CommandStatus::Failed).await;
                Ok(false)
            }
        }
    }

    async fn send_remote(
        &self,
        command: u32,
        enterprise: &str,
        device: &str,
        inner: u16,
        body: &[u8],
    ) -> Result<()> {
        let link = self
            .ctx
            .sites()
            .find(enterprise)
            .ok_or_else(|| RoutingError::NotConnected {
                identity: enterprise.to_string(),
            })?;
        let remote = self
            .ctx
            .translator()
            .to_remote(enterprise, device)
            .await?
            .ok_or_else(|| RoutingError::IdentityNotFound {
                site: enterprise.to_string(),
                identity: device.to_string(),
            })?;
        let mut w = link.request(MessageType::SiteForwardToTerminal)?;
        w.put_u32(command)?;
        w.put_short_str(&remote)?;
        w.put_u16(inner)?;
        w.put_long_bytes(body)?;
        link.send(w)
    }
}

#[async_trait]
impl RoleHandler for WebHandler {
    fn role(&self) -> Role {
        Role::Web
    }

    #[instrument(skip_all, fields(connection = %conn.name(), message_type = frame.message_type()))]
    async fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>> {
        let kind = match frame.kind() {
            Some(kind) if kind.is_web() => kind,
            _ => return Err(ProtocolError::UnknownMessageType(frame.message_type()).into()),
        };
        let command = frame.reader().get_u32()?;
        let ok = match kind {
            MessageType::WebForwardToTerminal => self.forward_local(command, frame).await?,
            MessageType::WebConnectRemote => self.connect_remote(command, frame).await?,
            MessageType::WebDisconnectRemote => self.disconnect_remote(command, frame).await?,
            MessageType::WebForwardToRemoteTerminal => {
                self.forward_remote(command, frame).await?
            }
            other => {
                return Err(GatewayError::from(ProtocolError::UnknownMessageType(
                    other.as_u16(),
                )));
            }
        };

        let mut w = conn.response(frame)?;
        w.put_u32(command)?;
        w.put_short_str(if ok { STATUS_OK } else { STATUS_FAILED })?;
        Ok(Some(w))
    }
}

impl std::fmt::Debug for WebHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebHandler").finish_non_exhaustive()
    }
}
