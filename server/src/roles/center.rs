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

//! Center role
//!
//! The proxy's view of its site link to the center. After the handshake the
//! proxy keeps the link alive with [`MessageType::SiteHeartbeat`], announces
//! its online terminals and delivers the center's forwarded commands.

use super::handshake::{SiteHandshake, Step, keep_alive};
use crate::context::GatewayContext;
use async_trait::async_trait;
use icsgate_protocol::{Frame, FrameWriter, MessageType};
use icsgate_service::{IcsConnection, Result, Role, RoleHandler};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const FORWARD_DELIVERED: u8 = 0;
const FORWARD_FAILED: u8 = 1;

/// Handler for the site link on the proxy side
pub struct CenterHandler {
    ctx: Arc<GatewayContext>,
    handshake: SiteHandshake,
    site: Option<String>,
}

impl CenterHandler {
    /// Create a handler for a new center link
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            handshake: SiteHandshake::default(),
            site: None,
        }
    }

    fn linked(&mut self, conn: &IcsConnection, site: String) {
        conn.bind_identity(&site);
        self.ctx.sites().add(&site, conn.clone());
        self.ctx.set_center(Some(site.clone()));

        keep_alive(&self.ctx, conn);

        let online = self.ctx.terminals().identities();
        debug!(%site, terminals = online.len(), "announcing online terminals");
        for device in online {
            self.ctx
                .notify_center(MessageType::SiteTerminalOnline, &device);
        }
        self.site = Some(site);
    }

    fn deliver(&self, conn: &IcsConnection, frame: &Frame) -> Result<()> {
        let mut r = frame.reader();
        let command = r.get_u32()?;
        let device = r.get_short_str()?;
        let inner = r.get_u16()?;
        let body = r.get_long_bytes()?;
        r.assert_empty()?;

        let result = match self.ctx.forward_to_terminal(&device, inner, body) {
            Ok(()) => {
                debug!(command, %device, inner, "center command delivered");
                FORWARD_DELIVERED
            }
            Err(e) => {
                warn!(command, %device, inner, error = %e, "center command not delivered");
                FORWARD_FAILED
            }
        };
        let mut w = conn.request(MessageType::SiteForwardResponse)?;
        w.put_u32(command)?;
        w.put_u8(result)?;
        conn.send(w)
    }
}

#[async_trait]
impl RoleHandler for CenterHandler {
    fn role(&self) -> Role {
        Role::Center
    }

    async fn on_connect(&mut self, conn: &IcsConnection) -> Result<()> {
        self.handshake.start(&self.ctx, conn)
    }

    async fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>> {
        let Some(site) = self.site.clone() else {
            if let Step::Complete(site) = self.handshake.handle(conn, frame)? {
                self.linked(conn, site);
            }
            return Ok(None);
        };

        match frame.kind() {
            Some(MessageType::SiteForwardToTerminal) => self.deliver(conn, frame)?,
            Some(MessageType::SiteHeartbeat) => trace!(%site, "center heartbeat"),
            _ => warn!(%site, message_type = frame.message_type(), "unexpected message on center link ignored"),
        }
        Ok(None)
    }

    async fn on_error(&mut self, conn: &IcsConnection) {
        let Some(site) = self.site.take() else {
            return;
        };
        if self.ctx.sites().remove_if_current(&site, conn) {
            self.ctx.clear_center(&site);
            info!(%site, "center link down");
        }
    }
}

impl std::fmt::Debug for CenterHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CenterHandler")
            .field("site", &self.site)
            .finish()
    }
}
