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

//! Site link handshake
//!
//! Both ends of a site link send a [`MessageType::SiteChallenge`] carrying
//! their site id and an obfuscated clock token, and echo the token of the
//! peer's challenge back. A side considers the link authenticated once its
//! own token has come back in under [`HANDSHAKE_LIMIT`] and it has learned
//! the peer's site id.
//!
//! The check only bounds the round trip measured against the local clock;
//! it does not stop a replayed echo. It is kept as the peers expect it.

use crate::context::GatewayContext;
use icsgate_protocol::{ChallengeToken, Frame, MessageType};
use icsgate_service::{AuthError, ConnectionState, GatewayError, IcsConnection, Result};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Longest accepted challenge round trip
pub const HANDSHAKE_LIMIT: Duration = Duration::from_secs(5);

/// Seconds a link may take to authenticate
const HANDSHAKE_DEADLINE_SECS: u32 = 5;

/// Handshake progress after one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Still waiting for the peer
    Pending,
    /// Both directions verified; carries the peer's site id
    Complete(String),
}

/// Handshake state of one site link
#[derive(Debug, Default)]
pub struct SiteHandshake {
    sent: Option<ChallengeToken>,
    echoed: bool,
    peer_site: Option<String>,
    complete: bool,
}

impl SiteHandshake {
    /// Send our challenge and arm the handshake deadline
    pub fn start(&mut self, ctx: &GatewayContext, conn: &IcsConnection) -> Result<()> {
        let token = ChallengeToken::now();
        let mut w = conn.request(MessageType::SiteChallenge)?;
        w.put_short_str(ctx.site_id())?;
        w.put_u32(token.secs)?;
        w.put_u16(token.millis)?;
        conn.send(w)?;
        self.sent = Some(token);

        let link = conn.clone();
        ctx.timer().add(HANDSHAKE_DEADLINE_SECS, move || {
            if link.is_valid() && !link.is_authenticated() {
                warn!(connection = %link.name(), error = %AuthError::HandshakeTimeout, "site link closed");
                link.close(ConnectionState::Errored);
            }
            0
        });
        Ok(())
    }

    /// Check if the handshake finished
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Peer site id, once announced
    pub fn peer_site(&self) -> Option<&str> {
        self.peer_site.as_deref()
    }

    /// Feed one message received before completion
    pub fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Step> {
        match frame.kind() {
            Some(MessageType::SiteChallenge) => {
                let mut r = frame.reader();
                let site = r.get_short_str()?;
                let token = ChallengeToken {
                    secs: r.get_u32()?,
                    millis: r.get_u16()?,
                };
                r.assert_empty()?;
                debug!(connection = %conn.name(), peer_site = %site, "challenge received");
                self.peer_site = Some(site);

                let mut w = conn.request(MessageType::SiteChallengeEcho)?;
                w.put_u32(token.secs)?;
                w.put_u16(token.millis)?;
                conn.send(w)?;
            }
            Some(MessageType::SiteChallengeEcho) => {
                let mut r = frame.reader();
                let token = ChallengeToken {
                    secs: r.get_u32()?,
                    millis: r.get_u16()?,
                };
                r.assert_empty()?;
                self.verify_echo(token, SystemTime::now())?;
            }
            _ => {
                return Err(GatewayError::Unauthenticated {
                    message_type: frame.message_type(),
                });
            }
        }

        match (&self.peer_site, self.echoed) {
            (Some(site), true) => {
                self.complete = true;
                Ok(Step::Complete(site.clone()))
            }
            _ => Ok(Step::Pending),
        }
    }

    fn verify_echo(&mut self, token: ChallengeToken, now: SystemTime) -> Result<()> {
        if self.sent != Some(token) {
            return Err(AuthError::TokenMismatch.into());
        }
        let elapsed = token.elapsed_at(now);
        if elapsed >= HANDSHAKE_LIMIT {
            return Err(AuthError::IntervalExceeded {
                elapsed,
                limit: HANDSHAKE_LIMIT,
            }
            .into());
        }
        self.echoed = true;
        Ok(())
    }
}

/// Send [`MessageType::SiteHeartbeat`] on `link` every heartbeat interval
/// until it closes
///
/// Both ends of an authenticated site link run this; the accepting end is
/// idle-supervised and closes a silent link.
pub(crate) fn keep_alive(ctx: &GatewayContext, link: &IcsConnection) {
    let interval = ctx.heartbeat_interval();
    let link = link.clone();
    ctx.timer().add(interval, move || {
        if !link.is_valid() {
            return 0;
        }
        let sent = link
            .request(MessageType::SiteHeartbeat)
            .and_then(|w| link.send(w));
        if let Err(e) = sent {
            warn!(link = %link.name(), error = %e, "site heartbeat not sent");
        }
        interval
    });
}
