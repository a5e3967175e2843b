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

//! Terminal role
//!
//! A terminal must authenticate before anything else. After that every
//! report is decoded, persisted and acknowledged; in proxy mode it is also
//! relayed to the center.

use crate::config::Mode;
use crate::context::GatewayContext;
use crate::files::{FileInfo, clamp_fragment};
use crate::persistence::UpgradeState;
use crate::report::{
    AuthRequest, BusinessReport, CustomStatus, EventReport, GpsReport, LogReport,
    StandardStatus, UpgradeMessage, decode_param_results, decode_param_values,
};
use async_trait::async_trait;
use icsgate_protocol::{
    Frame, FrameReader, FrameWriter, IcsTimestamp, MessageType, ProtocolError, ProtocolResult,
};
use icsgate_service::{AuthError, GatewayError, IcsConnection, Result, Role, RoleHandler};
use metrics::counter;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const STATUS_OK: &str = "ok";
const STATUS_FAILED: &str = "failed";

/// Response body of a processed report
pub(crate) enum Reply {
    Empty,
    EventId(u32),
    BusinessSeq(u32),
    Fragment {
        file_id: u32,
        offset: u32,
        file: Arc<FileInfo>,
        range: Range<usize>,
    },
}

impl Reply {
    fn write(&self, w: &mut FrameWriter) -> ProtocolResult<()> {
        match self {
            Reply::Empty => Ok(()),
            Reply::EventId(id) | Reply::BusinessSeq(id) => w.put_u32(*id),
            Reply::Fragment {
                file_id,
                offset,
                file,
                range,
            } => {
                w.put_u32(*file_id)?;
                w.put_u32(*offset)?;
                w.put_long_bytes(&file.content()[range.clone()])
            }
        }
    }
}

/// What processing a report produced
pub(crate) struct Outcome {
    pub(crate) reply: Reply,
    /// The report is new and is relayed upstream in proxy mode
    pub(crate) relay: bool,
}

impl Outcome {
    fn relayed(reply: Reply) -> Self {
        Self { reply, relay: true }
    }
}

/// Per-device report state
///
/// Used by terminal connections and, on the center, by site links for each
/// forwarded device.
#[derive(Debug, Default)]
pub(crate) struct ReportProcessor {
    last_business_seq: Option<u32>,
}

impl ReportProcessor {
    /// Decode one terminal report and apply its side effects
    pub(crate) async fn process(
        &mut self,
        ctx: &GatewayContext,
        device: &str,
        kind: MessageType,
        body: &[u8],
    ) -> Result<Outcome> {
        let mut r = FrameReader::new(body);
        let owner = device.to_string();
        match kind {
            MessageType::StandardStatus => {
                let status = fully(&mut r, StandardStatus::decode)?;
                ctx.db(move |db| db.record_status(&owner, &status)).await?;
                Ok(Outcome::relayed(Reply::Empty))
            }
            MessageType::CustomStatus => {
                let status = fully(&mut r, CustomStatus::decode)?;
                ctx.db(move |db| db.record_custom_status(&owner, &status))
                    .await?;
                Ok(Outcome::relayed(Reply::Empty))
            }
            MessageType::EventReport => {
                let event = fully(&mut r, EventReport::decode)?;
                let event_id = event.event_id;
                ctx.push_event(device, &event);
                ctx.db(move |db| db.record_event(&owner, &event)).await?;
                Ok(Outcome::relayed(Reply::EventId(event_id)))
            }
            MessageType::BusinessReport => {
                let report = fully(&mut r, BusinessReport::decode)?;
                let seq = report.seq;
                if self.last_business_seq == Some(seq) {
                    debug!(device, seq, "duplicate business report");
                    counter!("icsgate.business.duplicates").increment(1);
                    return Ok(Outcome {
                        reply: Reply::Empty,
                        relay: false,
                    });
                }
                ctx.db(move |db| db.record_business(&owner, &report)).await?;
                self.last_business_seq = Some(seq);
                Ok(Outcome::relayed(Reply::BusinessSeq(seq)))
            }
            MessageType::GpsReport => {
                let report = fully(&mut r, GpsReport::decode)?;
                ctx.db(move |db| db.record_gps(&owner, &report)).await?;
                Ok(Outcome::relayed(Reply::Empty))
            }
            MessageType::ParamQueryResult => {
                let values = fully(&mut r, decode_param_values)?;
                ctx.db(move |db| db.record_param_values(&owner, &values))
                    .await?;
                Ok(Outcome::relayed(Reply::Empty))
            }
            MessageType::ParamModifyResult => {
                let results = fully(&mut r, decode_param_results)?;
                ctx.db(move |db| db.record_param_results(&owner, &results))
                    .await?;
                Ok(Outcome::relayed(Reply::Empty))
            }
            MessageType::LogReport => {
                let log = fully(&mut r, LogReport::decode)?;
                if log.reencoded {
                    debug!(device, "log payload was not UTF-8, re-encoded");
                }
                ctx.db(move |db| db.record_log(&owner, &log)).await?;
                Ok(Outcome::relayed(Reply::Empty))
            }
            MessageType::UpgradeDeny
            | MessageType::UpgradeAgree
            | MessageType::UpgradeFragment
            | MessageType::UpgradeResult
            | MessageType::UpgradeCancelAck => {
                let message = fully(&mut r, |r| UpgradeMessage::decode(kind, r))?;
                self.upgrade(ctx, owner, message).await
            }
            other => Err(ProtocolError::UnknownMessageType(other.as_u16()).into()),
        }
    }

    async fn upgrade(
        &mut self,
        ctx: &GatewayContext,
        device: String,
        message: UpgradeMessage,
    ) -> Result<Outcome> {
        let file_id = message.file_id();
        let state = match message {
            UpgradeMessage::Fragment {
                file_id,
                offset,
                length,
            } => {
                let file = ctx.file_info(file_id).await?;
                let range = clamp_fragment(file_id, file.len(), offset, length, ctx.max_segment())?;
                // Fragments are served locally and never relayed.
                return Ok(Outcome {
                    reply: Reply::Fragment {
                        file_id,
                        offset,
                        file,
                        range,
                    },
                    relay: false,
                });
            }
            UpgradeMessage::Deny { reason, .. } => {
                info!(%device, file_id, %reason, "upgrade denied");
                UpgradeState::Denied
            }
            UpgradeMessage::Agree { .. } => UpgradeState::Agreed,
            UpgradeMessage::Result {
                result, message, ..
            } => {
                info!(%device, file_id, result, %message, "upgrade finished");
                UpgradeState::Finished(result)
            }
            UpgradeMessage::CancelAck { .. } => UpgradeState::Cancelled,
        };
        ctx.db(move |db| db.record_upgrade_state(&device, file_id, state))
            .await?;
        Ok(Outcome::relayed(Reply::Empty))
    }
}

/// Decode with `f` and require the body to be fully consumed
fn fully<'a, T>(
    r: &mut FrameReader<'a>,
    f: impl FnOnce(&mut FrameReader<'a>) -> ProtocolResult<T>,
) -> ProtocolResult<T> {
    let value = f(r)?;
    r.assert_empty()?;
    Ok(value)
}

/// Handler for one terminal connection
pub struct TerminalHandler {
    ctx: Arc<GatewayContext>,
    identity: Option<String>,
    reports: ReportProcessor,
}

impl TerminalHandler {
    /// Create a handler for a new terminal connection
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            ctx,
            identity: None,
            reports: ReportProcessor::default(),
        }
    }

    #[instrument(skip_all, fields(connection = %conn.name()))]
    async fn authenticate(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<FrameWriter> {
        let request = fully(&mut frame.reader(), AuthRequest::decode)?;
        let heartbeat = u16::try_from(self.ctx.heartbeat_interval()).unwrap_or(u16::MAX);
        let reply = |status: &str| -> Result<FrameWriter> {
            let mut w = conn.response(frame)?;
            w.put_short_str(status)?;
            w.put_u16(heartbeat)?;
            Ok(w)
        };

        if let Some(current) = &self.identity {
            // Already authenticated: same identity is answered again, no re-registration.
            return if *current == request.device {
                reply(STATUS_OK)
            } else {
                warn!(current = %current, claimed = %request.device, "re-auth with a different identity");
                reply(STATUS_FAILED)
            };
        }

        let (device, password) = (request.device.clone(), request.password);
        let accepted = self
            .ctx
            .db(move |db| db.authenticate_device(&device, &password))
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        if !accepted {
            let err = AuthError::BadCredentials {
                identity: request.device.clone(),
            };
            warn!(error = %err, "login refused");
            counter!("icsgate.auth.failed").increment(1);
            return reply(STATUS_FAILED);
        }

        let device = request.device;
        conn.bind_identity(&device);
        self.ctx.terminals().add(&device, conn.clone());
        self.identity = Some(device.clone());
        counter!("icsgate.auth.succeeded").increment(1);

        let (owner, peer) = (device.clone(), conn.peer_addr());
        if let Err(e) = self.ctx.db(move |db| db.record_online(&owner, peer)).await {
            warn!(device = %device, error = %e, "online state not recorded");
        }
        if self.ctx.mode() == Mode::Proxy {
            self.ctx
                .notify_center(MessageType::SiteTerminalOnline, &device);
        }
        reply(STATUS_OK)
    }
}

#[async_trait]
impl RoleHandler for TerminalHandler {
    fn role(&self) -> Role {
        Role::Terminal
    }

    async fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>> {
        let Some(kind) = frame.kind() else {
            return Err(ProtocolError::UnknownMessageType(frame.message_type()).into());
        };
        if kind == MessageType::TerminalAuth {
            return self.authenticate(conn, frame).await.map(Some);
        }
        let Some(device) = self.identity.clone() else {
            return Err(GatewayError::Unauthenticated {
                message_type: frame.message_type(),
            });
        };

        match kind {
            MessageType::Heartbeat => {
                frame.reader().assert_empty()?;
                Ok(Some(conn.response(frame)?))
            }
            MessageType::ClockSync => {
                let received = IcsTimestamp::now();
                let client = fully(&mut frame.reader(), |r| r.get_timestamp())?;
                let mut w = conn.response(frame)?;
                w.put_timestamp(&client)?;
                w.put_timestamp(&received)?;
                w.put_timestamp(&IcsTimestamp::now())?;
                Ok(Some(w))
            }
            kind if kind.is_terminal() => {
                let outcome = self
                    .reports
                    .process(&self.ctx, &device, kind, frame.body())
                    .await?;
                if outcome.relay && self.ctx.mode() == Mode::Proxy {
                    self.ctx
                        .relay_to_center(&device, frame.message_type(), frame.body());
                }
                let mut w = conn.response(frame)?;
                outcome.reply.write(&mut w)?;
                Ok(Some(w))
            }
            other => Err(ProtocolError::UnknownMessageType(other.as_u16()).into()),
        }
    }

    async fn on_error(&mut self, conn: &IcsConnection) {
        let Some(device) = self.identity.take() else {
            return;
        };
        if !self.ctx.terminals().remove_if_current(&device, conn) {
            return;
        }
        let owner = device.clone();
        if let Err(e) = self.ctx.db(move |db| db.record_offline(&owner)).await {
            warn!(device = %device, error = %e, "offline state not recorded");
        }
        if self.ctx.mode() == Mode::Proxy {
            self.ctx
                .notify_center(MessageType::SiteTerminalOffline, &device);
        }
        info!(device = %device, "terminal offline");
    }
}

impl std::fmt::Debug for TerminalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalHandler")
            .field("identity", &self.identity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::files::MappedFileCache;
    use crate::persistence::MemoryPersistence;
    use icsgate_protocol::BufferPool;
    use icsgate_service::IcsServer;
    use tracing_test::traced_test;

    fn context(db: &Arc<MemoryPersistence>) -> GatewayContext {
        let config = GatewayConfig::from_toml_str(
            r#"
            [server]
            mode = "center"
            site_id = "ICS-HQ"
            terminal_tcp = "127.0.0.1:0"
            "#,
        )
        .unwrap();
        let server = Arc::new(IcsServer::new(config.server_config()).unwrap());
        let files = Arc::new(MappedFileCache::new(db.clone()));
        GatewayContext::new(&config, server, db.clone(), files, None)
    }

    fn business(seq: u32) -> Vec<u8> {
        let pool = BufferPool::new(256, 2);
        let mut w = FrameWriter::request(&pool, MessageType::BusinessReport).unwrap();
        w.put_u32(seq).unwrap();
        w.put_timestamp(&IcsTimestamp::now()).unwrap();
        w.put_u16(0).unwrap();
        for weight in [900, 100, 800] {
            w.put_u32(weight).unwrap();
        }
        w.put_short_str("").unwrap();
        w.put_short_str("ZZ-1").unwrap();
        w.finish(1).body().to_vec()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_duplicate_business_report_not_stored() {
        let db = Arc::new(MemoryPersistence::new());
        let ctx = context(&db);
        let mut reports = ReportProcessor::default();

        let first = reports
            .process(&ctx, "GW001", MessageType::BusinessReport, &business(3))
            .await
            .unwrap();
        assert!(first.relay);
        assert!(matches!(first.reply, Reply::BusinessSeq(3)));

        let again = reports
            .process(&ctx, "GW001", MessageType::BusinessReport, &business(3))
            .await
            .unwrap();
        assert!(!again.relay);
        assert!(matches!(again.reply, Reply::Empty));
        assert!(logs_contain("duplicate business report"));

        reports
            .process(&ctx, "GW001", MessageType::BusinessReport, &business(4))
            .await
            .unwrap();
        assert_eq!(db.call_count("record_business"), 2);
    }

    #[tokio::test]
    async fn test_failed_insert_is_not_fatal() {
        let db = Arc::new(MemoryPersistence::new());
        let ctx = context(&db);
        let mut reports = ReportProcessor::default();

        db.fail_on("record_business");
        let err = reports
            .process(&ctx, "GW001", MessageType::BusinessReport, &business(8))
            .await
            .err()
            .unwrap();
        assert!(!err.is_fatal());
        assert!(db.business_rows().is_empty());
    }

    #[tokio::test]
    async fn test_commands_from_terminal_are_rejected() {
        let db = Arc::new(MemoryPersistence::new());
        let ctx = context(&db);
        let err = ReportProcessor::default()
            .process(&ctx, "GW001", MessageType::ParamQuery, &[0])
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
