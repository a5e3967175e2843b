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

//! Gateway assembly
//!
//! [`Gateway::start`] turns a validated [`GatewayConfig`] into running
//! listeners. Which listeners exist depends on the mode:
//!
//! | Listener       | Center                         | Proxy                         |
//! |----------------|--------------------------------|-------------------------------|
//! | `terminal_tcp` | terminals                      | terminals                     |
//! | `terminal_udp` | terminals                      | terminals                     |
//! | `web`          | web back-end                   | web back-end                  |
//! | `site_link`    | proxies dialling in            | the center dialling in        |
//! | `center`       |                                | dialled out, redialled        |

use crate::config::{GatewayConfig, Mode};
use crate::context::GatewayContext;
use crate::error::StartupError;
use crate::files::MappedFileCache;
use crate::notify::{NotificationSink, UdpNotifier};
use crate::persistence::Persistence;
use crate::roles;
use icsgate_service::{IcsConnection, IcsServer, Role, ServerSnapshot};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Addresses the listeners actually bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundAddrs {
    /// Terminal TCP listener
    pub terminal_tcp: SocketAddr,
    /// Terminal UDP socket
    pub terminal_udp: Option<SocketAddr>,
    /// Web listener
    pub web: Option<SocketAddr>,
    /// Site link listener
    pub site_link: Option<SocketAddr>,
}

/// A running gateway
pub struct Gateway {
    ctx: Arc<GatewayContext>,
    server: Arc<IcsServer>,
    bound: BoundAddrs,
}

impl Gateway {
    /// Validate `config`, bind every configured listener and, in proxy mode
    /// with a center address, start dialling the center.
    pub async fn start(
        config: GatewayConfig,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self, StartupError> {
        config.validate()?;
        let server = Arc::new(IcsServer::new(config.server_config()).map_err(StartupError::Protocol)?);

        let files = Arc::new(MappedFileCache::new(persistence.clone()));
        let notifier = match config.notify.address {
            Some(target) => {
                let notifier = UdpNotifier::bind(target)
                    .await
                    .map_err(|e| StartupError::Protocol(e.into()))?;
                Some(Arc::new(notifier) as Arc<dyn NotificationSink>)
            }
            None => None,
        };
        let ctx = Arc::new(GatewayContext::new(
            &config,
            server.clone(),
            persistence,
            files,
            notifier,
        ));

        let listen = &config.server;
        let terminal_tcp = server
            .listen_tcp(Role::Terminal, listen.terminal_tcp, roles::terminal(ctx.clone()))
            .await
            .map_err(StartupError::Protocol)?;
        let terminal_udp = match listen.terminal_udp {
            Some(addr) => Some(
                server
                    .listen_udp(Role::Terminal, addr, roles::terminal(ctx.clone()))
                    .await
                    .map_err(StartupError::Protocol)?,
            ),
            None => None,
        };
        let web = match listen.web {
            Some(addr) => Some(
                server
                    .listen_tcp(Role::Web, addr, roles::web(ctx.clone()))
                    .await
                    .map_err(StartupError::Protocol)?,
            ),
            None => None,
        };
        let site_link = match listen.site_link {
            Some(addr) => {
                let (role, factory) = match listen.mode {
                    Mode::Center => (Role::RemoteProxy, roles::remote_proxy(ctx.clone())),
                    Mode::Proxy => (Role::Center, roles::center(ctx.clone())),
                };
                Some(
                    server
                        .listen_tcp(role, addr, factory)
                        .await
                        .map_err(StartupError::Protocol)?,
                )
            }
            None => None,
        };

        if let (Mode::Proxy, Some(center)) = (listen.mode, listen.center) {
            dial_center(ctx.clone(), center);
        }

        info!(
            mode = %listen.mode,
            site = %listen.site_id,
            terminals = %terminal_tcp,
            "gateway started"
        );
        Ok(Self {
            ctx,
            server,
            bound: BoundAddrs {
                terminal_tcp,
                terminal_udp,
                web,
                site_link,
            },
        })
    }

    /// Bound listener addresses
    pub fn bound(&self) -> &BoundAddrs {
        &self.bound
    }

    /// Shared handler state
    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.ctx
    }

    /// Underlying server
    pub fn server(&self) -> &Arc<IcsServer> {
        &self.server
    }

    /// Point-in-time server state
    pub fn snapshot(&self) -> ServerSnapshot {
        self.server.snapshot()
    }

    /// Stop listeners, timer chains and connections
    pub async fn shutdown(&self) -> Result<(), StartupError> {
        self.server
            .shutdown()
            .await
            .map_err(|e| StartupError::Runtime(e.to_string()))
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("ctx", &self.ctx)
            .field("bound", &self.bound)
            .finish()
    }
}

/// Keep one outbound link to the center open
///
/// Dials at once, then checks every heartbeat interval and redials when the
/// last link is gone.
fn dial_center(ctx: Arc<GatewayContext>, center: SocketAddr) {
    let interval = ctx.heartbeat_interval();
    let current: Arc<Mutex<Option<IcsConnection>>> = Arc::new(Mutex::new(None));
    let dialing = Arc::new(AtomicBool::new(false));
    let timer_owner = ctx.clone();

    let mut tick = move || -> u32 {
        let linked = current.lock().as_ref().is_some_and(IcsConnection::is_valid);
        if linked || dialing.swap(true, Ordering::AcqRel) {
            return interval;
        }
        let (ctx, current, dialing) = (ctx.clone(), current.clone(), dialing.clone());
        tokio::spawn(async move {
            let factory = roles::center(ctx.clone());
            match ctx.server().connect_tcp(Role::Center, center, factory).await {
                Ok(link) => {
                    debug!(%center, link = %link.name(), "center dialled");
                    *current.lock() = Some(link);
                }
                Err(e) => warn!(%center, error = %e, "center not reachable"),
            }
            dialing.store(false, Ordering::Release);
        });
        interval
    };
    tick();
    timer_owner.timer().add(interval, tick);
}
