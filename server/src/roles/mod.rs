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

//! Role handlers
//!
//! | Role                       | Peer                         | Handler                 |
//! |----------------------------|------------------------------|-------------------------|
//! | [`Role::Terminal`]         | field terminal               | [`TerminalHandler`]     |
//! | [`Role::Web`]              | web back-end                 | [`WebHandler`]          |
//! | [`Role::RemoteProxy`]      | proxy, seen from the center  | [`RemoteProxyHandler`]  |
//! | [`Role::Center`]           | center, seen from a proxy    | [`CenterHandler`]       |

mod center;
mod handshake;
mod remote;
mod terminal;
mod web;

pub use self::center::CenterHandler;
pub use self::handshake::{HANDSHAKE_LIMIT, SiteHandshake, Step};
pub use self::remote::RemoteProxyHandler;
pub use self::terminal::TerminalHandler;
pub use self::web::WebHandler;

use crate::context::GatewayContext;
use icsgate_service::{HandlerFactory, IcsConnection, RoleHandler};
#[cfg(doc)]
use icsgate_service::Role;
use std::sync::Arc;

/// Factory for [`TerminalHandler`]s
pub fn terminal(ctx: Arc<GatewayContext>) -> Arc<dyn HandlerFactory> {
    Arc::new(move |_: &IcsConnection| -> Box<dyn RoleHandler> {
        Box::new(TerminalHandler::new(ctx.clone()))
    })
}

/// Factory for [`WebHandler`]s
pub fn web(ctx: Arc<GatewayContext>) -> Arc<dyn HandlerFactory> {
    Arc::new(move |_: &IcsConnection| -> Box<dyn RoleHandler> {
        Box::new(WebHandler::new(ctx.clone()))
    })
}

/// Factory for [`RemoteProxyHandler`]s
pub fn remote_proxy(ctx: Arc<GatewayContext>) -> Arc<dyn HandlerFactory> {
    Arc::new(move |_: &IcsConnection| -> Box<dyn RoleHandler> {
        Box::new(RemoteProxyHandler::new(ctx.clone()))
    })
}

/// Factory for [`CenterHandler`]s
pub fn center(ctx: Arc<GatewayContext>) -> Arc<dyn HandlerFactory> {
    Arc::new(move |_: &IcsConnection| -> Box<dyn RoleHandler> {
        Box::new(CenterHandler::new(ctx.clone()))
    })
}
