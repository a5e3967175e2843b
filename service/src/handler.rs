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

//! Role handler traits
//!
//! Every connection gets its own handler instance from a [`HandlerFactory`],
//! so per-connection protocol state (handshake progress, last business
//! sequence number) lives in the handler and needs no locking.

use crate::{IcsConnection, Result, Role};
use async_trait::async_trait;
use icsgate_protocol::{Frame, FrameWriter};

/// Per-role message dispatch
///
/// # Example
///
/// ```no_run
/// use async_trait::async_trait;
/// use icsgate_protocol::{Frame, FrameWriter};
/// use icsgate_service::{IcsConnection, Result, Role, RoleHandler};
///
/// struct Echo;
///
/// #[async_trait]
/// impl RoleHandler for Echo {
///     fn role(&self) -> Role {
///         Role::Web
///     }
///
///     async fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>> {
///         let mut reply = conn.response(frame)?;
///         reply.put_raw(frame.body())?;
///         Ok(Some(reply))
///     }
/// }
/// ```
#[async_trait]
pub trait RoleHandler: Send + 'static {
    /// The role this handler serves
    fn role(&self) -> Role;

    /// Called once before the first frame is read
    ///
    /// An error here closes the connection.
    async fn on_connect(&mut self, _conn: &IcsConnection) -> Result<()> {
        Ok(())
    }

    /// Handle one request frame
    ///
    /// A returned writer is sent as the response. Errors are classified by
    /// [`crate::GatewayError::is_fatal`]: fatal ones close the connection, the
    /// rest are logged and the connection keeps reading.
    async fn handle(&mut self, conn: &IcsConnection, frame: &Frame) -> Result<Option<FrameWriter>>;

    /// Called once after the connection stopped for any reason other than
    /// being replaced
    async fn on_error(&mut self, _conn: &IcsConnection) {}
}

/// Creates a handler for each new connection
pub trait HandlerFactory: Send + Sync + 'static {
    /// Build the handler for `conn`
    fn create(&self, conn: &IcsConnection) -> Box<dyn RoleHandler>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&IcsConnection) -> Box<dyn RoleHandler> + Send + Sync + 'static,
{
    fn create(&self, conn: &IcsConnection) -> Box<dyn RoleHandler> {
        self(conn)
    }
}
