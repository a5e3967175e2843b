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

//! Session registry
//!
//! Maps an authenticated identity (device ID or enterprise ID) to its live
//! connection. At most one connection is registered per identity: adding a
//! second one replaces the first, which is told to close.

use crate::{GatewayError, IcsConnection, Result, RoutingError};
use dashmap::DashMap;
use icsgate_protocol::FrameWriter;
use metrics::gauge;
use std::sync::Arc;
use tracing::debug;

/// Identity to connection map with replace-on-duplicate semantics
#[derive(Clone)]
pub struct SessionRegistry {
    name: &'static str,
    sessions: Arc<DashMap<String, IcsConnection>>,
}

impl SessionRegistry {
    /// Create an empty registry; `name` labels its log lines and gauge
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Install `conn` under `identity`.
    ///
    /// A different connection already registered under `identity` is marked
    /// replaced after the new entry is in place. Re-adding the same
    /// connection is a no-op.
    pub fn add(&self, identity: &str, conn: IcsConnection) {
        let previous = self.sessions.insert(identity.to_string(), conn.clone());
        match previous {
            Some(old) if !old.same(&conn) => {
                debug!(registry = self.name, identity, old = %old.name(), "replacing session");
                old.replaced();
            }
            Some(_) => {}
            None => {
                gauge!("icsgate.sessions", "registry" => self.name).increment(1.0);
            }
        }
    }

    /// Remove whatever is registered under `identity`
    pub fn remove(&self, identity: &str) -> Option<IcsConnection> {
        let removed = self.sessions.remove(identity).map(|(_, conn)| conn);
        if removed.is_some() {
            gauge!("icsgate.sessions", "registry" => self.name).decrement(1.0);
        }
        removed
    }

    /// Remove the entry for `identity` only if it still points at `conn`.
    ///
    /// Returns true if an entry was removed. A replaced connection calling
    /// this cannot evict its successor.
    pub fn remove_if_current(&self, identity: &str, conn: &IcsConnection) -> bool {
        let removed = self
            .sessions
            .remove_if(identity, |_, current| current.same(conn))
            .is_some();
        if removed {
            gauge!("icsgate.sessions", "registry" => self.name).decrement(1.0);
        }
        removed
    }

    /// Look up the connection registered under `identity`
    pub fn find(&self, identity: &str) -> Option<IcsConnection> {
        self.sessions.get(identity).map(|entry| entry.value().clone())
    }

    /// Send `writer` to the connection registered under `identity`.
    ///
    /// Failure leaves the registry untouched.
    pub fn send_to(&self, identity: &str, writer: FrameWriter) -> Result<()> {
        let conn = self.find(identity).ok_or_else(|| {
            GatewayError::from(RoutingError::NotConnected {
                identity: identity.to_string(),
            })
        })?;
        conn.send(writer)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered identities
    pub fn identities(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("name", &self.name)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionId, ConnectionOptions, ConnectionState, Role};
    use icsgate_protocol::{BufferPool, Frame, MessageType};
    use tokio::sync::mpsc;

    fn connection(id: u64, pool: &BufferPool) -> (IcsConnection, mpsc::Receiver<Frame>) {
        IcsConnection::new(
            ConnectionId::new(id),
            format!("10.0.0.{id}:5000").parse().unwrap(),
            Role::Terminal,
            pool.clone(),
            ConnectionOptions::default(),
        )
    }

    #[test]
    fn test_duplicate_identity_replaces() {
        let pool = BufferPool::new(128, 8);
        let registry = SessionRegistry::new("terminals");
        let (c1, _rx1) = connection(1, &pool);
        let (c2, _rx2) = connection(2, &pool);

        registry.add("D1", c1.clone());
        registry.add("D1", c2.clone());

        assert!(registry.find("D1").unwrap().same(&c2));
        assert_eq!(c1.state(), ConnectionState::Replaced);
        assert!(!c1.is_valid());
        assert!(c2.is_valid());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_readding_same_connection_keeps_it() {
        let pool = BufferPool::new(128, 8);
        let registry = SessionRegistry::new("terminals");
        let (c1, _rx) = connection(1, &pool);
        registry.add("D1", c1.clone());
        registry.add("D1", c1.clone());
        assert!(c1.is_valid());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_replaced_connection_cannot_evict_successor() {
        let pool = BufferPool::new(128, 8);
        let registry = SessionRegistry::new("terminals");
        let (c1, _rx1) = connection(1, &pool);
        let (c2, _rx2) = connection(2, &pool);
        registry.add("D1", c1.clone());
        registry.add("D1", c2.clone());

        assert!(!registry.remove_if_current("D1", &c1));
        assert!(registry.find("D1").is_some());
        assert!(registry.remove_if_current("D1", &c2));
        assert!(registry.find("D1").is_none());
    }

    #[test]
    fn test_send_to_unknown_identity() {
        let pool = BufferPool::new(128, 8);
        let registry = SessionRegistry::new("terminals");
        let writer = FrameWriter::request(&pool, MessageType::ParamQuery).unwrap();
        let err = registry.send_to("nobody", writer).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Routing(RoutingError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_send_to_registered_identity() {
        let pool = BufferPool::new(128, 8);
        let registry = SessionRegistry::new("terminals");
        let (c1, mut rx) = connection(1, &pool);
        registry.add("D1", c1);
        let writer = FrameWriter::request(&pool, MessageType::ParamQuery).unwrap();
        registry.send_to("D1", writer).unwrap();
        assert_eq!(
            rx.try_recv().unwrap().kind(),
            Some(MessageType::ParamQuery)
        );
    }
}
