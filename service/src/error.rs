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

//! Error types for the gateway service
//!
//! Every error carries its propagation policy through [`GatewayError::is_fatal`]:
//! fatal errors close the connection they occurred on, everything else is
//! logged at the dispatch boundary and the connection keeps running.

use icsgate_protocol::{CodecError, ProtocolError, ResourceError};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Authentication failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Unknown device or wrong password
    #[error("bad credentials for {identity:?}")]
    BadCredentials {
        /// Identity the peer claimed
        identity: String,
    },

    /// A site link did not finish its handshake in time
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The challenge echo came back too late
    #[error("handshake interval {elapsed:?} exceeds {limit:?}")]
    IntervalExceeded {
        /// Measured round trip
        elapsed: Duration,
        /// Allowed round trip
        limit: Duration,
    },

    /// The echoed challenge token is not the one that was sent
    #[error("handshake token mismatch")]
    TokenMismatch,

    /// The credential store failed while authenticating
    #[error("authentication backend failed: {0}")]
    Backend(String),
}

/// Routing failures; the forward attempt fails, the connection is unaffected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No identity translation exists
    #[error("no identity translation for {identity:?} at {site:?}")]
    IdentityNotFound {
        /// Site the identity belongs to
        site: String,
        /// Identity that could not be translated
        identity: String,
    },

    /// The remote site has no known address
    #[error("remote site {site:?} cannot be resolved")]
    SiteUnresolved {
        /// Enterprise ID of the site
        site: String,
    },

    /// The target is not connected
    #[error("{identity:?} is not connected")]
    NotConnected {
        /// Identity of the target
        identity: String,
    },
}

/// Persistence call failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// A stored procedure failed
    #[error("{procedure} failed: {reason}")]
    Call {
        /// Name of the procedure
        procedure: &'static str,
        /// Backend error text
        reason: String,
    },

    /// The backend could not be reached at all
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

/// Upgrade file transfer failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpgradeError {
    /// The file ID is unknown or the file cannot be opened
    #[error("upgrade file {file_id} not available: {reason}")]
    FileUnavailable {
        /// Upgrade file ID
        file_id: u32,
        /// Why it is not available
        reason: String,
    },

    /// The fragment starts past the end of the file
    #[error("fragment offset {offset} beyond length {file_len} of file {file_id}")]
    OffsetOutOfBounds {
        /// Upgrade file ID
        file_id: u32,
        /// Requested offset
        offset: u32,
        /// Real file length
        file_len: u64,
    },
}

/// Gateway service error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A message violates the wire format
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The stream could not be decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Authentication failed
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// A message could not be routed
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Out of buffers or queue space
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// A persistence call failed
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// An upgrade transfer failed
    #[error("upgrade error: {0}")]
    Upgrade(#[from] UpgradeError),

    /// A message arrived before authentication
    #[error("message type 0x{message_type:04X} before authentication")]
    Unauthenticated {
        /// Raw type ID of the rejected message
        message_type: u16,
    },

    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound connect did not complete in time
    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// Connection has been closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Server is not running
    #[error("server not running")]
    ServerNotRunning,

    /// Maximum number of connections reached
    #[error("maximum connections ({0}) reached")]
    MaxConnectionsReached(usize),

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Check if the error must close the connection it occurred on
    pub fn is_fatal(&self) -> bool {
        match self {
            GatewayError::Protocol(e) => {
                e.is_framing() || matches!(e, ProtocolError::UnknownMessageType(_))
            }
            GatewayError::Codec(CodecError::Resource(_)) => false,
            GatewayError::Codec(_) => true,
            GatewayError::Auth(e) => !matches!(e, AuthError::BadCredentials { .. }),
            GatewayError::Unauthenticated { .. }
            | GatewayError::Io(_)
            | GatewayError::ConnectionClosed => true,
            GatewayError::Routing(_)
            | GatewayError::Resource(_)
            | GatewayError::Persistence(_)
            | GatewayError::Upgrade(_)
            | GatewayError::ConnectTimeout(_)
            | GatewayError::ServerNotRunning
            | GatewayError::MaxConnectionsReached(_)
            | GatewayError::Other(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_errors_are_fatal() {
        let err = GatewayError::from(ProtocolError::CrcMismatch {
            declared: 1,
            computed: 2,
        });
        assert!(err.is_fatal());
        assert!(GatewayError::from(ProtocolError::UnknownMessageType(0x9999)).is_fatal());
        assert!(!GatewayError::from(ProtocolError::TrailingData { remaining: 2 }).is_fatal());
    }

    #[test]
    fn test_business_errors_are_not_fatal() {
        assert!(
            !GatewayError::from(PersistenceError::Call {
                procedure: "record_business",
                reason: "deadlock".into(),
            })
            .is_fatal()
        );
        assert!(
            !GatewayError::from(RoutingError::NotConnected {
                identity: "GW001".into()
            })
            .is_fatal()
        );
        assert!(!GatewayError::from(ResourceError::SendQueueFull { depth: 8 }).is_fatal());
    }

    #[test]
    fn test_auth_policy() {
        assert!(
            !GatewayError::from(AuthError::BadCredentials {
                identity: "GW001".into()
            })
            .is_fatal()
        );
        assert!(GatewayError::from(AuthError::HandshakeTimeout).is_fatal());
        assert!(GatewayError::from(AuthError::Backend("down".into())).is_fatal());
        assert!(GatewayError::Unauthenticated { message_type: 0x0501 }.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::MaxConnectionsReached(1000);
        assert_eq!(err.to_string(), "maximum connections (1000) reached");

        let err = GatewayError::Unauthenticated { message_type: 0x0501 };
        assert_eq!(err.to_string(), "message type 0x0501 before authentication");
    }
}
