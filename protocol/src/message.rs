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

//! The closed enumeration of ICS message types
//!
//! Values are stable wire constants, grouped by range:
//!
//! | Range           | Link                         |
//! |-----------------|------------------------------|
//! | `0x0100-0x0bff` | Terminal <-> Center          |
//! | `0x2000-0x2fff` | Web <-> Center               |
//! | `0x3000-0x3fff` | Push to external subscribers |
//! | `0x4000-0x4fff` | Center <-> Proxy site link   |

use crate::ProtocolError;
use std::fmt;

macro_rules! message_types {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)*) => {
        /// ICS message type ID
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum MessageType {
            $($(#[$doc])* $name = $value,)*
        }

        impl MessageType {
            /// Every known message type, in ID order
            pub const ALL: &'static [MessageType] = &[$(MessageType::$name,)*];

            /// Look up a wire value, `None` if it is not part of the enumeration.
            pub fn from_u16(value: u16) -> Option<Self> {
                match value {
                    $($value => Some(MessageType::$name),)*
                    _ => None,
                }
            }

            /// Symbolic name, for logs
            pub fn name(self) -> &'static str {
                match self {
                    $(MessageType::$name => stringify!($name),)*
                }
            }
        }
    };
}

message_types! {
    /// Terminal login: device id and password
    TerminalAuth = 0x0101,
    /// Center offers a firmware file to a terminal
    UpgradeNotify = 0x0201,
    /// Terminal declines an offered upgrade
    UpgradeDeny = 0x0202,
    /// Terminal accepts an offered upgrade
    UpgradeAgree = 0x0203,
    /// Terminal requests one fragment of the upgrade file
    UpgradeFragment = 0x0204,
    /// Terminal reports the outcome of an upgrade
    UpgradeResult = 0x0205,
    /// Center cancels a running upgrade
    UpgradeCancel = 0x0206,
    /// Terminal acknowledges a cancelled upgrade
    UpgradeCancelAck = 0x0207,
    /// Fixed-layout device status
    StandardStatus = 0x0301,
    /// Key/value device status
    CustomStatus = 0x0302,
    /// Device event or alarm
    EventReport = 0x0401,
    /// Weighing business record
    BusinessReport = 0x0501,
    /// Position fix
    GpsReport = 0x0601,
    /// Center reads terminal parameters
    ParamQuery = 0x0701,
    /// Terminal returns parameter values
    ParamQueryResult = 0x0702,
    /// Center writes terminal parameters
    ParamModify = 0x0801,
    /// Terminal returns per-parameter write results
    ParamModifyResult = 0x0802,
    /// Clock synchronisation round-trip
    ClockSync = 0x0901,
    /// Terminal keep-alive
    Heartbeat = 0x0a01,
    /// Free-form terminal log line
    LogReport = 0x0b01,
    /// Web asks the center to deliver a message to a local terminal
    WebForwardToTerminal = 0x2001,
    /// Web asks the center to open a link to a proxy site
    WebConnectRemote = 0x2002,
    /// Web asks the center to drop a proxy site link
    WebDisconnectRemote = 0x2003,
    /// Web asks the center to deliver a message to a terminal behind a proxy
    WebForwardToRemoteTerminal = 0x2004,
    /// Event summary pushed to an external subscriber
    EventPush = 0x3001,
    /// Site link handshake: obfuscated timestamp challenge
    SiteChallenge = 0x4001,
    /// Site link handshake: challenge echoed back
    SiteChallengeEcho = 0x4002,
    /// Center asks a proxy to deliver a message to one of its terminals
    SiteForwardToTerminal = 0x4003,
    /// Proxy reports the outcome of a forwarded delivery
    SiteForwardResponse = 0x4004,
    /// Proxy announces a terminal login
    SiteTerminalOnline = 0x4005,
    /// Proxy announces a terminal logout
    SiteTerminalOffline = 0x4006,
    /// Proxy relays a terminal report to the center
    SiteForwardToIcs = 0x4007,
    /// Site link keep-alive
    SiteHeartbeat = 0x4008,
}

impl MessageType {
    /// Wire value
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Check if the type belongs to the terminal link range
    pub fn is_terminal(self) -> bool {
        (0x0100..0x0c00).contains(&self.as_u16())
    }

    /// Check if the type belongs to the web command range
    pub fn is_web(self) -> bool {
        (0x2000..0x3000).contains(&self.as_u16())
    }

    /// Check if the type belongs to the site link range
    pub fn is_site(self) -> bool {
        (0x4000..0x5000).contains(&self.as_u16())
    }
}

impl TryFrom<u16> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        MessageType::from_u16(value).ok_or(ProtocolError::UnknownMessageType(value))
    }
}

impl From<MessageType> for u16 {
    fn from(value: MessageType) -> Self {
        value.as_u16()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:04X})", self.name(), self.as_u16())
    }
}
