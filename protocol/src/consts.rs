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

//! Wire constants of the ICS protocol

/// Magic tag that opens every frame.
pub const MAGIC: [u8; 4] = *b"ICS#";

/// Protocol version every peer must speak.
///
/// Frames carrying any other version are rejected before a single field is read.
pub const PROTOCOL_VERSION: u16 = 0x0101;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Size of the CRC32 trailer in bytes.
pub const CRC_SIZE: usize = 4;

/// Smallest possible frame: a header, an empty body and the trailer.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CRC_SIZE;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Longest payload of a short (1-byte length prefixed) string.
pub const MAX_SHORT_STRING: usize = u8::MAX as usize;

/// Longest payload of a long (2-byte length prefixed) string.
pub const MAX_LONG_STRING: usize = u16::MAX as usize;

/// Encoded size of a packed timestamp.
pub const TIMESTAMP_SIZE: usize = 8;

/// Header flag bits
pub mod flags {
    /// Mask over the 4-bit encryption mode.
    pub const ENCRYPTION_MASK: u16 = 0x000F;
    /// Set on responses, clear on requests.
    pub const ACK: u16 = 0x0010;
    /// Set when the sender expects a response.
    pub const RESPONSE_NEEDED: u16 = 0x0020;
}

/// Encryption modes carried in the low nibble of the header flags
pub mod encryption {
    /// Body travels in the clear.
    pub const NONE: u8 = 0;
    /// Body is XOR-obfuscated with [`super::XOR_KEY`].
    pub const XOR: u8 = 1;
}

/// Key of the XOR obfuscation hook.
pub const XOR_KEY: [u8; 8] = [0x49, 0x43, 0x53, 0x23, 0x5A, 0x3C, 0x96, 0xE1];
