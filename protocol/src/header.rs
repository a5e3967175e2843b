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

//! Frame header and integrity verification
//!
//! ```text
//! offset 0:  4 bytes  magic "ICS#"
//! offset 4:  2 bytes  protocol version
//! offset 6:  2 bytes  total frame length L (header + body + CRC)
//! offset 8:  2 bytes  flags: bits[0..4)=encryption, bit4=ack, bit5=response-needed
//! offset 10: 2 bytes  send sequence number
//! offset 12: 2 bytes  ack sequence number
//! offset 14: 2 bytes  message type ID
//! offset 16: ...      body
//! offset L-4: 4 bytes CRC32 over bytes [0, L-4)
//! ```

use crate::consts::{self, CRC_SIZE, HEADER_SIZE, MAGIC, MIN_FRAME_SIZE, PROTOCOL_VERSION};
use crate::{MessageType, ProtocolError, ProtocolResult};
use byteorder::ByteOrder;

/// Byte order of every multi-byte field on the wire.
///
/// Changing this alias switches the whole codec; peers must agree on it.
pub type WireOrder = byteorder::LittleEndian;

/// Header flag bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(u16);

impl HeaderFlags {
    /// Wrap a raw flag word
    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw flag word
    pub fn bits(self) -> u16 {
        self.0
    }

    /// 4-bit encryption mode
    pub fn encryption(self) -> u8 {
        (self.0 & consts::flags::ENCRYPTION_MASK) as u8
    }

    /// Check if this frame is a response
    pub fn is_ack(self) -> bool {
        self.0 & consts::flags::ACK != 0
    }

    /// Check if the sender expects a response
    pub fn response_needed(self) -> bool {
        self.0 & consts::flags::RESPONSE_NEEDED != 0
    }

    /// Set the encryption mode (low 4 bits are kept)
    pub fn with_encryption(self, mode: u8) -> Self {
        Self((self.0 & !consts::flags::ENCRYPTION_MASK) | (mode as u16 & consts::flags::ENCRYPTION_MASK))
    }

    /// Set or clear the ack bit
    pub fn with_ack(self, ack: bool) -> Self {
        self.with_bit(consts::flags::ACK, ack)
    }

    /// Set or clear the response-needed bit
    pub fn with_response_needed(self, needed: bool) -> Self {
        self.with_bit(consts::flags::RESPONSE_NEEDED, needed)
    }

    fn with_bit(self, bit: u16, on: bool) -> Self {
        if on { Self(self.0 | bit) } else { Self(self.0 & !bit) }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcsHeader {
    /// Protocol version
    pub version: u16,
    /// Total frame length, header and trailer included
    pub length: u16,
    /// Flag bitfield
    pub flags: HeaderFlags,
    /// Sender's sequence number for this frame
    pub send_seq: u16,
    /// Sequence number of the request this frame answers
    pub ack_seq: u16,
    /// Raw message type ID
    pub message_type: u16,
}

impl IcsHeader {
    /// A header for `message_type` with every other field zeroed.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            length: MIN_FRAME_SIZE as u16,
            flags: HeaderFlags::default(),
            send_seq: 0,
            ack_seq: 0,
            message_type: message_type.as_u16(),
        }
    }

    /// The message type, if it is part of the enumeration
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u16(self.message_type)
    }

    /// Length of the body implied by the length field
    pub fn body_len(&self) -> usize {
        (self.length as usize).saturating_sub(MIN_FRAME_SIZE)
    }

    /// Serialize into the first [`HEADER_SIZE`] bytes of `dst`.
    pub fn write_to(&self, dst: &mut [u8]) -> ProtocolResult<()> {
        if dst.len() < HEADER_SIZE {
            return Err(ProtocolError::Overflow {
                required: HEADER_SIZE,
                available: dst.len(),
            });
        }
        dst[0..4].copy_from_slice(&MAGIC);
        WireOrder::write_u16(&mut dst[4..6], self.version);
        WireOrder::write_u16(&mut dst[6..8], self.length);
        WireOrder::write_u16(&mut dst[8..10], self.flags.bits());
        WireOrder::write_u16(&mut dst[10..12], self.send_seq);
        WireOrder::write_u16(&mut dst[12..14], self.ack_seq);
        WireOrder::write_u16(&mut dst[14..16], self.message_type);
        Ok(())
    }

    /// Parse a header, checking magic and version before any other field.
    pub fn parse(src: &[u8]) -> ProtocolResult<Self> {
        if src.len() < HEADER_SIZE {
            return Err(ProtocolError::Underflow {
                required: HEADER_SIZE,
                available: src.len(),
            });
        }
        if src[0..4] != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&src[0..4]);
            return Err(ProtocolError::BadMagic { found });
        }
        let version = WireOrder::read_u16(&src[4..6]);
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::BadVersion {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }
        Ok(Self {
            version,
            length: WireOrder::read_u16(&src[6..8]),
            flags: HeaderFlags::from_bits(WireOrder::read_u16(&src[8..10])),
            send_seq: WireOrder::read_u16(&src[10..12]),
            ack_seq: WireOrder::read_u16(&src[12..14]),
            message_type: WireOrder::read_u16(&src[14..16]),
        })
    }

    /// Check the declared length against the frame size limits.
    pub fn check_length(&self, capacity: usize) -> ProtocolResult<()> {
        let length = self.length as usize;
        if length < MIN_FRAME_SIZE {
            return Err(ProtocolError::Underflow {
                required: MIN_FRAME_SIZE,
                available: length,
            });
        }
        if length > capacity {
            return Err(ProtocolError::Overflow {
                required: length,
                available: capacity,
            });
        }
        Ok(())
    }
}

/// CRC32 (IEEE polynomial) over `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Verify one complete frame.
///
/// Checks, in order: magic, version, that `frame` is exactly as long as the
/// length field declares, and the CRC trailer. Nothing past the header is
/// looked at until magic and version have passed.
pub fn verify(frame: &[u8]) -> ProtocolResult<IcsHeader> {
    let header = IcsHeader::parse(frame)?;
    header.check_length(consts::MAX_FRAME_SIZE)?;
    let length = header.length as usize;
    if frame.len() < length {
        return Err(ProtocolError::Underflow {
            required: length,
            available: frame.len(),
        });
    }
    if frame.len() > length {
        return Err(ProtocolError::TrailingData {
            remaining: frame.len() - length,
        });
    }
    let crc_at = length - CRC_SIZE;
    let declared = WireOrder::read_u32(&frame[crc_at..length]);
    let computed = crc32(&frame[..crc_at]);
    if declared != computed {
        return Err(ProtocolError::CrcMismatch { declared, computed });
    }
    Ok(header)
}
