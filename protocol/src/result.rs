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

//! Error types for the ICS protocol codec

use thiserror::Error;

/// Result Type for Protocol Operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Violations of the ICS wire format.
///
/// Framing-level variants ([`ProtocolError::is_framing`]) mean the byte stream
/// can no longer be trusted and the connection carrying it must be closed.
/// The remaining variants only invalidate the message being processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame does not start with the `ICS#` tag.
    #[error("bad magic tag {found:02X?}")]
    BadMagic {
        /// The four bytes found where the tag was expected
        found: [u8; 4],
    },

    /// The frame speaks another protocol version.
    #[error("bad protocol version 0x{found:04X} (expected 0x{expected:04X})")]
    BadVersion {
        /// Version the codec was built for
        expected: u16,
        /// Version carried by the frame
        found: u16,
    },

    /// The CRC trailer does not match the header and body.
    #[error("crc mismatch (declared 0x{declared:08X}, computed 0x{computed:08X})")]
    CrcMismatch {
        /// CRC carried in the trailer
        declared: u32,
        /// CRC recomputed over the received bytes
        computed: u32,
    },

    /// A write, or a declared frame length, exceeds the available capacity.
    #[error("overflow (required: {required}, available: {available})")]
    Overflow {
        /// Number of bytes required
        required: usize,
        /// Number of bytes available
        available: usize,
    },

    /// A read needs more bytes than the body still holds.
    #[error("underflow (required: {required}, available: {available})")]
    Underflow {
        /// Number of bytes required
        required: usize,
        /// Number of bytes available
        available: usize,
    },

    /// A handler finished reading but bytes remain before the trailer.
    #[error("{remaining} trailing bytes left unconsumed")]
    TrailingData {
        /// Number of unread body bytes
        remaining: usize,
    },

    /// The message type ID is not part of the closed enumeration, or not
    /// accepted by the role that received it.
    #[error("unknown message type 0x{0:04X}")]
    UnknownMessageType(u16),
}

impl ProtocolError {
    /// Check if the error means the stream itself is corrupt
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadMagic { .. }
                | ProtocolError::BadVersion { .. }
                | ProtocolError::CrcMismatch { .. }
                | ProtocolError::Overflow { .. }
                | ProtocolError::Underflow { .. }
        )
    }
}

/// Allocation pressure on the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// Every buffer of the pool is checked out.
    #[error("buffer pool exhausted ({capacity} buffers of {chunk_size} bytes)")]
    PoolExhausted {
        /// Size of each pooled buffer
        chunk_size: usize,
        /// Number of buffers owned by the pool
        capacity: usize,
    },

    /// A connection's send queue is full; the frame was not queued.
    #[error("send queue full ({depth} frames pending)")]
    SendQueueFull {
        /// Configured queue depth
        depth: usize,
    },
}

/// Errors surfaced by the framing codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The byte stream violates the wire format
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No buffer was available to hold a frame
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// The underlying transport failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_classification() {
        assert!(ProtocolError::BadMagic { found: *b"XXXX" }.is_framing());
        assert!(
            ProtocolError::Underflow {
                required: 4,
                available: 1
            }
            .is_framing()
        );
        assert!(!ProtocolError::TrailingData { remaining: 3 }.is_framing());
        assert!(!ProtocolError::UnknownMessageType(0x7777).is_framing());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::BadVersion {
            expected: 0x0101,
            found: 0x0200,
        };
        assert_eq!(
            err.to_string(),
            "bad protocol version 0x0200 (expected 0x0101)"
        );
        assert_eq!(
            ProtocolError::UnknownMessageType(0x4009).to_string(),
            "unknown message type 0x4009"
        );
    }
}
