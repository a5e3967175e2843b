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

//! Frames and the field cursors that build and read them
//!
//! A [`FrameWriter`] is a frame in write mode: it owns a pooled buffer, keeps a
//! write cursor just past the header, and refuses any field that would leave no
//! room for the CRC trailer. [`FrameWriter::finish`] stamps the sequence
//! number, length and CRC and yields a sealed [`Frame`].
//!
//! A [`FrameReader`] is a frame in read mode: a cursor over the body of a
//! verified frame. Handlers read their fields in order and finish with
//! [`FrameReader::assert_empty`], which turns any unread bytes into
//! [`ProtocolError::TrailingData`].

use crate::consts::{CRC_SIZE, HEADER_SIZE, MAX_LONG_STRING, MAX_SHORT_STRING, encryption};
use crate::header::{HeaderFlags, IcsHeader, WireOrder, crc32, verify};
use crate::obfuscate::xor_in_place;
use crate::{
    BufferPool, IcsTimestamp, MessageType, PooledBuffer, ProtocolError, ProtocolResult,
    ResourceError,
};
use byteorder::ByteOrder;
use std::fmt;

/// One complete, verified frame held in a pooled buffer.
///
/// The body is always stored in the clear: frames are de-obfuscated right
/// after verification and obfuscated only while being sealed.
pub struct Frame {
    header: IcsHeader,
    buf: PooledBuffer,
}

impl Frame {
    /// Verify `buf` as a complete frame and take ownership of it.
    ///
    /// An obfuscated body is restored in place once the CRC has passed.
    pub fn from_buffer(mut buf: PooledBuffer) -> ProtocolResult<Self> {
        let header = verify(&buf)?;
        if header.flags.encryption() == encryption::XOR {
            let end = buf.len() - CRC_SIZE;
            xor_in_place(&mut buf[HEADER_SIZE..end]);
        }
        Ok(Self { header, buf })
    }

    /// Copy `bytes` into a buffer from `pool` and verify it.
    pub fn decode(pool: &BufferPool, bytes: &[u8]) -> Result<Self, crate::CodecError> {
        let mut buf = pool.try_get()?;
        buf.fill_from(bytes)?;
        Ok(Self::from_buffer(buf)?)
    }

    /// The frame header
    pub fn header(&self) -> &IcsHeader {
        &self.header
    }

    /// Raw message type ID
    pub fn message_type(&self) -> u16 {
        self.header.message_type
    }

    /// Message type, if known
    pub fn kind(&self) -> Option<MessageType> {
        self.header.kind()
    }

    /// Check if the frame is a response
    pub fn is_ack(&self) -> bool {
        self.header.flags.is_ack()
    }

    /// Sender's sequence number
    pub fn send_seq(&self) -> u16 {
        self.header.send_seq
    }

    /// The clear-text body
    pub fn body(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..self.buf.len() - CRC_SIZE]
    }

    /// The frame exactly as it goes on the wire
    ///
    /// For an obfuscated frame this is only true of frames produced by
    /// [`FrameWriter::finish`]; received frames hold a clear body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Total frame length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Always false; a frame holds at least a header and a trailer
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// A read cursor over the body
    pub fn reader(&self) -> FrameReader<'_> {
        FrameReader::new(self.body())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("header", &self.header)
            .field("body_len", &self.body().len())
            .finish()
    }
}

/// A frame under construction.
pub struct FrameWriter {
    header: IcsHeader,
    buf: PooledBuffer,
    cursor: usize,
}

impl FrameWriter {
    /// Start a request of type `message_type`.
    pub fn request(pool: &BufferPool, message_type: MessageType) -> Result<Self, ResourceError> {
        Self::with_raw_type(pool, message_type.as_u16())
    }

    /// Start a request with a raw type ID, used when relaying messages whose
    /// type is only known to the final recipient.
    pub fn with_raw_type(pool: &BufferPool, message_type: u16) -> Result<Self, ResourceError> {
        let buf = pool.try_get()?;
        let mut header = IcsHeader::new(MessageType::Heartbeat);
        header.message_type = message_type;
        Ok(Self {
            header,
            buf,
            cursor: HEADER_SIZE,
        })
    }

    /// Start the response to `request`: same type, ack flag set, ack sequence
    /// equal to the request's send sequence.
    pub fn response(pool: &BufferPool, request: &Frame) -> Result<Self, ResourceError> {
        let mut writer = Self::with_raw_type(pool, request.message_type())?;
        writer.header.flags = HeaderFlags::default()
            .with_ack(true)
            .with_encryption(request.header().flags.encryption());
        writer.header.ack_seq = request.send_seq();
        Ok(writer)
    }

    /// Ask the peer for a response
    pub fn response_needed(mut self, needed: bool) -> Self {
        self.header.flags = self.header.flags.with_response_needed(needed);
        self
    }

    /// Select the body encryption mode
    pub fn encryption(mut self, mode: u8) -> Self {
        self.header.flags = self.header.flags.with_encryption(mode);
        self
    }

    /// The header as it stands
    pub fn header(&self) -> &IcsHeader {
        &self.header
    }

    /// Bytes written to the body so far
    pub fn body_len(&self) -> usize {
        self.cursor - HEADER_SIZE
    }

    /// Bytes still writable, the CRC trailer reserved
    pub fn remaining(&self) -> usize {
        self.limit().saturating_sub(self.cursor)
    }

    fn limit(&self) -> usize {
        self.buf
            .capacity()
            .min(crate::consts::MAX_FRAME_SIZE)
            .saturating_sub(CRC_SIZE)
    }

    fn reserve(&mut self, n: usize) -> ProtocolResult<&mut [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(ProtocolError::Overflow {
                required: n,
                available,
            });
        }
        let start = self.cursor;
        self.cursor += n;
        Ok(&mut self.buf.spare_mut()[start..start + n])
    }

    /// Write a `u8`
    pub fn put_u8(&mut self, value: u8) -> ProtocolResult<()> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    /// Write a `u16` in wire order
    pub fn put_u16(&mut self, value: u16) -> ProtocolResult<()> {
        WireOrder::write_u16(self.reserve(2)?, value);
        Ok(())
    }

    /// Write a `u32` in wire order
    pub fn put_u32(&mut self, value: u32) -> ProtocolResult<()> {
        WireOrder::write_u32(self.reserve(4)?, value);
        Ok(())
    }

    /// Write a packed timestamp
    pub fn put_timestamp(&mut self, ts: &IcsTimestamp) -> ProtocolResult<()> {
        let dst = self.reserve(crate::consts::TIMESTAMP_SIZE)?;
        WireOrder::write_u16(&mut dst[0..2], ts.year);
        dst[2] = ts.month;
        dst[3] = ts.day;
        dst[4] = ts.hour;
        dst[5] = ts.minute;
        WireOrder::write_u16(&mut dst[6..8], ts.packed_seconds());
        Ok(())
    }

    /// Write raw bytes with no prefix
    pub fn put_raw(&mut self, bytes: &[u8]) -> ProtocolResult<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Write a short string: 1-byte length then up to 255 bytes
    pub fn put_short_str(&mut self, value: &str) -> ProtocolResult<()> {
        self.put_short_bytes(value.as_bytes())
    }

    /// Write short-string framed raw bytes
    pub fn put_short_bytes(&mut self, value: &[u8]) -> ProtocolResult<()> {
        if value.len() > MAX_SHORT_STRING {
            return Err(ProtocolError::Overflow {
                required: value.len(),
                available: MAX_SHORT_STRING,
            });
        }
        let dst = self.reserve(1 + value.len())?;
        dst[0] = value.len() as u8;
        dst[1..].copy_from_slice(value);
        Ok(())
    }

    /// Write a long string: 2-byte length then up to 65535 bytes
    pub fn put_long_str(&mut self, value: &str) -> ProtocolResult<()> {
        self.put_long_bytes(value.as_bytes())
    }

    /// Write long-string framed raw bytes
    pub fn put_long_bytes(&mut self, value: &[u8]) -> ProtocolResult<()> {
        if value.len() > MAX_LONG_STRING {
            return Err(ProtocolError::Overflow {
                required: value.len(),
                available: MAX_LONG_STRING,
            });
        }
        let dst = self.reserve(2 + value.len())?;
        WireOrder::write_u16(&mut dst[0..2], value.len() as u16);
        dst[2..].copy_from_slice(value);
        Ok(())
    }

    /// Seal the frame: stamp the send sequence and length, obfuscate the body
    /// if requested, and append the CRC trailer.
    pub fn finish(mut self, send_seq: u16) -> Frame {
        let length = self.cursor + CRC_SIZE;
        self.header.send_seq = send_seq;
        self.header.length = length as u16;
        let cursor = self.cursor;
        let chunk = self.buf.spare_mut();
        // Pool buffers are at least MIN_FRAME_SIZE, so the header always fits.
        let _ = self.header.write_to(chunk);
        if self.header.flags.encryption() == encryption::XOR {
            xor_in_place(&mut chunk[HEADER_SIZE..cursor]);
        }
        let crc = crc32(&chunk[..cursor]);
        WireOrder::write_u32(&mut chunk[cursor..length], crc);
        self.buf.set_len(length);
        Frame {
            header: self.header,
            buf: self.buf,
        }
    }
}

impl fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameWriter")
            .field("header", &self.header)
            .field("body_len", &self.body_len())
            .finish()
    }
}

/// A read cursor over a frame body.
#[derive(Debug, Clone)]
pub struct FrameReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    /// Read `body` from its start
    pub fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    /// Unread bytes
    pub fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor back to the start of the body
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    fn take(&mut self, n: usize) -> ProtocolResult<&'a [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(ProtocolError::Underflow {
                required: n,
                available,
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.body[start..start + n])
    }

    /// Skip `n` bytes
    pub fn skip(&mut self, n: usize) -> ProtocolResult<()> {
        self.take(n).map(|_| ())
    }

    /// Skip one short string field
    pub fn skip_short_str(&mut self) -> ProtocolResult<()> {
        self.get_short_bytes().map(|_| ())
    }

    /// Skip one long string field
    pub fn skip_long_str(&mut self) -> ProtocolResult<()> {
        self.get_long_bytes().map(|_| ())
    }

    /// Read a `u8`
    pub fn get_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a `u16` in wire order
    pub fn get_u16(&mut self) -> ProtocolResult<u16> {
        Ok(WireOrder::read_u16(self.take(2)?))
    }

    /// Read a `u32` in wire order
    pub fn get_u32(&mut self) -> ProtocolResult<u32> {
        Ok(WireOrder::read_u32(self.take(4)?))
    }

    /// Read a packed timestamp
    pub fn get_timestamp(&mut self) -> ProtocolResult<IcsTimestamp> {
        let src = self.take(crate::consts::TIMESTAMP_SIZE)?;
        let (second, millisecond) = IcsTimestamp::unpack_seconds(WireOrder::read_u16(&src[6..8]));
        Ok(IcsTimestamp {
            year: WireOrder::read_u16(&src[0..2]),
            month: src[2],
            day: src[3],
            hour: src[4],
            minute: src[5],
            second,
            millisecond,
        })
    }

    /// Read the raw bytes of a short string
    pub fn get_short_bytes(&mut self) -> ProtocolResult<&'a [u8]> {
        let len = self.get_u8()? as usize;
        self.take(len)
    }

    /// Read the raw bytes of a long string
    pub fn get_long_bytes(&mut self) -> ProtocolResult<&'a [u8]> {
        let len = self.get_u16()? as usize;
        self.take(len)
    }

    /// Read a short string; invalid UTF-8 is replaced
    pub fn get_short_str(&mut self) -> ProtocolResult<String> {
        Ok(String::from_utf8_lossy(self.get_short_bytes()?).into_owned())
    }

    /// Read a long string; invalid UTF-8 is replaced
    pub fn get_long_str(&mut self) -> ProtocolResult<String> {
        Ok(String::from_utf8_lossy(self.get_long_bytes()?).into_owned())
    }

    /// Read everything that is left
    pub fn get_rest(&mut self) -> &'a [u8] {
        let rest = &self.body[self.pos..];
        self.pos = self.body.len();
        rest
    }

    /// Fail with [`ProtocolError::TrailingData`] unless the body is fully consumed.
    pub fn assert_empty(&self) -> ProtocolResult<()> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(ProtocolError::TrailingData { remaining }),
        }
    }
}
