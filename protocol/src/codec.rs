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

//! Stream framing for `tokio_util`

use crate::consts::{HEADER_SIZE, MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use crate::header::IcsHeader;
use crate::{BufferPool, CodecError, Frame};
use bytes::{Buf, BytesMut};
use metrics::counter;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// A framing codec for the ICS protocol.
///
/// `IcsCodec` slices a byte stream into verified [`Frame`]s. Every decoded
/// frame is copied into a buffer from the codec's [`BufferPool`], so the
/// number of frames alive at once, across all connections sharing the pool,
/// is bounded by the pool capacity.
///
/// The header is validated as soon as 16 bytes are buffered: a wrong magic,
/// an unsupported version, or a declared length outside `20..=max_frame` fails
/// the stream immediately rather than waiting for a body that will never make
/// sense.
#[derive(Debug, Clone)]
pub struct IcsCodec {
    pool: BufferPool,
    max_frame: usize,
}

impl IcsCodec {
    /// Creates a codec drawing its buffers from `pool`.
    ///
    /// The largest accepted frame is the pool's chunk size, capped at the
    /// largest length the header can express.
    ///
    /// # Example
    /// ```
    /// use icsgate_protocol::{BufferPool, IcsCodec};
    ///
    /// let codec = IcsCodec::new(BufferPool::new(4096, 16));
    /// assert_eq!(codec.max_frame(), 4096);
    /// ```
    pub fn new(pool: BufferPool) -> Self {
        let max_frame = pool.chunk_size().min(MAX_FRAME_SIZE);
        Self { pool, max_frame }
    }

    /// The buffer pool frames are decoded into
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Largest frame accepted by the decoder
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Decoder for IcsCodec {
    type Item = Frame;
    type Error = CodecError;

    /// Decodes the next complete frame from `src`.
    ///
    /// # Returns
    /// - `Ok(Some(frame))`: a frame passed magic, version, length and CRC checks.
    /// - `Ok(None)`: more bytes are needed.
    /// - `Err(CodecError::Protocol(_))`: the stream is corrupt; the connection
    ///   cannot resynchronise and should be closed.
    ///
    /// # Pool exhaustion
    /// When no buffer is free the complete frame is consumed, a warning is
    /// logged, and decoding continues with the next frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < HEADER_SIZE {
                src.reserve(HEADER_SIZE - src.len());
                return Ok(None);
            }
            let header = IcsHeader::parse(&src[..HEADER_SIZE])?;
            header.check_length(self.max_frame)?;
            let length = header.length as usize;
            debug_assert!(length >= MIN_FRAME_SIZE);
            if src.len() < length {
                src.reserve(length - src.len());
                return Ok(None);
            }

            let Some(mut buf) = self.pool.get() else {
                warn!(
                    message_type = header.message_type,
                    length,
                    "buffer pool exhausted, dropping frame"
                );
                counter!("icsgate.frames.dropped").increment(1);
                counter!("icsgate.pool.exhausted").increment(1);
                src.advance(length);
                continue;
            };
            buf.fill_from(&src[..length])?;
            src.advance(length);
            let frame = Frame::from_buffer(buf)?;
            trace!(header = ?frame.header(), "decoded frame");
            return Ok(Some(frame));
        }
    }
}

impl Encoder<Frame> for IcsCodec {
    type Error = CodecError;

    /// Appends a sealed frame to `dst` exactly as produced by
    /// [`crate::FrameWriter::finish`].
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}
