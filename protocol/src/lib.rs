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

//! # ICS Gateway Protocol
//!
//! Wire format of the ICS gateway: a length-prefixed binary protocol spoken by
//! field terminals, web back-ends and peer gateways.
//!
//! ## Frame layout
//!
//! ```text
//! +-------+---------+--------+-------+----------+---------+------+------+-------+
//! | magic | version | length | flags | send seq | ack seq | type | body | crc32 |
//! | ICS#  | u16     | u16    | u16   | u16      | u16     | u16  | ...  | u32   |
//! +-------+---------+--------+-------+----------+---------+------+------+-------+
//! ```
//!
//! `length` counts the whole frame including header and trailer. The CRC32
//! trailer covers every byte before it. Multi-byte integers use [`WireOrder`].
//!
//! ## Core Components
//!
//! ### [`BufferPool`]
//!
//! A fixed set of equally sized buffers. Every frame, received or sent, lives
//! in a [`PooledBuffer`] which returns itself to the pool when dropped.
//!
//! ### [`FrameWriter`] / [`FrameReader`]
//!
//! Typed field cursors. Writers refuse any field that would overrun the buffer
//! or the CRC reservation; readers refuse any read past the body and report
//! leftovers through [`FrameReader::assert_empty`].
//!
//! ### [`IcsCodec`]
//!
//! A `tokio_util` [`Decoder`](tokio_util::codec::Decoder) and
//! [`Encoder`](tokio_util::codec::Encoder) producing verified [`Frame`]s.
//!
//! ## Example
//!
//! ```
//! use icsgate_protocol::{BufferPool, Frame, FrameWriter, MessageType};
//!
//! let pool = BufferPool::new(1024, 8);
//! let mut writer = FrameWriter::request(&pool, MessageType::TerminalAuth).unwrap();
//! writer.put_short_str("GW001").unwrap();
//! writer.put_short_str("secret").unwrap();
//! let sealed = writer.finish(1);
//!
//! let frame = Frame::decode(&pool, sealed.as_bytes()).unwrap();
//! let mut reader = frame.reader();
//! assert_eq!(reader.get_short_str().unwrap(), "GW001");
//! assert_eq!(reader.get_short_str().unwrap(), "secret");
//! reader.assert_empty().unwrap();
//! ```

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]

mod codec;
pub mod consts;
mod frame;
mod header;
mod message;
pub mod obfuscate;
mod pool;
mod result;
mod timestamp;

pub use self::codec::IcsCodec;
pub use self::frame::{Frame, FrameReader, FrameWriter};
pub use self::header::{HeaderFlags, IcsHeader, WireOrder, crc32, verify};
pub use self::message::MessageType;
pub use self::obfuscate::ChallengeToken;
pub use self::pool::{BufferPool, PooledBuffer};
pub use self::result::{CodecError, ProtocolError, ProtocolResult, ResourceError};
pub use self::timestamp::IcsTimestamp;
