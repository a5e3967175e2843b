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

//! Terminal report bodies
//!
//! Fixed-layout field extraction for every terminal-to-gateway message. Each
//! `decode` reads exactly the fields of its message; callers check for
//! leftovers with [`FrameReader::assert_empty`].
//!
//! Packed flag words are kept as raw integers behind accessor methods.

use icsgate_protocol::{
    FrameReader, FrameWriter, IcsTimestamp, MessageType, ProtocolError, ProtocolResult,
};

/// `TerminalAuth` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Claimed device identity
    pub device: String,
    /// Device password
    pub password: String,
}

impl AuthRequest {
    /// Read the request fields
    pub fn decode(r: &mut FrameReader<'_>) -> ProtocolResult<Self> {
        Ok(Self {
            device: r.get_short_str()?,
            password: r.get_short_str()?,
        })
    }
}

/// `StandardStatus`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardStatus {
    /// Terminal clock
    pub timestamp: IcsTimestamp,
    /// Device state code
    pub state: u8,
    /// Status flag word
    pub flags: u16,
    /// Alarm bitmap
    pub alarm: u32,
}

impl StandardStatus {
    /// Read the report fields
    pub fn decode(r: &mut FrameReader<'_>) -> ProtocolResult<Self> {
        Ok(Self {
            timestamp: r.get_timestamp()?,
            state: r.get_u8()?,
            flags: r.get_u16()?,
            alarm: r.get_u32()?,
        })
    }
}

/// `CustomStatus`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomStatus {
    /// Terminal clock
    pub timestamp: IcsTimestamp,
    /// Vendor key/value pairs
    pub entries: Vec<(String, String)>,
}

impl CustomStatus {
    /// Read the report fields
    pub fn decode(r: &mut FrameReader<'_>) -> ProtocolResult<Self> {
        let timestamp = r.get_timestamp()?;
        let count = r.get_u8()?;
        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            entries.push((r.get_short_str()?, r.get_short_str()?));
        }
        Ok(Self { timestamp, entries })
    }
}

/// `EventReport`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReport {
    /// Terminal-assigned event id, echoed in the response
    pub event_id: u32,
    /// Terminal clock
    pub timestamp: IcsTimestamp,
    /// Event kind
    pub kind: u16,
    /// Severity
    pub level: u8,
    /// Free text
    pub text: String,
}

impl EventReport {
    /// Read the report fields
    pub fn decode(r: &mut FrameReader<'_>) -> ProtocolResult<Self> {
        Ok(Self {
            event_id: r.get_u32()?,
            timestamp: r.get_timestamp()?,
            kind: r.get_u16()?,
            level: r.get_u8()?,
            text: r.get_short_str()?,
        })
    }

    /// Write the `EventPush` body for `device`
    pub fn encode_push(&self, device: &str, w: &mut FrameWriter) -> ProtocolResult<()> {
        w.put_short_str(device)?;
        w.put_u32(self.event_id)?;
        w.put_timestamp(&self.timestamp)?;
        w.put_u16(self.kind)?;
        w.put_u8(self.level)?;
        w.put_short_str(&self.text)
    }
}

/// Flag word of a business report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusinessFlags(pub u16);

impl BusinessFlags {
    const MODE_MASK: u16 = 0b11;
    const UNIT_SHIFT: u16 = 2;
    const UNIT_MASK: u16 = 0b11;
    const CARD_BIT: u16 = 1 << 4;
    const FLOW_SHIFT: u16 = 5;
    const FLOW_MASK: u16 = 0b11;
    const EVALUATION_SHIFT: u16 = 7;
    const EVALUATION_MASK: u16 = 0b111;

    /// Weighing mode, bits 0-1
    pub fn weighing_mode(self) -> u8 {
        (self.0 & Self::MODE_MASK) as u8
    }

    /// Weight unit, bits 2-3
    pub fn unit(self) -> u8 {
        ((self.0 >> Self::UNIT_SHIFT) & Self::UNIT_MASK) as u8
    }

    /// A card was presented, bit 4
    pub fn card_present(self) -> bool {
        self.0 & Self::CARD_BIT != 0
    }

    /// Flow direction, bits 5-6
    pub fn flow(self) -> u8 {
        ((self.0 >> Self::FLOW_SHIFT) & Self::FLOW_MASK) as u8
    }

    /// Evaluation result, bits 7-9
    pub fn evaluation(self) -> u8 {
        ((self.0 >> Self::EVALUATION_SHIFT) & Self::EVALUATION_MASK) as u8
    }
}

/// `BusinessReport`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessReport {
    /// Terminal business sequence, used for deduplication
    pub seq: u32,
    /// Terminal clock
    pub timestamp: IcsTimestamp,
    /// Packed flags
    pub flags: BusinessFlags,
    /// Gross weight
    pub gross: u32,
    /// Tare weight
    pub tare: u32,
    /// Net weight
    pub net: u32,
    /// Card number
    pub card: String,
    /// Vehicle plate
    pub plate: String,
}

impl BusinessReport {
    /// Read the report fields
    pub fn decode(r: &mut FrameReader<'_>) -> ProtocolResult<Self> {
        Ok(Self {
            seq: r.get_u32()?,
            timestamp: r.get_timestamp()?,
            flags: BusinessFlags(r.get_u16()?),
            gross: r.get_u32()?,
            tare: r.get_u32()?,
            net: r.get_u32()?,
            card: r.get_short_str()?,
            plate: r.get_short_str()?,
        })
    }
}

/// Flag byte of a GPS report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpsFlags(pub u8);

impl GpsFlags {
    /// Latitude is south of the equator
    pub fn south(self) -> bool {
        self.0 & 0x01 != 0
    }

    /// Longitude is west of Greenwich
    pub fn west(self) -> bool {
        self.0 & 0x02 != 0
    }

    /// Signal strength, 0-15
    pub fn signal(self) -> u8 {
        (self.0 >> 2) & 0x0F
    }

    /// The receiver had a fix
    pub fn fix_valid(self) -> bool {
        self.0 & 0x40 != 0
    }
}

/// `GpsReport`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsReport {
    /// Terminal clock
    pub timestamp: IcsTimestamp,
    /// Packed flags
    pub flags: GpsFlags,
    /// Unsigned latitude in micro-degrees
    pub lat: u32,
    /// Unsigned longitude in micro-degrees
    pub lon: u32,
    /// Speed
    pub speed: u16,
    /// Heading in degrees
    pub heading: u16,
}

impl GpsReport {
    /// Read the report fields
    pub fn decode(r: &mut FrameReader<'_>) -> ProtocolResult<Self> {
        Ok(Self {
            timestamp: r.get_timestamp()?,
            flags: GpsFlags(r.get_u8()?),
            lat: r.get_u32()?,
            lon: r.get_u32()?,
            speed: r.get_u16()?,
            heading: r.get_u16()?,
        })
    }

    /// Signed latitude in degrees
    pub fn latitude(&self) -> f64 {
        let degrees = f64::from(self.lat) / 1_000_000.0;
        if self.flags.south() { -degrees } else { degrees }
    }

    /// Signed longitude in degrees
    pub fn longitude(&self) -> f64 {
        let degrees = f64::from(self.lon) / 1_000_000.0;
        if self.flags.west() { -degrees } else { degrees }
    }
}

/// `ParamQueryResult` body
pub fn decode_param_values(r: &mut FrameReader<'_>) -> ProtocolResult<Vec<(u16, String)>> {
    let count = r.get_u8()?;
    let mut values = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        values.push((r.get_u16()?, r.get_short_str()?));
    }
    Ok(values)
}

/// `ParamModifyResult` body
pub fn decode_param_results(r: &mut FrameReader<'_>) -> ProtocolResult<Vec<(u16, u8)>> {
    let count = r.get_u8()?;
    let mut results = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        results.push((r.get_u16()?, r.get_u8()?));
    }
    Ok(results)
}

/// `LogReport`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogReport {
    /// Terminal clock
    pub timestamp: IcsTimestamp,
    /// Severity
    pub level: u8,
    /// Log text; invalid UTF-8 is replaced
    pub content: String,
    /// The payload was not valid UTF-8
    pub reencoded: bool,
}

impl LogReport {
    /// Read the report fields
    pub fn decode(r: &mut FrameReader<'_>) -> ProtocolResult<Self> {
        let timestamp = r.get_timestamp()?;
        let level = r.get_u8()?;
        let raw = r.get_long_bytes()?;
        let content = String::from_utf8_lossy(raw);
        let reencoded = matches!(content, std::borrow::Cow::Owned(_));
        Ok(Self {
            timestamp,
            level,
            content: content.into_owned(),
            reencoded,
        })
    }
}

/// Terminal side of the upgrade sub-protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeMessage {
    /// The terminal refuses the offered file
    Deny {
        /// File id
        file_id: u32,
        /// Reason given
        reason: String,
    },
    /// The terminal accepts the offered file
    Agree {
        /// File id
        file_id: u32,
    },
    /// The terminal asks for a slice of the file
    Fragment {
        /// File id
        file_id: u32,
        /// Start of the slice
        offset: u32,
        /// Requested length
        length: u16,
    },
    /// The terminal reports the outcome
    Result {
        /// File id
        file_id: u32,
        /// Result code, 0 is success
        result: u8,
        /// Detail text
        message: String,
    },
    /// The terminal confirms a cancel
    CancelAck {
        /// File id
        file_id: u32,
    },
}

impl UpgradeMessage {
    /// Read the fields of an upgrade message of type `kind`
    pub fn decode(kind: MessageType, r: &mut FrameReader<'_>) -> ProtocolResult<Self> {
        let file_id = r.get_u32()?;
        Ok(match kind {
            MessageType::UpgradeDeny => UpgradeMessage::Deny {
                file_id,
                reason: r.get_short_str()?,
            },
            MessageType::UpgradeAgree => UpgradeMessage::Agree { file_id },
            MessageType::UpgradeFragment => UpgradeMessage::Fragment {
                file_id,
                offset: r.get_u32()?,
                length: r.get_u16()?,
            },
            MessageType::UpgradeResult => UpgradeMessage::Result {
                file_id,
                result: r.get_u8()?,
                message: r.get_short_str()?,
            },
            MessageType::UpgradeCancelAck => UpgradeMessage::CancelAck { file_id },
            other => return Err(ProtocolError::UnknownMessageType(other.as_u16())),
        })
    }

    /// File the message is about
    pub fn file_id(&self) -> u32 {
        match self {
            UpgradeMessage::Deny { file_id, .. }
            | UpgradeMessage::Agree { file_id }
            | UpgradeMessage::Fragment { file_id, .. }
            | UpgradeMessage::Result { file_id, .. }
            | UpgradeMessage::CancelAck { file_id } => *file_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icsgate_protocol::BufferPool;

    #[test]
    fn test_business_flag_bits() {
        // mode 2, unit 1, card, flow 3, evaluation 5
        let flags = BusinessFlags(0b10_1_11_1_01_10);
        assert_eq!(flags.weighing_mode(), 2);
        assert_eq!(flags.unit(), 1);
        assert!(flags.card_present());
        assert_eq!(flags.flow(), 3);
        assert_eq!(flags.evaluation(), 5);
        assert!(!BusinessFlags(0).card_present());
    }

    #[test]
    fn test_gps_signs() {
        let report = GpsReport {
            timestamp: IcsTimestamp::default(),
            flags: GpsFlags(0b0101_1101),
            lat: 31_230_416,
            lon: 121_473_701,
            speed: 0,
            heading: 0,
        };
        assert!(report.flags.south());
        assert!(!report.flags.west());
        assert_eq!(report.flags.signal(), 7);
        assert!(report.flags.fix_valid());
        assert!((report.latitude() + 31.230_416).abs() < 1e-9);
        assert!((report.longitude() - 121.473_701).abs() < 1e-9);
    }

    #[test]
    fn test_log_reencodes_invalid_utf8() {
        let pool = BufferPool::new(256, 2);
        let mut w = FrameWriter::request(&pool, MessageType::LogReport).unwrap();
        w.put_timestamp(&IcsTimestamp::default()).unwrap();
        w.put_u8(3).unwrap();
        w.put_long_bytes(b"temp \xff\xfe high").unwrap();
        let frame = w.finish(1);

        let mut r = frame.reader();
        let log = LogReport::decode(&mut r).unwrap();
        r.assert_empty().unwrap();
        assert!(log.reencoded);
        assert_eq!(log.level, 3);
        assert_eq!(log.content, "temp \u{FFFD}\u{FFFD} high");
    }

    #[test]
    fn test_custom_status_pairs() {
        let pool = BufferPool::new(256, 2);
        let mut w = FrameWriter::request(&pool, MessageType::CustomStatus).unwrap();
        w.put_timestamp(&IcsTimestamp::default()).unwrap();
        w.put_u8(2).unwrap();
        for (k, v) in [("door", "open"), ("temp", "21")] {
            w.put_short_str(k).unwrap();
            w.put_short_str(v).unwrap();
        }
        let frame = w.finish(1);
        let mut r = frame.reader();
        let status = CustomStatus::decode(&mut r).unwrap();
        r.assert_empty().unwrap();
        assert_eq!(status.entries[1], ("temp".to_string(), "21".to_string()));
    }
}
