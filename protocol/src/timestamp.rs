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

//! Packed 8-byte timestamps
//!
//! ```text
//! +--------+-------+-----+------+--------+---------------------------+
//! | year   | month | day | hour | minute | second:6 | millisecond:10 |
//! | u16    | u8    | u8  | u8   | u8     | u16 (low bits = second)   |
//! +--------+-------+-----+------+--------+---------------------------+
//! ```

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;

const SECOND_MASK: u16 = 0x003F;
const MILLISECOND_SHIFT: u16 = 6;
const MILLISECOND_MASK: u16 = 0x03FF;

/// A wall-clock timestamp as carried on the wire.
///
/// Fields are stored as received; a terminal with a broken clock can send
/// values that do not form a valid date, which [`IcsTimestamp::to_naive`]
/// reports as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IcsTimestamp {
    /// Calendar year
    pub year: u16,
    /// Month of year, 1-12
    pub month: u8,
    /// Day of month, 1-31
    pub day: u8,
    /// Hour, 0-23
    pub hour: u8,
    /// Minute, 0-59
    pub minute: u8,
    /// Second, 0-59 (6 bits on the wire)
    pub second: u8,
    /// Millisecond, 0-999 (10 bits on the wire)
    pub millisecond: u16,
}

impl IcsTimestamp {
    /// Current local time
    pub fn now() -> Self {
        Self::from_naive(&Local::now().naive_local())
    }

    /// Convert from a chrono timestamp, truncating to milliseconds.
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        Self {
            year: dt.year().clamp(0, u16::MAX as i32) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second().min(59) as u8,
            millisecond: (dt.nanosecond() / 1_000_000).min(999) as u16,
        }
    }

    /// Convert to a chrono timestamp, or `None` if the fields are out of range.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_milli_opt(
                self.hour as u32,
                self.minute as u32,
                self.second as u32,
                self.millisecond as u32,
            )
    }

    /// Pack second and millisecond into their shared 16-bit field.
    pub fn packed_seconds(&self) -> u16 {
        (self.second as u16 & SECOND_MASK)
            | ((self.millisecond & MILLISECOND_MASK) << MILLISECOND_SHIFT)
    }

    /// Split a packed 16-bit field into `(second, millisecond)`.
    pub fn unpack_seconds(packed: u16) -> (u8, u16) {
        (
            (packed & SECOND_MASK) as u8,
            (packed >> MILLISECOND_SHIFT) & MILLISECOND_MASK,
        )
    }
}

impl fmt::Display for IcsTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millisecond
        )
    }
}
