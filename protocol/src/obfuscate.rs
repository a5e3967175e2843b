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

//! Obfuscation hooks
//!
//! None of this is cryptography. The body XOR keeps casual observers from
//! reading frames off the wire, and the token XOR keeps the handshake clock
//! from being sent verbatim.

use crate::consts::XOR_KEY;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TOKEN_SECS_KEY: u32 = 0x5A3C_96E1;
const TOKEN_MILLIS_KEY: u16 = 0x4943;

/// XOR `body` with the repeating frame key. Applying it twice restores the input.
pub fn xor_in_place(body: &mut [u8]) {
    for (byte, key) in body.iter_mut().zip(XOR_KEY.iter().cycle()) {
        *byte ^= key;
    }
}

/// A handshake clock token as carried in challenge messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeToken {
    /// Obfuscated whole seconds
    pub secs: u32,
    /// Obfuscated milliseconds
    pub millis: u16,
}

impl ChallengeToken {
    /// Token for the current wall clock
    pub fn now() -> Self {
        Self::from_time(SystemTime::now())
    }

    /// Token for `time`
    pub fn from_time(time: SystemTime) -> Self {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: (since.as_secs() as u32) ^ TOKEN_SECS_KEY,
            millis: (since.subsec_millis() as u16) ^ TOKEN_MILLIS_KEY,
        }
    }

    /// The clock reading the token carries
    pub fn to_time(self) -> SystemTime {
        let secs = self.secs ^ TOKEN_SECS_KEY;
        let millis = self.millis ^ TOKEN_MILLIS_KEY;
        UNIX_EPOCH + Duration::from_secs(secs as u64) + Duration::from_millis(millis as u64)
    }

    /// Time elapsed between the token's clock reading and `now`.
    ///
    /// A token from the future counts as zero elapsed.
    pub fn elapsed_at(self, now: SystemTime) -> Duration {
        now.duration_since(self.to_time()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_is_involution() {
        let original = b"ICS gateway body".to_vec();
        let mut data = original.clone();
        xor_in_place(&mut data);
        assert_ne!(data, original);
        xor_in_place(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_token_round_trip() {
        let time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_250);
        let token = ChallengeToken::from_time(time);
        assert_ne!(token.secs, 1_700_000_000);
        assert_eq!(token.to_time(), time);
    }

    #[test]
    fn test_token_elapsed() {
        let time = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let token = ChallengeToken::from_time(time);
        assert_eq!(
            token.elapsed_at(time + Duration::from_millis(1500)),
            Duration::from_millis(1500)
        );
        assert_eq!(token.elapsed_at(time - Duration::from_secs(3)), Duration::ZERO);
    }
}
