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

//! Startup errors

use icsgate_service::GatewayError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration file failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid TOML for the gateway
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or missing for the selected mode
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Reasons the gateway failed to come up or keep running
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A listener or the protocol layer could not be initialised
    #[error("protocol initialisation failed: {0}")]
    Protocol(#[source] GatewayError),

    /// The persistence backend could not be initialised
    #[error("persistence initialisation failed: {0}")]
    Persistence(String),

    /// Failure after startup
    #[error("runtime failure: {0}")]
    Runtime(String),
}

impl StartupError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Config(_) | StartupError::Protocol(_) => 1,
            StartupError::Runtime(_) => 2,
            StartupError::Persistence(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            StartupError::from(ConfigError::Invalid("x".into())).exit_code(),
            1
        );
        assert_eq!(
            StartupError::Protocol(GatewayError::ServerNotRunning).exit_code(),
            1
        );
        assert_eq!(StartupError::Runtime("x".into()).exit_code(), 2);
        assert_eq!(StartupError::Persistence("x".into()).exit_code(), 3);
    }
}
