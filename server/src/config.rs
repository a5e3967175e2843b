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

//! Gateway configuration
//!
//! The gateway reads one TOML document at startup:
//!
//! ```toml
//! [server]
//! mode = "center"                 # center | proxy
//! site_id = "ICS-HQ"
//! terminal_tcp = "0.0.0.0:9100"
//! terminal_udp = "0.0.0.0:9100"   # optional
//! web = "127.0.0.1:9200"          # optional
//! site_link = "0.0.0.0:9300"      # optional, peer gateways dial in here
//! center = "10.0.0.1:9300"        # proxy only, optional, dial out to the center
//! heartbeat_interval = 30
//! timeout_threshold = 2
//!
//! [pool]
//! chunk_size = 8192
//! chunk_count = 1024
//!
//! [upgrade]
//! max_segment = 4096
//!
//! [notify]
//! address = "127.0.0.1:9400"
//!
//! [logging]
//! level = "info"
//!
//! [[devices]]
//! id = "GW001"
//! password = "secret"
//! ```
//!
//! `[[sites]]`, `[[translations]]` and `[[files]]` seed the in-memory
//! persistence backend alongside `[[devices]]`.

use crate::ConfigError;
use icsgate_protocol::consts::{CRC_SIZE, HEADER_SIZE, MAX_FRAME_SIZE};
use icsgate_service::{PoolConfig, ServerConfig};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Body bytes of an upgrade fragment response besides the data itself
const FRAGMENT_OVERHEAD: usize = 4 + 4 + 2;

/// Which side of a site link this gateway plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Terminals and web clients connect here; proxies relay to it
    Center,
    /// Aggregates local terminals and relays them to a center
    Proxy,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Center => write!(f, "center"),
            Mode::Proxy => write!(f, "proxy"),
        }
    }
}

/// `[server]`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Role of this gateway
    pub mode: Mode,
    /// Enterprise id this gateway announces on site links
    pub site_id: String,
    /// Terminal TCP listener
    pub terminal_tcp: SocketAddr,
    /// Terminal UDP listener
    #[serde(default)]
    pub terminal_udp: Option<SocketAddr>,
    /// Web tier listener
    #[serde(default)]
    pub web: Option<SocketAddr>,
    /// Site link listener
    #[serde(default)]
    pub site_link: Option<SocketAddr>,
    /// Center to dial in proxy mode
    #[serde(default)]
    pub center: Option<SocketAddr>,
    /// Seconds between idle checks and site heartbeats
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval: u32,
    /// Idle checks tolerated before a connection is closed
    #[serde(default = "default_threshold")]
    pub timeout_threshold: u32,
    /// Connection cap across all listeners
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Frames queued per connection
    #[serde(default = "default_queue_depth")]
    pub send_queue_depth: usize,
    /// Outbound connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_heartbeat() -> u32 {
    30
}

fn default_threshold() -> u32 {
    2
}

fn default_max_connections() -> usize {
    10_000
}

fn default_queue_depth() -> usize {
    64
}

fn default_connect_timeout() -> u64 {
    10
}

/// `[pool]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Bytes per buffer
    pub chunk_size: usize,
    /// Number of buffers
    pub chunk_count: usize,
}

impl Default for PoolSection {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            chunk_size: pool.chunk_size,
            chunk_count: pool.chunk_count,
        }
    }
}

/// `[upgrade]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpgradeSection {
    /// Largest fragment served to a terminal
    pub max_segment: usize,
}

impl Default for UpgradeSection {
    fn default() -> Self {
        Self { max_segment: 4096 }
    }
}

/// `[notify]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifySection {
    /// Event subscriber
    #[serde(default)]
    pub address: Option<SocketAddr>,
}

/// `[logging]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[[devices]]`
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    /// Device identity
    pub id: String,
    /// Device password
    pub password: String,
}

/// `[[sites]]`
#[derive(Debug, Clone, Deserialize)]
pub struct SiteEntry {
    /// Enterprise id of the remote site
    pub enterprise: String,
    /// Site link address of the remote site
    pub address: SocketAddr,
}

/// `[[translations]]`
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationEntry {
    /// Enterprise id of the remote site
    pub enterprise: String,
    /// Device id at the remote site
    pub remote: String,
    /// Device id here
    pub local: String,
}

/// `[[files]]`
#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    /// Upgrade file id
    pub id: u32,
    /// Path of the file
    pub path: PathBuf,
}

/// Parsed configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// `[server]`
    pub server: ServerSection,
    /// `[pool]`
    #[serde(default)]
    pub pool: PoolSection,
    /// `[upgrade]`
    #[serde(default)]
    pub upgrade: UpgradeSection,
    /// `[notify]`
    #[serde(default)]
    pub notify: NotifySection,
    /// `[logging]`
    #[serde(default)]
    pub logging: LoggingSection,
    /// `[[devices]]`
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    /// `[[sites]]`
    #[serde(default)]
    pub sites: Vec<SiteEntry>,
    /// `[[translations]]`
    #[serde(default)]
    pub translations: Vec<TranslationEntry>,
    /// `[[files]]`
    #[serde(default)]
    pub files: Vec<FileEntry>,

    #[serde(skip)]
    raw: toml::Table,
}

impl GatewayConfig {
    /// Read and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a configuration document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: toml::Table = contents.parse()?;
        let mut config: GatewayConfig = toml::Value::Table(raw.clone()).try_into()?;
        config.raw = raw;
        config.validate()?;
        Ok(config)
    }

    /// Raw string attribute, or the textual form of a scalar
    pub fn attribute_str(&self, section: &str, key: &str) -> Option<String> {
        match self.raw.get(section)?.get(key)? {
            toml::Value::String(s) => Some(s.clone()),
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Float(f) => Some(f.to_string()),
            toml::Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Raw integer attribute; numeric strings are accepted
    pub fn attribute_int(&self, section: &str, key: &str) -> Option<i64> {
        match self.raw.get(section)?.get(key)? {
            toml::Value::Integer(i) => Some(*i),
            toml::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Reject values the gateway cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let server = &self.server;
        if server.site_id.is_empty() {
            return invalid("server.site_id must not be empty");
        }
        if server.heartbeat_interval == 0 {
            return invalid("server.heartbeat_interval must be greater than 0");
        }
        if server.timeout_threshold == 0 {
            return invalid("server.timeout_threshold must be greater than 0");
        }
        if server.max_connections == 0 {
            return invalid("server.max_connections must be greater than 0");
        }
        if server.send_queue_depth == 0 {
            return invalid("server.send_queue_depth must be greater than 0");
        }
        if server.connect_timeout_secs == 0 {
            return invalid("server.connect_timeout_secs must be greater than 0");
        }
        match server.mode {
            Mode::Center if server.center.is_some() => {
                return invalid("server.center is only valid in proxy mode");
            }
            Mode::Proxy if server.site_link.is_none() && server.center.is_none() => {
                return invalid("proxy mode needs server.site_link or server.center");
            }
            _ => {}
        }
        if self.pool.chunk_count == 0 {
            return invalid("pool.chunk_count must be greater than 0");
        }
        if self.upgrade.max_segment == 0 || self.upgrade.max_segment > usize::from(u16::MAX) {
            return invalid("upgrade.max_segment must be between 1 and 65535");
        }
        let needed = HEADER_SIZE + FRAGMENT_OVERHEAD + self.upgrade.max_segment + CRC_SIZE;
        if self.pool.chunk_size < needed || self.pool.chunk_size > MAX_FRAME_SIZE {
            return Err(ConfigError::Invalid(format!(
                "pool.chunk_size must be between {needed} and {MAX_FRAME_SIZE} for upgrade.max_segment {}",
                self.upgrade.max_segment
            )));
        }
        Ok(())
    }

    /// Library-level server settings
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_max_connections(self.server.max_connections)
            .with_send_queue_depth(self.server.send_queue_depth)
            .with_heartbeat_interval(self.server.heartbeat_interval)
            .with_timeout_threshold(self.server.timeout_threshold)
            .with_connect_timeout(Duration::from_secs(self.server.connect_timeout_secs))
            .with_pool(PoolConfig::new(self.pool.chunk_size, self.pool.chunk_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        mode = "center"
        site_id = "ICS-HQ"
        terminal_tcp = "127.0.0.1:9100"
    "#;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.server.mode, Mode::Center);
        assert_eq!(config.server.heartbeat_interval, 30);
        assert_eq!(config.server.timeout_threshold, 2);
        assert_eq!(config.upgrade.max_segment, 4096);
        assert_eq!(config.logging.level, "info");
        assert!(config.devices.is_empty());
        assert!(config.notify.address.is_none());
    }

    #[test]
    fn test_attribute_accessors() {
        let config = GatewayConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(
            config.attribute_str("server", "site_id").as_deref(),
            Some("ICS-HQ")
        );
        assert_eq!(config.attribute_str("server", "missing"), None);
        assert_eq!(config.attribute_int("server", "site_id"), None);

        let config = GatewayConfig::from_toml_str(&format!(
            "{MINIMAL}\n[pool]\nchunk_size = 8192\nchunk_count = \"16\"\n"
        ));
        // chunk_count must be an integer for the typed view
        assert!(matches!(config, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_proxy_needs_a_link() {
        let doc = MINIMAL.replace("center", "proxy");
        assert!(matches!(
            GatewayConfig::from_toml_str(&doc),
            Err(ConfigError::Invalid(_))
        ));
        let doc = format!("{doc}\ncenter = \"127.0.0.1:9300\"\n");
        let config = GatewayConfig::from_toml_str(&doc).unwrap();
        assert_eq!(config.server.mode, Mode::Proxy);
        assert_eq!(config.attribute_str("server", "center").as_deref(), Some("127.0.0.1:9300"));
    }

    #[test]
    fn test_pool_must_fit_a_fragment() {
        let doc = format!("{MINIMAL}\n[pool]\nchunk_size = 512\n\n[upgrade]\nmax_segment = 1024\n");
        assert!(matches!(
            GatewayConfig::from_toml_str(&doc),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let doc = format!("{MINIMAL}heartbeat_interval = 0\n");
        assert!(matches!(
            GatewayConfig::from_toml_str(&doc),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_server_config_mapping() {
        let doc = format!("{MINIMAL}max_connections = 7\nconnect_timeout_secs = 3\n");
        let config = GatewayConfig::from_toml_str(&doc).unwrap().server_config();
        assert_eq!(config.max_connections, 7);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }
}
