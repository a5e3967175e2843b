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

//! Persistence collaborator
//!
//! Every database side effect of the gateway goes through [`Persistence`], one
//! method per stored procedure. Calls are blocking; handlers run them on the
//! blocking thread pool.
//!
//! [`MemoryPersistence`] is the shipped backend. It is seeded from the
//! configuration tables and keeps a record of every call.

use crate::config::GatewayConfig;
use crate::report::{
    BusinessReport, CustomStatus, EventReport, GpsReport, LogReport, StandardStatus,
};
use icsgate_service::PersistenceError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Result of a persistence call
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Progress of an upgrade on one terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    /// The terminal refused the file
    Denied,
    /// The terminal accepted the file
    Agreed,
    /// The terminal finished with a result code
    Finished(u8),
    /// The terminal acknowledged a cancel
    Cancelled,
}

/// Delivery state of a web command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Handed to a remote site, outcome pending
    Sent,
    /// Delivered to the target
    Delivered,
    /// Could not be delivered
    Failed,
}

impl CommandStatus {
    /// Status text used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Sent => "sent",
            CommandStatus::Delivered => "ok",
            CommandStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored procedures used by the gateway
pub trait Persistence: Send + Sync + 'static {
    /// Check a device's credentials
    fn authenticate_device(&self, device: &str, password: &str) -> PersistenceResult<bool>;
    /// A device came online at `peer`
    fn record_online(&self, device: &str, peer: SocketAddr) -> PersistenceResult<()>;
    /// A device went offline
    fn record_offline(&self, device: &str) -> PersistenceResult<()>;
    /// Store a standard status report
    fn record_status(&self, device: &str, status: &StandardStatus) -> PersistenceResult<()>;
    /// Store a custom status report
    fn record_custom_status(&self, device: &str, status: &CustomStatus) -> PersistenceResult<()>;
    /// Store an event report
    fn record_event(&self, device: &str, event: &EventReport) -> PersistenceResult<()>;
    /// Store a business report
    fn record_business(&self, device: &str, report: &BusinessReport) -> PersistenceResult<()>;
    /// Store a GPS fix
    fn record_gps(&self, device: &str, report: &GpsReport) -> PersistenceResult<()>;
    /// Store queried parameter values
    fn record_param_values(&self, device: &str, values: &[(u16, String)]) -> PersistenceResult<()>;
    /// Store parameter modification results
    fn record_param_results(&self, device: &str, results: &[(u16, u8)]) -> PersistenceResult<()>;
    /// Store a log line
    fn record_log(&self, device: &str, log: &LogReport) -> PersistenceResult<()>;
    /// Store upgrade progress
    fn record_upgrade_state(
        &self,
        device: &str,
        file_id: u32,
        state: UpgradeState,
    ) -> PersistenceResult<()>;
    /// Path of an upgrade file
    fn file_path(&self, file_id: u32) -> PersistenceResult<Option<PathBuf>>;
    /// Store the delivery state of a web command
    fn record_command_status(&self, command: u32, status: CommandStatus) -> PersistenceResult<()>;
    /// Site link address of a remote site
    fn site_address(&self, enterprise: &str) -> PersistenceResult<Option<SocketAddr>>;
    /// Local identity of a device known remotely as `remote`
    fn remote_to_local(&self, enterprise: &str, remote: &str) -> PersistenceResult<Option<String>>;
    /// Remote identity of the local device `local`
    fn local_to_remote(&self, enterprise: &str, local: &str) -> PersistenceResult<Option<String>>;
    /// A site link came up
    fn record_site_online(&self, enterprise: &str) -> PersistenceResult<()>;
    /// A site link went down
    fn record_site_offline(&self, enterprise: &str) -> PersistenceResult<()>;
}

#[derive(Default)]
struct Records {
    calls: HashMap<&'static str, usize>,
    failing: HashSet<&'static str>,
    online: HashSet<String>,
    sites_online: HashSet<String>,
    business: Vec<(String, BusinessReport)>,
    events: Vec<(String, EventReport)>,
    logs: Vec<(String, LogReport)>,
    upgrades: Vec<(String, u32, UpgradeState)>,
    commands: HashMap<u32, CommandStatus>,
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryPersistence {
    devices: HashMap<String, String>,
    sites: HashMap<String, SocketAddr>,
    remote_to_local: HashMap<(String, String), String>,
    local_to_remote: HashMap<(String, String), String>,
    files: HashMap<u32, PathBuf>,
    records: Mutex<Records>,
}

impl MemoryPersistence {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a backend from the configuration tables
    ///
    /// Duplicate keys are rejected.
    pub fn from_config(config: &GatewayConfig) -> PersistenceResult<Self> {
        let mut backend = Self::new();
        for device in &config.devices {
            if backend.devices.contains_key(&device.id) {
                return Err(PersistenceError::Unavailable(format!(
                    "duplicate device {}",
                    device.id
                )));
            }
            backend = backend.with_device(&device.id, &device.password);
        }
        for site in &config.sites {
            if backend.sites.contains_key(&site.enterprise) {
                return Err(PersistenceError::Unavailable(format!(
                    "duplicate site {}",
                    site.enterprise
                )));
            }
            backend = backend.with_site(&site.enterprise, site.address);
        }
        for t in &config.translations {
            let key = (t.enterprise.clone(), t.remote.clone());
            if backend.remote_to_local.contains_key(&key) {
                return Err(PersistenceError::Unavailable(format!(
                    "duplicate translation {}/{}",
                    t.enterprise, t.remote
                )));
            }
            backend = backend.with_translation(&t.enterprise, &t.remote, &t.local);
        }
        for file in &config.files {
            backend = backend.with_file(file.id, file.path.clone());
        }
        Ok(backend)
    }

    /// Add a device
    pub fn with_device(mut self, id: &str, password: &str) -> Self {
        self.devices.insert(id.to_string(), password.to_string());
        self
    }

    /// Add a remote site
    pub fn with_site(mut self, enterprise: &str, address: SocketAddr) -> Self {
        self.sites.insert(enterprise.to_string(), address);
        self
    }

    /// Add an identity translation
    pub fn with_translation(mut self, enterprise: &str, remote: &str, local: &str) -> Self {
        self.remote_to_local.insert(
            (enterprise.to_string(), remote.to_string()),
            local.to_string(),
        );
        self.local_to_remote.insert(
            (enterprise.to_string(), local.to_string()),
            remote.to_string(),
        );
        self
    }

    /// Add an upgrade file
    pub fn with_file(mut self, id: u32, path: impl Into<PathBuf>) -> Self {
        self.files.insert(id, path.into());
        self
    }

    /// Make every later call to `procedure` fail
    pub fn fail_on(&self, procedure: &'static str) {
        self.records.lock().failing.insert(procedure);
    }

    /// Number of calls made to `procedure`, failed ones included
    pub fn call_count(&self, procedure: &str) -> usize {
        self.records.lock().calls.get(procedure).copied().unwrap_or(0)
    }

    /// Whether `device` is currently recorded online
    pub fn is_online(&self, device: &str) -> bool {
        self.records.lock().online.contains(device)
    }

    /// Whether the site link to `enterprise` is recorded online
    pub fn is_site_online(&self, enterprise: &str) -> bool {
        self.records.lock().sites_online.contains(enterprise)
    }

    /// Stored business reports
    pub fn business_rows(&self) -> Vec<(String, BusinessReport)> {
        self.records.lock().business.clone()
    }

    /// Stored events
    pub fn events(&self) -> Vec<(String, EventReport)> {
        self.records.lock().events.clone()
    }

    /// Stored log lines
    pub fn logs(&self) -> Vec<(String, LogReport)> {
        self.records.lock().logs.clone()
    }

    /// Stored upgrade progress
    pub fn upgrade_states(&self) -> Vec<(String, u32, UpgradeState)> {
        self.records.lock().upgrades.clone()
    }

    /// Last recorded status of a web command
    pub fn command_status(&self, command: u32) -> Option<CommandStatus> {
        self.records.lock().commands.get(&command).copied()
    }

    fn call<T>(&self, procedure: &'static str, f: impl FnOnce(&mut Records) -> T) -> PersistenceResult<T> {
        let mut records = self.records.lock();
        *records.calls.entry(procedure).or_default() += 1;
        if records.failing.contains(procedure) {
            return Err(PersistenceError::Call {
                procedure,
                reason: "injected failure".to_string(),
            });
        }
        Ok(f(&mut records))
    }
}

impl Persistence for MemoryPersistence {
    fn authenticate_device(&self, device: &str, password: &str) -> PersistenceResult<bool> {
        let known = self.devices.get(device).is_some_and(|p| p == password);
        self.call("authenticate_device", |_| known)
    }

    fn record_online(&self, device: &str, _peer: SocketAddr) -> PersistenceResult<()> {
        self.call("record_online", |r| {
            r.online.insert(device.to_string());
        })
    }

    fn record_offline(&self, device: &str) -> PersistenceResult<()> {
        self.call("record_offline", |r| {
            r.online.remove(device);
        })
    }

    fn record_status(&self, _device: &str, _status: &StandardStatus) -> PersistenceResult<()> {
        self.call("record_status", |_| ())
    }

    fn record_custom_status(&self, _device: &str, _status: &CustomStatus) -> PersistenceResult<()> {
        self.call("record_custom_status", |_| ())
    }

    fn record_event(&self, device: &str, event: &EventReport) -> PersistenceResult<()> {
        self.call("record_event", |r| {
            r.events.push((device.to_string(), event.clone()));
        })
    }

    fn record_business(&self, device: &str, report: &BusinessReport) -> PersistenceResult<()> {
        self.call("record_business", |r| {
            r.business.push((device.to_string(), report.clone()));
        })
    }

    fn record_gps(&self, _device: &str, _report: &GpsReport) -> PersistenceResult<()> {
        self.call("record_gps", |_| ())
    }

    fn record_param_values(&self, _device: &str, _values: &[(u16, String)]) -> PersistenceResult<()> {
        self.call("record_param_values", |_| ())
    }

    fn record_param_results(&self, _device: &str, _results: &[(u16, u8)]) -> PersistenceResult<()> {
        self.call("record_param_results", |_| ())
    }

    fn record_log(&self, device: &str, log: &LogReport) -> PersistenceResult<()> {
        self.call("record_log", |r| {
            r.logs.push((device.to_string(), log.clone()));
        })
    }

    fn record_upgrade_state(
        &self,
        device: &str,
        file_id: u32,
        state: UpgradeState,
    ) -> PersistenceResult<()> {
        self.call("record_upgrade_state", |r| {
            r.upgrades.push((device.to_string(), file_id, state));
        })
    }

    fn file_path(&self, file_id: u32) -> PersistenceResult<Option<PathBuf>> {
        let path = self.files.get(&file_id).cloned();
        self.call("file_path", |_| path)
    }

    fn record_command_status(&self, command: u32, status: CommandStatus) -> PersistenceResult<()> {
        self.call("record_command_status", |r| {
            r.commands.insert(command, status);
        })
    }

    fn site_address(&self, enterprise: &str) -> PersistenceResult<Option<SocketAddr>> {
        let address = self.sites.get(enterprise).copied();
        self.call("site_address", |_| address)
    }

    fn remote_to_local(&self, enterprise: &str, remote: &str) -> PersistenceResult<Option<String>> {
        let local = self
            .remote_to_local
            .get(&(enterprise.to_string(), remote.to_string()))
            .cloned();
        self.call("remote_to_local", |_| local)
    }

    fn local_to_remote(&self, enterprise: &str, local: &str) -> PersistenceResult<Option<String>> {
        let remote = self
            .local_to_remote
            .get(&(enterprise.to_string(), local.to_string()))
            .cloned();
        self.call("local_to_remote", |_| remote)
    }

    fn record_site_online(&self, enterprise: &str) -> PersistenceResult<()> {
        self.call("record_site_online", |r| {
            r.sites_online.insert(enterprise.to_string());
        })
    }

    fn record_site_offline(&self, enterprise: &str) -> PersistenceResult<()> {
        self.call("record_site_offline", |r| {
            r.sites_online.remove(enterprise);
        })
    }
}

impl fmt::Debug for MemoryPersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPersistence")
            .field("devices", &self.devices.len())
            .field("sites", &self.sites.len())
            .field("translations", &self.remote_to_local.len())
            .field("files", &self.files.len())
            .finish()
    }
}
