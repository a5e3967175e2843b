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

//! Identity translation between sites
//!
//! A device is known by one id at its own site and another at the center.
//! Successful lookups are cached per enterprise in both directions; misses
//! always go back to the directory.

use crate::persistence::Persistence;
use dashmap::DashMap;
use icsgate_service::PersistenceError;
use std::sync::Arc;
use tracing::trace;

type Key = (String, String);

/// Cached remote/local identity directory
pub struct IdentityTranslator {
    persistence: Arc<dyn Persistence>,
    to_local: DashMap<Key, String>,
    to_remote: DashMap<Key, String>,
}

impl IdentityTranslator {
    /// Create a translator backed by `persistence`
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            to_local: DashMap::new(),
            to_remote: DashMap::new(),
        }
    }

    /// Local identity of `remote` at `enterprise`
    pub async fn to_local(
        &self,
        enterprise: &str,
        remote: &str,
    ) -> Result<Option<String>, PersistenceError> {
        let key = (enterprise.to_string(), remote.to_string());
        if let Some(local) = self.to_local.get(&key) {
            return Ok(Some(local.clone()));
        }
        let persistence = self.persistence.clone();
        let (e, r) = key.clone();
        let found = blocking(move || persistence.remote_to_local(&e, &r)).await?;
        if let Some(local) = &found {
            trace!(enterprise, remote, local = %local, "translation cached");
            self.to_remote
                .insert((enterprise.to_string(), local.clone()), remote.to_string());
            self.to_local.insert(key, local.clone());
        }
        Ok(found)
    }

    /// Identity of the local device `local` at `enterprise`
    pub async fn to_remote(
        &self,
        enterprise: &str,
        local: &str,
    ) -> Result<Option<String>, PersistenceError> {
        let key = (enterprise.to_string(), local.to_string());
        if let Some(remote) = self.to_remote.get(&key) {
            return Ok(Some(remote.clone()));
        }
        let persistence = self.persistence.clone();
        let (e, l) = key.clone();
        let found = blocking(move || persistence.local_to_remote(&e, &l)).await?;
        if let Some(remote) = &found {
            trace!(enterprise, local, remote = %remote, "translation cached");
            self.to_local
                .insert((enterprise.to_string(), remote.clone()), local.to_string());
            self.to_remote.insert(key, remote.clone());
        }
        Ok(found)
    }

    /// Cached entries in both directions
    pub fn cached(&self) -> usize {
        self.to_local.len() + self.to_remote.len()
    }
}

impl std::fmt::Debug for IdentityTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityTranslator")
            .field("cached", &self.cached())
            .finish()
    }
}

/// Run a blocking persistence call off the reactor
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, PersistenceError>
where
    F: FnOnce() -> Result<T, PersistenceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PersistenceError::Unavailable(e.to_string()))?
}
