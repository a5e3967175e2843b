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

//! Upgrade file cache
//!
//! Upgrade files are resolved by id through persistence, memory-mapped
//! read-only on first use and kept for the life of the process.

use crate::persistence::Persistence;
use dashmap::DashMap;
use icsgate_service::UpgradeError;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Bytes of an upgrade file
enum Content {
    Mapped(Mmap),
    // Zero-length files cannot be mapped.
    Empty,
}

/// A loaded upgrade file
pub struct FileInfo {
    file_id: u32,
    name: String,
    content: Content,
}

impl FileInfo {
    /// Info for a zero-length file
    fn empty(file_id: u32, name: String) -> Self {
        Self {
            file_id,
            name,
            content: Content::Empty,
        }
    }

    /// Upgrade file id
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// File name without directories
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File content
    pub fn content(&self) -> &[u8] {
        match &self.content {
            Content::Mapped(map) => map,
            Content::Empty => &[],
        }
    }

    /// File length in bytes
    pub fn len(&self) -> u64 {
        self.content().len() as u64
    }

    /// The file has no content
    pub fn is_empty(&self) -> bool {
        self.content().is_empty()
    }
}

impl std::fmt::Debug for FileInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileInfo")
            .field("file_id", &self.file_id)
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

/// Source of upgrade file content
pub trait FileCache: Send + Sync + 'static {
    /// Load or look up a file; may block on first use
    fn file_info(&self, file_id: u32) -> Result<Arc<FileInfo>, UpgradeError>;
}

/// Memory-mapped, never-evicting file cache
pub struct MappedFileCache {
    persistence: Arc<dyn Persistence>,
    files: DashMap<u32, Arc<FileInfo>>,
}

impl MappedFileCache {
    /// Create a cache resolving paths through `persistence`
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            files: DashMap::new(),
        }
    }

    /// Number of loaded files
    pub fn loaded(&self) -> usize {
        self.files.len()
    }

    fn load(&self, file_id: u32) -> Result<FileInfo, UpgradeError> {
        let unavailable = |reason: String| UpgradeError::FileUnavailable { file_id, reason };
        let path = self
            .persistence
            .file_path(file_id)
            .map_err(|e| unavailable(e.to_string()))?
            .ok_or_else(|| unavailable("unknown file id".to_string()))?;
        let name = file_name(&path);
        let file = File::open(&path).map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
        let len = file
            .metadata()
            .map_err(|e| unavailable(e.to_string()))?
            .len();
        if len == 0 {
            return Ok(FileInfo::empty(file_id, name));
        }
        // SAFETY: the mapping is read-only; upgrade files are not modified while served.
        let map = unsafe { MmapOptions::new().map(&file) }.map_err(|e| unavailable(e.to_string()))?;
        info!(file_id, path = %path.display(), len, "upgrade file mapped");
        Ok(FileInfo {
            file_id,
            name,
            content: Content::Mapped(map),
        })
    }
}

impl FileCache for MappedFileCache {
    fn file_info(&self, file_id: u32) -> Result<Arc<FileInfo>, UpgradeError> {
        if let Some(info) = self.files.get(&file_id) {
            return Ok(info.clone());
        }
        let loaded = Arc::new(self.load(file_id)?);
        // A concurrent load of the same id keeps whichever landed first.
        let info = self.files.entry(file_id).or_insert(loaded).clone();
        debug!(file_id, cached = self.files.len(), "upgrade file cached");
        Ok(info)
    }
}

impl std::fmt::Debug for MappedFileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFileCache")
            .field("loaded", &self.files.len())
            .finish()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Byte range served for a fragment request
///
/// The length is clamped to the end of the file and to `max_segment`; an
/// offset past the end of the file is an error.
pub fn clamp_fragment(
    file_id: u32,
    file_len: u64,
    offset: u32,
    length: u16,
    max_segment: usize,
) -> Result<Range<usize>, UpgradeError> {
    let start = u64::from(offset);
    if start > file_len {
        return Err(UpgradeError::OffsetOutOfBounds {
            file_id,
            offset,
            file_len,
        });
    }
    let len = u64::from(length)
        .min(file_len - start)
        .min(max_segment as u64);
    Ok(start as usize..(start + len) as usize)
}
