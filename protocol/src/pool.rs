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

//! Fixed-size buffer pool
//!
//! Every wire buffer, inbound frames and serialized outbound frames alike, is
//! checked out of a [`BufferPool`]. The pool is sized once at startup and never
//! grows: when it runs dry, [`BufferPool::get`] returns `None` and the caller
//! drops the message instead of allocating.
//!
//! A checked-out [`PooledBuffer`] owns its memory outright. Dropping it hands
//! the memory back to the pool it came from, so a buffer can travel across
//! tasks and threads without any aliasing.

use crate::ResourceError;
use crate::consts::MIN_FRAME_SIZE;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

struct PoolInner {
    chunk_size: usize,
    capacity: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl PoolInner {
    fn put(&self, chunk: Box<[u8]>) {
        let mut free = self.free.lock();
        debug_assert!(free.len() < self.capacity, "buffer returned twice");
        free.push(chunk);
    }
}

/// A bounded pool of equal-size byte buffers.
///
/// Cloning the pool is cheap; all clones share the same buffers.
///
/// # Example
///
/// ```
/// use icsgate_protocol::BufferPool;
///
/// let pool = BufferPool::new(1024, 2);
/// let a = pool.get().unwrap();
/// let _b = pool.get().unwrap();
/// assert!(pool.get().is_none());
/// drop(a);
/// assert_eq!(pool.available(), 1);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool of `count` buffers of `chunk_size` bytes each.
    ///
    /// All buffers are allocated up front. Buffers are never smaller than
    /// [`MIN_FRAME_SIZE`], so every buffer can hold at least an empty frame.
    pub fn new(chunk_size: usize, count: usize) -> Self {
        let chunk_size = chunk_size.max(MIN_FRAME_SIZE);
        let free = (0..count)
            .map(|_| vec![0u8; chunk_size].into_boxed_slice())
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                chunk_size,
                capacity: count,
                free: Mutex::new(free),
            }),
        }
    }

    /// Take a buffer out of the pool, or `None` if every buffer is in use.
    pub fn get(&self) -> Option<PooledBuffer> {
        let chunk = self.inner.free.lock().pop()?;
        Some(PooledBuffer {
            data: Some(chunk),
            len: 0,
            pool: self.inner.clone(),
        })
    }

    /// Like [`BufferPool::get`], with exhaustion reported as an error.
    pub fn try_get(&self) -> Result<PooledBuffer, ResourceError> {
        self.get().ok_or(ResourceError::PoolExhausted {
            chunk_size: self.inner.chunk_size,
            capacity: self.inner.capacity,
        })
    }

    /// Return a buffer to the pool.
    ///
    /// Equivalent to dropping it; the buffer always goes back to the pool that
    /// issued it.
    pub fn put(&self, buffer: PooledBuffer) {
        debug_assert!(Arc::ptr_eq(&self.inner, &buffer.pool));
        drop(buffer);
    }

    /// Number of buffers currently available
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Size of every buffer in bytes
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    /// Total number of buffers owned by the pool
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("chunk_size", &self.inner.chunk_size)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Dereferences to the filled prefix (`len` bytes); the full chunk is reachable
/// through [`PooledBuffer::spare_mut`] and [`PooledBuffer::set_len`].
pub struct PooledBuffer {
    data: Option<Box<[u8]>>,
    len: usize,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    fn chunk(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    fn chunk_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Size of the underlying chunk
    pub fn capacity(&self) -> usize {
        self.chunk().len()
    }

    /// Number of filled bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no bytes are filled
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the number of filled bytes, clamped to the capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    /// The whole chunk, filled or not
    pub fn spare_mut(&mut self) -> &mut [u8] {
        self.chunk_mut()
    }

    /// Replace the contents with `bytes`.
    pub fn fill_from(&mut self, bytes: &[u8]) -> Result<(), crate::ProtocolError> {
        let capacity = self.capacity();
        if bytes.len() > capacity {
            return Err(crate::ProtocolError::Overflow {
                required: bytes.len(),
                available: capacity,
            });
        }
        self.chunk_mut()[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.chunk()[..self.len]
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.chunk_mut()[..len]
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(chunk) = self.data.take() {
            self.pool.put(chunk);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_get_until_exhausted() {
        let pool = BufferPool::new(64, 3);
        let held: Vec<_> = (0..3).map(|_| pool.get().unwrap()).collect();
        assert_eq!(pool.available(), 0);
        assert!(pool.get().is_none());
        assert_eq!(
            pool.try_get().unwrap_err(),
            ResourceError::PoolExhausted {
                chunk_size: 64,
                capacity: 3
            }
        );
        drop(held);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_put_returns_buffer() {
        let pool = BufferPool::new(16, 1);
        let mut buffer = pool.get().unwrap();
        buffer.fill_from(b"hello").unwrap();
        assert_eq!(&buffer[..], b"hello");
        pool.put(buffer);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_fill_from_rejects_oversized() {
        let pool = BufferPool::new(MIN_FRAME_SIZE, 1);
        let mut buffer = pool.get().unwrap();
        assert!(buffer.fill_from(&[0u8; MIN_FRAME_SIZE + 1]).is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_tiny_chunks_still_hold_a_frame() {
        let pool = BufferPool::new(4, 1);
        assert_eq!(pool.chunk_size(), MIN_FRAME_SIZE);
        let frame = crate::FrameWriter::request(&pool, crate::MessageType::Heartbeat)
            .unwrap()
            .finish(1);
        assert_eq!(frame.len(), MIN_FRAME_SIZE);
        assert!(frame.body().is_empty());
    }

    #[test]
    fn test_buffers_cross_threads() {
        let pool = BufferPool::new(32, 8);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        if let Some(mut buffer) = pool.get() {
                            buffer.set_len(32);
                            buffer[0] = 1;
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.available(), 8);
    }
}
