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

//! Interval timer
//!
//! A chain re-invokes its callback after the number of seconds the previous
//! invocation returned, and ends when the callback returns 0. Connection idle
//! checks, site heartbeats and handshake deadlines are all chains.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Scheduler for self-rescheduling callbacks
#[derive(Clone, Debug, Default)]
pub struct IntervalTimer {
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
}

struct ChainGuard(Arc<AtomicUsize>);

impl Drop for ChainGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl IntervalTimer {
    /// Create a timer with no chains
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a chain: `callback` first runs after `secs` seconds, then after
    /// whatever it returns, until it returns 0. A `secs` of 0 starts nothing.
    ///
    /// Must be called within a tokio runtime.
    pub fn add<F>(&self, secs: u32, mut callback: F)
    where
        F: FnMut() -> u32 + Send + 'static,
    {
        if secs == 0 || self.shutdown.is_cancelled() {
            return;
        }
        let token = self.shutdown.child_token();
        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = ChainGuard(self.active.clone());
        tokio::spawn(async move {
            let _guard = guard;
            let mut next = secs;
            while next > 0 {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(Duration::from_secs(u64::from(next))) => {
                        next = callback();
                        trace!(next, "timer chain fired");
                    }
                }
            }
        });
    }

    /// Number of chains still running
    pub fn active_chains(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Stop every chain; later `add` calls are ignored
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_runs_until_zero() {
        let timer = IntervalTimer::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        timer.add(5, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { 5 } else { 0 }
        });
        settle().await;
        assert_eq!(timer.active_chains(), 1);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(5)).await;
            settle().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(timer.active_chains(), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_waits_full_interval() {
        let timer = IntervalTimer::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        timer.add(10, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        });
        settle().await;
        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_chains() {
        let timer = IntervalTimer::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        timer.add(1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            1
        });
        settle().await;
        timer.shutdown();
        settle().await;
        assert_eq!(timer.active_chains(), 0);
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        timer.add(1, || 1);
        assert_eq!(timer.active_chains(), 0);
    }
}
