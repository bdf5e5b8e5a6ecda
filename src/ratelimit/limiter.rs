//! Core sliding-window limiter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::history::ActionHistory;
use crate::config::LimitConfig;
use crate::error::Result;
use crate::store::{KeyValueStore, StoreError};

/// A storage problem the limiter absorbed while answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFault {
    /// The store could not be read; history was treated as empty
    Unreadable,
    /// The stored log did not decode; history was treated as empty
    Corrupt,
    /// The updated log could not be written back
    Unwritable,
}

/// Result of asking for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// Permitted and recorded.
    Permitted,
    /// Permitted, but the store misbehaved along the way.
    PermittedDegraded(StorageFault),
    /// The window is full.
    Denied,
}

impl Acquisition {
    pub fn is_permitted(&self) -> bool {
        !matches!(self, Acquisition::Denied)
    }
}

/// Bounds how many actions of one kind happen inside a sliding window.
///
/// The log of permitted actions is kept in a [`KeyValueStore`] under the
/// limiter's key, so the limit holds across restarts. Storage problems never
/// reach the caller: an unreadable log counts as empty and a failed write is
/// dropped, both with a warning.
pub struct RequestRateLimiter {
    capacity: u32,
    window_ms: u64,
    key: String,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl RequestRateLimiter {
    /// Create a limiter over `store`, reading time from `clock`.
    pub fn new(
        limit: LimitConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        limit.validate()?;
        Ok(Self {
            capacity: limit.capacity,
            window_ms: limit.window_ms,
            key: limit.key,
            store,
            clock,
        })
    }

    /// Create a limiter that reads wall-clock time.
    pub fn with_system_clock(limit: LimitConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        Self::new(limit, store, Arc::new(SystemClock))
    }

    /// Ask for a slot, reporting any storage trouble.
    ///
    /// Expired entries are pruned first. When a slot is free the current
    /// instant is recorded and persisted.
    pub fn acquire(&self) -> Acquisition {
        let now = self.clock.now_millis();
        let (mut history, read_fault) = self.load();
        let pruned = history.prune(now, self.window_ms);

        trace!(
            key = %self.key,
            in_window = history.len(),
            capacity = self.capacity,
            pruned = pruned,
            "Checking rate limit"
        );

        if history.len() < self.capacity as usize {
            history.record(now);
            let write_fault = self.save(&history);
            return match read_fault.or(write_fault) {
                None => Acquisition::Permitted,
                Some(fault) => Acquisition::PermittedDegraded(fault),
            };
        }

        // Keep storage bounded even while denying; a failed write is already logged
        if pruned > 0 {
            let _ = self.save(&history);
        }

        debug!(
            key = %self.key,
            capacity = self.capacity,
            window_ms = self.window_ms,
            "Rate limit exceeded"
        );
        Acquisition::Denied
    }

    /// Returns `true` and records the action when a slot is free.
    pub fn try_acquire(&self) -> bool {
        self.acquire().is_permitted()
    }

    /// Whole seconds until the oldest recorded action leaves the window.
    ///
    /// Reads the log without pruning, so expired entries still count until the
    /// next acquisition removes them. The answer is advisory, meant for a
    /// "try again in N seconds" message.
    pub fn seconds_until_next_slot(&self) -> u64 {
        let (history, _) = self.load();
        let Some(oldest) = history.oldest() else {
            return 0;
        };

        let now = self.clock.now_millis();
        let elapsed = i128::from(now) - i128::from(oldest);
        let remaining = i128::from(self.window_ms) - elapsed;
        if remaining <= 0 {
            return 0;
        }

        u64::try_from(remaining).map_or(u64::MAX, |ms| ms.div_ceil(1000))
    }

    /// Number of recorded actions still inside the window.
    pub fn recorded_count(&self) -> usize {
        let (history, _) = self.load();
        history.count_within(self.clock.now_millis(), self.window_ms)
    }

    /// Slots free right now.
    pub fn remaining(&self) -> u32 {
        let used = u32::try_from(self.recorded_count()).unwrap_or(u32::MAX);
        self.capacity.saturating_sub(used)
    }

    /// Forget every recorded action.
    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)?;
        debug!(key = %self.key, "Rate limit history cleared");
        Ok(())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn load(&self) -> (ActionHistory, Option<StorageFault>) {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return (ActionHistory::new(), None),
            Err(StoreError::Corrupt(reason)) => {
                warn!(key = %self.key, reason = %reason, "Store is corrupt, treating history as empty");
                return (ActionHistory::new(), Some(StorageFault::Corrupt));
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Rate limit history unreadable, treating as empty");
                return (ActionHistory::new(), Some(StorageFault::Unreadable));
            }
        };

        match ActionHistory::decode(&raw) {
            Ok(history) => (history, None),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Rate limit history corrupt, treating as empty");
                (ActionHistory::new(), Some(StorageFault::Corrupt))
            }
        }
    }

    fn save(&self, history: &ActionHistory) -> Option<StorageFault> {
        match self.store.set(&self.key, &history.encode()) {
            Ok(()) => None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to persist rate limit history");
                Some(StorageFault::Unwritable)
            }
        }
    }
}

impl fmt::Debug for RequestRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRateLimiter")
            .field("capacity", &self.capacity)
            .field("window_ms", &self.window_ms)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
