//! The persisted log of permitted actions.

use serde::{Deserialize, Serialize};

/// Epoch-millisecond timestamps of past permitted actions.
///
/// Stored as a bare JSON array. Order is insertion order but nothing relies
/// on it being sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionHistory {
    timestamps: Vec<i64>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a stored value.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Encode for storage.
    pub fn encode(&self) -> String {
        // A Vec<i64> always serializes
        serde_json::to_string(&self.timestamps).unwrap_or_else(|_| "[]".to_string())
    }

    /// Drop every timestamp outside the window ending at `now`.
    ///
    /// Returns how many entries were removed.
    pub fn prune(&mut self, now: i64, window_ms: u64) -> usize {
        let before = self.timestamps.len();
        self.timestamps.retain(|&t| within_window(t, now, window_ms));
        before - self.timestamps.len()
    }

    /// Count entries inside the window ending at `now` without removing any.
    pub fn count_within(&self, now: i64, window_ms: u64) -> usize {
        self.timestamps
            .iter()
            .filter(|&&t| within_window(t, now, window_ms))
            .count()
    }

    pub fn record(&mut self, now: i64) {
        self.timestamps.push(now);
    }

    /// The earliest recorded timestamp, pruned or not.
    pub fn oldest(&self) -> Option<i64> {
        self.timestamps.iter().copied().min()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }
}

impl From<Vec<i64>> for ActionHistory {
    fn from(timestamps: Vec<i64>) -> Self {
        Self { timestamps }
    }
}

/// `now - t < window`. Timestamps from the future count as inside.
fn within_window(t: i64, now: i64, window_ms: u64) -> bool {
    (i128::from(now) - i128::from(t)) < i128::from(window_ms)
}
