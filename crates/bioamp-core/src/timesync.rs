//! Host/board clock offset smoothing
//!
//! A sync round trip brackets the board's reply between two host clock
//! readings. The midpoint, less the board time the reply carries, is one
//! estimate of the offset between the two clocks. Estimates are blended into
//! a running offset so a single noisy round trip cannot move it far.

use heapless::Deque;
use serde::{Deserialize, Serialize};

/// Accepted offsets kept for smoothing.
pub const SYNC_HISTORY_LEN: usize = 10;

/// Round trips longer than this (ms) are discarded.
pub const DEFAULT_FAILURE_THRESHOLD_MS: f64 = 10.0;

/// Weight of a new estimate once a prior sync has been accepted.
pub const SYNCED_WEIGHT: f64 = 0.9;

/// Weight of a new estimate on the first sync.
pub const UNSYNCED_WEIGHT: f64 = 0.75;

// ============================================================================
// Round Trip
// ============================================================================

/// Host clock readings around one sync command.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    /// Host time the sync command was written (ms)
    pub sent_ms: f64,
    /// Host time the acknowledgment arrived (ms)
    pub acked_ms: f64,
}

impl RoundTrip {
    /// Round-trip duration in ms.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.acked_ms - self.sent_ms
    }

    /// Host time halfway through the round trip.
    #[must_use]
    pub fn midpoint_ms(&self) -> f64 {
        (self.sent_ms + self.acked_ms) / 2.0
    }

    /// Whether the round trip is short enough to trust.
    #[must_use]
    pub fn within(&self, threshold_ms: f64) -> bool {
        self.duration_ms() <= threshold_ms
    }
}

// ============================================================================
// Sync State
// ============================================================================

/// Running clock offset for one session.
#[derive(Debug, Clone, Default)]
pub struct TimeSyncState {
    last_offset_ms: f64,
    history: Deque<f64, SYNC_HISTORY_LEN>,
    synced: bool,
}

impl TimeSyncState {
    /// Unsynced state with empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether at least one round trip has been accepted.
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.synced
    }

    /// Current offset (host ms minus board ms), once synced.
    #[must_use]
    pub fn offset_ms(&self) -> Option<f64> {
        self.synced.then_some(self.last_offset_ms)
    }

    /// Board time converted into host time, once synced.
    #[must_use]
    pub fn corrected_ms(&self, board_time_ms: u32) -> Option<f64> {
        self.offset_ms().map(|offset| f64::from(board_time_ms) + offset)
    }

    /// Accepted offsets, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &f64> {
        self.history.iter()
    }

    /// Number of accepted offsets held.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Fold one accepted round trip into the offset.
    ///
    /// `board_time_ms` is the board clock carried by the packet answering the
    /// sync request. Returns the new offset.
    pub fn accept(&mut self, round_trip: &RoundTrip, board_time_ms: u32) -> f64 {
        let estimate = round_trip.midpoint_ms() - f64::from(board_time_ms);

        let weight = if self.history.is_empty() { UNSYNCED_WEIGHT } else { SYNCED_WEIGHT };
        let offset = weight * estimate + (1.0 - weight) * self.last_offset_ms;

        if self.history.is_full() {
            self.history.pop_front();
        }
        // Cannot fail: a slot was freed above
        let _ = self.history.push_back(estimate);

        self.last_offset_ms = offset;
        self.synced = true;
        offset
    }

    /// Stop correcting timestamps but keep the offset and history.
    ///
    /// The next accepted round trip still blends with the synced weight.
    pub fn unsync(&mut self) {
        self.synced = false;
    }

    /// Forget the offset and history; the next sync counts as the first.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Tests
// ============================================================================
