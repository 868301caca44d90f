//! Host/board clock synchronization protocol
//!
//! The host writes the sync command and notes its clock. The board
//! answers with a single acknowledgment byte between packets, then sends a
//! time-sync-set packet carrying its own clock. The round trip up to the
//! acknowledgment bounds the error of the estimate; trips slower than the
//! failure threshold are rejected and leave the offset untouched.

use serde::Serialize;
use tracing::{debug, info, warn};

use bioamp_core::commands::Command;
use bioamp_core::protocol::Packet;
use bioamp_core::{Firmware, RoundTrip, TimeSyncState};

use crate::clock::Clock;
use crate::deferred::{deferred, Deferred, Resolver};
use crate::error::{SessionError, StateError};
use crate::events::SessionEvent;
use crate::session::{whole_ms, ParsingMode, Session};
use crate::transport::Transport;

/// Outcome of a completed clock sync.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Offset now applied to board timestamps (ms)
    pub offset_ms: f64,
    /// Round trip of this sync (ms)
    pub round_trip_ms: f64,
    /// Board clock in the answering packet (ms)
    pub board_time_ms: u32,
    /// Accepted offsets held for smoothing
    pub history_len: usize,
}

struct PendingSync {
    sent_ms: f64,
    round_trip: Option<RoundTrip>,
    resolver: Resolver<SyncReport>,
}

/// Sync state for one session.
#[derive(Default)]
pub(crate) struct SyncProtocol {
    pub(crate) state: TimeSyncState,
    pending: Option<PendingSync>,
}

impl SyncProtocol {
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<T: Transport, C: Clock> Session<T, C> {
    /// Clock offset state.
    pub fn time_sync(&self) -> &TimeSyncState {
        &self.sync.state
    }

    /// Synchronize the host and board clocks.
    ///
    /// Requires a streaming board with v2 firmware. Resolves once the
    /// board's timestamped answer has been folded into the offset.
    pub fn sync_clocks(&mut self) -> Deferred<SyncReport> {
        if !self.connected {
            return Deferred::failed(StateError::NotConnected);
        }
        if !self.streaming {
            return Deferred::failed(StateError::NotStreaming);
        }
        if self.board.firmware != Firmware::V2 {
            return Deferred::failed(StateError::UnsupportedFirmware);
        }
        if self.sync.is_pending() {
            return Deferred::failed(StateError::TimeSyncPending);
        }
        if self.mode != ParsingMode::Normal {
            return Deferred::failed(StateError::CommandPending);
        }

        let sent_ms = self.clock.now_ms();
        if let Err(err) = self.send(&[Command::TimeSyncSet.byte()]) {
            return Deferred::failed(err);
        }
        self.enter_mode(ParsingMode::TimeSyncPending);

        let (resolver, result) = deferred();
        self.sync.pending = Some(PendingSync { sent_ms, round_trip: None, resolver });
        result
    }

    /// Acknowledgment byte seen between packets.
    pub(crate) fn on_sync_ack(&mut self) {
        self.enter_mode(ParsingMode::Normal);
        let Some(pending) = self.sync.pending.as_mut() else { return };

        let round_trip = RoundTrip { sent_ms: pending.sent_ms, acked_ms: self.clock.now_ms() };
        let threshold_ms = self.config.sync_failure_threshold_ms;
        if round_trip.within(threshold_ms) {
            debug!("Sync acknowledged after {:.3}ms", round_trip.duration_ms());
            pending.round_trip = Some(round_trip);
            return;
        }

        warn!("Discarding sync round trip of {:.3}ms", round_trip.duration_ms());
        if let Some(pending) = self.sync.pending.take() {
            pending.resolver.resolve(Err(SessionError::SyncRejected {
                round_trip_ms: round_trip.duration_ms(),
                threshold_ms,
            }));
        }
    }

    /// Finish an acknowledged sync with the board time in `packet`.
    pub(crate) fn complete_sync_if_answered(&mut self, packet: &Packet) {
        let answered = self.sync.pending.as_ref().is_some_and(|p| p.round_trip.is_some());
        let sync_set = packet.packet_type().is_ok_and(|t| t.is_time_sync_set());
        if !answered || !sync_set {
            return;
        }
        let Some(pending) = self.sync.pending.take() else { return };
        let Some(round_trip) = pending.round_trip else { return };

        let board_time_ms = packet.board_time_ms();
        let offset_ms = self.sync.state.accept(&round_trip, board_time_ms);
        let report = SyncReport {
            offset_ms,
            round_trip_ms: round_trip.duration_ms(),
            board_time_ms,
            history_len: self.sync.state.history_len(),
        };
        info!("Clocks synced: offset {offset_ms:.3}ms, round trip {:.3}ms", report.round_trip_ms);
        self.events.emit(SessionEvent::Synced(report));
        pending.resolver.resolve(Ok(report));
    }

    /// Fail a sync that has waited too long.
    pub(crate) fn sync_tick(&mut self, now_ms: f64) {
        let Some(pending) = self.sync.pending.as_ref() else { return };
        let waited = now_ms - pending.sent_ms;
        if waited <= self.config.sync_ack_timeout_ms as f64 {
            return;
        }
        warn!("Clock sync unanswered after {waited:.0}ms");
        if self.mode == ParsingMode::TimeSyncPending {
            self.enter_mode(ParsingMode::Normal);
        }
        if let Some(pending) = self.sync.pending.take() {
            pending.resolver.resolve(Err(SessionError::Timeout {
                operation: "clock sync",
                waited_ms: whole_ms(waited),
            }));
        }
    }

    /// Cancel a pending sync and stop correcting timestamps.
    pub(crate) fn abort_sync(&mut self, operation: &'static str) {
        if self.mode == ParsingMode::TimeSyncPending {
            self.enter_mode(ParsingMode::Normal);
        }
        if let Some(pending) = self.sync.pending.take() {
            debug!("Aborting pending clock sync");
            pending.resolver.resolve(Err(SessionError::Aborted { operation }));
        }
        self.sync.state.unsync();
    }
}

// ============================================================================
// Tests
// ============================================================================
