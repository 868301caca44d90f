//! Events emitted by sessions
//!
//! Each session owns the sending half of an unbounded channel; events arrive
//! at the receiver in exactly the order the session produced them.

use serde::Serialize;
use tokio::sync::mpsc;

use bioamp_core::compressed::ImpedanceSource;
use bioamp_core::{BoardInfo, ChannelImpedance, LowPowerSample, Sample};

use crate::timesync::SyncReport;

/// Something a session observed or completed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Boot banner parsed
    Ready(BoardInfo),
    /// Decoded sample
    Sample(Sample),
    /// Qualified packet, before decoding
    RawDataPacket(Vec<u8>),
    /// One input of one channel finished measuring
    ImpedanceResult(ChannelImpedance),
    /// Every channel's impedance after a sweep
    ImpedanceArray(Vec<ChannelImpedance>),
    /// Register query reply
    QueryResponse(String),
    /// Clock sync completed
    Synced(SyncReport),
    /// Bytes dropped while resynchronizing to packet boundaries
    Resync {
        /// Number of bytes dropped
        dropped: usize,
    },
    /// Decoded low-power sample
    LowPowerSample(LowPowerSample),
    /// Low-power impedance report
    LowPowerImpedance {
        /// Electrode the value is for
        source: ImpedanceSource,
        /// Impedance in ohms
        ohms: f64,
    },
    /// Reassembled multi-fragment message
    Message(Vec<u8>),
}

/// Receiving half of a session's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Sending half held by a session.
#[derive(Clone, Debug)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    pub(crate) fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send an event. Events for a dropped receiver are discarded.
    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}
