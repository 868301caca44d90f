//! Bioamp Host - Acquisition sessions for biosignal boards
//!
//! This crate drives one board per [`Session`]: it turns byte chunks from a
//! transport into ordered [`SessionEvent`]s and turns high-level requests
//! (soft reset, impedance sweeps, clock sync) into correctly sequenced
//! commands. All bit-level work is delegated to `bioamp-core`.
//!
//! # Modules
//!
//! - [`session`]: Per-session context and the parsing-mode state machine
//! - [`impedance`]: Lead-off impedance test sequencing
//! - [`timesync`]: Host/board clock synchronization protocol
//! - [`lowpower`]: Session for the 4-channel low-power radio board
//! - [`events`]: Events emitted by sessions
//! - [`deferred`]: Deferred operation results
//! - [`transport`]: Transport trait and adapters
//! - [`clock`]: Host clock abstraction
//! - [`config`]: Session configuration
//! - [`error`]: Session, state and transport errors
//!
//! # Example
//!
//! ```rust
//! use bioamp_host::{ManualClock, RecordingTransport, Session, SessionConfig};
//!
//! let (mut session, mut events) =
//!     Session::new(RecordingTransport::new(), ManualClock::new(), SessionConfig::default());
//! let mut ready = session.on_connected();
//! session.process_bytes(b"On Board ADS1299 Device ID: 0x3E\n$$$");
//! assert!(ready.try_result().unwrap().is_ok());
//! assert!(events.try_recv().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod clock;
pub mod config;
pub mod deferred;
pub mod error;
pub mod events;
pub mod impedance;
pub mod lowpower;
pub mod session;
pub mod timesync;
pub mod transport;

#[cfg(feature = "ble")]
pub mod ble;

// Re-export key types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use deferred::Deferred;
pub use error::{SessionError, SessionResult, StateError, TransportError};
pub use events::{EventReceiver, SessionEvent};
pub use impedance::{ImpedanceStep, ImpedanceTestState};
pub use lowpower::LowPowerSession;
pub use session::{ParsingMode, Session};
pub use timesync::SyncReport;
pub use transport::{RecordingTransport, Transport};

#[cfg(feature = "usb")]
pub use transport::SerialTransport;

#[cfg(feature = "ble")]
pub use ble::{BleTransport, LOW_POWER_SERVICE_UUID, RECEIVE_CHAR_UUID, SEND_CHAR_UUID};
