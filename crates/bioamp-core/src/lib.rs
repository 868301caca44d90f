//! Bioamp Core - `no_std` wire protocol for biosignal acquisition boards
//!
//! This crate holds everything that needs exact bit and byte reasoning when
//! talking to an 8/16-channel EEG board or its low-power 4-channel sibling.
//! It never allocates and never logs, so it can run on a dongle as well as on
//! the host; the `bioamp-host` crate layers sessions and events on top.
//!
//! # Modules
//!
//! - [`bits`]: Bit cursor and big-endian field helpers
//! - [`protocol`]: 33-byte packet framing, type table and sample decoding
//! - [`banner`]: Boot banner parsing (board identity)
//! - [`impedance`]: Lead-off impedance math, classification and test plans
//! - [`timesync`]: Host/board clock offset smoothing
//! - [`compressed`]: Low-power variant delta decoder and fragment reassembly
//! - [`commands`]: Outbound command byte tables and sequence builders
//! - [`types`]: Samples and board identity
//! - [`error`]: Protocol and validation errors
//!
//! # Features
//!
//! - `std`: Implement `std::error::Error` for the error types
//! - `defmt`: Enable `defmt` formatting for embedded logging
//!
//! # Example
//!
//! ```rust
//! use bioamp_core::protocol::{FrameScanner, Frame, SampleDecoder};
//!
//! let bytes = [0u8; 10];
//! let decoder = SampleDecoder::new(24);
//! let mut scanner = FrameScanner::new(&bytes);
//! for frame in scanner.by_ref() {
//!     if let Frame::Packet(packet) = frame {
//!         let _ = decoder.decode(&packet, None);
//!     }
//! }
//! assert_eq!(scanner.consumed(), 10);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

#[cfg(feature = "std")]
extern crate std;

pub mod banner;
pub mod bits;
pub mod commands;
pub mod compressed;
pub mod error;
pub mod impedance;
pub mod protocol;
pub mod timesync;
pub mod types;

// Re-export commonly used types at crate root
pub use banner::parse_banner;
pub use compressed::{CompressedDecoder, FragmentAssembler, LowPowerFrame};
pub use error::{ProtocolError, ValidationError};
pub use impedance::{ChannelImpedance, ImpedanceInput, ImpedanceText, InputImpedance};
pub use protocol::{Frame, FrameScanner, Packet, PacketType, SampleDecoder};
pub use timesync::{RoundTrip, TimeSyncState};
pub use types::{AccelAxis, AuxData, BoardInfo, BoardKind, Firmware, LowPowerSample, Sample, TimedAux};
