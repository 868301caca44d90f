//! Core types for decoded board data
//!
//! Samples are produced once per qualified packet and never mutated after
//! emission. Board identity comes from the boot banner and drives channel
//! counts, sample rates and impedance windows everywhere else.

use serde::{Deserialize, Serialize};

/// Channels carried by one standard packet.
pub const CHANNELS_PER_PACKET: usize = 8;

/// Channels carried by one low-power sample.
pub const LOW_POWER_CHANNELS: usize = 4;

// ============================================================================
// Board Identity
// ============================================================================

/// Board family, as reported by the boot banner.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardKind {
    /// Single ADC, 8 channels at 250 Hz
    #[default]
    Default,
    /// Stacked daisy ADC, 16 channels at 125 Hz
    Daisy,
    /// Low-power radio board, 4 channels at 200 Hz
    LowPower,
}

impl BoardKind {
    /// Effective sample rate in Hz.
    #[must_use]
    pub const fn sample_rate(self) -> u16 {
        match self {
            Self::Default => 250,
            Self::Daisy => 125,
            Self::LowPower => 200,
        }
    }

    /// Number of physical channels.
    #[must_use]
    pub const fn channel_count(self) -> u8 {
        match self {
            Self::Default => 8,
            Self::Daisy => 16,
            Self::LowPower => 4,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BoardKind {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Default => defmt::write!(f, "Default"),
            Self::Daisy => defmt::write!(f, "Daisy"),
            Self::LowPower => defmt::write!(f, "LowPower"),
        }
    }
}

/// Firmware generation.
///
/// Only v2 firmware understands the time-sync command and emits the
/// time-stamped packet types.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Firmware {
    /// Original firmware
    #[default]
    V1,
    /// Firmware with time-sync support
    V2,
}

/// Board identity derived from the boot banner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    /// Firmware generation
    pub firmware: Firmware,
    /// Board family
    pub board_kind: BoardKind,
    /// Sample rate in Hz
    pub sample_rate: u16,
    /// Number of physical channels
    pub channel_count: u8,
}

impl BoardInfo {
    /// Build board info with the rate and channel count implied by `board_kind`.
    #[must_use]
    pub const fn new(firmware: Firmware, board_kind: BoardKind) -> Self {
        Self {
            firmware,
            board_kind,
            sample_rate: board_kind.sample_rate(),
            channel_count: board_kind.channel_count(),
        }
    }

    /// Whether the board carries the daisy module.
    #[must_use]
    pub const fn is_daisy(&self) -> bool {
        matches!(self.board_kind, BoardKind::Daisy)
    }
}

impl Default for BoardInfo {
    fn default() -> Self {
        Self::new(Firmware::V1, BoardKind::Default)
    }
}

// ============================================================================
// Auxiliary Payloads
// ============================================================================

/// Accelerometer axis carried by a time-stamped accel packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccelAxis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
}

impl AccelAxis {
    /// Axis reported for a given sample number.
    ///
    /// Time-stamped accel packets carry a single axis, rotating on the last
    /// decimal digit of the sample number (7, 8, 9); other packets carry none.
    #[must_use]
    pub const fn for_sample_number(sample_number: u8) -> Option<Self> {
        match sample_number % 10 {
            7 => Some(Self::X),
            8 => Some(Self::Y),
            9 => Some(Self::Z),
            _ => None,
        }
    }
}

/// The two auxiliary bytes left over in a time-stamped packet.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TimedAux {
    /// One accelerometer axis in g
    Accel {
        /// Which axis the value belongs to
        axis: AccelAxis,
        /// Acceleration in g
        value: f64,
    },
    /// Two opaque user bytes
    Raw([u8; 2]),
    /// Accel packet whose sample number carries no axis
    None,
}

/// Auxiliary section of a sample, selected by the packet type code.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AuxData {
    /// X, Y, Z acceleration in g
    Accel([f64; 3]),
    /// Six opaque user bytes
    Raw([u8; 6]),
    /// Board clock reading plus the remaining two aux bytes
    Timed {
        /// Board-relative milliseconds
        board_time_ms: u32,
        /// Set on the packet that answers a time-sync request
        sync_set: bool,
        /// Remaining auxiliary payload
        aux: TimedAux,
    },
}

// ============================================================================
// Samples
// ============================================================================

/// One decoded standard packet.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Sample counter (wraps 0-255)
    pub sample_number: u8,
    /// Channel values in microvolts
    pub channel_data: [f64; CHANNELS_PER_PACKET],
    /// Auxiliary payload
    pub aux: AuxData,
    /// Board time corrected into host time (ms), once clocks are synced
    pub timestamp_ms: Option<f64>,
}

impl Sample {
    /// Board-relative milliseconds, for time-stamped packet types.
    #[must_use]
    pub const fn board_time_ms(&self) -> Option<u32> {
        match self.aux {
            AuxData::Timed { board_time_ms, .. } => Some(board_time_ms),
            _ => None,
        }
    }

    /// Value for a zero-based channel index.
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<f64> {
        self.channel_data.get(index).copied()
    }
}

/// One decoded low-power sample (uncompressed or delta-integrated).
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LowPowerSample {
    /// Sample number derived from the packet id
    pub sample_number: u8,
    /// Absolute ADC counts per channel
    pub counts: [i32; LOW_POWER_CHANNELS],
    /// Channel values in microvolts
    pub channel_data: [f64; LOW_POWER_CHANNELS],
}

// ============================================================================
// Tests
// ============================================================================
