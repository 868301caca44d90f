//! Error types for the acquisition protocol core
//!
//! Errors here work in `no_std` environments and carry enough context to be
//! logged without heap allocation. Two families exist:
//!
//! - [`ProtocolError`]: malformed bytes from the board. These are recovered
//!   locally (resynchronization, dropped packet) and are never fatal.
//! - [`ValidationError`]: a caller passed an argument of the wrong shape or
//!   range. These are reported synchronously and never retried.

use core::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Protocol Errors
// ============================================================================

/// Errors in the byte stream coming from the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolError {
    /// First byte of a packet window is not the start marker
    InvalidStartByte {
        /// Byte found at the start position
        got: u8,
    },
    /// Last byte of a packet window does not carry the stop-marker high nibble
    InvalidStopByte {
        /// Byte found at the stop position
        got: u8,
    },
    /// Stop-byte low nibble is not a known packet type
    UnknownPacketType {
        /// Type code (low nibble of the stop byte)
        code: u8,
    },
    /// Not enough bytes to hold the structure being decoded
    IncompletePacket {
        /// Bytes received
        received: usize,
        /// Bytes expected
        expected: usize,
    },
    /// A bit field extends past the end of its buffer
    BitFieldOutOfRange {
        /// Bit position where the read started
        position: usize,
        /// Requested field width in bits
        width: u32,
        /// Total bits available
        available: usize,
    },
    /// Low-power notification id is not a known packet class
    UnknownLowPowerPacket {
        /// Packet id byte
        id: u8,
    },
    /// Multi-fragment message does not fit the reassembly buffer
    FragmentOverflow {
        /// Bytes that would have been held
        required: usize,
        /// Reassembly buffer capacity
        capacity: usize,
    },
    /// Impedance report payload is not an ASCII ohm value
    MalformedImpedance {
        /// Channel the report was for
        channel: u8,
    },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStartByte { got } => write!(f, "Invalid start byte: 0x{got:02X}"),
            Self::InvalidStopByte { got } => write!(f, "Invalid stop byte: 0x{got:02X}"),
            Self::UnknownPacketType { code } => write!(f, "Unknown packet type code: {code}"),
            Self::IncompletePacket { received, expected } => {
                write!(f, "Incomplete packet: got {received}/{expected} bytes")
            }
            Self::BitFieldOutOfRange { position, width, available } => {
                write!(f, "Bit field {width} bits at {position} exceeds {available} available bits")
            }
            Self::UnknownLowPowerPacket { id } => {
                write!(f, "Unknown low-power packet id: {id}")
            }
            Self::FragmentOverflow { required, capacity } => {
                write!(f, "Fragmented message too large: {required} bytes (capacity {capacity})")
            }
            Self::MalformedImpedance { channel } => {
                write!(f, "Malformed impedance report for channel {channel}")
            }
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ProtocolError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::InvalidStartByte { got } => defmt::write!(f, "Bad start 0x{:02X}", got),
            Self::InvalidStopByte { got } => defmt::write!(f, "Bad stop 0x{:02X}", got),
            Self::UnknownPacketType { code } => defmt::write!(f, "Unknown type {}", code),
            Self::IncompletePacket { received, expected } => {
                defmt::write!(f, "Incomplete {}/{}", received, expected);
            }
            Self::BitFieldOutOfRange { position, width, .. } => {
                defmt::write!(f, "Bit field {}@{} out of range", width, position);
            }
            Self::UnknownLowPowerPacket { id } => defmt::write!(f, "Unknown LP id {}", id),
            Self::FragmentOverflow { required, capacity } => {
                defmt::write!(f, "Fragment overflow {} > {}", required, capacity);
            }
            Self::MalformedImpedance { channel } => {
                defmt::write!(f, "Bad impedance ch{}", channel);
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ProtocolError {}

// ============================================================================
// Validation Errors
// ============================================================================

/// Errors in caller-supplied arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationError {
    /// Channel number outside `1..=max`
    InvalidChannel {
        /// Requested channel number
        channel: u8,
        /// Highest valid channel on this board
        max: u8,
    },
    /// Argument has the wrong kind or value
    InvalidArgument {
        /// Argument name
        name: &'static str,
        /// What was wrong with it
        reason: &'static str,
    },
    /// Gain is not one of 1, 2, 4, 6, 8, 12, 24
    InvalidGain {
        /// Requested gain
        gain: u8,
    },
    /// Impedance instruction symbol is not one of `- N n P p B b`
    InvalidInstruction {
        /// Offending symbol
        symbol: char,
    },
    /// Number of per-channel instructions differs from the channel count
    InstructionCountMismatch {
        /// Instructions supplied
        got: usize,
        /// Channels on this board
        expected: usize,
    },
    /// Radio channel outside `1..=25`
    InvalidRadioChannel {
        /// Requested radio channel
        channel: u8,
    },
    /// Radio poll time outside `0..=255`
    InvalidPollTime {
        /// Requested poll time
        value: u16,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChannel { channel, max } => {
                write!(f, "Invalid channel {channel}: must be between 1 and {max}")
            }
            Self::InvalidArgument { name, reason } => write!(f, "Invalid argument {name}: {reason}"),
            Self::InvalidGain { gain } => {
                write!(f, "Invalid gain {gain}: must be one of 1, 2, 4, 6, 8, 12, 24")
            }
            Self::InvalidInstruction { symbol } => {
                write!(f, "Invalid impedance instruction '{symbol}'")
            }
            Self::InstructionCountMismatch { got, expected } => {
                write!(f, "Got {got} impedance instructions for {expected} channels")
            }
            Self::InvalidRadioChannel { channel } => {
                write!(f, "Invalid radio channel {channel}: must be between 1 and 25")
            }
            Self::InvalidPollTime { value } => {
                write!(f, "Invalid poll time {value}: must be between 0 and 255")
            }
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ValidationError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::InvalidChannel { channel, max } => {
                defmt::write!(f, "Invalid channel {} (max {})", channel, max);
            }
            Self::InvalidArgument { name, .. } => defmt::write!(f, "Invalid {}", name),
            Self::InvalidGain { gain } => defmt::write!(f, "Invalid gain {}", gain),
            Self::InvalidInstruction { symbol } => defmt::write!(f, "Invalid symbol {}", symbol),
            Self::InstructionCountMismatch { got, expected } => {
                defmt::write!(f, "{} instructions for {} channels", got, expected);
            }
            Self::InvalidRadioChannel { channel } => defmt::write!(f, "Invalid radio ch {}", channel),
            Self::InvalidPollTime { value } => defmt::write!(f, "Invalid poll time {}", value),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ValidationError {}

// ============================================================================
// Tests
// ============================================================================
