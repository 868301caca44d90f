//! Outbound command tables and sequence builders
//!
//! Every host-to-board command is a printable ASCII byte or a short bracketed
//! sequence. Each mapping between a meaning and its wire byte lives in exactly
//! one table below, and lookups run through that table in both directions.
//!
//! # Example
//!
//! ```rust
//! use bioamp_core::commands::{channel_setter, ChannelSettings, InputType};
//!
//! let settings = ChannelSettings {
//!     channel: 1,
//!     power_down: false,
//!     gain: 24,
//!     input_type: InputType::Normal,
//!     bias: true,
//!     srb2: true,
//!     srb1: false,
//! };
//! assert_eq!(&channel_setter(&settings).unwrap(), b"x1060110X");
//! ```

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::impedance::MAX_CHANNELS;

// ============================================================================
// Single-byte Commands
// ============================================================================

/// Commands that are a single byte on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Start the sample stream
    StreamStart,
    /// Stop the sample stream
    StreamStop,
    /// Soft reset; the board answers with its banner
    SoftReset,
    /// Dump register settings
    QueryRegisters,
    /// Request a time-sync reply
    TimeSyncSet,
    /// Limit to 8 channels
    ChannelMax8,
    /// Allow 16 channels
    ChannelMax16,
    /// Restore default channel settings
    DefaultChannelSettingsSet,
    /// Report default channel settings
    DefaultChannelSettingsGet,
    /// Enable the on-board notch filter
    FilterEnable,
    /// Disable the on-board notch filter
    FilterDisable,
    /// Mark an external trigger
    Trigger,
    /// Stop SD card logging
    SdLogStop,
}

const COMMAND_TABLE: [(Command, u8); 13] = [
    (Command::StreamStart, b'b'),
    (Command::StreamStop, b's'),
    (Command::SoftReset, b'v'),
    (Command::QueryRegisters, b'?'),
    (Command::TimeSyncSet, b'<'),
    (Command::ChannelMax8, b'c'),
    (Command::ChannelMax16, b'C'),
    (Command::DefaultChannelSettingsSet, b'd'),
    (Command::DefaultChannelSettingsGet, b'D'),
    (Command::FilterEnable, b'f'),
    (Command::FilterDisable, b'g'),
    (Command::Trigger, b'`'),
    (Command::SdLogStop, b'j'),
];

/// Byte the board sends to acknowledge a time-sync request.
pub const TIME_SYNC_ACK: u8 = b',';

impl Command {
    /// Wire byte.
    #[must_use]
    pub fn byte(self) -> u8 {
        lookup_byte(&COMMAND_TABLE, self).unwrap_or(b'?')
    }

    /// Command for a wire byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        lookup_value(&COMMAND_TABLE, byte)
    }
}

fn lookup_byte<T: PartialEq + Copy>(table: &[(T, u8)], value: T) -> Option<u8> {
    table.iter().find(|(v, _)| *v == value).map(|(_, b)| *b)
}

fn lookup_value<T: Copy>(table: &[(T, u8)], byte: u8) -> Option<T> {
    table.iter().find(|(_, b)| *b == byte).map(|(v, _)| *v)
}

// ============================================================================
// Channel Keys
// ============================================================================

const CHANNEL_OFF: [u8; MAX_CHANNELS] = *b"12345678qwertyui";
const CHANNEL_ON: [u8; MAX_CHANNELS] = *b"!@#$%^&*QWERTYUI";
const CHANNEL_ID: [u8; MAX_CHANNELS] = *b"12345678QWERTYUI";

#[allow(clippy::cast_possible_truncation)]
const MAX_CHANNEL_NUMBER: u8 = MAX_CHANNELS as u8;

fn channel_index(channel: u8) -> Result<usize, ValidationError> {
    if channel == 0 || channel > MAX_CHANNEL_NUMBER {
        return Err(ValidationError::InvalidChannel { channel, max: MAX_CHANNEL_NUMBER });
    }
    Ok(usize::from(channel) - 1)
}

/// Byte that powers a channel down.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidChannel`] outside `1..=16`.
pub fn channel_off(channel: u8) -> Result<u8, ValidationError> {
    Ok(CHANNEL_OFF[channel_index(channel)?])
}

/// Byte that powers a channel up.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidChannel`] outside `1..=16`.
pub fn channel_on(channel: u8) -> Result<u8, ValidationError> {
    Ok(CHANNEL_ON[channel_index(channel)?])
}

/// Channel identifier used inside bracketed sequences.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidChannel`] outside `1..=16`.
pub fn channel_id(channel: u8) -> Result<u8, ValidationError> {
    Ok(CHANNEL_ID[channel_index(channel)?])
}

// ============================================================================
// Channel Settings
// ============================================================================

const GAIN_TABLE: [(u8, u8); 7] =
    [(1, b'0'), (2, b'1'), (4, b'2'), (6, b'3'), (8, b'4'), (12, b'5'), (24, b'6')];

/// Command byte for a programmable gain.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidGain`] for gains the ADC does not support.
pub fn gain_code(gain: u8) -> Result<u8, ValidationError> {
    lookup_byte(&GAIN_TABLE, gain).ok_or(ValidationError::InvalidGain { gain })
}

/// ADC input multiplexer setting.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputType {
    /// Electrode input
    #[default]
    Normal,
    /// Inputs shorted together
    Shorted,
    /// Bias measurement
    BiasMethod,
    /// Supply measurement
    Mvdd,
    /// Temperature sensor
    Temp,
    /// Internal test signal
    TestSig,
    /// Bias drive, positive
    BiasDrp,
    /// Bias drive, negative
    BiasDrn,
}

const INPUT_TYPE_TABLE: [(InputType, u8); 8] = [
    (InputType::Normal, b'0'),
    (InputType::Shorted, b'1'),
    (InputType::BiasMethod, b'2'),
    (InputType::Mvdd, b'3'),
    (InputType::Temp, b'4'),
    (InputType::TestSig, b'5'),
    (InputType::BiasDrp, b'6'),
    (InputType::BiasDrn, b'7'),
];

impl InputType {
    /// Wire byte.
    #[must_use]
    pub fn byte(self) -> u8 {
        lookup_byte(&INPUT_TYPE_TABLE, self).unwrap_or(b'0')
    }

    /// Input type for a wire byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        lookup_value(&INPUT_TYPE_TABLE, byte)
    }
}

/// Settings applied to one channel by the 9-byte setter sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// One-based channel number
    pub channel: u8,
    /// Power the channel down
    pub power_down: bool,
    /// Programmable gain
    pub gain: u8,
    /// Input multiplexer setting
    pub input_type: InputType,
    /// Include in bias generation
    pub bias: bool,
    /// Connect to SRB2
    pub srb2: bool,
    /// Connect to SRB1
    pub srb1: bool,
}

const fn flag(on: bool) -> u8 {
    if on {
        b'1'
    } else {
        b'0'
    }
}

/// Build `x <ch> <power> <gain> <input> <bias> <srb2> <srb1> X`.
///
/// # Errors
///
/// Returns a [`ValidationError`] for an invalid channel or gain.
pub fn channel_setter(settings: &ChannelSettings) -> Result<[u8; 9], ValidationError> {
    Ok([
        b'x',
        channel_id(settings.channel)?,
        flag(settings.power_down),
        gain_code(settings.gain)?,
        settings.input_type.byte(),
        flag(settings.bias),
        flag(settings.srb2),
        flag(settings.srb1),
        b'X',
    ])
}

/// Build `z <ch> <p> <n> Z`, applying or removing the lead-off drive.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidChannel`] outside `1..=16`.
pub fn impedance_setter(channel: u8, p_input: bool, n_input: bool) -> Result<[u8; 5], ValidationError> {
    Ok([b'z', channel_id(channel)?, flag(p_input), flag(n_input), b'Z'])
}

// ============================================================================
// Test Signals
// ============================================================================

/// Internal test signal routed to all channels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestSignal {
    /// Connect to DC
    Dc,
    /// Connect to ground
    Ground,
    /// 1x amplitude, fast pulse
    Pulse1xFast,
    /// 1x amplitude, slow pulse
    Pulse1xSlow,
    /// 2x amplitude, fast pulse
    Pulse2xFast,
    /// 2x amplitude, slow pulse
    Pulse2xSlow,
}

const TEST_SIGNAL_TABLE: [(TestSignal, u8); 6] = [
    (TestSignal::Dc, b'p'),
    (TestSignal::Ground, b'0'),
    (TestSignal::Pulse1xFast, b'='),
    (TestSignal::Pulse1xSlow, b'-'),
    (TestSignal::Pulse2xFast, b']'),
    (TestSignal::Pulse2xSlow, b'['),
];

impl TestSignal {
    /// Wire byte.
    #[must_use]
    pub fn byte(self) -> u8 {
        lookup_byte(&TEST_SIGNAL_TABLE, self).unwrap_or(b'0')
    }
}

// ============================================================================
// SD Logging
// ============================================================================

/// How long the board logs to its SD card.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SdDuration {
    /// 14 seconds
    Sec14,
    /// 5 minutes
    Min5,
    /// 15 minutes
    Min15,
    /// 30 minutes
    Min30,
    /// 1 hour
    Hour1,
    /// 2 hours
    Hour2,
    /// 4 hours
    Hour4,
    /// 12 hours
    Hour12,
    /// 24 hours
    Hour24,
}

const SD_TABLE: [(SdDuration, u8, &str); 9] = [
    (SdDuration::Sec14, b'a', "14sec"),
    (SdDuration::Min5, b'A', "5min"),
    (SdDuration::Min15, b'S', "15min"),
    (SdDuration::Min30, b'F', "30min"),
    (SdDuration::Hour1, b'G', "1hour"),
    (SdDuration::Hour2, b'H', "2hour"),
    (SdDuration::Hour4, b'J', "4hour"),
    (SdDuration::Hour12, b'K', "12hour"),
    (SdDuration::Hour24, b'L', "24hour"),
];

impl SdDuration {
    /// Wire byte that starts logging for this duration.
    #[must_use]
    pub fn byte(self) -> u8 {
        SD_TABLE.iter().find(|(d, _, _)| *d == self).map_or(b'j', |(_, b, _)| *b)
    }

    /// Human label such as `"5min"` or `"12hour"`.
    #[must_use]
    pub fn label(self) -> &'static str {
        SD_TABLE.iter().find(|(d, _, _)| *d == self).map_or("", |(_, _, l)| *l)
    }

    /// Parse a human label.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidArgument`] for unknown labels.
    pub fn from_label(label: &str) -> Result<Self, ValidationError> {
        SD_TABLE
            .iter()
            .find(|(_, _, l)| *l == label)
            .map(|(d, _, _)| *d)
            .ok_or(ValidationError::InvalidArgument {
                name: "duration",
                reason: "expected one of 14sec, 5min, 15min, 30min, 1hour, 2hour, 4hour, 12hour, 24hour",
            })
    }
}

// ============================================================================
// Radio Frames
// ============================================================================

/// Leading byte of every radio-dongle frame.
pub const RADIO_KEY: u8 = 0xF0;

/// Highest radio channel.
pub const RADIO_CHANNEL_MAX: u8 = 25;

/// Radio-dongle command.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioCommand {
    /// Read the radio channel
    ChannelGet,
    /// Set the radio channel on dongle and board
    ChannelSet(u8),
    /// Set the dongle's radio channel only
    ChannelSetOverride(u8),
    /// Read the poll time
    PollTimeGet,
    /// Set the poll time
    PollTimeSet(u16),
    /// Default baud rate
    BaudRateDefault,
    /// Fast baud rate
    BaudRateFast,
    /// System status
    SystemStatus,
}

/// Radio frame: key, command, optional argument.
pub type RadioFrame = Vec<u8, 3>;

impl RadioCommand {
    const fn code(self) -> u8 {
        match self {
            Self::ChannelGet => 0x00,
            Self::ChannelSet(_) => 0x01,
            Self::ChannelSetOverride(_) => 0x02,
            Self::PollTimeGet => 0x03,
            Self::PollTimeSet(_) => 0x04,
            Self::BaudRateDefault => 0x05,
            Self::BaudRateFast => 0x06,
            Self::SystemStatus => 0x07,
        }
    }

    /// Encode the frame.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidRadioChannel`] outside `1..=25` and
    /// [`ValidationError::InvalidPollTime`] above 255.
    pub fn frame(self) -> Result<RadioFrame, ValidationError> {
        let argument = match self {
            Self::ChannelSet(channel) | Self::ChannelSetOverride(channel) => {
                if channel == 0 || channel > RADIO_CHANNEL_MAX {
                    return Err(ValidationError::InvalidRadioChannel { channel });
                }
                Some(channel)
            }
            Self::PollTimeSet(value) => {
                Some(u8::try_from(value).map_err(|_| ValidationError::InvalidPollTime { value })?)
            }
            _ => None,
        };

        let mut frame = RadioFrame::new();
        // Capacity 3 always fits key, code and one argument
        let _ = frame.push(RADIO_KEY);
        let _ = frame.push(self.code());
        if let Some(argument) = argument {
            let _ = frame.push(argument);
        }
        Ok(frame)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_table_both_ways() {
        for (command, byte) in COMMAND_TABLE {
            assert_eq!(command.byte(), byte);
            assert_eq!(Command::from_byte(byte), Some(command));
        }
        assert_eq!(Command::SoftReset.byte(), b'v');
        assert_eq!(Command::from_byte(b'Z'), None);
    }

    #[test]
    fn test_channel_keys() {
        assert_eq!(channel_off(1).unwrap(), b'1');
        assert_eq!(channel_off(9).unwrap(), b'q');
        assert_eq!(channel_on(8).unwrap(), b'*');
        assert_eq!(channel_on(16).unwrap(), b'I');
        assert_eq!(channel_id(10).unwrap(), b'W');
        assert!(channel_off(0).is_err());
        assert_eq!(
            channel_on(17),
            Err(ValidationError::InvalidChannel { channel: 17, max: 16 })
        );
    }

    #[test]
    fn test_gain_codes() {
        assert_eq!(gain_code(1).unwrap(), b'0');
        assert_eq!(gain_code(24).unwrap(), b'6');
        assert_eq!(gain_code(3), Err(ValidationError::InvalidGain { gain: 3 }));
    }

    #[test]
    fn test_channel_setter_daisy_channel() {
        let settings = ChannelSettings {
            channel: 12,
            power_down: true,
            gain: 8,
            input_type: InputType::BiasDrn,
            bias: false,
            srb2: false,
            srb1: true,
        };
        assert_eq!(&channel_setter(&settings).unwrap(), b"xR147001X");
    }

    #[test]
    fn test_impedance_setter() {
        assert_eq!(&impedance_setter(3, true, false).unwrap(), b"z310Z");
        assert_eq!(&impedance_setter(9, false, false).unwrap(), b"zQ00Z");
        assert!(impedance_setter(0, true, true).is_err());
    }

    #[test]
    fn test_sd_durations() {
        assert_eq!(SdDuration::Hour12.byte(), b'K');
        assert_eq!(SdDuration::from_label("5min").unwrap(), SdDuration::Min5);
        assert_eq!(SdDuration::Sec14.label(), "14sec");
        assert!(SdDuration::from_label("3days").is_err());
    }

    #[test]
    fn test_radio_frames() {
        assert_eq!(RadioCommand::ChannelGet.frame().unwrap().as_slice(), &[0xF0, 0x00]);
        assert_eq!(RadioCommand::ChannelSet(25).frame().unwrap().as_slice(), &[0xF0, 0x01, 25]);
        assert_eq!(
            RadioCommand::ChannelSetOverride(26).frame(),
            Err(ValidationError::InvalidRadioChannel { channel: 26 })
        );
        assert_eq!(RadioCommand::PollTimeSet(80).frame().unwrap().as_slice(), &[0xF0, 0x04, 80]);
        assert_eq!(
            RadioCommand::PollTimeSet(256).frame(),
            Err(ValidationError::InvalidPollTime { value: 256 })
        );
        assert_eq!(RadioCommand::SystemStatus.frame().unwrap().as_slice(), &[0xF0, 0x07]);
    }

    #[test]
    fn test_test_signal_bytes() {
        assert_eq!(TestSignal::Pulse2xSlow.byte(), b'[');
        assert_eq!(InputType::from_byte(b'5'), Some(InputType::TestSig));
    }
}
