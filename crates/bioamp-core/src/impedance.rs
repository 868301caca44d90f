//! Lead-off impedance math and test plans
//!
//! The board injects a small AC current at 31.5 Hz into the electrode under
//! test. The RMS voltage of that channel over a window of whole drive cycles
//! gives the contact impedance through Ohm's law, less the on-board series
//! resistor.
//!
//! # Example
//!
//! ```rust
//! use bioamp_core::impedance::{classify, impedance_from_rms, ImpedanceText};
//!
//! let ohms = impedance_from_rms(10.0);
//! assert_eq!(classify(ohms), ImpedanceText::Bad);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ============================================================================
// Constants
// ============================================================================

/// Lead-off drive current in amps.
pub const LEAD_OFF_DRIVE_AMPS: f64 = 6.0e-9;

/// Lead-off drive frequency in Hz.
pub const LEAD_OFF_FREQUENCY_HZ: f64 = 31.5;

/// On-board series resistor in ohms.
pub const SERIES_RESISTOR_OHMS: f64 = 2200.0;

/// Drive cycles collected per measurement.
pub const WINDOW_CYCLES: f64 = 63.0;

/// Upper bound of the "good" band in ohms.
pub const GOOD_MAX_OHMS: f64 = 5_000.0;

/// Upper bound of the "ok" band in ohms.
pub const OK_MAX_OHMS: f64 = 10_000.0;

/// Upper bound of the "bad" band in ohms.
pub const BAD_MAX_OHMS: f64 = 1_000_000.0;

/// Raw value of a measurement that has not completed.
pub const INIT_RAW: f64 = -1.0;

/// Largest channel count of any supported board.
pub const MAX_CHANNELS: usize = 16;

// ============================================================================
// Math
// ============================================================================

/// Samples per measurement window at a given sample rate.
///
/// 63 drive cycles: 500 samples at 250 Hz, 250 at 125 Hz.
#[must_use]
pub fn window_size(sample_rate: u16) -> usize {
    let samples = libm::round(WINDOW_CYCLES * f64::from(sample_rate) / LEAD_OFF_FREQUENCY_HZ);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let samples = samples as usize;
    samples.max(1)
}

/// RMS of a window after removing its mean.
///
/// Returns 0 for an empty window.
#[must_use]
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let power = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    libm::sqrt(power)
}

/// Contact impedance in ohms for an RMS amplitude in microvolts.
#[must_use]
pub fn impedance_from_rms(rms_uv: f64) -> f64 {
    core::f64::consts::SQRT_2 * rms_uv * 1.0e-6 / LEAD_OFF_DRIVE_AMPS - SERIES_RESISTOR_OHMS
}

// ============================================================================
// Classification
// ============================================================================

/// Quality band of an impedance value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpedanceText {
    /// Not measured yet
    #[default]
    Init,
    /// Up to 5 kΩ
    Good,
    /// Up to 10 kΩ
    Ok,
    /// Up to 1 MΩ
    Bad,
    /// Outside any band (open lead, or non-positive)
    None,
}

impl ImpedanceText {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Good => "good",
            Self::Ok => "ok",
            Self::Bad => "bad",
            Self::None => "none",
        }
    }
}

/// Classify an impedance value in ohms.
#[must_use]
pub fn classify(ohms: f64) -> ImpedanceText {
    if ohms <= 0.0 || ohms.is_nan() {
        ImpedanceText::None
    } else if ohms <= GOOD_MAX_OHMS {
        ImpedanceText::Good
    } else if ohms <= OK_MAX_OHMS {
        ImpedanceText::Ok
    } else if ohms <= BAD_MAX_OHMS {
        ImpedanceText::Bad
    } else {
        ImpedanceText::None
    }
}

// ============================================================================
// Results
// ============================================================================

/// Which electrode input of a channel is driven.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImpedanceInput {
    /// Positive input
    P,
    /// Negative input
    N,
}

/// Measurement of one input.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputImpedance {
    /// Impedance in ohms, or [`INIT_RAW`]
    pub raw: f64,
    /// Quality band
    pub text: ImpedanceText,
}

impl InputImpedance {
    /// Unmeasured sentinel.
    pub const INIT: Self = Self { raw: INIT_RAW, text: ImpedanceText::Init };

    /// Completed measurement.
    #[must_use]
    pub fn measured(ohms: f64) -> Self {
        Self { raw: ohms, text: classify(ohms) }
    }
}

impl Default for InputImpedance {
    fn default() -> Self {
        Self::INIT
    }
}

/// Both inputs of one channel.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelImpedance {
    /// One-based channel number
    pub channel: u8,
    /// Positive input
    #[serde(rename = "P")]
    pub p: InputImpedance,
    /// Negative input
    #[serde(rename = "N")]
    pub n: InputImpedance,
}

impl ChannelImpedance {
    /// Unmeasured channel.
    #[must_use]
    pub const fn new(channel: u8) -> Self {
        Self { channel, p: InputImpedance::INIT, n: InputImpedance::INIT }
    }

    /// Result slot for one input.
    pub fn input_mut(&mut self, input: ImpedanceInput) -> &mut InputImpedance {
        match input {
            ImpedanceInput::P => &mut self.p,
            ImpedanceInput::N => &mut self.n,
        }
    }

    /// Reset both inputs to the unmeasured sentinel.
    pub fn reset(&mut self) {
        self.p = InputImpedance::INIT;
        self.n = InputImpedance::INIT;
    }
}

// ============================================================================
// Test Plans
// ============================================================================

/// What to do for one channel in a multi-channel test.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPlan {
    /// Measure the positive input
    pub test_p: bool,
    /// Measure the negative input
    pub test_n: bool,
    /// Reset this channel's results to "init" first
    pub reset: bool,
}

impl ChannelPlan {
    /// Parse one instruction symbol.
    ///
    /// `-` skips the channel. `p`/`P` test the positive input, `n`/`N` the
    /// negative one, `b`/`B` both. Upper case resets the channel's previous
    /// results before measuring.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidInstruction`] for any other symbol.
    pub fn from_symbol(symbol: char) -> Result<Option<Self>, ValidationError> {
        let (test_p, test_n) = match symbol.to_ascii_lowercase() {
            '-' => return Ok(None),
            'p' => (true, false),
            'n' => (false, true),
            'b' => (true, true),
            _ => return Err(ValidationError::InvalidInstruction { symbol }),
        };
        Ok(Some(Self { test_p, test_n, reset: symbol.is_ascii_uppercase() }))
    }
}

/// Per-channel plan, index 0 is channel 1.
pub type TestPlan = heapless::Vec<Option<ChannelPlan>, MAX_CHANNELS>;

/// Parse one instruction symbol per channel.
///
/// # Errors
///
/// Returns [`ValidationError::InstructionCountMismatch`] if the number of
/// symbols differs from `channel_count`, or
/// [`ValidationError::InvalidInstruction`] for an unknown symbol.
pub fn parse_plan(symbols: &str, channel_count: u8) -> Result<TestPlan, ValidationError> {
    let expected = usize::from(channel_count);
    let got = symbols.chars().count();
    if got != expected || expected > MAX_CHANNELS {
        return Err(ValidationError::InstructionCountMismatch { got, expected });
    }

    let mut plan = TestPlan::new();
    for symbol in symbols.chars() {
        let step = ChannelPlan::from_symbol(symbol)?;
        plan.push(step)
            .map_err(|_| ValidationError::InstructionCountMismatch { got, expected })?;
    }
    Ok(plan)
}

/// Check a one-based channel number against the board.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidChannel`] outside `1..=channel_count`.
pub fn check_channel(channel: u8, channel_count: u8) -> Result<(), ValidationError> {
    if channel == 0 || channel > channel_count {
        return Err(ValidationError::InvalidChannel { channel, max: channel_count });
    }
    Ok(())
}

/// Whether a sample with `sample_number` carries data for `channel`.
///
/// On a daisy board the main ADC's channels (1-8) arrive in odd-numbered
/// packets and the daisy's (9-16) in even-numbered ones.
#[must_use]
pub const fn sample_carries_channel(daisy: bool, channel: u8, sample_number: u8) -> bool {
    if !daisy {
        return true;
    }
    let odd = sample_number % 2 == 1;
    if channel <= 8 {
        odd
    } else {
        !odd
    }
}

/// Index into a packet's eight channel slots for a one-based channel.
#[must_use]
pub const fn packet_slot(channel: u8) -> usize {
    ((channel - 1) % 8) as usize
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify(2500.0), ImpedanceText::Good);
        assert_eq!(classify(7000.0), ImpedanceText::Ok);
        assert_eq!(classify(10_500.0), ImpedanceText::Bad);
        assert_eq!(classify(0.0), ImpedanceText::None);
        assert_eq!(classify(1_000_001.0), ImpedanceText::None);
        assert_eq!(classify(5000.0), ImpedanceText::Good);
        assert_eq!(classify(10_000.0), ImpedanceText::Ok);
        assert_eq!(classify(1_000_000.0), ImpedanceText::Bad);
        assert_eq!(classify(-3.0), ImpedanceText::None);
    }

    #[test]
    fn test_window_size() {
        assert_eq!(window_size(250), 500);
        assert_eq!(window_size(125), 250);
        assert_eq!(window_size(0), 1);
    }

    #[test]
    fn test_rms_removes_offset() {
        // Square wave of amplitude 2 around a DC level of 100
        let values = [102.0, 98.0, 102.0, 98.0];
        assert!((rms(&values) - 2.0).abs() < 1e-12);
        assert!(rms(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_impedance_from_rms() {
        // sqrt(2) * 10 uV / 6 nA = 2357.02 ohms, less 2200
        let ohms = impedance_from_rms(10.0);
        assert!((ohms - 157.022_603).abs() < 1e-3);
        assert_eq!(classify(ohms), ImpedanceText::Good);
    }

    #[test]
    fn test_plan_parsing() {
        let plan = parse_plan("-NnpPpbB", 8).unwrap();
        assert_eq!(plan[0], None);
        assert_eq!(plan[1], Some(ChannelPlan { test_p: false, test_n: true, reset: true }));
        assert_eq!(plan[2], Some(ChannelPlan { test_p: false, test_n: true, reset: false }));
        assert_eq!(plan[6], Some(ChannelPlan { test_p: true, test_n: true, reset: false }));
        assert_eq!(plan[7], Some(ChannelPlan { test_p: true, test_n: true, reset: true }));
    }

    #[test]
    fn test_plan_rejects_wrong_length() {
        assert_eq!(
            parse_plan("-NnpPpb", 8),
            Err(ValidationError::InstructionCountMismatch { got: 7, expected: 8 })
        );
        assert_eq!(
            parse_plan("taco", 8),
            Err(ValidationError::InstructionCountMismatch { got: 4, expected: 8 })
        );
    }

    #[test]
    fn test_plan_rejects_unknown_symbol() {
        assert_eq!(
            parse_plan("-Nnpxpbb", 8),
            Err(ValidationError::InvalidInstruction { symbol: 'x' })
        );
    }

    #[test]
    fn test_check_channel() {
        assert!(check_channel(1, 8).is_ok());
        assert!(check_channel(16, 16).is_ok());
        assert_eq!(check_channel(0, 8), Err(ValidationError::InvalidChannel { channel: 0, max: 8 }));
        assert_eq!(check_channel(9, 8), Err(ValidationError::InvalidChannel { channel: 9, max: 8 }));
    }

    #[test]
    fn test_daisy_interleave() {
        assert!(sample_carries_channel(false, 3, 2));
        assert!(sample_carries_channel(true, 3, 1));
        assert!(!sample_carries_channel(true, 3, 2));
        assert!(sample_carries_channel(true, 12, 2));
        assert_eq!(packet_slot(12), 3);
        assert_eq!(packet_slot(1), 0);
    }

    #[test]
    fn test_channel_reset() {
        let mut result = ChannelImpedance::new(4);
        *result.input_mut(ImpedanceInput::N) = InputImpedance::measured(7000.0);
        assert_eq!(result.n.text, ImpedanceText::Ok);
        result.reset();
        assert_eq!(result.n, InputImpedance::INIT);
    }
}
