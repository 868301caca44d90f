//! Low-power variant: compressed samples and fragmented messages
//!
//! The 4-channel low-power board sends 20-byte radio notifications. The first
//! byte is a packet id that selects the payload class:
//!
//! | Id        | Payload                                                  |
//! |-----------|----------------------------------------------------------|
//! | 0         | Four 24-bit absolute counts, resets the delta baseline   |
//! | 1-100     | Two samples of four 18-bit deltas                        |
//! | 101-200   | Two samples of four 19-bit deltas                        |
//! | 201-205   | Impedance in ASCII ohms ending in `Z` (ch 1-4, reference)|
//! | 206       | Message fragment, more to come                           |
//! | 207       | Last message fragment                                    |
//!
//! Deltas are packed MSB-first with no padding between fields and mark
//! negative values by a set least significant bit.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::bits::{be_i24, BitCursor};
use crate::error::ProtocolError;
use crate::types::{LowPowerSample, LOW_POWER_CHANNELS};

// ============================================================================
// Constants
// ============================================================================

/// Payload bytes after the id byte.
pub const PAYLOAD_SIZE: usize = 19;

/// Width of each delta in packets 1-100.
pub const DELTA_18_BITS: u32 = 18;

/// Width of each delta in packets 101-200.
pub const DELTA_19_BITS: u32 = 19;

/// Largest reassembled message.
pub const MAX_MESSAGE_LEN: usize = 512;

/// Microvolts per count on the low-power front end.
pub const LOW_POWER_SCALE_UV: f64 = 1.2e6 / (8_388_607.0 * 1.5 * 51.0);

const ID_UNCOMPRESSED: u8 = 0;
const ID_FRAGMENT: u8 = 206;
const ID_FRAGMENT_STOP: u8 = 207;

/// A reassembled message.
pub type Message = Vec<u8, MAX_MESSAGE_LEN>;

/// Two samples per delta packet, one per uncompressed packet.
pub type LowPowerSamples = Vec<LowPowerSample, 2>;

// ============================================================================
// Packet Classes
// ============================================================================

/// Electrode reported by an impedance packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImpedanceSource {
    /// One-based channel 1-4
    Channel(u8),
    /// Reference electrode
    Reference,
}

/// Payload class selected by the id byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LowPowerKind {
    /// Absolute 24-bit counts
    Uncompressed,
    /// Deltas of the given width for packet index `index` (1-100)
    Delta {
        /// Field width in bits
        width: u32,
        /// Position within the delta run
        index: u8,
    },
    /// Impedance report
    Impedance(ImpedanceSource),
    /// Fragment with more to follow
    Fragment,
    /// Last fragment
    FragmentStop,
}

impl LowPowerKind {
    /// Classify a packet id.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownLowPowerPacket`] for ids above 207.
    pub const fn from_id(id: u8) -> Result<Self, ProtocolError> {
        match id {
            ID_UNCOMPRESSED => Ok(Self::Uncompressed),
            1..=100 => Ok(Self::Delta { width: DELTA_18_BITS, index: id }),
            101..=200 => Ok(Self::Delta { width: DELTA_19_BITS, index: id - 100 }),
            201..=204 => Ok(Self::Impedance(ImpedanceSource::Channel(id - 200))),
            205 => Ok(Self::Impedance(ImpedanceSource::Reference)),
            ID_FRAGMENT => Ok(Self::Fragment),
            ID_FRAGMENT_STOP => Ok(Self::FragmentStop),
            _ => Err(ProtocolError::UnknownLowPowerPacket { id }),
        }
    }
}

/// Result of decoding one notification.
#[derive(Clone, Debug, PartialEq)]
pub enum LowPowerFrame {
    /// Decoded samples, in order
    Samples(LowPowerSamples),
    /// Impedance report
    Impedance {
        /// Electrode the value is for
        source: ImpedanceSource,
        /// Impedance in ohms
        ohms: f64,
    },
    /// A complete reassembled message
    Message(Message),
    /// Fragment buffered, message not complete yet
    FragmentBuffered,
}

// ============================================================================
// Delta Decoding
// ============================================================================

/// Unpack two samples of four deltas from a payload.
///
/// # Errors
///
/// Returns [`ProtocolError::BitFieldOutOfRange`] if the payload is too short
/// for eight fields of `width` bits.
pub fn decode_deltas(
    payload: &[u8],
    width: u32,
) -> Result<[[i32; LOW_POWER_CHANNELS]; 2], ProtocolError> {
    let mut cursor = BitCursor::new(payload);
    let mut deltas = [[0i32; LOW_POWER_CHANNELS]; 2];
    for sample in &mut deltas {
        for delta in sample.iter_mut() {
            *delta = cursor.read_delta(width)?;
        }
    }
    Ok(deltas)
}

/// Unpack four absolute 24-bit counts.
///
/// # Errors
///
/// Returns [`ProtocolError::IncompletePacket`] if fewer than 12 bytes are given.
pub fn decode_uncompressed(payload: &[u8]) -> Result<[i32; LOW_POWER_CHANNELS], ProtocolError> {
    let needed = LOW_POWER_CHANNELS * 3;
    if payload.len() < needed {
        return Err(ProtocolError::IncompletePacket { received: payload.len(), expected: needed });
    }
    let mut counts = [0i32; LOW_POWER_CHANNELS];
    for (i, count) in counts.iter_mut().enumerate() {
        *count = be_i24([payload[i * 3], payload[i * 3 + 1], payload[i * 3 + 2]]);
    }
    Ok(counts)
}

/// Parse an ASCII ohm value terminated by `Z`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedImpedance`] if no digits precede the
/// terminator or a non-digit appears.
pub fn parse_impedance(payload: &[u8], channel: u8) -> Result<f64, ProtocolError> {
    let malformed = ProtocolError::MalformedImpedance { channel };
    let end = payload.iter().position(|&b| b == b'Z').unwrap_or(payload.len());
    let digits = &payload[..end];
    if digits.is_empty() {
        return Err(malformed);
    }
    let mut value: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(malformed);
        }
        value = value.saturating_mul(10).saturating_add(u64::from(b - b'0'));
    }
    #[allow(clippy::cast_precision_loss)]
    Ok(value as f64)
}

// ============================================================================
// Fragment Reassembly
// ============================================================================

/// Stitches multi-notification ASCII messages back together.
#[derive(Debug, Clone, Default)]
pub struct FragmentAssembler {
    buffer: Message,
}

impl FragmentAssembler {
    /// Empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered so far.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Append a start/continue fragment.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FragmentOverflow`] and drops the partial
    /// message if it would exceed [`MAX_MESSAGE_LEN`].
    pub fn push(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if self.buffer.extend_from_slice(payload).is_err() {
            let required = self.buffer.len() + payload.len();
            self.buffer.clear();
            return Err(ProtocolError::FragmentOverflow { required, capacity: MAX_MESSAGE_LEN });
        }
        Ok(())
    }

    /// Append the stop fragment and take the whole message.
    ///
    /// A stop with nothing buffered yields just its own payload.
    ///
    /// # Errors
    ///
    /// Same as [`FragmentAssembler::push`].
    pub fn finish(&mut self, payload: &[u8]) -> Result<Message, ProtocolError> {
        self.push(payload)?;
        Ok(core::mem::take(&mut self.buffer))
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Stateful decoder for low-power notifications.
///
/// Holds the last absolute counts so each delta packet can be integrated,
/// plus the fragment assembler.
#[derive(Debug, Clone, Default)]
pub struct CompressedDecoder {
    last_counts: [i32; LOW_POWER_CHANNELS],
    fragments: FragmentAssembler,
}

impl CompressedDecoder {
    /// Decoder with a zero baseline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent absolute counts.
    #[must_use]
    pub const fn last_counts(&self) -> [i32; LOW_POWER_CHANNELS] {
        self.last_counts
    }

    /// Decode one notification (id byte plus payload).
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for an empty notification, an unknown id,
    /// a short payload, a malformed impedance report or a fragment overflow.
    /// The delta baseline is left untouched on error.
    pub fn decode(&mut self, notification: &[u8]) -> Result<LowPowerFrame, ProtocolError> {
        let (&id, payload) = notification
            .split_first()
            .ok_or(ProtocolError::IncompletePacket { received: 0, expected: 1 })?;

        match LowPowerKind::from_id(id)? {
            LowPowerKind::Uncompressed => {
                let counts = decode_uncompressed(payload)?;
                self.last_counts = counts;
                let mut samples = LowPowerSamples::new();
                let _ = samples.push(to_sample(0, counts));
                Ok(LowPowerFrame::Samples(samples))
            }
            LowPowerKind::Delta { width, index } => {
                let deltas = decode_deltas(payload, width)?;
                let first_number = index * 2 - 1;
                let mut samples = LowPowerSamples::new();
                for (offset, delta) in deltas.iter().enumerate() {
                    for (count, d) in self.last_counts.iter_mut().zip(delta) {
                        *count = count.wrapping_add(*d);
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let number = first_number + offset as u8;
                    let _ = samples.push(to_sample(number, self.last_counts));
                }
                Ok(LowPowerFrame::Samples(samples))
            }
            LowPowerKind::Impedance(source) => {
                let channel = match source {
                    ImpedanceSource::Channel(channel) => channel,
                    ImpedanceSource::Reference => 0,
                };
                let ohms = parse_impedance(payload, channel)?;
                Ok(LowPowerFrame::Impedance { source, ohms })
            }
            LowPowerKind::Fragment => {
                self.fragments.push(payload)?;
                Ok(LowPowerFrame::FragmentBuffered)
            }
            LowPowerKind::FragmentStop => Ok(LowPowerFrame::Message(self.fragments.finish(payload)?)),
        }
    }

    /// Drop the baseline and any partial message.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn to_sample(sample_number: u8, counts: [i32; LOW_POWER_CHANNELS]) -> LowPowerSample {
    let mut channel_data = [0.0; LOW_POWER_CHANNELS];
    for (value, count) in channel_data.iter_mut().zip(counts) {
        *value = f64::from(count) * LOW_POWER_SCALE_UV;
    }
    LowPowerSample { sample_number, counts, channel_data }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_PATTERN: [u8; PAYLOAD_SIZE] = [
        0b0000_0000, 0b0000_0000, 0b0000_0000, 0b0000_0000, 0b0000_1000,
        0b0000_0000, 0b0000_0101, 0b0000_0000, 0b0000_0000, 0b0100_1000,
        0b0000_0000, 0b0000_1001, 0b1111_0000, 0b0000_0001, 0b1011_0000,
        0b0000_0000, 0b0011_0000, 0b0000_0000, 0b0000_1000,
    ];

    const HIGH_PATTERN: [u8; PAYLOAD_SIZE] = [
        0b1111_1111, 0b1111_1111, 0b1011_1111, 0b1111_1111, 0b1110_1111,
        0b1111_1111, 0b1111_1100, 0b1111_1111, 0b1111_1111, 0b0101_1000,
        0b0000_0000, 0b0000_1011, 0b0011_1110, 0b0011_1000, 0b1110_0000,
        0b0000_0000, 0b0011_1111, 0b1111_0000, 0b0000_0001,
    ];

    fn notification(id: u8, payload: &[u8]) -> Vec<u8, 64> {
        let mut bytes = Vec::new();
        bytes.push(id).unwrap();
        bytes.extend_from_slice(payload).unwrap();
        bytes
    }

    #[test]
    fn test_delta_vector_zero_pattern() {
        let deltas = decode_deltas(&ZERO_PATTERN, DELTA_19_BITS).unwrap();
        assert_eq!(deltas, [[0, 2, 10, 4], [262_148, 507_910, 393_222, 8]]);
    }

    #[test]
    fn test_delta_vector_high_pattern() {
        let deltas = decode_deltas(&HIGH_PATTERN, DELTA_19_BITS).unwrap();
        assert_eq!(deltas, [[-3, -5, -7, -11], [-262_139, -198_429, -262_137, -4095]]);
    }

    #[test]
    fn test_delta_short_payload() {
        let err = decode_deltas(&ZERO_PATTERN[..17], DELTA_18_BITS).unwrap_err();
        assert!(matches!(err, ProtocolError::BitFieldOutOfRange { width: 18, .. }));
    }

    #[test]
    fn test_kind_table() {
        assert_eq!(LowPowerKind::from_id(0), Ok(LowPowerKind::Uncompressed));
        assert_eq!(LowPowerKind::from_id(1), Ok(LowPowerKind::Delta { width: 18, index: 1 }));
        assert_eq!(LowPowerKind::from_id(100), Ok(LowPowerKind::Delta { width: 18, index: 100 }));
        assert_eq!(LowPowerKind::from_id(101), Ok(LowPowerKind::Delta { width: 19, index: 1 }));
        assert_eq!(
            LowPowerKind::from_id(203),
            Ok(LowPowerKind::Impedance(ImpedanceSource::Channel(3)))
        );
        assert_eq!(
            LowPowerKind::from_id(205),
            Ok(LowPowerKind::Impedance(ImpedanceSource::Reference))
        );
        assert_eq!(
            LowPowerKind::from_id(208),
            Err(ProtocolError::UnknownLowPowerPacket { id: 208 })
        );
    }

    #[test]
    fn test_uncompressed_then_delta_integration() {
        let mut decoder = CompressedDecoder::new();
        let raw = [0x00, 0x00, 0x64, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        let frame = decoder.decode(&notification(0, &raw)).unwrap();
        let LowPowerFrame::Samples(samples) = frame else { panic!("expected samples") };
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].sample_number, 0);
        assert_eq!(samples[0].counts, [100, -1, 0, 1]);

        let frame = decoder.decode(&notification(101, &HIGH_PATTERN)).unwrap();
        let LowPowerFrame::Samples(samples) = frame else { panic!("expected samples") };
        assert_eq!(samples[0].sample_number, 1);
        assert_eq!(samples[1].sample_number, 2);
        assert_eq!(samples[0].counts, [97, -6, -7, -10]);
        assert_eq!(samples[1].counts, [97 - 262_139, -6 - 198_429, -7 - 262_137, -10 - 4095]);
        assert_eq!(decoder.last_counts(), samples[1].counts);
        assert!((samples[0].channel_data[0] - 97.0 * LOW_POWER_SCALE_UV).abs() < 1e-12);
    }

    #[test]
    fn test_delta_sample_numbers() {
        let mut decoder = CompressedDecoder::new();
        let frame = decoder.decode(&notification(150, &ZERO_PATTERN)).unwrap();
        let LowPowerFrame::Samples(samples) = frame else { panic!("expected samples") };
        assert_eq!(samples[0].sample_number, 99);
        assert_eq!(samples[1].sample_number, 100);
    }

    #[test]
    fn test_fragments_reassemble() {
        let mut decoder = CompressedDecoder::new();
        assert_eq!(
            decoder.decode(&notification(206, b"taco")).unwrap(),
            LowPowerFrame::FragmentBuffered
        );
        assert_eq!(
            decoder.decode(&notification(206, b"vegas")).unwrap(),
            LowPowerFrame::FragmentBuffered
        );
        let frame = decoder.decode(&notification(207, b"hola")).unwrap();
        let LowPowerFrame::Message(message) = frame else { panic!("expected message") };
        assert_eq!(message.as_slice(), b"tacovegashola");
    }

    #[test]
    fn test_isolated_stop_fragment() {
        let mut decoder = CompressedDecoder::new();
        let frame = decoder.decode(&notification(207, b"hola")).unwrap();
        let LowPowerFrame::Message(message) = frame else { panic!("expected message") };
        assert_eq!(message.as_slice(), b"hola");
    }

    #[test]
    fn test_fragment_overflow_drops_partial() {
        let mut assembler = FragmentAssembler::new();
        let chunk = [b'a'; 200];
        assembler.push(&chunk).unwrap();
        assembler.push(&chunk).unwrap();
        let err = assembler.push(&chunk).unwrap_err();
        assert_eq!(err, ProtocolError::FragmentOverflow { required: 600, capacity: MAX_MESSAGE_LEN });
        assert!(assembler.pending().is_empty());
    }

    #[test]
    fn test_impedance_report() {
        let mut decoder = CompressedDecoder::new();
        let frame = decoder.decode(&notification(202, b"12345Z")).unwrap();
        assert_eq!(
            frame,
            LowPowerFrame::Impedance { source: ImpedanceSource::Channel(2), ohms: 12_345.0 }
        );
        let err = decoder.decode(&notification(205, b"Z")).unwrap_err();
        assert_eq!(err, ProtocolError::MalformedImpedance { channel: 0 });
        assert!(parse_impedance(b"12a4Z", 1).is_err());
    }

    #[test]
    fn test_empty_notification() {
        let mut decoder = CompressedDecoder::new();
        assert!(decoder.decode(&[]).is_err());
    }
}
