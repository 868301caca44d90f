//! Wire protocol for the 33-byte sample stream
//!
//! Every sample travels as a fixed 33-byte packet:
//!
//! ```text
//! ┌──────┬────────┬──────────────────────────┬───────────┬──────┐
//! │ 0xA0 │ sample │ 8 × 24-bit BE channels   │ 6 aux     │ 0xCt │
//! │  [0] │   [1]  │         [2..26]          │  [26..32] │ [32] │
//! └──────┴────────┴──────────────────────────┴───────────┴──────┘
//! ```
//!
//! The low nibble `t` of the stop byte selects how the aux bytes are read.
//! The stream is self-synchronizing: anything that is not a start byte
//! followed 32 bytes later by a stop byte is dropped one byte at a time.

use serde::{Deserialize, Serialize};

use crate::bits::{be_i16, be_i24, be_u32};
use crate::error::ProtocolError;
use crate::types::{AccelAxis, AuxData, Sample, TimedAux, CHANNELS_PER_PACKET};

// ============================================================================
// Constants
// ============================================================================

/// Size of one packet in bytes.
pub const PACKET_SIZE: usize = 33;

/// First byte of every packet.
pub const START_BYTE: u8 = 0xA0;

/// Required high nibble of the last byte.
pub const STOP_BYTE_HIGH: u8 = 0xC0;

/// Default programmable gain of the ADC front end.
pub const DEFAULT_GAIN: u8 = 24;

/// ADC reference voltage in volts.
pub const ADC_VREF: f64 = 4.5;

/// Full-scale positive code of the 24-bit ADC.
pub const ADC_FULL_SCALE: f64 = 8_388_607.0;

/// Accelerometer scale in g per LSB.
pub const ACCEL_SCALE_G: f64 = 0.002 / 16.0;

const AUX_OFFSET: usize = 26;
const BOARD_TIME_OFFSET: usize = 28;

/// Microvolts per ADC count for a given gain.
#[inline]
#[must_use]
pub fn channel_scale(gain: u8) -> f64 {
    ADC_VREF / f64::from(gain) / ADC_FULL_SCALE * 1_000_000.0
}

// ============================================================================
// Packet Types
// ============================================================================

/// Aux-section layout selected by the stop-byte low nibble.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// Three accelerometer words
    StandardAccel,
    /// Six raw user bytes
    StandardRawAux,
    /// Reserved for user firmware, ignored
    UserDefined,
    /// Answer to a time-sync request, with one accel axis
    AccelTimeSyncSet,
    /// Time-stamped, with one accel axis
    AccelTimeSynced,
    /// Answer to a time-sync request, with two raw bytes
    RawAuxTimeSyncSet,
    /// Time-stamped, with two raw bytes
    RawAuxTimeSynced,
}

/// Wire code for each packet type.
const PACKET_TYPE_TABLE: [(PacketType, u8); 7] = [
    (PacketType::StandardAccel, 0),
    (PacketType::StandardRawAux, 1),
    (PacketType::UserDefined, 2),
    (PacketType::AccelTimeSyncSet, 3),
    (PacketType::AccelTimeSynced, 4),
    (PacketType::RawAuxTimeSyncSet, 5),
    (PacketType::RawAuxTimeSynced, 6),
];

impl PacketType {
    /// Look up a type from the stop-byte low nibble.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        PACKET_TYPE_TABLE.iter().find(|(_, c)| *c == code).map(|(t, _)| *t)
    }

    /// Stop-byte low nibble for this type.
    #[must_use]
    pub fn code(self) -> u8 {
        PACKET_TYPE_TABLE
            .iter()
            .find(|(t, _)| *t == self)
            .map_or(0, |(_, c)| *c)
    }

    /// Full stop byte for this type.
    #[must_use]
    pub fn stop_byte(self) -> u8 {
        STOP_BYTE_HIGH | self.code()
    }

    /// Whether the packet carries a board clock reading.
    #[must_use]
    pub const fn is_timed(self) -> bool {
        matches!(
            self,
            Self::AccelTimeSyncSet
                | Self::AccelTimeSynced
                | Self::RawAuxTimeSyncSet
                | Self::RawAuxTimeSynced
        )
    }

    /// Whether this packet answers a time-sync request.
    #[must_use]
    pub const fn is_time_sync_set(self) -> bool {
        matches!(self, Self::AccelTimeSyncSet | Self::RawAuxTimeSyncSet)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PacketType {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::StandardAccel => defmt::write!(f, "Accel"),
            Self::StandardRawAux => defmt::write!(f, "RawAux"),
            Self::UserDefined => defmt::write!(f, "User"),
            Self::AccelTimeSyncSet => defmt::write!(f, "AccelSyncSet"),
            Self::AccelTimeSynced => defmt::write!(f, "AccelSynced"),
            Self::RawAuxTimeSyncSet => defmt::write!(f, "RawSyncSet"),
            Self::RawAuxTimeSynced => defmt::write!(f, "RawSynced"),
        }
    }
}

// ============================================================================
// Packet
// ============================================================================

/// A qualified 33-byte packet: correct start byte and stop-byte high nibble.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Packet([u8; PACKET_SIZE]);

impl Packet {
    /// Qualify a byte slice as a packet.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly [`PACKET_SIZE`] bytes or
    /// either marker is wrong.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: [u8; PACKET_SIZE] = bytes.try_into().map_err(|_| {
            ProtocolError::IncompletePacket { received: bytes.len(), expected: PACKET_SIZE }
        })?;
        if raw[0] != START_BYTE {
            return Err(ProtocolError::InvalidStartByte { got: raw[0] });
        }
        if !is_stop_byte(raw[PACKET_SIZE - 1]) {
            return Err(ProtocolError::InvalidStopByte { got: raw[PACKET_SIZE - 1] });
        }
        Ok(Self(raw))
    }

    /// Encode a packet from raw ADC counts and aux bytes.
    ///
    /// Counts are truncated to 24 bits.
    #[must_use]
    pub fn encode(
        sample_number: u8,
        counts: &[i32; CHANNELS_PER_PACKET],
        aux: [u8; 6],
        packet_type: PacketType,
    ) -> Self {
        let mut raw = [0u8; PACKET_SIZE];
        raw[0] = START_BYTE;
        raw[1] = sample_number;
        for (i, count) in counts.iter().enumerate() {
            let bytes = count.to_be_bytes();
            raw[2 + i * 3..5 + i * 3].copy_from_slice(&bytes[1..]);
        }
        raw[AUX_OFFSET..PACKET_SIZE - 1].copy_from_slice(&aux);
        raw[PACKET_SIZE - 1] = packet_type.stop_byte();
        Self(raw)
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.0
    }

    /// Sample counter (byte 1).
    #[must_use]
    pub const fn sample_number(&self) -> u8 {
        self.0[1]
    }

    /// Stop-byte low nibble.
    #[must_use]
    pub const fn type_code(&self) -> u8 {
        self.0[PACKET_SIZE - 1] & 0x0F
    }

    /// Classify by the stop-byte low nibble.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownPacketType`] for codes outside the table.
    pub fn packet_type(&self) -> Result<PacketType, ProtocolError> {
        let code = self.type_code();
        PacketType::from_code(code).ok_or(ProtocolError::UnknownPacketType { code })
    }

    /// Sign-extended ADC counts for the eight channels.
    #[must_use]
    pub fn channel_counts(&self) -> [i32; CHANNELS_PER_PACKET] {
        let mut counts = [0i32; CHANNELS_PER_PACKET];
        for (i, count) in counts.iter_mut().enumerate() {
            let at = 2 + i * 3;
            *count = be_i24([self.0[at], self.0[at + 1], self.0[at + 2]]);
        }
        counts
    }

    /// The six aux bytes.
    #[must_use]
    pub fn aux_bytes(&self) -> [u8; 6] {
        let mut aux = [0u8; 6];
        aux.copy_from_slice(&self.0[AUX_OFFSET..PACKET_SIZE - 1]);
        aux
    }

    /// Board clock in the last four aux bytes.
    #[must_use]
    pub fn board_time_ms(&self) -> u32 {
        be_u32([
            self.0[BOARD_TIME_OFFSET],
            self.0[BOARD_TIME_OFFSET + 1],
            self.0[BOARD_TIME_OFFSET + 2],
            self.0[BOARD_TIME_OFFSET + 3],
        ])
    }
}

/// Whether a byte has the stop-marker high nibble.
#[inline]
#[must_use]
pub const fn is_stop_byte(byte: u8) -> bool {
    byte & 0xF0 == STOP_BYTE_HIGH
}

// ============================================================================
// Frame Scanner
// ============================================================================

/// One step of framing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A qualified packet
    Packet(Packet),
    /// A byte dropped while resynchronizing
    Skipped(u8),
}

/// Splits a byte buffer into packets, dropping noise one byte at a time.
///
/// The scanner stops as soon as a start byte is found with fewer than
/// [`PACKET_SIZE`] bytes after it; [`FrameScanner::consumed`] then tells the
/// caller how much of the buffer can be discarded and the rest is kept for
/// the next chunk. An empty buffer yields nothing.
#[derive(Debug, Clone)]
pub struct FrameScanner<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> FrameScanner<'a> {
    /// Scan `bytes` from the beginning.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Bytes consumed so far (packets plus dropped bytes).
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.position
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remainder(&self) -> &'a [u8] {
        &self.bytes[self.position..]
    }
}

impl Iterator for FrameScanner<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let rest = self.remainder();
        let &head = rest.first()?;

        if head != START_BYTE {
            self.position += 1;
            return Some(Frame::Skipped(head));
        }
        if rest.len() < PACKET_SIZE {
            return None;
        }

        match Packet::from_slice(&rest[..PACKET_SIZE]) {
            Ok(packet) => {
                self.position += PACKET_SIZE;
                Some(Frame::Packet(packet))
            }
            Err(_) => {
                // Window looked like a packet but was not; retry one byte on
                self.position += 1;
                Some(Frame::Skipped(head))
            }
        }
    }
}

// ============================================================================
// Sample Decoder
// ============================================================================

/// Turns qualified packets into scaled samples.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SampleDecoder {
    scale: f64,
}

impl Default for SampleDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_GAIN)
    }
}

impl SampleDecoder {
    /// Decoder for a front end running at `gain`.
    #[must_use]
    pub fn new(gain: u8) -> Self {
        Self { scale: channel_scale(gain) }
    }

    /// Microvolts per count.
    #[must_use]
    pub const fn scale(&self) -> f64 {
        self.scale
    }

    /// Decode one packet.
    ///
    /// `time_offset_ms` is the host/board clock offset once a sync has
    /// completed; time-stamped packets then carry a corrected timestamp.
    /// User-defined packets yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownPacketType`] for type codes outside
    /// the table.
    pub fn decode(
        &self,
        packet: &Packet,
        time_offset_ms: Option<f64>,
    ) -> Result<Option<Sample>, ProtocolError> {
        let packet_type = packet.packet_type()?;
        if packet_type == PacketType::UserDefined {
            return Ok(None);
        }

        let counts = packet.channel_counts();
        let mut channel_data = [0.0; CHANNELS_PER_PACKET];
        for (value, count) in channel_data.iter_mut().zip(counts) {
            *value = f64::from(count) * self.scale;
        }

        let aux_bytes = packet.aux_bytes();
        let mut timestamp_ms = None;
        let aux = match packet_type {
            PacketType::StandardAccel => {
                let mut accel = [0.0; 3];
                for (i, axis) in accel.iter_mut().enumerate() {
                    *axis = accel_g([aux_bytes[i * 2], aux_bytes[i * 2 + 1]]);
                }
                AuxData::Accel(accel)
            }
            PacketType::StandardRawAux => AuxData::Raw(aux_bytes),
            _ => {
                let board_time_ms = packet.board_time_ms();
                let leading = [aux_bytes[0], aux_bytes[1]];
                let aux = match packet_type {
                    PacketType::AccelTimeSyncSet | PacketType::AccelTimeSynced => {
                        AccelAxis::for_sample_number(packet.sample_number())
                            .map_or(TimedAux::None, |axis| TimedAux::Accel {
                                axis,
                                value: accel_g(leading),
                            })
                    }
                    _ => TimedAux::Raw(leading),
                };
                timestamp_ms = time_offset_ms.map(|offset| f64::from(board_time_ms) + offset);
                AuxData::Timed {
                    board_time_ms,
                    sync_set: packet_type.is_time_sync_set(),
                    aux,
                }
            }
        };

        Ok(Some(Sample {
            sample_number: packet.sample_number(),
            channel_data,
            aux,
            timestamp_ms,
        }))
    }
}

#[inline]
fn accel_g(bytes: [u8; 2]) -> f64 {
    f64::from(be_i16(bytes)) * ACCEL_SCALE_G
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;
    use std::vec::Vec;

    fn packet(sample_number: u8, packet_type: PacketType) -> Packet {
        Packet::encode(sample_number, &[0; 8], [0; 6], packet_type)
    }

    fn scan(bytes: &[u8]) -> (Vec<Frame>, usize) {
        let mut scanner = FrameScanner::new(bytes);
        let frames: Vec<Frame> = scanner.by_ref().collect();
        (frames, scanner.consumed())
    }

    fn packets(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Packet(p) => Some(p.sample_number()),
                Frame::Skipped(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_packet_type_table_roundtrip() {
        for code in 0..=6 {
            let packet_type = PacketType::from_code(code).unwrap();
            assert_eq!(packet_type.code(), code);
            assert_eq!(packet_type.stop_byte(), 0xC0 | code);
        }
        assert_eq!(PacketType::from_code(7), None);
        assert_eq!(PacketType::from_code(0xF), None);
    }

    #[test]
    fn test_channel_scale_default_gain() {
        let scale = channel_scale(DEFAULT_GAIN);
        assert!((scale - 0.022_351_744_455_307_063).abs() < 1e-12);
    }

    #[test]
    fn test_empty_buffer_yields_nothing() {
        for _ in 0..3 {
            let (frames, consumed) = scan(&[]);
            assert!(frames.is_empty());
            assert_eq!(consumed, 0);
        }
    }

    #[test]
    fn test_short_buffer_waits() {
        let bytes = packet(1, PacketType::StandardAccel);
        let (frames, consumed) = scan(&bytes.as_bytes()[..20]);
        assert!(frames.is_empty());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_two_packets_extracted() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(packet(0, PacketType::StandardAccel).as_bytes());
        bytes.extend_from_slice(packet(1, PacketType::StandardAccel).as_bytes());
        let (frames, consumed) = scan(&bytes);
        assert_eq!(packets(&frames), [0, 1]);
        assert_eq!(consumed, 66);
    }

    #[test]
    fn test_single_junk_byte_between_packets() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(packet(0, PacketType::StandardAccel).as_bytes());
        bytes.push(0x42);
        bytes.extend_from_slice(packet(1, PacketType::StandardAccel).as_bytes());
        let (frames, consumed) = scan(&bytes);
        assert_eq!(packets(&frames), [0, 1]);
        assert!(frames.contains(&Frame::Skipped(0x42)));
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_bad_stop_byte_resyncs_one_byte_forward() {
        // A start byte whose window ends badly, with a real packet one byte later
        let real = packet(7, PacketType::StandardAccel);
        let mut bytes = Vec::new();
        bytes.push(START_BYTE);
        bytes.extend_from_slice(&real.as_bytes()[..PACKET_SIZE - 1]);
        // Byte 32 of the fake window is the real packet's byte 31 (0x00), not a stop byte
        bytes.push(real.as_bytes()[PACKET_SIZE - 1]);
        let (frames, consumed) = scan(&bytes);
        assert_eq!(frames[0], Frame::Skipped(START_BYTE));
        assert_eq!(packets(&frames), [7]);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_trailing_partial_packet_kept() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(packet(0, PacketType::StandardAccel).as_bytes());
        bytes.extend_from_slice(&packet(1, PacketType::StandardAccel).as_bytes()[..10]);
        let mut scanner = FrameScanner::new(&bytes);
        let count = scanner.by_ref().count();
        assert_eq!(count, 1);
        assert_eq!(scanner.remainder().len(), 10);
        assert_eq!(scanner.remainder()[0], START_BYTE);
    }

    #[test]
    fn test_decode_channels_and_accel() {
        let counts = [1, -1, 8_388_607, -8_388_608, 0, 100, -100, 2];
        // x = 16 (0.002 g), y = -16, z = 0
        let aux = [0x00, 0x10, 0xFF, 0xF0, 0x00, 0x00];
        let packet = Packet::encode(42, &counts, aux, PacketType::StandardAccel);
        let decoder = SampleDecoder::new(24);
        let sample = decoder.decode(&packet, None).unwrap().unwrap();

        assert_eq!(sample.sample_number, 42);
        let scale = channel_scale(24);
        for (value, count) in sample.channel_data.iter().zip(counts) {
            assert!((value - f64::from(count) * scale).abs() < 1e-9);
        }
        match sample.aux {
            AuxData::Accel([x, y, z]) => {
                assert!((x - 0.002).abs() < 1e-12);
                assert!((y + 0.002).abs() < 1e-12);
                assert!(z.abs() < 1e-12);
            }
            other => panic!("unexpected aux {other:?}"),
        }
        assert_eq!(sample.timestamp_ms, None);
    }

    #[test]
    fn test_decode_user_defined_is_ignored() {
        let decoder = SampleDecoder::default();
        let result = decoder.decode(&packet(3, PacketType::UserDefined), None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_unknown_type_is_error() {
        let mut raw = *packet(3, PacketType::StandardAccel).as_bytes();
        raw[PACKET_SIZE - 1] = 0xC9;
        let packet = Packet::from_slice(&raw).unwrap();
        let err = SampleDecoder::default().decode(&packet, None).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownPacketType { code: 9 });
    }

    #[test]
    fn test_decode_time_synced_accel() {
        // Sample 17 carries the X axis; board time 0x00010000 = 65536 ms
        let aux = [0x00, 0x20, 0x00, 0x01, 0x00, 0x00];
        let packet = Packet::encode(17, &[0; 8], aux, PacketType::AccelTimeSynced);
        let decoder = SampleDecoder::default();

        let sample = decoder.decode(&packet, None).unwrap().unwrap();
        assert_eq!(sample.board_time_ms(), Some(65_536));
        assert_eq!(sample.timestamp_ms, None);

        let sample = decoder.decode(&packet, Some(1000.5)).unwrap().unwrap();
        assert_eq!(sample.timestamp_ms, Some(66_536.5));
        match sample.aux {
            AuxData::Timed { sync_set, aux: TimedAux::Accel { axis, value }, .. } => {
                assert!(!sync_set);
                assert_eq!(axis, AccelAxis::X);
                assert!((value - 0.004).abs() < 1e-12);
            }
            other => panic!("unexpected aux {other:?}"),
        }
    }

    #[test]
    fn test_decode_raw_aux_sync_set() {
        let aux = [0xAB, 0xCD, 0x00, 0x00, 0x01, 0x00];
        let packet = Packet::encode(5, &[0; 8], aux, PacketType::RawAuxTimeSyncSet);
        let sample = SampleDecoder::default().decode(&packet, None).unwrap().unwrap();
        assert_eq!(
            sample.aux,
            AuxData::Timed { board_time_ms: 256, sync_set: true, aux: TimedAux::Raw([0xAB, 0xCD]) }
        );
    }
}
