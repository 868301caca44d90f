//! Boot banner parsing
//!
//! After a soft reset the board prints a free-form ASCII banner ending with
//! `$$$`. The number of ADC chips it mentions tells a plain board from a
//! daisy-stacked one, and a `v2` firmware marker enables time sync.

use crate::types::{BoardInfo, BoardKind, Firmware};

/// End-of-transmission marker closing every ASCII response.
pub const EOT: &[u8] = b"$$$";

/// Chip identifier printed once per ADC.
pub const ADC_CHIP_ID: &[u8] = b"ADS1299";

/// Firmware-version-2 marker.
pub const FIRMWARE_V2_MARKER: &[u8] = b"v2";

/// Parse board identity from banner text.
///
/// Never fails: text without the expected markers is treated as a default
/// board running v1 firmware.
#[must_use]
pub fn parse_banner(text: &[u8]) -> BoardInfo {
    let board_kind = if count_occurrences(text, ADC_CHIP_ID) >= 2 {
        BoardKind::Daisy
    } else {
        BoardKind::Default
    };
    let firmware = if find(text, FIRMWARE_V2_MARKER).is_some() {
        Firmware::V2
    } else {
        Firmware::V1
    };
    BoardInfo::new(firmware, board_kind)
}

/// Position just past the first end-of-transmission marker, if any.
#[must_use]
pub fn find_eot(text: &[u8]) -> Option<usize> {
    find(text, EOT).map(|at| at + EOT.len())
}

/// Count non-overlapping occurrences of `needle` in `haystack`.
#[must_use]
pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    let mut count = 0;
    let mut rest = haystack;
    while let Some(at) = find(rest, needle) {
        count += 1;
        rest = &rest[at + needle.len()..];
    }
    count
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_V1: &[u8] = b"OpenBCI V3 Simulator\nOn Board ADS1299 Device ID: 0x12345\nLIS3DH Device ID: 0x38422\n$$$";
    const DAISY_V2: &[u8] = b"OpenBCI V3 Simulator\nOn Board ADS1299 Device ID: 0x12345\nOn Daisy ADS1299 Device ID: 0xFFFFF\nLIS3DH Device ID: 0x38422\nFirmware: v2\n$$$";

    #[test]
    fn test_default_board_v1() {
        let info = parse_banner(DEFAULT_V1);
        assert_eq!(info.firmware, Firmware::V1);
        assert_eq!(info.board_kind, BoardKind::Default);
        assert_eq!(info.sample_rate, 250);
        assert_eq!(info.channel_count, 8);
    }

    #[test]
    fn test_daisy_board_v2() {
        let info = parse_banner(DAISY_V2);
        assert_eq!(info.firmware, Firmware::V2);
        assert_eq!(info.board_kind, BoardKind::Daisy);
        assert_eq!(info.sample_rate, 125);
        assert_eq!(info.channel_count, 16);
    }

    #[test]
    fn test_garbage_is_default() {
        let info = parse_banner(b"\x00\xFF nothing to see");
        assert_eq!(info, BoardInfo::default());
        assert_eq!(parse_banner(b""), BoardInfo::default());
    }

    #[test]
    fn test_find_eot() {
        assert_eq!(find_eot(b"abc$$$def"), Some(6));
        assert_eq!(find_eot(b"abc$$"), None);
        assert_eq!(find_eot(DEFAULT_V1), Some(DEFAULT_V1.len()));
    }

    #[test]
    fn test_count_occurrences() {
        assert_eq!(count_occurrences(b"ADS1299ADS1299", ADC_CHIP_ID), 2);
        assert_eq!(count_occurrences(b"ADS129", ADC_CHIP_ID), 0);
    }
}
