//! Session configuration

use serde::{Deserialize, Serialize};

use bioamp_core::commands::gain_code;
use bioamp_core::protocol::DEFAULT_GAIN;
use bioamp_core::ValidationError;

/// Tunables for one acquisition session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Programmable gain the channels run at
    pub gain: u8,
    /// How long a soft reset may wait for the banner
    pub reset_timeout_ms: u64,
    /// How long a register query may wait for its reply
    pub query_timeout_ms: u64,
    /// How long a clock sync may wait for its acknowledgment
    pub sync_ack_timeout_ms: u64,
    /// Longest round trip accepted for a clock sync
    pub sync_failure_threshold_ms: f64,
    /// Samples per impedance window, overriding the rate-derived size
    pub impedance_window: Option<usize>,
    /// Unconsumed bytes kept before the oldest are discarded
    pub max_buffer_bytes: usize,
    /// Emit every qualified packet before decoding
    pub emit_raw_packets: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gain: DEFAULT_GAIN,
            reset_timeout_ms: 500,
            query_timeout_ms: 500,
            sync_ack_timeout_ms: 500,
            sync_failure_threshold_ms: 10.0,
            impedance_window: None,
            max_buffer_bytes: 4096,
            emit_raw_packets: false,
        }
    }
}

impl SessionConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for an unsupported gain, a zero
    /// impedance window or a buffer too small to hold one packet.
    pub fn validate(&self) -> Result<(), ValidationError> {
        gain_code(self.gain)?;
        if self.impedance_window == Some(0) {
            return Err(ValidationError::InvalidArgument {
                name: "impedance_window",
                reason: "must be at least one sample",
            });
        }
        if self.max_buffer_bytes < bioamp_core::protocol::PACKET_SIZE {
            return Err(ValidationError::InvalidArgument {
                name: "max_buffer_bytes",
                reason: "must hold at least one packet",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.gain, 24);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "gain": 8, "impedance_window": 250 }"#).unwrap();
        assert_eq!(config.gain, 8);
        assert_eq!(config.impedance_window, Some(250));
        assert_eq!(config.reset_timeout_ms, 500);
    }

    #[test]
    fn test_invalid_config() {
        let config = SessionConfig { gain: 3, ..Default::default() };
        assert_eq!(config.validate(), Err(ValidationError::InvalidGain { gain: 3 }));

        let config = SessionConfig { impedance_window: Some(0), ..Default::default() };
        assert!(config.validate().is_err());
    }
}
