//! Transports carrying bytes to and from the board
//!
//! A session never opens or closes a transport; it only writes commands
//! through [`Transport::write`]. Whoever owns the transport reads byte
//! chunks from it and pushes them into the session.

use crate::error::TransportError;

/// Outbound half of a board connection.
pub trait Transport {
    /// Write a command sequence to the board.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the bytes could not be sent.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

// ============================================================================
// Recording Transport
// ============================================================================

/// Transport that records writes instead of sending them.
///
/// Used when replaying captured streams and in tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    writes: Vec<Vec<u8>>,
    fail_writes: bool,
}

impl RecordingTransport {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write so far, in order.
    #[must_use]
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Most recent write.
    #[must_use]
    pub fn last_write(&self) -> Option<&[u8]> {
        self.writes.last().map(Vec::as_slice)
    }

    /// Forget recorded writes.
    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Make subsequent writes fail with [`TransportError::Closed`].
    pub fn set_failing(&mut self, failing: bool) {
        self.fail_writes = failing;
    }
}

impl Transport for RecordingTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError::Closed);
        }
        self.writes.push(bytes.to_vec());
        Ok(())
    }
}

// ============================================================================
// Serial Transport
// ============================================================================

#[cfg(feature = "usb")]
pub use serial::SerialTransport;

#[cfg(feature = "usb")]
mod serial {
    use std::io::{Read, Write};
    use std::time::Duration;

    use super::Transport;
    use crate::error::TransportError;

    /// Default baud rate of the board's serial link.
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;

    /// Serial port connection to a board or its radio dongle.
    pub struct SerialTransport {
        port: Box<dyn serialport::SerialPort>,
    }

    impl SerialTransport {
        /// Open a serial port.
        ///
        /// # Arguments
        ///
        /// * `port_name` - Serial port name (e.g., "/dev/ttyUSB0" or "COM3")
        /// * `baud_rate` - Baud rate (typically 115200)
        ///
        /// # Errors
        ///
        /// Returns error if the port cannot be opened
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, TransportError> {
            let port = serialport::new(port_name, baud_rate)
                .timeout(Duration::from_millis(100))
                .open()?;
            tracing::debug!("Opened {port_name} at {baud_rate} baud");
            Ok(Self { port })
        }

        /// List available serial ports
        #[must_use]
        pub fn list_ports() -> Vec<String> {
            serialport::available_ports()
                .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
                .unwrap_or_default()
        }

        /// Read whatever bytes are available into `buf`.
        ///
        /// Returns `Ok(0)` when the read timed out with no data.
        ///
        /// # Errors
        ///
        /// Returns error on any I/O failure other than a timeout
        pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e.into()),
            }
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.port.write_all(bytes)?;
            self.port.flush()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_transport() {
        let mut transport = RecordingTransport::new();
        transport.write(b"v").unwrap();
        transport.write(b"z110Z").unwrap();
        assert_eq!(transport.writes().len(), 2);
        assert_eq!(transport.last_write(), Some(&b"z110Z"[..]));

        transport.set_failing(true);
        assert!(matches!(transport.write(b"b"), Err(TransportError::Closed)));
        assert_eq!(transport.writes().len(), 2);
    }
}
