//! Session for the 4-channel low-power radio board
//!
//! The low-power board sends one notification per radio packet instead of a
//! byte stream, so there is no framing or banner: each notification is
//! decoded on its own by [`CompressedDecoder`], which keeps the delta
//! baseline and any partial multi-fragment message.

use tracing::{debug, warn};

use bioamp_core::commands::Command;
use bioamp_core::{CompressedDecoder, LowPowerFrame};

use crate::error::SessionResult;
use crate::events::{EventReceiver, EventSender, SessionEvent};
use crate::transport::Transport;

/// Impedance measurement start command.
const IMPEDANCE_START: u8 = b'z';

/// Impedance measurement stop command.
const IMPEDANCE_STOP: u8 = b'Z';

/// One low-power board connection.
pub struct LowPowerSession<T> {
    transport: T,
    decoder: CompressedDecoder,
    events: EventSender,
    streaming: bool,
}

impl<T: Transport> LowPowerSession<T> {
    /// Create a session and the receiver for its events.
    pub fn new(transport: T) -> (Self, EventReceiver) {
        let (events, receiver) = EventSender::channel();
        let session = Self { transport, decoder: CompressedDecoder::new(), events, streaming: false };
        (session, receiver)
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether the sample stream is running.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Decode one notification and emit what it carried.
    ///
    /// Malformed notifications are logged and dropped.
    pub fn process_notification(&mut self, notification: &[u8]) {
        match self.decoder.decode(notification) {
            Ok(LowPowerFrame::Samples(samples)) => {
                for sample in samples {
                    self.events.emit(SessionEvent::LowPowerSample(sample));
                }
            }
            Ok(LowPowerFrame::Impedance { source, ohms }) => {
                debug!("Impedance {source:?}: {ohms:.0} ohms");
                self.events.emit(SessionEvent::LowPowerImpedance { source, ohms });
            }
            Ok(LowPowerFrame::Message(message)) => {
                self.events.emit(SessionEvent::Message(message.to_vec()));
            }
            Ok(LowPowerFrame::FragmentBuffered) => {}
            Err(err) => warn!("Dropping notification: {err}"),
        }
    }

    /// Start the sample stream.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the command could not be written.
    pub fn stream_start(&mut self) -> SessionResult<()> {
        self.transport.write(&[Command::StreamStart.byte()])?;
        self.decoder.reset();
        self.streaming = true;
        Ok(())
    }

    /// Stop the sample stream.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the command could not be written.
    pub fn stream_stop(&mut self) -> SessionResult<()> {
        self.transport.write(&[Command::StreamStop.byte()])?;
        self.streaming = false;
        Ok(())
    }

    /// Start on-board impedance reporting.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the command could not be written.
    pub fn impedance_start(&mut self) -> SessionResult<()> {
        self.transport.write(&[IMPEDANCE_START])?;
        Ok(())
    }

    /// Stop on-board impedance reporting.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the command could not be written.
    pub fn impedance_stop(&mut self) -> SessionResult<()> {
        self.transport.write(&[IMPEDANCE_STOP])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use bioamp_core::compressed::ImpedanceSource;

    fn notification(id: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![id];
        bytes.extend_from_slice(payload);
        bytes
    }

    fn drain(events: &mut EventReceiver) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_samples_emitted_in_order() {
        let (mut session, mut events) = LowPowerSession::new(RecordingTransport::new());
        session.process_notification(&notification(0, &[0, 0, 5, 0, 0, 6, 0, 0, 7, 0, 0, 8]));
        session.process_notification(&notification(1, &[0; 19]));

        let numbers: Vec<u8> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::LowPowerSample(s) => Some(s.sample_number),
                _ => None,
            })
            .collect();
        assert_eq!(numbers, [0, 1, 2]);
    }

    #[test]
    fn test_fragmented_message() {
        let (mut session, mut events) = LowPowerSession::new(RecordingTransport::new());
        session.process_notification(&notification(206, b"taco"));
        session.process_notification(&notification(206, b"vegas"));
        assert!(drain(&mut events).is_empty());
        session.process_notification(&notification(207, b"hola"));
        assert_eq!(drain(&mut events), vec![SessionEvent::Message(b"tacovegashola".to_vec())]);
    }

    #[test]
    fn test_impedance_report() {
        let (mut session, mut events) = LowPowerSession::new(RecordingTransport::new());
        session.process_notification(&notification(205, b"2200Z"));
        assert_eq!(
            drain(&mut events),
            vec![SessionEvent::LowPowerImpedance { source: ImpedanceSource::Reference, ohms: 2200.0 }]
        );
    }

    #[test]
    fn test_bad_notification_is_dropped() {
        let (mut session, mut events) = LowPowerSession::new(RecordingTransport::new());
        session.process_notification(&notification(250, &[0; 19]));
        session.process_notification(&[]);
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_commands() {
        let (mut session, _) = LowPowerSession::new(RecordingTransport::new());
        session.stream_start().unwrap();
        session.impedance_start().unwrap();
        session.impedance_stop().unwrap();
        session.stream_stop().unwrap();
        assert_eq!(
            session.transport().writes(),
            &[b"b".to_vec(), b"z".to_vec(), b"Z".to_vec(), b"s".to_vec()]
        );
        assert!(!session.is_streaming());
    }
}
