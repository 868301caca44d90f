//! Per-session context and the parsing-mode state machine
//!
//! A [`Session`] owns everything one board connection needs: the buffer of
//! unconsumed bytes, the current [`ParsingMode`], the impedance test state
//! and the clock-sync state. Nothing is shared between sessions, so any
//! number of them can run in one process.
//!
//! Bytes are handled strictly in arrival order:
//!
//! ```text
//! RESET ──$$$──▶ NORMAL ◀──$$$── CHANNEL_QUERY
//!                  │ ▲
//!        sync sent │ │ ack seen
//!                  ▼ │
//!           TIME_SYNC_PENDING
//! ```
//!
//! In RESET and CHANNEL_QUERY bytes collect as ASCII text until the `$$$`
//! marker. In NORMAL and TIME_SYNC_PENDING they are framed into packets;
//! the pending mode additionally watches for the sync acknowledgment.

use std::mem;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bioamp_core::banner::{find_eot, parse_banner, EOT};
use bioamp_core::commands::{Command, TIME_SYNC_ACK};
use bioamp_core::protocol::{Frame, FrameScanner, Packet, SampleDecoder};
use bioamp_core::{BoardInfo, ChannelImpedance};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::deferred::{deferred, Deferred, Resolver};
use crate::error::{SessionError, SessionResult, StateError};
use crate::events::{EventReceiver, EventSender, SessionEvent};
use crate::impedance::ImpedanceEngine;
use crate::timesync::SyncProtocol;
use crate::transport::Transport;

// ============================================================================
// Parsing Mode
// ============================================================================

/// How incoming bytes are interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParsingMode {
    /// Collecting the boot banner
    Reset,
    /// Collecting a register query reply
    ChannelQuery,
    /// Framing packets and watching for the sync acknowledgment
    TimeSyncPending,
    /// Framing packets
    Normal,
}

// ============================================================================
// Session
// ============================================================================

/// One board connection.
pub struct Session<T, C> {
    pub(crate) transport: T,
    pub(crate) clock: C,
    pub(crate) config: SessionConfig,
    decoder: SampleDecoder,
    buffer: Vec<u8>,
    pub(crate) mode: ParsingMode,
    mode_entered_ms: f64,
    pub(crate) board: BoardInfo,
    pub(crate) connected: bool,
    pub(crate) streaming: bool,
    pub(crate) events: EventSender,
    pending_reset: Option<Resolver<BoardInfo>>,
    pending_query: Option<Resolver<String>>,
    pub(crate) sync: SyncProtocol,
    pub(crate) impedance: ImpedanceEngine,
}

impl<T: Transport, C: Clock> Session<T, C> {
    /// Create a session and the receiver for its events.
    ///
    /// The session starts in [`ParsingMode::Reset`], waiting for a banner.
    /// `config` is expected to have passed [`SessionConfig::validate`].
    pub fn new(transport: T, clock: C, config: SessionConfig) -> (Self, EventReceiver) {
        let (events, receiver) = EventSender::channel();
        let board = BoardInfo::default();
        let now = clock.now_ms();
        let session = Self {
            transport,
            clock,
            decoder: SampleDecoder::new(config.gain),
            buffer: Vec::with_capacity(config.max_buffer_bytes),
            config,
            mode: ParsingMode::Reset,
            mode_entered_ms: now,
            board,
            connected: false,
            streaming: false,
            events,
            pending_reset: None,
            pending_query: None,
            sync: SyncProtocol::default(),
            impedance: ImpedanceEngine::new(board.channel_count),
        };
        (session, receiver)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current parsing mode.
    pub fn mode(&self) -> ParsingMode {
        self.mode
    }

    /// Board identity from the last banner.
    pub fn board(&self) -> BoardInfo {
        self.board
    }

    /// Whether a transport is connected.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the sample stream is running.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Latest impedance result for every channel.
    pub fn impedance_results(&self) -> &[ChannelImpedance] {
        self.impedance.results()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// The transport is open; soft-reset the board and wait for its banner.
    pub fn on_connected(&mut self) -> Deferred<BoardInfo> {
        self.connected = true;
        info!("Transport connected");
        self.soft_reset()
    }

    /// The transport went away. Every pending operation is aborted.
    pub fn on_disconnected(&mut self) {
        info!("Transport disconnected");
        self.abort_impedance("impedance test");
        self.abort_sync("clock sync");
        self.abort_pending_replies("disconnect");
        self.sync.state.reset();
        self.connected = false;
        self.streaming = false;
        self.buffer.clear();
        self.enter_mode(ParsingMode::Reset);
    }

    /// Skip the banner handshake and treat the board as `board`.
    ///
    /// Used when replaying captures that start mid-stream.
    pub fn assume_board(&mut self, board: BoardInfo) {
        self.set_board(board);
        self.enter_mode(ParsingMode::Normal);
    }

    /// Soft-reset the board; resolves with the parsed banner.
    pub fn soft_reset(&mut self) -> Deferred<BoardInfo> {
        if let Err(err) = self.check_reply_slot() {
            return Deferred::failed(err);
        }
        if let Err(err) = self.send(&[Command::SoftReset.byte()]) {
            return Deferred::failed(err);
        }

        self.abort_impedance("impedance test");
        self.abort_sync("clock sync");
        self.streaming = false;
        self.buffer.clear();
        self.enter_mode(ParsingMode::Reset);

        let (resolver, result) = deferred();
        self.pending_reset = Some(resolver);
        result
    }

    /// Ask for the register dump; resolves with its text.
    pub fn query_registers(&mut self) -> Deferred<String> {
        if let Err(err) = self.check_reply_slot() {
            return Deferred::failed(err);
        }
        if self.sync.is_pending() {
            return Deferred::failed(StateError::TimeSyncPending);
        }
        if let Err(err) = self.send(&[Command::QueryRegisters.byte()]) {
            return Deferred::failed(err);
        }
        self.enter_mode(ParsingMode::ChannelQuery);

        let (resolver, result) = deferred();
        self.pending_query = Some(resolver);
        result
    }

    /// Start the sample stream.
    pub fn stream_start(&mut self) -> Deferred<()> {
        if !self.connected {
            return Deferred::failed(StateError::NotConnected);
        }
        if self.streaming {
            debug!("Stream already running");
            return Deferred::ready(Ok(()));
        }
        if let Err(err) = self.send(&[Command::StreamStart.byte()]) {
            return Deferred::failed(err);
        }
        self.streaming = true;
        Deferred::ready(Ok(()))
    }

    /// Stop the sample stream, aborting any impedance test or clock sync.
    pub fn stream_stop(&mut self) -> Deferred<()> {
        if !self.connected {
            return Deferred::failed(StateError::NotConnected);
        }
        if !self.streaming {
            return Deferred::failed(StateError::NotStreaming);
        }
        if let Err(err) = self.send(&[Command::StreamStop.byte()]) {
            return Deferred::failed(err);
        }
        self.streaming = false;
        self.abort_impedance("impedance test");
        self.abort_sync("clock sync");
        Deferred::ready(Ok(()))
    }

    /// Write raw command bytes.
    pub fn write(&mut self, bytes: &[u8]) -> Deferred<()> {
        if !self.connected {
            return Deferred::failed(StateError::NotConnected);
        }
        Deferred::ready(self.send(bytes))
    }

    // ------------------------------------------------------------------------
    // Byte handling
    // ------------------------------------------------------------------------

    /// Feed one chunk of bytes from the transport.
    ///
    /// Chunks may split packets and banners anywhere; the result is the same
    /// as feeding the concatenation at once.
    pub fn process_bytes(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);

        loop {
            match self.mode {
                ParsingMode::Reset | ParsingMode::ChannelQuery => {
                    let Some(end) = find_eot(&self.buffer) else { break };
                    let text: Vec<u8> = self.buffer.drain(..end).collect();
                    self.finish_text_reply(&text);
                }
                ParsingMode::Normal | ParsingMode::TimeSyncPending => {
                    self.extract_packets();
                    break;
                }
            }
        }

        // Only bytes nothing could consume count against the cap
        self.enforce_buffer_cap();
    }

    /// Enforce reply timeouts. Call periodically.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        let waited = now - self.mode_entered_ms;

        match self.mode {
            ParsingMode::Reset if waited > self.config.reset_timeout_ms as f64 => {
                warn!("No banner after {waited:.0}ms, resuming packet parsing");
                if let Some(resolver) = self.pending_reset.take() {
                    resolver.resolve(Err(SessionError::Timeout {
                        operation: "soft reset",
                        waited_ms: whole_ms(waited),
                    }));
                }
                self.enter_mode(ParsingMode::Normal);
                self.extract_packets();
            }
            ParsingMode::ChannelQuery if waited > self.config.query_timeout_ms as f64 => {
                warn!("No register reply after {waited:.0}ms, resuming packet parsing");
                if let Some(resolver) = self.pending_query.take() {
                    resolver.resolve(Err(SessionError::Timeout {
                        operation: "register query",
                        waited_ms: whole_ms(waited),
                    }));
                }
                self.enter_mode(ParsingMode::Normal);
                self.extract_packets();
            }
            _ => {}
        }

        self.sync_tick(now);
    }

    fn extract_packets(&mut self) {
        let buffer = mem::take(&mut self.buffer);
        let mut scanner = FrameScanner::new(&buffer);
        let mut dropped = 0usize;

        for frame in scanner.by_ref() {
            match frame {
                Frame::Packet(packet) => self.handle_packet(&packet),
                Frame::Skipped(byte)
                    if byte == TIME_SYNC_ACK && self.mode == ParsingMode::TimeSyncPending =>
                {
                    self.on_sync_ack();
                }
                Frame::Skipped(_) => dropped += 1,
            }
        }

        let consumed = scanner.consumed();
        self.buffer = buffer;
        self.buffer.drain(..consumed);

        if dropped > 0 {
            warn!("Dropped {dropped} bytes while resynchronizing");
            self.events.emit(SessionEvent::Resync { dropped });
        }
    }

    fn handle_packet(&mut self, packet: &Packet) {
        if self.config.emit_raw_packets {
            self.events.emit(SessionEvent::RawDataPacket(packet.as_bytes().to_vec()));
        }

        self.complete_sync_if_answered(packet);

        match self.decoder.decode(packet, self.sync.state.offset_ms()) {
            Ok(Some(sample)) => {
                self.events.emit(SessionEvent::Sample(sample));
                self.impedance_on_sample(&sample);
            }
            Ok(None) => {}
            Err(err) => warn!("Dropping packet {}: {err}", packet.sample_number()),
        }
    }

    fn finish_text_reply(&mut self, text: &[u8]) {
        match self.mode {
            ParsingMode::Reset => {
                let board = parse_banner(text);
                info!(
                    "Board ready: {:?} firmware {:?}, {} channels at {} Hz",
                    board.board_kind, board.firmware, board.channel_count, board.sample_rate
                );
                self.set_board(board);
                self.enter_mode(ParsingMode::Normal);
                self.events.emit(SessionEvent::Ready(board));
                if let Some(resolver) = self.pending_reset.take() {
                    resolver.resolve(Ok(board));
                }
            }
            ParsingMode::ChannelQuery => {
                let body = text.strip_suffix(EOT).unwrap_or(text);
                let reply = String::from_utf8_lossy(body).into_owned();
                debug!("Register query reply: {} bytes", reply.len());
                self.enter_mode(ParsingMode::Normal);
                self.events.emit(SessionEvent::QueryResponse(reply.clone()));
                if let Some(resolver) = self.pending_query.take() {
                    resolver.resolve(Ok(reply));
                }
            }
            ParsingMode::Normal | ParsingMode::TimeSyncPending => {}
        }
    }

    fn enforce_buffer_cap(&mut self) {
        let cap = self.config.max_buffer_bytes;
        if self.buffer.len() > cap {
            let excess = self.buffer.len() - cap;
            warn!("Buffer over {cap} bytes, discarding {excess} oldest");
            self.buffer.drain(..excess);
        }
    }

    // ------------------------------------------------------------------------
    // Internals shared with the impedance and sync modules
    // ------------------------------------------------------------------------

    pub(crate) fn send(&mut self, bytes: &[u8]) -> SessionResult<()> {
        debug!("Writing {:?}", String::from_utf8_lossy(bytes));
        self.transport.write(bytes)?;
        Ok(())
    }

    pub(crate) fn enter_mode(&mut self, mode: ParsingMode) {
        if self.mode != mode {
            debug!("Parsing mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
        self.mode_entered_ms = self.clock.now_ms();
    }

    fn set_board(&mut self, board: BoardInfo) {
        self.board = board;
        self.impedance.resize(board.channel_count);
    }

    fn check_reply_slot(&self) -> SessionResult<()> {
        if !self.connected {
            return Err(StateError::NotConnected.into());
        }
        if self.pending_reset.is_some() || self.pending_query.is_some() {
            return Err(StateError::CommandPending.into());
        }
        Ok(())
    }

    fn abort_pending_replies(&mut self, operation: &'static str) {
        if let Some(resolver) = self.pending_reset.take() {
            resolver.resolve(Err(SessionError::Aborted { operation }));
        }
        if let Some(resolver) = self.pending_query.take() {
            resolver.resolve(Err(SessionError::Aborted { operation }));
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn whole_ms(ms: f64) -> u64 {
    ms.max(0.0) as u64
}

// ============================================================================
// Tests
// ============================================================================
