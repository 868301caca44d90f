//! Lead-off impedance test sequencing
//!
//! A test is a queue of steps, one per channel input. For each step the
//! session writes the impedance setter for that input, collects the
//! channel's values from the ongoing sample stream until the window is
//! full, converts the window's RMS to ohms and turns the drive off again.
//! Samples keep flowing to the caller throughout.
//!
//! Only one test runs per session. Stopping the stream or disconnecting
//! aborts the step in progress without recording a result for it.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, info, warn};

use bioamp_core::impedance::{
    check_channel, impedance_from_rms, packet_slot, parse_plan, rms, sample_carries_channel,
    window_size,
};
use bioamp_core::commands::impedance_setter;
use bioamp_core::{ChannelImpedance, ImpedanceInput, InputImpedance, Sample};

use crate::clock::Clock;
use crate::deferred::{deferred, Deferred, Resolver};
use crate::error::{SessionError, SessionResult, StateError};
use crate::events::SessionEvent;
use crate::session::Session;
use crate::transport::Transport;

// ============================================================================
// Test State
// ============================================================================

/// One input of one channel to measure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImpedanceStep {
    /// One-based channel number
    pub channel: u8,
    /// Input being driven
    pub input: ImpedanceInput,
}

/// Snapshot of the measurement in progress.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpedanceTestState {
    /// One-based channel number
    pub channel: u8,
    /// Positive input is driven
    pub testing_p: bool,
    /// Negative input is driven
    pub testing_n: bool,
    /// Values collected so far
    pub window_len: usize,
    /// Values needed to finish the step
    pub window_target: usize,
    /// Whether the test repeats until stopped
    pub continuous: bool,
}

struct ActiveMeasurement {
    step: ImpedanceStep,
    window: Vec<f64>,
    target: usize,
}

enum Completion {
    Channel { channel: u8, resolver: Resolver<ChannelImpedance> },
    Array(Resolver<Vec<ChannelImpedance>>),
    Continuous,
}

struct ImpedanceRun {
    steps: VecDeque<ImpedanceStep>,
    active: Option<ActiveMeasurement>,
    completion: Completion,
}

/// Impedance results and the test in progress for one session.
pub(crate) struct ImpedanceEngine {
    results: Vec<ChannelImpedance>,
    run: Option<ImpedanceRun>,
}

impl ImpedanceEngine {
    pub(crate) fn new(channel_count: u8) -> Self {
        Self { results: (1..=channel_count).map(ChannelImpedance::new).collect(), run: None }
    }

    pub(crate) fn results(&self) -> &[ChannelImpedance] {
        &self.results
    }

    /// Match the result table to a new board, keeping existing entries.
    pub(crate) fn resize(&mut self, channel_count: u8) {
        let count = usize::from(channel_count);
        self.results.truncate(count);
        while self.results.len() < count {
            #[allow(clippy::cast_possible_truncation)]
            let channel = self.results.len() as u8 + 1;
            self.results.push(ChannelImpedance::new(channel));
        }
    }

    fn is_active(&self) -> bool {
        self.run.is_some()
    }

    fn result_mut(&mut self, channel: u8) -> Option<&mut ChannelImpedance> {
        self.results.get_mut(usize::from(channel).checked_sub(1)?)
    }

    fn result(&self, channel: u8) -> ChannelImpedance {
        usize::from(channel)
            .checked_sub(1)
            .and_then(|i| self.results.get(i))
            .copied()
            .unwrap_or_else(|| ChannelImpedance::new(channel))
    }
}

fn channel_steps(channel: u8, test_p: bool, test_n: bool) -> impl Iterator<Item = ImpedanceStep> {
    let p = test_p.then_some(ImpedanceStep { channel, input: ImpedanceInput::P });
    let n = test_n.then_some(ImpedanceStep { channel, input: ImpedanceInput::N });
    p.into_iter().chain(n)
}

fn sweep(channel_count: u8) -> VecDeque<ImpedanceStep> {
    (1..=channel_count).flat_map(|ch| channel_steps(ch, true, true)).collect()
}

// ============================================================================
// Session Operations
// ============================================================================

impl<T: Transport, C: Clock> Session<T, C> {
    /// Measure both inputs of one channel.
    pub fn test_channel(&mut self, channel: u8) -> Deferred<ChannelImpedance> {
        self.test_single(channel, true, true)
    }

    /// Measure the positive input of one channel.
    pub fn test_channel_input_p(&mut self, channel: u8) -> Deferred<ChannelImpedance> {
        self.test_single(channel, true, false)
    }

    /// Measure the negative input of one channel.
    pub fn test_channel_input_n(&mut self, channel: u8) -> Deferred<ChannelImpedance> {
        self.test_single(channel, false, true)
    }

    /// Measure both inputs of every channel.
    ///
    /// Resolves with the whole result table and emits
    /// [`SessionEvent::ImpedanceArray`].
    pub fn test_all_channels(&mut self) -> Deferred<Vec<ChannelImpedance>> {
        if let Err(err) = self.check_impedance_ready() {
            return Deferred::failed(err);
        }
        let steps = sweep(self.board.channel_count);
        let (resolver, result) = deferred();
        self.begin_impedance(steps, Completion::Array(resolver));
        result
    }

    /// Measure the inputs chosen by one instruction symbol per channel.
    ///
    /// `-` skips a channel, `p`/`n`/`b` test the positive, negative or both
    /// inputs. Upper case first resets that channel's results to "init".
    pub fn test_channels(&mut self, symbols: &str) -> Deferred<Vec<ChannelImpedance>> {
        let plan = match parse_plan(symbols, self.board.channel_count) {
            Ok(plan) => plan,
            Err(err) => return Deferred::failed(err),
        };
        if let Err(err) = self.check_impedance_ready() {
            return Deferred::failed(err);
        }

        let mut steps = VecDeque::new();
        for (channel, step) in (1u8..).zip(plan.iter()) {
            let Some(step) = step else { continue };
            if step.reset {
                if let Some(result) = self.impedance.result_mut(channel) {
                    result.reset();
                }
            }
            steps.extend(channel_steps(channel, step.test_p, step.test_n));
        }

        let (resolver, result) = deferred();
        self.begin_impedance(steps, Completion::Array(resolver));
        result
    }

    /// Sweep every channel repeatedly until [`Self::test_continuous_stop`].
    ///
    /// Each completed sweep emits [`SessionEvent::ImpedanceArray`].
    pub fn test_continuous_start(&mut self) -> Deferred<()> {
        if let Err(err) = self.check_impedance_ready() {
            return Deferred::failed(err);
        }
        let steps = sweep(self.board.channel_count);
        self.impedance.run = Some(ImpedanceRun { steps, active: None, completion: Completion::Continuous });
        match self.advance_impedance() {
            Ok(()) => Deferred::ready(Ok(())),
            Err(err) => {
                self.impedance.run = None;
                Deferred::failed(err)
            }
        }
    }

    /// Stop a continuous test.
    pub fn test_continuous_stop(&mut self) -> Deferred<()> {
        let continuous = matches!(
            self.impedance.run,
            Some(ImpedanceRun { completion: Completion::Continuous, .. })
        );
        if !continuous {
            return Deferred::failed(StateError::NotActive);
        }
        self.abort_impedance("continuous impedance test");
        Deferred::ready(Ok(()))
    }

    /// Measurement in progress, if any.
    pub fn impedance_state(&self) -> Option<ImpedanceTestState> {
        let run = self.impedance.run.as_ref()?;
        let active = run.active.as_ref()?;
        Some(ImpedanceTestState {
            channel: active.step.channel,
            testing_p: active.step.input == ImpedanceInput::P,
            testing_n: active.step.input == ImpedanceInput::N,
            window_len: active.window.len(),
            window_target: active.target,
            continuous: matches!(run.completion, Completion::Continuous),
        })
    }

    // ------------------------------------------------------------------------
    // Sequencing
    // ------------------------------------------------------------------------

    fn test_single(&mut self, channel: u8, test_p: bool, test_n: bool) -> Deferred<ChannelImpedance> {
        if let Err(err) = check_channel(channel, self.board.channel_count) {
            return Deferred::failed(err);
        }
        if let Err(err) = self.check_impedance_ready() {
            return Deferred::failed(err);
        }
        let steps = channel_steps(channel, test_p, test_n).collect();
        let (resolver, result) = deferred();
        self.begin_impedance(steps, Completion::Channel { channel, resolver });
        result
    }

    fn check_impedance_ready(&self) -> Result<(), StateError> {
        if !self.connected {
            return Err(StateError::NotConnected);
        }
        if !self.streaming {
            return Err(StateError::NotStreaming);
        }
        if self.impedance.is_active() {
            return Err(StateError::ImpedanceTestActive);
        }
        Ok(())
    }

    fn begin_impedance(&mut self, steps: VecDeque<ImpedanceStep>, completion: Completion) {
        debug!("Impedance test of {} inputs", steps.len());
        self.impedance.run = Some(ImpedanceRun { steps, active: None, completion });
        if let Err(err) = self.advance_impedance() {
            self.fail_impedance(err);
        }
    }

    /// Start the next step, or finish the run when none are left.
    fn advance_impedance(&mut self) -> SessionResult<()> {
        loop {
            let Some(run) = self.impedance.run.as_mut() else { return Ok(()) };

            if let Some(step) = run.steps.pop_front() {
                let command = impedance_setter(
                    step.channel,
                    step.input == ImpedanceInput::P,
                    step.input == ImpedanceInput::N,
                )?;
                let target = self
                    .config
                    .impedance_window
                    .unwrap_or_else(|| window_size(self.board.sample_rate));
                self.send(&command)?;
                if let Some(run) = self.impedance.run.as_mut() {
                    run.active = Some(ActiveMeasurement { step, window: Vec::with_capacity(target), target });
                }
                return Ok(());
            }

            if matches!(run.completion, Completion::Continuous) {
                self.events.emit(SessionEvent::ImpedanceArray(self.impedance.results.clone()));
                run.steps = sweep(self.board.channel_count);
                if run.steps.is_empty() {
                    return Ok(());
                }
            } else {
                if let Some(run) = self.impedance.run.take() {
                    self.complete_impedance(run.completion);
                }
                return Ok(());
            }
        }
    }

    fn complete_impedance(&mut self, completion: Completion) {
        match completion {
            Completion::Channel { channel, resolver } => {
                resolver.resolve(Ok(self.impedance.result(channel)));
            }
            Completion::Array(resolver) => {
                let results = self.impedance.results.clone();
                self.events.emit(SessionEvent::ImpedanceArray(results.clone()));
                resolver.resolve(Ok(results));
            }
            Completion::Continuous => {}
        }
    }

    /// Feed one decoded sample to the measurement in progress.
    pub(crate) fn impedance_on_sample(&mut self, sample: &Sample) {
        let daisy = self.board.is_daisy();
        let Some(run) = self.impedance.run.as_mut() else { return };
        let Some(active) = run.active.as_mut() else { return };

        let channel = active.step.channel;
        if !sample_carries_channel(daisy, channel, sample.sample_number) {
            return;
        }
        active.window.push(sample.channel_data[packet_slot(channel)]);
        if active.window.len() < active.target {
            return;
        }

        let ohms = impedance_from_rms(rms(&active.window));
        let step = active.step;
        run.active = None;

        if let Err(err) = self.finish_step(step, ohms) {
            self.fail_impedance(err);
        }
    }

    fn finish_step(&mut self, step: ImpedanceStep, ohms: f64) -> SessionResult<()> {
        let measured = InputImpedance::measured(ohms);
        info!(
            "Channel {} input {:?}: {:.0} ohms ({})",
            step.channel,
            step.input,
            ohms,
            measured.text.as_str()
        );

        let Some(result) = self.impedance.result_mut(step.channel) else {
            return Ok(());
        };
        *result.input_mut(step.input) = measured;
        let result = *result;

        self.send(&impedance_setter(step.channel, false, false)?)?;
        self.events.emit(SessionEvent::ImpedanceResult(result));
        self.advance_impedance()
    }

    fn fail_impedance(&mut self, err: SessionError) {
        let Some(run) = self.impedance.run.take() else { return };
        warn!("Impedance test failed: {err}");
        match run.completion {
            Completion::Channel { resolver, .. } => resolver.resolve(Err(err)),
            Completion::Array(resolver) => resolver.resolve(Err(err)),
            Completion::Continuous => {}
        }
    }

    /// Cancel the test in progress without recording the current step.
    pub(crate) fn abort_impedance(&mut self, operation: &'static str) {
        let Some(run) = self.impedance.run.take() else { return };
        if let Some(active) = &run.active {
            debug!("Aborting impedance step on channel {}", active.step.channel);
            if let Ok(off) = impedance_setter(active.step.channel, false, false) {
                if let Err(err) = self.send(&off) {
                    debug!("Could not turn lead-off drive off: {err}");
                }
            }
        }
        match run.completion {
            Completion::Channel { resolver, .. } => {
                resolver.resolve(Err(SessionError::Aborted { operation }));
            }
            Completion::Array(resolver) => resolver.resolve(Err(SessionError::Aborted { operation })),
            Completion::Continuous => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::clock::ManualClock;
    use crate::session::tests::{drain, ready_session, BANNER_DAISY_V2, BANNER_DEFAULT, TestSession};
    use crate::transport::RecordingTransport;
    use bioamp_core::impedance::ImpedanceText;
    use bioamp_core::protocol::{channel_scale, Packet, PacketType, DEFAULT_GAIN};
    use bioamp_core::ValidationError;

    const WINDOW: usize = 4;

    /// Connected, streaming session with a short measurement window.
    fn streaming(banner: &[u8]) -> (TestSession, crate::events::EventReceiver) {
        let clock = ManualClock::new();
        let config = SessionConfig { impedance_window: Some(WINDOW), ..Default::default() };
        let (mut session, mut events) = Session::new(RecordingTransport::new(), clock, config);
        let _ready = session.on_connected();
        session.process_bytes(banner);
        assert!(session.stream_start().try_result().unwrap().is_ok());
        drain(&mut events);
        session.transport_mut().clear();
        (session, events)
    }

    /// Packet whose every channel alternates by `amplitude_uv` around zero.
    #[allow(clippy::cast_possible_truncation)]
    fn packet(sample_number: u8, amplitude_uv: f64) -> Vec<u8> {
        let counts = (amplitude_uv / channel_scale(DEFAULT_GAIN)).round() as i32;
        let value = if sample_number % 2 == 0 { counts } else { -counts };
        Packet::encode(sample_number, &[value; 8], [0; 6], PacketType::StandardAccel)
            .as_bytes()
            .to_vec()
    }

    fn feed(session: &mut TestSession, first: u8, count: u8, amplitude_uv: f64) {
        for n in first..first + count {
            session.process_bytes(&packet(n, amplitude_uv));
        }
    }

    #[test]
    fn test_single_channel_both_inputs() {
        let (mut session, mut events) = streaming(BANNER_DEFAULT);
        let mut result = session.test_channel(3);
        assert_eq!(session.transport().last_write(), Some(&b"z310Z"[..]));

        feed(&mut session, 0, 4, 1.0);
        assert_eq!(session.transport().writes()[1], b"z300Z");
        assert_eq!(session.transport().last_write(), Some(&b"z301Z"[..]));
        assert!(result.try_result().is_none());

        feed(&mut session, 4, 4, 1.0);
        let result = result.try_result().unwrap().unwrap();
        assert_eq!(result.channel, 3);
        assert_ne!(result.p.text, ImpedanceText::Init);
        assert_ne!(result.n.text, ImpedanceText::Init);
        assert_eq!(session.transport().last_write(), Some(&b"z300Z"[..]));
        assert!(session.impedance_state().is_none());

        let results: Vec<_> = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::ImpedanceResult(_)))
            .collect();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_measured_value() {
        let (mut session, _) = streaming(BANNER_DEFAULT);
        let mut result = session.test_channel_input_p(1);
        // A 10 uV square wave has an RMS of 10 uV: 157 ohms, "good"
        feed(&mut session, 0, 4, 10.0);
        let result = result.try_result().unwrap().unwrap();
        assert!((result.p.raw - 157.0).abs() < 5.0);
        assert_eq!(result.p.text, ImpedanceText::Good);
        assert_eq!(result.n, InputImpedance::INIT);
    }

    #[test]
    fn test_state_snapshot() {
        let (mut session, _) = streaming(BANNER_DEFAULT);
        let _result = session.test_channel_input_n(2);
        feed(&mut session, 0, 2, 1.0);
        let state = session.impedance_state().unwrap();
        assert_eq!(state.channel, 2);
        assert!(state.testing_n && !state.testing_p);
        assert_eq!(state.window_len, 2);
        assert_eq!(state.window_target, WINDOW);
    }

    #[test]
    fn test_samples_keep_flowing_during_test() {
        let (mut session, mut events) = streaming(BANNER_DEFAULT);
        let _result = session.test_channel(1);
        feed(&mut session, 0, 3, 1.0);
        let samples = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Sample(_)))
            .count();
        assert_eq!(samples, 3);
    }

    #[test]
    fn test_all_channels_emits_array() {
        let (mut session, mut events) = streaming(BANNER_DEFAULT);
        let mut result = session.test_all_channels();
        feed(&mut session, 0, 16 * WINDOW as u8, 1.0);

        let results = result.try_result().unwrap().unwrap();
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.p.text != ImpedanceText::Init && r.n.text != ImpedanceText::Init));
        let events = drain(&mut events);
        assert!(matches!(events.last(), Some(SessionEvent::ImpedanceArray(a)) if a.len() == 8));
    }

    #[test]
    fn test_channels_instruction_string() {
        let (mut session, _) = streaming(BANNER_DEFAULT);
        let mut result = session.test_channels("-p------");
        assert_eq!(session.transport().last_write(), Some(&b"z210Z"[..]));
        feed(&mut session, 0, 4, 1.0);
        let results = result.try_result().unwrap().unwrap();
        assert_ne!(results[1].p.text, ImpedanceText::Init);
        assert_eq!(results[1].n, InputImpedance::INIT);
        assert_eq!(results[0].p, InputImpedance::INIT);
    }

    #[test]
    fn test_channels_uppercase_resets() {
        let (mut session, _) = streaming(BANNER_DEFAULT);
        let mut first = session.test_channel(1);
        feed(&mut session, 0, 8, 1.0);
        assert!(first.try_result().unwrap().is_ok());

        let mut second = session.test_channels("N-------");
        assert_eq!(session.impedance_results()[0].p, InputImpedance::INIT);
        feed(&mut session, 8, 4, 1.0);
        let results = second.try_result().unwrap().unwrap();
        assert_eq!(results[0].p, InputImpedance::INIT);
        assert_ne!(results[0].n.text, ImpedanceText::Init);
    }

    #[test]
    fn test_channels_all_skipped_completes_immediately() {
        let (mut session, _) = streaming(BANNER_DEFAULT);
        let mut result = session.test_channels("--------");
        assert_eq!(result.try_result().unwrap().unwrap().len(), 8);
        assert!(session.transport().writes().is_empty());
    }

    #[test]
    fn test_channels_validation() {
        let (mut session, _) = streaming(BANNER_DEFAULT);
        assert!(matches!(
            session.test_channels("-NnpPp").try_result(),
            Some(Err(SessionError::Validation(ValidationError::InstructionCountMismatch { got: 6, expected: 8 })))
        ));
        assert!(matches!(
            session.test_channel(9).try_result(),
            Some(Err(SessionError::Validation(ValidationError::InvalidChannel { channel: 9, max: 8 })))
        ));
        assert!(session.transport().writes().is_empty());
    }

    #[test]
    fn test_state_errors() {
        let (mut session, _, _) = ready_session(BANNER_DEFAULT);
        assert!(matches!(
            session.test_channel(1).try_result(),
            Some(Err(SessionError::State(StateError::NotStreaming)))
        ));

        let (mut session, _) = streaming(BANNER_DEFAULT);
        let _first = session.test_channel(1);
        assert!(matches!(
            session.test_all_channels().try_result(),
            Some(Err(SessionError::State(StateError::ImpedanceTestActive)))
        ));
        assert!(matches!(
            session.test_continuous_stop().try_result(),
            Some(Err(SessionError::State(StateError::NotActive)))
        ));
    }

    #[test]
    fn test_stream_stop_aborts_without_result() {
        let (mut session, mut events) = streaming(BANNER_DEFAULT);
        let mut result = session.test_channel(5);
        feed(&mut session, 0, 2, 1.0);
        drain(&mut events);

        assert!(session.stream_stop().try_result().unwrap().is_ok());
        assert!(matches!(result.try_result(), Some(Err(SessionError::Aborted { .. }))));
        assert!(session.impedance_state().is_none());
        assert_eq!(session.impedance_results()[4].p, InputImpedance::INIT);
        assert!(!drain(&mut events).iter().any(|e| matches!(e, SessionEvent::ImpedanceResult(_))));
        // Stream stop, then drive off
        let writes = session.transport().writes();
        assert_eq!(writes[writes.len() - 2], b"s");
        assert_eq!(writes[writes.len() - 1], b"z500Z");
    }

    #[test]
    fn test_continuous_sweeps_until_stopped() {
        let (mut session, mut events) = streaming(BANNER_DEFAULT);
        assert!(session.test_continuous_start().try_result().unwrap().is_ok());
        assert!(session.impedance_state().unwrap().continuous);

        feed(&mut session, 0, 16 * WINDOW as u8, 1.0);
        feed(&mut session, 0, 16 * WINDOW as u8, 1.0);
        let arrays = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::ImpedanceArray(_)))
            .count();
        assert_eq!(arrays, 2);

        assert!(session.test_continuous_stop().try_result().unwrap().is_ok());
        assert!(session.impedance_state().is_none());
    }

    #[test]
    fn test_daisy_reads_interleaved_samples() {
        let (mut session, _) = streaming(BANNER_DAISY_V2);
        assert_eq!(session.impedance_results().len(), 16);
        let mut result = session.test_channel_input_p(12);
        assert_eq!(session.transport().last_write(), Some(&b"zR10Z"[..]));

        // Only even sample numbers carry channels 9-16
        feed(&mut session, 1, 7, 1.0);
        assert_eq!(session.impedance_state().unwrap().window_len, 3);
        feed(&mut session, 8, 2, 1.0);
        assert!(result.try_result().unwrap().is_ok());
    }
}
