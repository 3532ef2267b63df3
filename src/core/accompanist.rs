//! The accompanist core: melody bookkeeping and the per-tick algorithm.
//!
//! Everything here runs on a single thread. [`AccompanistCore::tick`] is the
//! body the scheduler invokes; it reports back when it wants to run next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::clock::{TickClock, TickPosition};
use super::differ::{self, Command};
use super::note::{validate_event, MelodyState, Note, Voicing};
use super::oracle::{InferenceOracle, OracleError};
use super::sink::EventSink;
use crate::config::AccompanistConfig;
use crate::error::{AccompanistError, AccompanistResult};

/// Invoked once when the oracle fails fatally
pub type FailureCallback = Box<dyn FnOnce(OracleError) + Send>;

/// What the scheduler should do after a tick body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Run again at this absolute time (ms)
    RunAt(u64),
    /// Nothing left to do until the next melody note-on
    Idle,
}

/// Read-only view of the core's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSnapshot {
    pub position: TickPosition,
    pub melody: MelodyState,
    pub sounding: Voicing,
    pub oracle_calls: u64,
    pub ticks_played: u64,
    pub failed: bool,
}

pub struct AccompanistCore<O, S> {
    oracle: O,
    sink: S,
    channel: u8,
    max_failures: u32,

    melody: MelodyState,
    // note-offs after the melody went silent still need a velocity
    velocity: u8,
    last_melody: Option<Note>,

    clock: TickClock,
    sounding: Voicing,

    consecutive_failures: u32,
    failed: Arc<AtomicBool>,
    on_failure: Option<FailureCallback>,
    closed: bool,

    oracle_calls: u64,
    ticks_played: u64,
}

impl<O: InferenceOracle, S: EventSink> AccompanistCore<O, S> {
    pub fn new(config: &AccompanistConfig, oracle: O, sink: S) -> AccompanistResult<Self> {
        config.validate()?;
        Ok(Self {
            oracle,
            sink,
            channel: config.channel,
            max_failures: config.max_consecutive_failures,
            melody: MelodyState::Silent,
            velocity: 100,
            last_melody: None,
            clock: TickClock::new(config.bpm, config.ticks_per_quarter),
            sounding: Vec::with_capacity(config.voices),
            consecutive_failures: 0,
            failed: Arc::new(AtomicBool::new(false)),
            on_failure: None,
            closed: false,
            oracle_calls: 0,
            ticks_played: 0,
        })
    }

    /// Register the one-shot callback for fatal oracle failures
    pub fn on_failure(mut self, callback: impl FnOnce(OracleError) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }

    /// Flag shared with input threads so they can refuse input after a failure
    pub fn failure_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failed)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn melody(&self) -> MelodyState {
        self.melody
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn sounding(&self) -> &[Note] {
        &self.sounding
    }

    pub fn oracle_calls(&self) -> u64 {
        self.oracle_calls
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            position: self.clock.position(),
            melody: self.melody,
            sounding: self.sounding.clone(),
            oracle_calls: self.oracle_calls,
            ticks_played: self.ticks_played,
            failed: self.is_failed(),
        }
    }

    /// Record a melody note-on and forward it.
    ///
    /// Returns whether the scheduler must be armed: a note-on for key 0 is
    /// forwarded but treated as silence.
    pub fn melody_on(&mut self, channel: u8, key: u8, velocity: u8) -> AccompanistResult<bool> {
        self.check_input(channel, key, velocity)?;
        log::info!("[CORE] melody on: key={} vel={}", key, velocity);

        self.melody = if key == 0 {
            MelodyState::Silent
        } else {
            MelodyState::Sounding { key, fresh: true, velocity }
        };
        self.velocity = velocity;
        self.sink.note_on(channel, key, velocity);
        Ok(key != 0)
    }

    /// Record a melody note-off and forward it. Any release silences the
    /// melody, whichever key it names.
    pub fn melody_off(&mut self, channel: u8, key: u8, velocity: u8) -> AccompanistResult<()> {
        self.check_input(channel, key, velocity)?;
        log::info!("[CORE] melody off: key={}", key);

        self.melody = MelodyState::Silent;
        self.sink.note_off(channel, key, velocity);
        Ok(())
    }

    fn check_input(&self, channel: u8, key: u8, velocity: u8) -> AccompanistResult<()> {
        if self.closed {
            return Err(AccompanistError::Stopped);
        }
        if self.is_failed() {
            return Err(AccompanistError::Failed);
        }
        validate_event(channel, key, velocity)
    }

    /// One scheduler invocation at time `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        if self.is_failed() || self.closed {
            return TickOutcome::Idle;
        }

        if self.melody.is_sounding() {
            self.last_melody = Some(self.melody.as_note());
        }

        if !self.clock.is_due(now_ms) {
            return TickOutcome::RunAt(self.clock.next_tick_ms());
        }

        if self.clock.at_quarter_boundary() {
            if self.melody.is_sounding() {
                log::debug!("[CORE] quarter starts at {}ms", now_ms);
                self.clock.start_quarter(now_ms);
            } else {
                if !self.clock.is_idle() || !self.sounding.is_empty() {
                    log::info!("[CORE] melody ended, going idle at {}ms", now_ms);
                }
                self.enter_idle();
                return TickOutcome::Idle;
            }
        }

        let Some(melody_note) = self.last_melody else {
            self.enter_idle();
            return TickOutcome::Idle;
        };

        self.oracle_calls += 1;
        match self.oracle.next(melody_note) {
            Ok(voicing) => {
                self.consecutive_failures = 0;
                self.play(voicing);
                self.melody.consume_strike();
                self.last_melody = Some(melody_note.sustained());
                self.ticks_played += 1;

                let next = self.clock.advance();
                log::debug!(
                    "[CORE] tick {:?} at {}ms, next at {}ms",
                    self.clock.current_tick(),
                    now_ms,
                    next
                );
                TickOutcome::RunAt(next)
            }
            Err(err) if err.is_fatal() => {
                self.fail(err);
                TickOutcome::Idle
            }
            Err(err) => {
                self.consecutive_failures += 1;
                log::warn!(
                    "[CORE] oracle miss {}/{}: {}",
                    self.consecutive_failures,
                    self.max_failures,
                    err
                );
                if self.consecutive_failures >= self.max_failures {
                    log::warn!("[CORE] too many oracle misses, cutting accompaniment");
                    self.consecutive_failures = 0;
                    self.melody = MelodyState::Silent;
                    self.enter_idle();
                    TickOutcome::Idle
                } else {
                    TickOutcome::RunAt(self.clock.next_tick_ms())
                }
            }
        }
    }

    fn play(&mut self, voicing: Voicing) {
        for command in differ::diff(&self.sounding, &voicing, self.velocity) {
            match command {
                Command::NoteOn { key, velocity } => self.sink.note_on(self.channel, key, velocity),
                Command::NoteOff { key, velocity } => self.sink.note_off(self.channel, key, velocity),
            }
        }
        self.sounding = voicing;
    }

    /// Release every sounding accompaniment note
    pub fn silence(&mut self) {
        for note in self.sounding.drain(..).filter(|n| !n.is_silent()) {
            self.sink.note_off(self.channel, note.key, self.velocity);
        }
    }

    fn enter_idle(&mut self) {
        self.silence();
        self.clock.go_idle();
        self.last_melody = None;
    }

    fn fail(&mut self, err: OracleError) {
        log::error!("[CORE] oracle failed: {}", err);
        self.failed.store(true, Ordering::SeqCst);
        self.melody = MelodyState::Silent;
        self.enter_idle();
        if let Some(callback) = self.on_failure.take() {
            callback(err);
        }
    }

    /// Final silence pass and oracle release. Further input is refused.
    pub fn shutdown(&mut self) -> CoreSnapshot {
        if !self.closed {
            log::info!("[CORE] shutting down");
            self.enter_idle();
            self.oracle.close();
            self.closed = true;
        }
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sink::{RecordingSink, SinkEvent};
    use crate::testing::ScriptedOracle;
    use std::sync::Mutex;

    fn core(oracle: ScriptedOracle) -> (AccompanistCore<ScriptedOracle, RecordingSink>, RecordingSink) {
        let sink = RecordingSink::new();
        let core = AccompanistCore::new(&AccompanistConfig::default(), oracle, sink.clone()).unwrap();
        (core, sink)
    }

    #[test]
    fn melody_is_forwarded_without_accompaniment() {
        let (mut core, sink) = core(ScriptedOracle::constant(vec![Note::held(64)]));
        assert!(core.melody_on(2, 60, 90).unwrap());
        core.melody_off(2, 60, 90).unwrap();
        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::NoteOn { channel: 2, key: 60, velocity: 90 },
                SinkEvent::NoteOff { channel: 2, key: 60, velocity: 90 },
            ]
        );
        assert_eq!(core.oracle_calls(), 0);
    }

    #[test]
    fn invalid_input_is_neither_forwarded_nor_recorded() {
        let (mut core, sink) = core(ScriptedOracle::constant(vec![Note::held(64)]));
        assert_eq!(core.melody_on(0, 200, 90), Err(AccompanistError::InvalidKey(200)));
        assert_eq!(core.melody_on(0, 60, 0), Err(AccompanistError::InvalidVelocity(0)));
        assert!(sink.is_empty());
        assert_eq!(core.melody(), MelodyState::Silent);
    }

    #[test]
    fn early_tick_waits_for_due_time() {
        let (mut core, _sink) = core(ScriptedOracle::constant(vec![Note::held(64)]));
        core.melody_on(0, 60, 100).unwrap();
        assert_eq!(core.tick(0), TickOutcome::RunAt(150));
        assert_eq!(core.tick(100), TickOutcome::RunAt(150));
        assert_eq!(core.oracle_calls(), 1);
    }

    #[test]
    fn strike_reaches_oracle_once() {
        let oracle = ScriptedOracle::constant(vec![Note::held(64)]);
        let inputs = oracle.inputs();
        let (mut core, _sink) = core(oracle);
        core.melody_on(0, 60, 100).unwrap();
        core.tick(0);
        core.tick(150);
        assert_eq!(inputs.lock().unwrap().clone(), vec![Note::struck(60), Note::held(60)]);
    }

    #[test]
    fn release_of_an_older_key_still_silences_melody() {
        let (mut core, sink) = core(ScriptedOracle::constant(vec![Note::held(64)]));
        core.melody_on(0, 60, 100).unwrap();
        core.melody_on(0, 62, 100).unwrap();
        core.melody_off(0, 60, 100).unwrap();
        assert_eq!(core.melody(), MelodyState::Silent);
        assert_eq!(sink.events().last(), Some(&SinkEvent::NoteOff { channel: 0, key: 60, velocity: 100 }));
    }

    #[test]
    fn transient_failure_retries_same_tick() {
        let oracle = ScriptedOracle::new(vec![
            Ok(vec![Note::struck(64)]),
            Err(OracleError::Transient("busy".to_string())),
            Ok(vec![Note::held(64)]),
        ]);
        let (mut core, sink) = core(oracle);
        core.melody_on(0, 60, 100).unwrap();
        core.tick(0);
        assert_eq!(core.tick(150), TickOutcome::RunAt(150));
        assert_eq!(core.clock().current_tick(), Some(0));
        assert_eq!(core.sounding(), &[Note::struck(64)]);
        assert_eq!(core.tick(151), TickOutcome::RunAt(300));
        assert_eq!(core.clock().current_tick(), Some(1));
        assert_eq!(sink.held_keys(0).get(&64), Some(&1));
    }

    #[test]
    fn repeated_transient_failures_force_silence() {
        let busy = || Err(OracleError::Transient("busy".to_string()));
        let oracle = ScriptedOracle::new(vec![Ok(vec![Note::struck(64)]), busy(), busy(), busy()]);
        let (mut core, sink) = core(oracle);
        core.melody_on(0, 60, 100).unwrap();
        core.tick(0);
        core.tick(150);
        core.tick(150);
        assert_eq!(core.tick(150), TickOutcome::Idle);
        assert!(core.clock().is_idle());
        assert!(core.sounding().is_empty());
        assert!(sink.held_keys(0).get(&64).is_none());
        assert!(!core.is_failed());
        assert_eq!(core.melody(), MelodyState::Silent);
    }

    #[test]
    fn fatal_failure_silences_and_reports_once() {
        let oracle = ScriptedOracle::new(vec![
            Ok(vec![Note::struck(64), Note::struck(67)]),
            Err(OracleError::Fatal("model gone".to_string())),
        ]);
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink_reported = Arc::clone(&reported);
        let (core, sink) = core(oracle);
        let mut core = core.on_failure(move |err| sink_reported.lock().unwrap().push(err));

        core.melody_on(0, 60, 100).unwrap();
        core.tick(0);
        assert_eq!(core.tick(150), TickOutcome::Idle);
        assert!(core.is_failed());
        // only the forwarded melody note is still held
        assert_eq!(sink.held_keys(0).into_iter().collect::<Vec<_>>(), vec![(60, 1)]);
        assert_eq!(reported.lock().unwrap().len(), 1);

        assert_eq!(core.melody_on(0, 62, 100), Err(AccompanistError::Failed));
        assert_eq!(core.tick(300), TickOutcome::Idle);
        assert_eq!(reported.lock().unwrap().len(), 1);
    }

    #[test]
    fn shutdown_silences_and_closes_oracle() {
        let oracle = ScriptedOracle::constant(vec![Note::held(64), Note::held(67)]);
        let closed = oracle.closed_flag();
        let (mut core, sink) = core(oracle);
        core.melody_on(0, 60, 100).unwrap();
        core.tick(0);
        let snapshot = core.shutdown();
        assert!(snapshot.sounding.is_empty());
        assert_eq!(snapshot.position, TickPosition::Idle);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(sink.held_keys(0).get(&64), None);
        assert_eq!(core.melody_on(0, 60, 100), Err(AccompanistError::Stopped));
    }
}
