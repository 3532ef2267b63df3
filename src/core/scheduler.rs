//! Cooperative tick scheduling.
//!
//! [`TickScheduler`] is the timer: a single pending deadline that can be armed
//! for "now" or pushed out by a delay. [`AccompanistHandle`] runs the
//! scheduler and an [`AccompanistCore`] on a dedicated thread; melody input
//! from any other thread is posted onto that thread's [`MessageBus`].

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::accompanist::{AccompanistCore, CoreSnapshot, TickOutcome};
use super::clock::Clock;
use super::note::validate_event;
use super::oracle::InferenceOracle;
use super::sink::EventSink;
use crate::error::{AccompanistError, AccompanistResult};
use crate::messaging::{CoreMessage, MessageBus, Received};

/// Single-slot timer for the tick body
pub struct TickScheduler<C> {
    clock: C,
    deadline: Option<u64>,
}

impl<C: Clock> TickScheduler<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, deadline: None }
    }

    /// Run the tick as soon as possible, replacing any later deadline
    pub fn arm(&mut self) {
        let now = self.clock.now_ms();
        self.deadline = Some(self.deadline.map_or(now, |d| d.min(now)));
    }

    /// Run the tick `after_ms` from now
    pub fn schedule_next(&mut self, after_ms: u64) {
        self.deadline = Some(self.clock.now_ms().saturating_add(after_ms));
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// How long until the tick is due; `None` when nothing is scheduled
    pub fn time_to_deadline(&self) -> Option<Duration> {
        self.deadline
            .map(|d| Duration::from_millis(d.saturating_sub(self.clock.now_ms())))
    }

    pub fn is_due(&self) -> bool {
        self.deadline.is_some_and(|d| d <= self.clock.now_ms())
    }

    /// Run the tick body if it is due and reschedule from its outcome.
    /// Returns whether the body ran.
    pub fn fire<O, S>(&mut self, core: &mut AccompanistCore<O, S>) -> bool
    where
        O: InferenceOracle,
        S: EventSink,
    {
        if !self.is_due() {
            return false;
        }
        self.deadline = None;
        match core.tick(self.clock.now_ms()) {
            // time is read again: inference may have taken a while
            TickOutcome::RunAt(at) => self.schedule_next(at.saturating_sub(self.clock.now_ms())),
            TickOutcome::Idle => self.cancel(),
        }
        true
    }
}

/// Apply one queued melody message on the scheduler thread
fn dispatch<O, S, C>(core: &mut AccompanistCore<O, S>, scheduler: &mut TickScheduler<C>, msg: CoreMessage)
where
    O: InferenceOracle,
    S: EventSink,
    C: Clock,
{
    let result = match msg {
        CoreMessage::MelodyOn { channel, key, velocity } => {
            core.melody_on(channel, key, velocity).map(|arm| {
                if arm {
                    scheduler.arm();
                }
            })
        }
        CoreMessage::MelodyOff { channel, key, velocity } => core.melody_off(channel, key, velocity),
        CoreMessage::Stop => Ok(()),
    };
    if let Err(err) = result {
        log::warn!("[SCHEDULER] dropped {:?}: {}", msg, err);
    }
}

fn run<O, S, C>(mut core: AccompanistCore<O, S>, mut scheduler: TickScheduler<C>, bus: MessageBus) -> CoreSnapshot
where
    O: InferenceOracle,
    S: EventSink,
    C: Clock,
{
    log::info!("[SCHEDULER] started");
    loop {
        // queued input always goes before a due tick
        match bus.receive(scheduler.time_to_deadline()) {
            Received::Message(CoreMessage::Stop) => break,
            Received::Message(msg) => dispatch(&mut core, &mut scheduler, msg),
            Received::TimedOut => {
                scheduler.fire(&mut core);
            }
            Received::Closed => {
                log::warn!("[SCHEDULER] input closed without stop");
                break;
            }
        }
    }

    for msg in bus.drain() {
        if msg != CoreMessage::Stop {
            dispatch(&mut core, &mut scheduler, msg);
        }
    }
    scheduler.cancel();
    let snapshot = core.shutdown();
    log::info!("[SCHEDULER] stopped after {} ticks", snapshot.ticks_played);
    snapshot
}

/// Thread-safe entry point for melody input.
///
/// Input is validated on the caller's thread and then posted to the scheduler
/// thread, which owns the core, the oracle and the sink.
pub struct AccompanistHandle {
    sender: Sender<CoreMessage>,
    failed: Arc<AtomicBool>,
    thread: Option<JoinHandle<CoreSnapshot>>,
}

impl AccompanistHandle {
    /// Start the scheduler thread for `core`
    pub fn spawn<O, S, C>(core: AccompanistCore<O, S>, clock: C) -> AccompanistResult<Self>
    where
        O: InferenceOracle + 'static,
        S: EventSink + 'static,
        C: Clock + 'static,
    {
        let (sender, bus) = MessageBus::new();
        let failed = core.failure_flag();
        let scheduler = TickScheduler::new(clock);

        let thread = thread::Builder::new()
            .name("accompanist-scheduler".to_string())
            .spawn(move || run(core, scheduler, bus))
            .map_err(|err| {
                log::error!("[SCHEDULER] failed to start thread: {}", err);
                AccompanistError::Stopped
            })?;

        Ok(Self { sender, failed, thread: Some(thread) })
    }

    pub fn melody_on(&self, channel: u8, key: u8, velocity: u8) -> AccompanistResult<()> {
        self.post(channel, key, velocity, CoreMessage::MelodyOn { channel, key, velocity })
    }

    pub fn melody_off(&self, channel: u8, key: u8, velocity: u8) -> AccompanistResult<()> {
        self.post(channel, key, velocity, CoreMessage::MelodyOff { channel, key, velocity })
    }

    fn post(&self, channel: u8, key: u8, velocity: u8, msg: CoreMessage) -> AccompanistResult<()> {
        if self.is_failed() {
            return Err(AccompanistError::Failed);
        }
        validate_event(channel, key, velocity)?;
        self.sender.send(msg).map_err(|_| AccompanistError::Stopped)
    }

    /// True once the oracle has failed fatally
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Drain pending input, silence all accompaniment, close the oracle and
    /// join the scheduler thread.
    pub fn stop(mut self) -> AccompanistResult<CoreSnapshot> {
        self.shutdown().ok_or(AccompanistError::Stopped)
    }

    fn shutdown(&mut self) -> Option<CoreSnapshot> {
        let thread = self.thread.take()?;
        // the thread may already be gone; join reports that
        let _ = self.sender.send(CoreMessage::Stop);
        match thread.join() {
            Ok(snapshot) => Some(snapshot),
            Err(_) => {
                log::error!("[SCHEDULER] thread panicked");
                None
            }
        }
    }
}

impl Drop for AccompanistHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccompanistConfig;
    use crate::core::clock::ManualClock;
    use crate::core::note::Note;
    use crate::core::sink::RecordingSink;
    use crate::testing::ScriptedOracle;

    #[test]
    fn arm_preempts_later_deadline() {
        let clock = ManualClock::new(100);
        let mut scheduler = TickScheduler::new(clock.clone());
        scheduler.schedule_next(150);
        assert_eq!(scheduler.deadline(), Some(250));
        scheduler.arm();
        assert_eq!(scheduler.deadline(), Some(100));
        clock.advance(10);
        scheduler.arm();
        assert_eq!(scheduler.deadline(), Some(100));
        assert!(scheduler.is_due());
    }

    #[test]
    fn fire_reschedules_from_tick_outcome() {
        let clock = ManualClock::new(0);
        let mut scheduler = TickScheduler::new(clock.clone());
        let mut core = AccompanistCore::new(
            &AccompanistConfig::default(),
            ScriptedOracle::constant(vec![Note::held(64)]),
            RecordingSink::new(),
        )
        .unwrap();

        assert!(!scheduler.fire(&mut core));
        core.melody_on(0, 60, 100).unwrap();
        scheduler.arm();
        assert!(scheduler.fire(&mut core));
        assert_eq!(scheduler.deadline(), Some(150));
        assert!(!scheduler.fire(&mut core));

        core.melody_off(0, 60, 100).unwrap();
        for at in [150, 300, 450, 600] {
            clock.set(at);
            assert!(scheduler.fire(&mut core));
        }
        assert_eq!(scheduler.deadline(), None);
        assert_eq!(core.oracle_calls(), 4);
    }

    #[test]
    fn handle_rejects_invalid_input_synchronously() {
        let core = AccompanistCore::new(
            &AccompanistConfig::default(),
            ScriptedOracle::constant(vec![Note::held(64)]),
            RecordingSink::new(),
        )
        .unwrap();
        let handle = AccompanistHandle::spawn(core, ManualClock::new(0)).unwrap();
        assert_eq!(handle.melody_on(0, 128, 100), Err(AccompanistError::InvalidKey(128)));
        assert_eq!(handle.melody_off(17, 60, 100), Err(AccompanistError::InvalidChannel(17)));
        let snapshot = handle.stop().unwrap();
        assert_eq!(snapshot.oracle_calls, 0);
    }
}
