//! Test doubles and a manual-time driver for exercising the core without
//! threads or wall-clock time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::accompanist::AccompanistCore;
use crate::core::clock::{Clock, ManualClock};
use crate::core::note::{Note, Voicing};
use crate::core::oracle::{InferenceOracle, OracleError};
use crate::core::scheduler::TickScheduler;
use crate::core::sink::EventSink;
use crate::error::AccompanistResult;

pub use crate::core::sink::{RecordingSink, SinkEvent};

/// Oracle that replays a fixed script of results.
///
/// Once the script runs out it keeps sustaining the last voicing it returned.
pub struct ScriptedOracle {
    script: VecDeque<Result<Voicing, OracleError>>,
    last: Option<Voicing>,
    inputs: Arc<Mutex<Vec<Note>>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<Voicing, OracleError>>) -> Self {
        Self {
            script: script.into(),
            last: None,
            inputs: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Strike `voicing` on the first tick, then sustain it forever
    pub fn constant(voicing: Voicing) -> Self {
        let struck = voicing.iter().map(|n| Note::struck(n.key)).collect();
        Self::new(vec![Ok(struck)])
    }

    /// Every melody note the oracle was asked about, in order
    pub fn inputs(&self) -> Arc<Mutex<Vec<Note>>> {
        Arc::clone(&self.inputs)
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl InferenceOracle for ScriptedOracle {
    fn next(&mut self, melody: Note) -> Result<Voicing, OracleError> {
        self.inputs.lock().unwrap_or_else(|p| p.into_inner()).push(melody);
        match self.script.pop_front() {
            Some(Ok(voicing)) => {
                self.last = Some(voicing.clone());
                Ok(voicing)
            }
            Some(Err(err)) => Err(err),
            None => match &self.last {
                Some(voicing) => Ok(voicing.iter().map(|n| n.sustained()).collect()),
                None => Err(OracleError::Fatal("script exhausted".to_string())),
            },
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Drives a core and its scheduler on a [`ManualClock`]
pub struct ManualDriver<O, S> {
    pub core: AccompanistCore<O, S>,
    scheduler: TickScheduler<ManualClock>,
    clock: ManualClock,
    tick_times: Vec<u64>,
}

impl<O: InferenceOracle, S: EventSink> ManualDriver<O, S> {
    pub fn new(core: AccompanistCore<O, S>, start_ms: u64) -> Self {
        let clock = ManualClock::new(start_ms);
        Self {
            core,
            scheduler: TickScheduler::new(clock.clone()),
            clock,
            tick_times: Vec::new(),
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn scheduler(&self) -> &TickScheduler<ManualClock> {
        &self.scheduler
    }

    /// Times at which the oracle was consulted
    pub fn tick_times(&self) -> &[u64] {
        &self.tick_times
    }

    pub fn melody_on(&mut self, channel: u8, key: u8, velocity: u8) -> AccompanistResult<()> {
        if self.core.melody_on(channel, key, velocity)? {
            self.scheduler.arm();
        }
        Ok(())
    }

    pub fn melody_off(&mut self, channel: u8, key: u8, velocity: u8) -> AccompanistResult<()> {
        self.core.melody_off(channel, key, velocity)
    }

    /// Fire every deadline up to and including `until_ms`, then park the
    /// clock at `until_ms`.
    pub fn run_until(&mut self, until_ms: u64) {
        while let Some(deadline) = self.scheduler.deadline() {
            if deadline > until_ms {
                break;
            }
            if deadline > self.clock.now_ms() {
                self.clock.set(deadline);
            }
            let calls = self.core.oracle_calls();
            self.scheduler.fire(&mut self.core);
            if self.core.oracle_calls() > calls {
                self.tick_times.push(self.clock.now_ms());
            }
        }
        if until_ms > self.clock.now_ms() {
            self.clock.set(until_ms);
        }
    }

    /// Run until nothing is scheduled any more; returns the time reached
    pub fn run_to_idle(&mut self) -> u64 {
        while let Some(deadline) = self.scheduler.deadline() {
            self.run_until(deadline);
        }
        self.clock.now_ms()
    }
}
