use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Millisecond time source for the tick algorithm
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

/// Monotonic wall clock measured from its construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(start_ms)) }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Position of the metric cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPosition {
    /// No quarter is running
    Idle,
    /// Index of the next tick to execute within the current quarter.
    /// Equal to `ticks_per_quarter` once the last tick of the quarter ran.
    Next(u32),
}

/// Metric clock state: where in the quarter we are and when the next tick is due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickClock {
    bpm: u32,
    ticks_per_quarter: u32,
    position: TickPosition,
    quarter_start_ms: u64,
    next_tick_ms: u64,
}

impl TickClock {
    pub fn new(bpm: u32, ticks_per_quarter: u32) -> Self {
        Self {
            bpm: bpm.max(1),
            ticks_per_quarter: ticks_per_quarter.max(1),
            position: TickPosition::Idle,
            quarter_start_ms: 0,
            next_tick_ms: 0,
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn ticks_per_quarter(&self) -> u32 {
        self.ticks_per_quarter
    }

    pub fn position(&self) -> TickPosition {
        self.position
    }

    pub fn is_idle(&self) -> bool {
        self.position == TickPosition::Idle
    }

    pub fn next_tick_ms(&self) -> u64 {
        self.next_tick_ms
    }

    /// Index of the most recently executed tick in the running quarter
    pub fn current_tick(&self) -> Option<u32> {
        match self.position {
            TickPosition::Next(n) if n > 0 => Some(n - 1),
            _ => None,
        }
    }

    /// Idle, or the last tick of the quarter has already run
    pub fn at_quarter_boundary(&self) -> bool {
        match self.position {
            TickPosition::Idle => true,
            TickPosition::Next(n) => n >= self.ticks_per_quarter,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_tick_ms
    }

    /// Milliseconds until the next tick, zero when already due
    pub fn remaining(&self, now_ms: u64) -> u64 {
        self.next_tick_ms.saturating_sub(now_ms)
    }

    pub fn start_quarter(&mut self, now_ms: u64) {
        self.quarter_start_ms = now_ms;
        self.next_tick_ms = now_ms;
        self.position = TickPosition::Next(0);
    }

    /// Stop the metric cycle; an idle clock is always due.
    pub fn go_idle(&mut self) {
        self.position = TickPosition::Idle;
        self.next_tick_ms = 0;
    }

    /// Offset of tick `index` from the quarter start, computed from the
    /// quarter start each time so rounding never accumulates.
    pub fn tick_offset_ms(&self, index: u32) -> u64 {
        u64::from(index) * 60_000 / (u64::from(self.bpm) * u64::from(self.ticks_per_quarter))
    }

    /// Mark the current tick as done and compute when the next one is due.
    pub fn advance(&mut self) -> u64 {
        let next = match self.position {
            TickPosition::Next(n) => n + 1,
            TickPosition::Idle => 1,
        };
        self.position = TickPosition::Next(next);
        self.next_tick_ms = self.quarter_start_ms + self.tick_offset_ms(next);
        self.next_tick_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteenth_ticks_at_100_bpm() {
        let mut clock = TickClock::new(100, 4);
        assert!(clock.at_quarter_boundary());
        clock.start_quarter(1000);
        assert_eq!(clock.advance(), 1150);
        assert_eq!(clock.advance(), 1300);
        assert_eq!(clock.advance(), 1450);
        assert!(!clock.at_quarter_boundary());
        assert_eq!(clock.advance(), 1600);
        assert!(clock.at_quarter_boundary());
        assert_eq!(clock.current_tick(), Some(3));
    }

    #[test]
    fn no_drift_with_uneven_tick_length() {
        // 60000 / 7 / 4 is not a whole number of milliseconds
        let mut clock = TickClock::new(7, 4);
        clock.start_quarter(0);
        for _ in 0..4 {
            clock.advance();
        }
        assert_eq!(clock.next_tick_ms(), 60_000 / 7);
    }

    #[test]
    fn remaining_saturates() {
        let mut clock = TickClock::new(100, 4);
        clock.start_quarter(0);
        clock.advance();
        assert_eq!(clock.remaining(100), 50);
        assert_eq!(clock.remaining(400), 0);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(10);
        let other = clock.clone();
        clock.advance(5);
        assert_eq!(other.now_ms(), 15);
        other.set(3);
        assert_eq!(clock.now_ms(), 3);
    }
}
