use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Downstream receiver of MIDI note events (usually a synthesizer)
pub trait EventSink: Send {
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8);
    fn note_off(&mut self, channel: u8, key: u8, velocity: u8);
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        (**self).note_on(channel, key, velocity)
    }

    fn note_off(&mut self, channel: u8, key: u8, velocity: u8) {
        (**self).note_off(channel, key, velocity)
    }
}

/// One event as seen by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
}

impl SinkEvent {
    pub fn channel(&self) -> u8 {
        match *self {
            SinkEvent::NoteOn { channel, .. } | SinkEvent::NoteOff { channel, .. } => channel,
        }
    }

    pub fn key(&self) -> u8 {
        match *self {
            SinkEvent::NoteOn { key, .. } | SinkEvent::NoteOff { key, .. } => key,
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, SinkEvent::NoteOn { .. })
    }
}

/// Sink that keeps every event; clones share the same trace.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().clone()
    }

    /// Events on one channel only
    pub fn events_on(&self, channel: u8) -> Vec<SinkEvent> {
        self.lock().iter().copied().filter(|e| e.channel() == channel).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Multiset of keys currently held on `channel`: ons minus offs.
    /// Keys with more offs than ons show up with a negative count.
    pub fn held_keys(&self, channel: u8) -> HashMap<u8, i32> {
        let mut held = HashMap::new();
        for event in self.lock().iter().filter(|e| e.channel() == channel) {
            let count = held.entry(event.key()).or_insert(0);
            *count += if event.is_on() { 1 } else { -1 };
        }
        held.retain(|_, count| *count != 0);
        held
    }
}

impl EventSink for RecordingSink {
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        self.lock().push(SinkEvent::NoteOn { channel, key, velocity });
    }

    fn note_off(&mut self, channel: u8, key: u8, velocity: u8) {
        self.lock().push(SinkEvent::NoteOff { channel, key, velocity });
    }
}

/// Sink that only logs, for running without a synthesizer attached
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        log::info!("[SINK] note on  ch={} key={} vel={}", channel, key, velocity);
    }

    fn note_off(&mut self, channel: u8, key: u8, velocity: u8) {
        log::info!("[SINK] note off ch={} key={} vel={}", channel, key, velocity);
    }
}
