//! Real-time accompaniment for a live monophonic melody.
//!
//! While a melody note is held, an [`InferenceOracle`] is asked once per metric
//! tick for a set of accompanying voices, and the difference to the voices
//! already sounding is sent to an [`EventSink`] as MIDI note-on / note-off
//! events. When the melody stops, every accompaniment note is released at the
//! next quarter boundary.

pub mod config;
pub mod core;
pub mod error;
pub mod messaging;
pub mod testing;

pub use crate::config::AccompanistConfig;
pub use crate::core::accompanist::{AccompanistCore, CoreSnapshot, FailureCallback, TickOutcome};
pub use crate::core::clock::{Clock, ManualClock, SystemClock, TickClock, TickPosition};
pub use crate::core::differ::{diff, Command};
pub use crate::core::note::{MelodyState, Note, Voicing};
pub use crate::core::oracle::{
    InferenceModel, InferenceOracle, OracleError, RandomWalkModel, ThresholdOracle,
};
pub use crate::core::scheduler::{AccompanistHandle, TickScheduler};
pub use crate::core::sink::{EventSink, LoggingSink, RecordingSink, SinkEvent};
pub use crate::error::{AccompanistError, AccompanistResult};
