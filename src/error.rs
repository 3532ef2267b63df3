use thiserror::Error;

/// Errors surfaced by the accompanist to its callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccompanistError {
    /// MIDI key outside 0..=127
    #[error("Invalid melody key {0}: expected 0..=127")]
    InvalidKey(u8),

    /// Velocity outside 1..=127
    #[error("Invalid melody velocity {0}: expected 1..=127")]
    InvalidVelocity(u8),

    /// Channel outside 0..=15
    #[error("Invalid MIDI channel {0}: expected 0..=15")]
    InvalidChannel(u8),

    /// The oracle failed fatally; a new accompanist has to be built
    #[error("Accompanist has failed and refuses further melody input")]
    Failed,

    /// The scheduler thread is gone
    #[error("Accompanist scheduler has stopped")]
    Stopped,

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type AccompanistResult<T> = Result<T, AccompanistError>;
