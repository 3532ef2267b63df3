use crate::error::{AccompanistError, AccompanistResult};

/// Highest valid MIDI key number
pub const MAX_KEY: u8 = 127;
/// Highest valid MIDI channel
pub const MAX_CHANNEL: u8 = 15;

/// A single note as exchanged with the oracle.
///
/// `key == 0` stands for silence. `strike` tells whether this tick attacks the
/// key or sustains the pitch that was already sounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Note {
    pub key: u8,
    pub strike: bool,
}

impl Note {
    pub const SILENCE: Note = Note { key: 0, strike: false };

    pub fn new(key: u8, strike: bool) -> Self {
        Self { key, strike }
    }

    pub fn struck(key: u8) -> Self {
        Self { key, strike: true }
    }

    pub fn held(key: u8) -> Self {
        Self { key, strike: false }
    }

    pub fn is_silent(&self) -> bool {
        self.key == 0
    }

    /// Same pitch, strike bit cleared
    pub fn sustained(self) -> Self {
        Self { strike: false, ..self }
    }
}

/// Ordered accompanying voices for one tick; index i is voice line i.
pub type Voicing = Vec<Note>;

/// What the melody is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MelodyState {
    #[default]
    Silent,
    Sounding {
        key: u8,
        /// Set by a note-on, cleared once a tick has consumed it
        fresh: bool,
        velocity: u8,
    },
}

impl MelodyState {
    pub fn is_sounding(&self) -> bool {
        matches!(self, MelodyState::Sounding { .. })
    }

    /// The oracle-facing view of the melody; silence maps to key 0.
    pub fn as_note(&self) -> Note {
        match *self {
            MelodyState::Silent => Note::SILENCE,
            MelodyState::Sounding { key, fresh, .. } => Note::new(key, fresh),
        }
    }

    pub fn consume_strike(&mut self) {
        if let MelodyState::Sounding { fresh, .. } = self {
            *fresh = false;
        }
    }
}

/// Validate a melody event at the inbound boundary.
pub fn validate_event(channel: u8, key: u8, velocity: u8) -> AccompanistResult<()> {
    if channel > MAX_CHANNEL {
        return Err(AccompanistError::InvalidChannel(channel));
    }
    if key > MAX_KEY {
        return Err(AccompanistError::InvalidKey(key));
    }
    if velocity == 0 || velocity > MAX_KEY {
        return Err(AccompanistError::InvalidVelocity(velocity));
    }
    Ok(())
}
