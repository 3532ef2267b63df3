//! The harmonization source seen by the core.
//!
//! [`InferenceOracle`] is what the tick loop calls once per tick. Raw networks
//! that emit float tensors plug in through [`InferenceModel`] and are adapted by
//! [`ThresholdOracle`], which turns key values and strike probabilities into
//! [`Note`]s.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::note::{Note, Voicing, MAX_KEY};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    /// This tick's inference failed; the next attempt may succeed
    #[error("Transient inference failure: {0}")]
    Transient(String),

    /// The oracle can no longer serve
    #[error("Fatal inference failure: {0}")]
    Fatal(String),

    /// The model produced an output tensor of the wrong size
    #[error("Model output has {got} values, expected {expected}")]
    WidthMismatch { expected: usize, got: usize },
}

impl OracleError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, OracleError::Transient(_))
    }
}

/// Stateful harmonizer: every call to `next` is one tick of music.
pub trait InferenceOracle: Send {
    /// Advance one tick given the current melody note and return the
    /// accompanying voices for it.
    fn next(&mut self, melody: Note) -> Result<Voicing, OracleError>;

    /// Release inference resources
    fn close(&mut self) {}
}

impl<O: InferenceOracle + ?Sized> InferenceOracle for Box<O> {
    fn next(&mut self, melody: Note) -> Result<Voicing, OracleError> {
        (**self).next(melody)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// A raw recurrent model.
///
/// Input is `[melody_key, strike]` with strike encoded as 0.0 / 1.0. Output is
/// one key value per accompanying voice followed by one strike probability per
/// voice. The model carries its recurrent state from one call to the next.
pub trait InferenceModel: Send {
    fn run(&mut self, input: [f32; 2]) -> Result<Vec<f32>, OracleError>;

    fn close(&mut self) {}
}

/// Adapts an [`InferenceModel`] to the oracle interface by thresholding its
/// strike probabilities.
pub struct ThresholdOracle<M> {
    model: M,
    voices: usize,
    strike_threshold: f32,
}

impl<M: InferenceModel> ThresholdOracle<M> {
    pub fn new(model: M, voices: usize, strike_threshold: f32) -> Self {
        Self { model, voices, strike_threshold }
    }
}

impl<M: InferenceModel> InferenceOracle for ThresholdOracle<M> {
    fn next(&mut self, melody: Note) -> Result<Voicing, OracleError> {
        let input = [f32::from(melody.key), if melody.strike { 1.0 } else { 0.0 }];
        let raw = self.model.run(input)?;
        let voicing = decode_output(&raw, self.voices, self.strike_threshold)?;
        log::debug!("[ORACLE] melody {:?} -> {:?}", melody, voicing);
        Ok(voicing)
    }

    fn close(&mut self) {
        log::info!("[ORACLE] closing model");
        self.model.close();
    }
}

/// Decode `[keys..., strike probabilities...]` into a voicing.
pub fn decode_output(raw: &[f32], voices: usize, strike_threshold: f32) -> Result<Voicing, OracleError> {
    if raw.len() != voices * 2 {
        return Err(OracleError::WidthMismatch { expected: voices * 2, got: raw.len() });
    }
    let (keys, strikes) = raw.split_at(voices);
    Ok(keys
        .iter()
        .zip(strikes)
        .map(|(&key, &strike)| Note::new(key_from_value(key), strike > strike_threshold))
        .collect())
}

fn key_from_value(value: f32) -> u8 {
    if value.is_finite() {
        value.round().clamp(0.0, f32::from(MAX_KEY)) as u8
    } else {
        0
    }
}

// Thirds through octaves below the melody
const INTERVALS: [i32; 6] = [3, 4, 5, 7, 8, 9];
const DRIFT_PROBABILITY: f64 = 0.25;

/// Seeded stand-in for a trained network: stacks random consonant intervals
/// under each new melody note and lets single voices drift while it sustains.
pub struct RandomWalkModel {
    voices: usize,
    rng: StdRng,
    keys: Vec<i32>,
    closed: bool,
}

impl RandomWalkModel {
    pub fn new(voices: usize, seed: u64) -> Self {
        Self {
            voices,
            rng: StdRng::seed_from_u64(seed),
            keys: Vec::new(),
            closed: false,
        }
    }

    fn revoice(&mut self, melody: i32) {
        let mut below = melody;
        self.keys.clear();
        for _ in 0..self.voices {
            below -= INTERVALS[self.rng.random_range(0..INTERVALS.len())];
            self.keys.push(below.max(0));
        }
    }
}

impl InferenceModel for RandomWalkModel {
    fn run(&mut self, input: [f32; 2]) -> Result<Vec<f32>, OracleError> {
        if self.closed {
            return Err(OracleError::Fatal("model is closed".to_string()));
        }

        let melody = input[0].round() as i32;
        let struck = input[1] > 0.5;
        let mut output = vec![0.0; self.voices * 2];
        if melody <= 0 {
            self.keys.clear();
            return Ok(output);
        }

        if struck || self.keys.len() != self.voices {
            self.revoice(melody);
            output[self.voices..].fill(1.0);
        } else if self.voices > 0 && self.rng.random_bool(DRIFT_PROBABILITY) {
            let voice = self.rng.random_range(0..self.voices);
            let step = if self.rng.random_bool(0.5) { 2 } else { -2 };
            self.keys[voice] = (self.keys[voice] + step).clamp(0, melody - 1);
            output[self.voices + voice] = 0.9;
        }

        for (slot, key) in output.iter_mut().zip(&self.keys) {
            *slot = *key as f32;
        }
        Ok(output)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
