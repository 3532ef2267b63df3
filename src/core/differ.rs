//! Voice diffing: turns two consecutive voicings into the MIDI edits that
//! take the synthesizer from one to the other.

use super::note::Note;

/// A single accompaniment edit for the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8, velocity: u8 },
}

impl Command {
    pub fn key(&self) -> u8 {
        match *self {
            Command::NoteOn { key, .. } | Command::NoteOff { key, .. } => key,
        }
    }
}

struct Commands {
    out: Vec<Command>,
    velocity: u8,
}

impl Commands {
    // key 0 is silence and never reaches the sink
    fn on(&mut self, key: u8) {
        if key != 0 {
            self.out.push(Command::NoteOn { key, velocity: self.velocity });
        }
    }

    fn off(&mut self, key: u8) {
        if key != 0 {
            self.out.push(Command::NoteOff { key, velocity: self.velocity });
        }
    }
}

/// Compute the ordered note-off / note-on sequence from `prev` to `next`.
///
/// An empty `prev` strikes everything in `next`. A change in the number of
/// voices releases all of `prev` before striking all of `next`. Otherwise each
/// voice is compared by index: a strike re-articulates the voice even on the
/// same key, a pitch change releases the old key first, and an unchanged
/// sustained voice produces nothing.
pub fn diff(prev: &[Note], next: &[Note], velocity: u8) -> Vec<Command> {
    let mut cmds = Commands { out: Vec::with_capacity(next.len() * 2), velocity };

    if prev.is_empty() {
        next.iter().for_each(|n| cmds.on(n.key));
    } else if prev.len() != next.len() {
        prev.iter().for_each(|p| cmds.off(p.key));
        next.iter().for_each(|n| cmds.on(n.key));
    } else {
        for (p, n) in prev.iter().zip(next) {
            if n.strike || n.key != p.key {
                cmds.off(p.key);
                cmds.on(n.key);
            }
        }
    }

    cmds.out
}
