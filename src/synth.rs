//! Per-unit, per-voice, and global synthesizer state.
//!
//! Every unit in a voice's program owns eight floats of private state
//! (oscillator phases, filter memories, envelope level...) and eight
//! modulation input ports. Ports are one-shot additive accumulators:
//! `send` units add into them, and the owning unit reads and clears them
//! the next time it runs. Global state — the output bus, the noise seed,
//! and the sample clock — lives in [`Synth`], owned by exactly one
//! interpreter instance, never in module globals.

use crate::{MAX_UNITS, MAX_VOICES};

/// One unit's runtime state: eight state slots and eight modulation ports.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnitState {
    /// Private per-unit memory. Meaning depends on the opcode (phase
    /// accumulators, filter state, envelope stage and level, ...).
    pub state: [f32; 8],
    /// Modulation inputs, indexed like the unit's transformable
    /// parameters. Cleared on read.
    pub ports: [f32; 8],
}

/// A running instance of an instrument: the note it plays, its release
/// flag, and state for up to [`MAX_UNITS`] units.
#[derive(Debug, Clone, Copy)]
pub struct Voice {
    pub note: u8,
    pub release: bool,
    pub units: [UnitState; MAX_UNITS],
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            note: 0,
            release: false,
            units: [UnitState::default(); MAX_UNITS],
        }
    }
}

impl Voice {
    /// Reset to a freshly-triggered state playing `note`: release flag
    /// down, every unit state and port zeroed.
    pub fn trigger(&mut self, note: u8) {
        *self = Voice::default();
        self.note = note;
    }

    /// Zero all unit state but keep the note and release flag. Used when
    /// a patch update moves opcodes and old phase/filter memory would be
    /// reinterpreted by the wrong units.
    pub fn reset_units(&mut self) {
        self.units = [UnitState::default(); MAX_UNITS];
    }
}

/// Global synthesizer state shared by every voice within a sample.
#[derive(Debug, Clone)]
pub struct Synth {
    /// Output bus. Channels 0 and 1 are the stereo master, drained into
    /// the output buffer and cleared after every sample; channels 2..7
    /// are aux sends that persist until an `in` unit reads them.
    pub outputs: [f32; 8],
    /// Noise generator seed. Starts at 1 and never reaches zero (the
    /// multiplier 16007 is odd, so it is a unit modulo 2^32).
    pub rand_seed: u32,
    /// Global sample clock, wrapping modulo 2^32. The low 16 bits index
    /// the delay rings; the low 8 bits gate sync records.
    pub global_time: u32,
    pub voices: [Voice; MAX_VOICES],
}

impl Default for Synth {
    fn default() -> Self {
        Self {
            outputs: [0.0; 8],
            rand_seed: 1,
            global_time: 0,
            voices: [Voice::default(); MAX_VOICES],
        }
    }
}

impl Synth {
    /// Linear congruential noise source: `seed *= 16007`, output
    /// `int32(seed) / -2^31` in `(-1, 1]`.
    #[inline]
    pub fn rand(&mut self) -> f32 {
        self.rand_seed = self.rand_seed.wrapping_mul(16007);
        self.rand_seed as i32 as f32 / -2147483648.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_matches_reference_sequence() {
        // Reference recomputed from the recurrence seed *= 16007,
        // output = int32(seed) / -2^31, starting from seed 1.
        let mut synth = Synth::default();
        let mut seed: u32 = 1;
        for step in 0..16 {
            seed = seed.wrapping_mul(16007);
            let expected = seed as i32 as f32 / -2147483648.0;
            let got = synth.rand();
            assert_eq!(got, expected, "rand() diverged at step {step}");
        }
    }

    #[test]
    fn rand_first_output_sign_and_magnitude() {
        // First step: seed = 16007, a small positive int32, so the output
        // is a tiny negative number.
        let mut synth = Synth::default();
        let v = synth.rand();
        assert!(v < 0.0 && v > -1e-4, "expected tiny negative, got {v}");
    }

    #[test]
    fn rand_seed_never_zero() {
        let mut synth = Synth::default();
        for _ in 0..10_000 {
            synth.rand();
            assert_ne!(synth.rand_seed, 0);
        }
    }

    #[test]
    fn rand_stays_in_range() {
        let mut synth = Synth::default();
        for _ in 0..10_000 {
            let v = synth.rand();
            assert!((-1.0..=1.0).contains(&v), "out of range: {v}");
        }
    }

    #[test]
    fn trigger_resets_voice() {
        let mut voice = Voice::default();
        voice.release = true;
        voice.units[3].state[1] = 0.5;
        voice.units[3].ports[0] = 0.25;
        voice.trigger(64);
        assert_eq!(voice.note, 64);
        assert!(!voice.release);
        assert_eq!(voice.units[3], UnitState::default());
    }

    #[test]
    fn reset_units_keeps_note_and_release() {
        let mut voice = Voice::default();
        voice.trigger(72);
        voice.release = true;
        voice.units[0].state[0] = 1.0;
        voice.reset_units();
        assert_eq!(voice.note, 72);
        assert!(voice.release);
        assert_eq!(voice.units[0], UnitState::default());
    }
}
