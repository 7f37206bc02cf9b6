//! Host-side song model.
//!
//! A [`Patch`] is the editable description of a song's DSP graph: a list
//! of instruments, each a chain of named units with byte-valued
//! parameters. Hosts hand it to [`crate::Interpreter::new`] and
//! [`crate::Interpreter::update`], which lower it onto the immutable
//! [`crate::BytePatch`] the dispatch loop executes.
//!
//! Parameter bytes encode fixed-point values in `[0, 2]` as `x / 128`;
//! several opcodes then read the result as signed via `v·2 - 1`. The
//! model is serde-serializable so hosts can persist songs however they
//! like — reading song files is their job, not this crate's.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One DSP unit in an instrument chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit type name from the opcode table (`"oscillator"`,
    /// `"envelope"`, `"delay"`, ...).
    pub kind: String,
    /// Stereo variant flag (bit 0 of the command byte).
    #[serde(default)]
    pub stereo: bool,
    /// Named parameters, raw bytes in `0..=128`.
    #[serde(default)]
    pub parameters: BTreeMap<String, u8>,
    /// Delay tap times in samples. Only read for `delay` units, which
    /// own one delay line per tap per channel.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delay_times: Vec<u16>,
}

impl Unit {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    /// Set a named parameter (builder style).
    pub fn with(mut self, name: &str, value: u8) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    /// Mark this unit stereo (builder style).
    pub fn stereo(mut self) -> Self {
        self.stereo = true;
        self
    }

    /// Set the delay tap times (builder style; `delay` units only).
    pub fn taps(mut self, times: &[u16]) -> Self {
        self.delay_times = times.to_vec();
        self
    }

    /// Channel count implied by the stereo flag.
    pub fn channels(&self) -> usize {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

/// An instrument: one unit program instantiated by `num_voices` voices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub num_voices: u32,
    pub units: Vec<Unit>,
}

impl Instrument {
    pub fn new(num_voices: u32, units: Vec<Unit>) -> Self {
        Self { num_voices, units }
    }
}

/// A whole song patch: the ordered list of instruments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub instruments: Vec<Instrument>,
}

impl Patch {
    pub fn from_instruments(instruments: Vec<Instrument>) -> Self {
        Self { instruments }
    }

    /// Total voice count across all instruments.
    pub fn num_voices(&self) -> usize {
        self.instruments
            .iter()
            .map(|i| i.num_voices as usize)
            .sum()
    }

    /// Total delay-line fan-out: every delay unit consumes one line per
    /// tap per channel from the interpreter's pool.
    pub fn num_delay_lines(&self) -> usize {
        self.instruments
            .iter()
            .flat_map(|i| &i.units)
            .filter(|u| u.kind == "delay")
            .map(|u| u.delay_times.len() * u.channels())
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_counting() {
        let patch = Patch::from_instruments(vec![
            Instrument::new(3, vec![]),
            Instrument::new(1, vec![]),
        ]);
        assert_eq!(patch.num_voices(), 4);
    }

    #[test]
    fn delay_line_counting() {
        let patch = Patch::from_instruments(vec![Instrument::new(
            1,
            vec![
                Unit::new("delay").taps(&[100, 200]),          // 2 lines
                Unit::new("delay").stereo().taps(&[300]),      // 2 lines
                Unit::new("oscillator").with("gain", 128),     // none
            ],
        )]);
        assert_eq!(patch.num_delay_lines(), 4);
    }

    #[test]
    fn builder_sets_fields() {
        let unit = Unit::new("filter")
            .stereo()
            .with("frequency", 32)
            .with("resonance", 64);
        assert_eq!(unit.kind, "filter");
        assert!(unit.stereo);
        assert_eq!(unit.channels(), 2);
        assert_eq!(unit.parameters["frequency"], 32);
        assert_eq!(unit.parameters["resonance"], 64);
    }
}
