//! Ready-made demo patches.
//!
//! Small, complete songs' worth of DSP: a polyphonic lead, a noise hat,
//! and a delayed pad. They double as integration-test and benchmark
//! material — every one compiles within the static limits and keeps its
//! voice programs stack-balanced.

use crate::bytecode::{FILTER_HIGHPASS, OSC_SINE, OSC_TRISAW};
use crate::patch::{Instrument, Patch, Unit};

/// Three-voice detuned trisaw lead: envelope × oscillator into the
/// stereo master.
pub fn lead() -> Patch {
    Patch::from_instruments(vec![Instrument::new(
        3,
        vec![
            Unit::new("envelope")
                .stereo()
                .with("attack", 32)
                .with("decay", 64)
                .with("sustain", 64)
                .with("release", 64)
                .with("gain", 128),
            Unit::new("oscillator")
                .stereo()
                .with("transpose", 64)
                .with("detune", 68)
                .with("phase", 0)
                .with("color", 64)
                .with("shape", 64)
                .with("gain", 96)
                .with("flags", OSC_TRISAW | 1), // one extra unison partial
            Unit::new("mulp").stereo(),
            Unit::new("out").stereo().with("gain", 96),
        ],
    )])
}

/// Percussive noise hat: enveloped noise through a highpass, panned to
/// center.
pub fn noise_hat() -> Patch {
    Patch::from_instruments(vec![Instrument::new(
        1,
        vec![
            Unit::new("envelope")
                .with("attack", 0)
                .with("decay", 40)
                .with("sustain", 0)
                .with("release", 16)
                .with("gain", 128),
            Unit::new("noise").with("shape", 64).with("gain", 96),
            Unit::new("mulp"),
            Unit::new("filter")
                .with("frequency", 96)
                .with("resonance", 64)
                .with("flags", FILTER_HIGHPASS),
            Unit::new("pan").with("panning", 64),
            Unit::new("out").stereo().with("gain", 128),
        ],
    )])
}

/// Slow sine pad through a damped stereo echo.
pub fn echo_pad() -> Patch {
    Patch::from_instruments(vec![Instrument::new(
        1,
        vec![
            Unit::new("envelope")
                .stereo()
                .with("attack", 48)
                .with("decay", 80)
                .with("sustain", 48)
                .with("release", 80)
                .with("gain", 96),
            Unit::new("oscillator")
                .stereo()
                .with("transpose", 64)
                .with("detune", 66)
                .with("phase", 0)
                .with("color", 128)
                .with("shape", 64)
                .with("gain", 96)
                .with("flags", OSC_SINE),
            Unit::new("mulp").stereo(),
            Unit::new("delay")
                .stereo()
                .with("pregain", 64)
                .with("dry", 96)
                .with("feedback", 96)
                .with("damp", 32)
                .taps(&[13230, 9261]),
            Unit::new("out").stereo().with("gain", 128),
        ],
    )])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interpreter;

    fn peak_after(patch: &Patch, voices: usize, frames: usize) -> f32 {
        let mut interp = Interpreter::new(patch).unwrap();
        for v in 0..voices {
            interp.trigger(v, 52 + 12 * v as u8);
        }
        let mut buffer = vec![0.0f32; frames * 2];
        let mut sync = vec![0.0f32; frames / 256 + 2];
        let stats = interp.render(&mut buffer, &mut sync, frames as i64).unwrap();
        assert_eq!(stats.samples, frames, "preset should render to completion");
        buffer.iter().fold(0.0f32, |a, &b| a.max(b.abs()))
    }

    #[test]
    fn lead_renders_audio() {
        let peak = peak_after(&lead(), 3, 4096);
        assert!(peak > 0.01, "lead should be audible, peak {peak}");
        assert!(peak < 8.0, "lead should not blow up, peak {peak}");
    }

    #[test]
    fn noise_hat_renders_audio() {
        let peak = peak_after(&noise_hat(), 1, 2048);
        assert!(peak > 0.01, "hat should be audible, peak {peak}");
    }

    #[test]
    fn echo_pad_renders_audio() {
        let peak = peak_after(&echo_pad(), 1, 8192);
        assert!(peak > 0.01, "pad should be audible, peak {peak}");
        assert!(peak < 8.0, "feedback should stay stable, peak {peak}");
    }

    #[test]
    fn echo_pad_allocates_four_delay_lines() {
        assert_eq!(echo_pad().num_delay_lines(), 4);
    }
}
