//! WAV output for offline auditioning and tests.
//!
//! Uses `hound` to write rendered stereo audio to disk so patches can be
//! auditioned without wiring the interpreter into a live audio host.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

use crate::interp::{Interpreter, RenderFault};

/// Nominal output sample rate of the kernel, in Hz. The oscillator pitch
/// constants assume it.
pub const SAMPLE_RATE: u32 = 44_100;

/// WAV output spec: 44.1 kHz, 32-bit float, stereo.
fn wav_spec() -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Render `frames` stereo frames into a fresh interleaved buffer.
///
/// The musical clock is left effectively unbounded so the buffer fills
/// completely even under `speed` modulation, and the sync buffer gets
/// slack for patches with several sync units.
pub fn render_frames(
    interp: &mut Interpreter,
    frames: usize,
) -> Result<Vec<f32>, RenderFault> {
    let mut buffer = vec![0.0f32; frames * 2];
    let mut sync = vec![0.0f32; (frames / 256 + 1) * 8];
    interp.render(&mut buffer, &mut sync, i64::MAX / 2)?;
    Ok(buffer)
}

/// Render `frames` stereo frames from `interp` and write them to `path`.
pub fn render_to_wav(
    interp: &mut Interpreter,
    frames: usize,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let samples = render_frames(interp, frames)?;
    write_wav(&samples, path)
}

/// Write interleaved stereo f32 samples to a WAV file.
pub fn write_wav(samples: &[f32], path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = WavWriter::create(path, wav_spec())?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
