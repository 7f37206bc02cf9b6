//! SynthKernel — compile song patch definitions into a real-time
//! stack-machine audio kernel.
//!
//! A song is a hierarchy of instruments, each a short bytecode program of
//! DSP units (oscillators, filters, envelopes, delays, mixers, routers).
//! The [`interp::Interpreter`] executes the compiled bytecode once per
//! output sample per voice, pushing and popping signals on a software
//! stack, and emits a stereo stream. A `speed` unit lets programs advance
//! the musical clock by a variable number of samples per audio sample, so
//! songs can express tempo changes and pitch-sync effects.
//!
//! # Modules
//!
//! - [`patch`] — host-side song model (instruments, units, parameters)
//! - [`bytecode`] — opcode table, compiled [`bytecode::BytePatch`], encoder/decoder
//! - [`dsp`] — pure waveshaping and parameter-mapping helpers
//! - [`synth`] — per-unit, per-voice, and global synthesizer state
//! - [`delay`] — ring-buffer delay lines with damping and DC blocking
//! - [`interp`] — the interpreter: Trigger / Release / Update / Render
//! - [`wav`] — WAV file output for offline auditioning and tests
//! - [`presets`] — ready-made demo patches
//!
//! # Quick start
//!
//! ```rust
//! use synthkernel::{Instrument, Interpreter, Patch, Unit};
//!
//! // One instrument, one voice: push a constant, mix it to the left channel.
//! let patch = Patch::from_instruments(vec![Instrument::new(
//!     1,
//!     vec![
//!         Unit::new("loadval").with("value", 96), // 96/128 * 2 - 1 = 0.5
//!         Unit::new("out").with("gain", 128),
//!     ],
//! )]);
//!
//! let mut interp = Interpreter::new(&patch).unwrap();
//! interp.trigger(0, 64);
//!
//! let mut buffer = [0.0f32; 8];
//! let mut sync = [0.0f32; 4];
//! let stats = interp.render(&mut buffer, &mut sync, 4).unwrap();
//! assert_eq!(stats.samples, 4);
//! assert_eq!(buffer, [0.5, 0.0, 0.5, 0.0, 0.5, 0.0, 0.5, 0.0]);
//! ```

pub mod bytecode;
pub mod delay;
pub mod dsp;
pub mod interp;
pub mod patch;
pub mod presets;
pub mod synth;
pub mod wav;

/// Maximum number of concurrent voices a patch may use.
pub const MAX_VOICES: usize = 32;

/// Maximum number of units in one instrument program.
pub const MAX_UNITS: usize = 63;

/// Maximum length of the compiled command stream, in bytes.
pub const MAX_COMMANDS: usize = 2048;

/// Maximum length of the compiled value stream, in bytes.
pub const MAX_VALUES: usize = 16384;

pub use bytecode::{encode, BytePatch, EncodeError, Opcode};
pub use interp::{Interpreter, RenderError, RenderFault, RenderStats};
pub use patch::{Instrument, Patch, Unit};
