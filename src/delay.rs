//! Ring-buffer delay lines.
//!
//! Every line is a fixed 65536-sample ring addressed by the low 16 bits
//! of the global sample clock — reads and writes wrap on `u16`
//! arithmetic, never on a modulo of the musical time. Each line carries a
//! one-pole damping filter in its feedback path, and the line that
//! finishes a delay unit's tap loop also runs a DC blocker over the wet
//! output (feedback networks accumulate offset otherwise).
//!
//! A single `delay` unit owns one or more consecutive lines from the
//! interpreter's pool; stereo delay units own a separate run per channel.

/// Length of every delay ring, in samples.
pub const RING_LEN: usize = 65536;

/// One delay line: ring storage plus damping and DC-blocker state.
#[derive(Clone)]
pub struct DelayLine {
    /// Ring storage, indexed by `global_time as u16`.
    pub buffer: [f32; RING_LEN],
    /// One-pole damping filter memory (feedback path).
    pub damp_state: f32,
    /// Previous wet output (DC-blocker input memory).
    pub dc_in: f32,
    /// DC-blocker output memory.
    pub dc_filt_state: f32,
}

impl Default for DelayLine {
    fn default() -> Self {
        Self {
            buffer: [0.0; RING_LEN],
            damp_state: 0.0,
            dc_in: 0.0,
            dc_filt_state: 0.0,
        }
    }
}

impl DelayLine {
    /// Run one tap at ring position `t`: read the sample written `delay`
    /// samples ago, advance the damping filter over it, and write
    /// `feedback·damped + input` as the next ring sample. Returns the
    /// delayed sample.
    ///
    /// `delay` is rounded to the nearest sample; the float→u16 cast
    /// saturates, so a modulated time beyond the ring reads the oldest
    /// slot instead of faulting.
    #[inline]
    pub fn step(&mut self, t: u16, delay: f32, damp: f32, feedback: f32, input: f32) -> f32 {
        let delayed = self.buffer[t.wrapping_sub((delay + 0.5) as u16) as usize];
        self.damp_state = damp * self.damp_state + (1.0 - damp) * delayed;
        self.buffer[t as usize] = feedback * self.damp_state + input;
        delayed
    }

    /// One-pole DC blocker over the unit's wet output (pole 0.99609375).
    #[inline]
    pub fn dc_block(&mut self, output: f32) -> f32 {
        self.dc_filt_state = output + (0.99609375 * self.dc_filt_state - self.dc_in);
        self.dc_in = output;
        self.dc_filt_state
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
