//! The bytecode interpreter.
//!
//! [`Interpreter`] owns the compiled program, the signal stack, the
//! global [`Synth`] state, and the delay-line pool, and exposes the
//! narrow host interface: [`trigger`](Interpreter::trigger),
//! [`release`](Interpreter::release), [`update`](Interpreter::update),
//! [`render`](Interpreter::render).
//!
//! Rendering executes one command per unit per voice per output sample.
//! Within a sample, voices run in order; within a voice, units run in
//! program order, pushing and popping `f32` signals on a software stack.
//! The stack starts every render with four scratch zeros (two stereo
//! pairs below the programs' working area) and must hold exactly those
//! four values again after every completed sample — anything else is a
//! desynchronized program and aborts the render.
//!
//! Stereo convention: when a command's stereo bit is set, the right
//! channel sits deeper on the stack and the left channel on top.
//!
//! Faults never unwind across the audio boundary. Every stack access,
//! stream read, and patch-derived index is validated, and a failure
//! returns a [`RenderError`] together with the progress made so far.

use crate::bytecode::{
    self, BytePatch, EncodeError, Opcode, FILTER_BANDPASS, FILTER_HIGHPASS, FILTER_LOWPASS,
    FILTER_NEG_BANDPASS, FILTER_NEG_HIGHPASS, OSC_GATE, OSC_LFO, OSC_PULSE, OSC_SINE,
    OSC_TRISAW, OSC_UNISON_MASK,
};
use crate::delay::DelayLine;
use crate::dsp::{clip, crush, non_linear_map, waveshape};
use crate::patch::Patch;
use crate::synth::Synth;
use crate::{MAX_UNITS, MAX_VOICES};
use thiserror::Error;

/// Envelope stage markers kept in `state[0]` of an envelope unit. Stage 2
/// (sustain) is implicit: decay clamps to the sustain level and holds.
const ENV_ATTACK: f32 = 0.0;
const ENV_DECAY: f32 = 1.0;
const ENV_RELEASE: f32 = 3.0;

/// Errors that abort a render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The command and value streams lost sync.
    #[error("value stream ended prematurely")]
    ValueStreamEnded,
    /// A program popped below the scratch floor, or left a sample with
    /// fewer than the four scratch values.
    #[error("stack underflow")]
    StackUnderflow,
    /// A program leaked signals: more than the four scratch values
    /// remained after a sample.
    #[error("stack not empty")]
    StackNotEmpty,
    /// A command byte decoded to an opcode outside the table.
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    /// A validated runtime fault: bad routing address, exhausted delay
    /// pool or sync buffer, or similar patch-driven indexing failure.
    #[error("render fault: {0}")]
    Fault(&'static str),
}

/// Progress counters for a completed or aborted render call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Stereo frames written to the output buffer.
    pub samples: usize,
    /// Sync records written for elapsed 256-sample windows.
    pub syncs: usize,
    /// How far the musical clock advanced. `speed` modulation can push
    /// this past `max_time` (or, briefly, backward).
    pub time: i64,
}

/// A render abort: the error plus whatever completed before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{error} (after {} samples, time {})", .stats.samples, .stats.time)]
pub struct RenderFault {
    pub stats: RenderStats,
    pub error: RenderError,
}

/// The stack-machine synthesizer.
pub struct Interpreter {
    byte_patch: BytePatch,
    stack: Vec<f32>,
    synth: Synth,
    delay_lines: Vec<DelayLine>,
}

impl Interpreter {
    /// Compile `patch` and build a fresh interpreter: zeroed voices and
    /// delay lines, noise seed 1.
    pub fn new(patch: &Patch) -> Result<Self, EncodeError> {
        let byte_patch = bytecode::encode(patch)?;
        Ok(Self {
            byte_patch,
            stack: Vec::with_capacity(64),
            synth: Synth::default(),
            delay_lines: vec![DelayLine::default(); patch.num_delay_lines()],
        })
    }

    /// The installed compiled program.
    pub fn byte_patch(&self) -> &BytePatch {
        &self.byte_patch
    }

    /// Start `voice` playing `note`: the voice's unit states and ports
    /// are zeroed and its release flag cleared. An out-of-range index is
    /// ignored — triggering never fails.
    pub fn trigger(&mut self, voice: usize, note: u8) {
        if let Some(v) = self.synth.voices.get_mut(voice) {
            v.trigger(note);
        }
    }

    /// Raise `voice`'s release flag. Idempotent; out-of-range ignored.
    pub fn release(&mut self, voice: usize) {
        if let Some(v) = self.synth.voices.get_mut(voice) {
            v.release = true;
        }
    }

    /// Recompile `patch` and swap it in.
    ///
    /// If the command stream changed (length or content), every voice's
    /// unit state is cleared — opcodes have moved, so old phase and
    /// filter memory would be reinterpreted by the wrong units. Notes and
    /// release flags always survive. The delay-line pool grows as needed
    /// but never shrinks; new lines start silent.
    ///
    /// On error the previously installed program stays in place.
    pub fn update(&mut self, patch: &Patch) -> Result<(), EncodeError> {
        let byte_patch = bytecode::encode(patch)?;
        let needs_refresh = byte_patch.commands != self.byte_patch.commands;
        self.byte_patch = byte_patch;
        while self.delay_lines.len() < patch.num_delay_lines() {
            self.delay_lines.push(DelayLine::default());
        }
        if needs_refresh {
            for voice in self.synth.voices.iter_mut() {
                voice.reset_units();
            }
        }
        Ok(())
    }

    /// Render stereo frames into `buffer` (interleaved left/right) until
    /// the musical clock reaches `max_time` or fewer than two floats
    /// remain, whichever comes first. Every 256th sample of the global
    /// clock appends a `time` record (and one value per `sync` unit) to
    /// `sync_buf`.
    ///
    /// On a fault the frames completed so far are valid and returned in
    /// the [`RenderFault`]; the instance should then be considered
    /// poisoned and be rebuilt or updated before reuse.
    pub fn render(
        &mut self,
        buffer: &mut [f32],
        sync_buf: &mut [f32],
        max_time: i64,
    ) -> Result<RenderStats, RenderFault> {
        let mut stats = RenderStats::default();
        let mut stack = std::mem::take(&mut self.stack);
        stack.clear();
        stack.extend_from_slice(&[0.0; 4]);
        let result = self.run(&mut stack, buffer, sync_buf, max_time, &mut stats);
        stack.clear();
        self.stack = stack;
        match result {
            Ok(()) => Ok(stats),
            Err(error) => Err(RenderFault { stats, error }),
        }
    }

    /// The dispatch loop. Kept as one function so the hot path is a
    /// single match over the opcode with no per-sample allocation.
    fn run(
        &mut self,
        stack: &mut Vec<f32>,
        buffer: &mut [f32],
        sync_buf: &mut [f32],
        max_time: i64,
        stats: &mut RenderStats,
    ) -> Result<(), RenderError> {
        let mut params = [0.0f32; 8];
        let mut out_pos = 0usize;
        let mut sync_pos = 0usize;

        while stats.time < max_time && out_pos + 1 < buffer.len() {
            // Cursor state for one sample: command/value positions, the
            // saved instrument start for polyphonic replay, and the
            // voice/unit/delay-line walk.
            let mut cmd = 0usize;
            let mut val = 0usize;
            let mut instr_cmd = 0usize;
            let mut instr_val = 0usize;
            let mut voice_idx = 0usize;
            let mut unit_idx = 0usize;
            let mut line_cursor = 0usize;
            let mut voices_remaining = self.byte_patch.num_voices;

            if self.synth.global_time as u8 == 0 {
                // Start of a 256-sample window: record the musical time.
                let slot = sync_pos;
                *sync_buf
                    .get_mut(slot)
                    .ok_or(RenderError::Fault("sync buffer exhausted"))? = stats.time as f32;
                sync_pos += 1;
                stats.syncs += 1;
            }

            while voices_remaining > 0 {
                let command = *self
                    .byte_patch
                    .commands
                    .get(cmd)
                    .ok_or(RenderError::Fault("command stream exhausted"))?;
                cmd += 1;
                let stereo = command & 1 == 1;
                let channels = (command & 1) as usize + 1;

                let op = Opcode::from_u8(command >> 1)
                    .ok_or(RenderError::InvalidOpcode(command))?;

                if op == Opcode::Advance {
                    voice_idx += 1;
                    unit_idx = 0;
                    voices_remaining -= 1;
                    if voices_remaining == 0 {
                        break;
                    }
                    if voice_idx >= MAX_VOICES {
                        return Err(RenderError::Fault("voice index out of range"));
                    }
                    // Most-significant-first: the bit for the next voice is
                    // 1 << voices_remaining after the decrement. Set means
                    // replay the current instrument program.
                    if self.byte_patch.polyphony_bitmask & (1 << voices_remaining) != 0 {
                        cmd = instr_cmd;
                        val = instr_val;
                    } else {
                        instr_cmd = cmd;
                        instr_val = val;
                    }
                    continue;
                }

                if unit_idx >= MAX_UNITS {
                    return Err(RenderError::Fault("unit index out of range"));
                }

                // Transform phase: materialize parameters as value/128
                // plus any port modulation, clearing the ports read.
                let tcount = op.transform_count();
                let transform_start = val;
                if self.byte_patch.values.len() < val + tcount {
                    return Err(RenderError::ValueStreamEnded);
                }
                {
                    let unit = &mut self.synth.voices[voice_idx].units[unit_idx];
                    for (i, p) in params.iter_mut().take(tcount).enumerate() {
                        *p = self.byte_patch.values[val] as f32 / 128.0 + unit.ports[i];
                        unit.ports[i] = 0.0;
                        val += 1;
                    }
                }

                match op {
                    Opcode::Advance => unreachable!("handled above"),

                    // -- stack primitives ---------------------------------
                    Opcode::Add => {
                        if stereo {
                            let v = peek(stack, 2)?;
                            *peek_mut(stack, 0)? += v;
                            let v = peek(stack, 3)?;
                            *peek_mut(stack, 1)? += v;
                        } else {
                            let v = peek(stack, 1)?;
                            *peek_mut(stack, 0)? += v;
                        }
                    }
                    Opcode::Addp => {
                        if stereo {
                            let left = pop(stack)?;
                            let right = pop(stack)?;
                            *peek_mut(stack, 0)? += left;
                            *peek_mut(stack, 1)? += right;
                        } else {
                            let top = pop(stack)?;
                            *peek_mut(stack, 0)? += top;
                        }
                    }
                    Opcode::Mul => {
                        if stereo {
                            let v = peek(stack, 2)?;
                            *peek_mut(stack, 0)? *= v;
                            let v = peek(stack, 3)?;
                            *peek_mut(stack, 1)? *= v;
                        } else {
                            let v = peek(stack, 1)?;
                            *peek_mut(stack, 0)? *= v;
                        }
                    }
                    Opcode::Mulp => {
                        if stereo {
                            let left = pop(stack)?;
                            let right = pop(stack)?;
                            *peek_mut(stack, 0)? *= left;
                            *peek_mut(stack, 1)? *= right;
                        } else {
                            let top = pop(stack)?;
                            *peek_mut(stack, 0)? *= top;
                        }
                    }
                    Opcode::Xch => {
                        let l = stack.len();
                        if stereo {
                            if l < 4 {
                                return Err(RenderError::StackUnderflow);
                            }
                            stack.swap(l - 1, l - 3);
                            stack.swap(l - 2, l - 4);
                        } else {
                            if l < 2 {
                                return Err(RenderError::StackUnderflow);
                            }
                            stack.swap(l - 1, l - 2);
                        }
                    }
                    Opcode::Push => {
                        if stereo {
                            let right = peek(stack, 1)?;
                            let left = peek(stack, 0)?;
                            stack.push(right);
                            stack.push(left);
                        } else {
                            let top = peek(stack, 0)?;
                            stack.push(top);
                        }
                    }
                    Opcode::Pop => {
                        for _ in 0..channels {
                            pop(stack)?;
                        }
                    }

                    // -- sources ------------------------------------------
                    Opcode::Loadval => {
                        let v = params[0] * 2.0 - 1.0;
                        for _ in 0..channels {
                            stack.push(v);
                        }
                    }
                    Opcode::Loadnote => {
                        let v = self.synth.voices[voice_idx].note as f32 / 64.0 - 1.0;
                        for _ in 0..channels {
                            stack.push(v);
                        }
                    }
                    Opcode::Noise => {
                        // Stereo noise draws two independent samples; the
                        // right channel draws first.
                        if stereo {
                            let v = waveshape(self.synth.rand(), params[0]) * params[1];
                            stack.push(v);
                        }
                        let v = waveshape(self.synth.rand(), params[0]) * params[1];
                        stack.push(v);
                    }
                    Opcode::Receive => {
                        let unit = &mut self.synth.voices[voice_idx].units[unit_idx];
                        if stereo {
                            stack.push(unit.ports[1]);
                            unit.ports[1] = 0.0;
                        }
                        stack.push(unit.ports[0]);
                        unit.ports[0] = 0.0;
                    }
                    Opcode::In => {
                        let channel =
                            next_value(&self.byte_patch.values, &mut val)? as usize;
                        if channel + channels > self.synth.outputs.len() {
                            return Err(RenderError::Fault("in channel out of range"));
                        }
                        if stereo {
                            stack.push(self.synth.outputs[channel + 1]);
                            self.synth.outputs[channel + 1] = 0.0;
                        }
                        stack.push(self.synth.outputs[channel]);
                        self.synth.outputs[channel] = 0.0;
                    }

                    // -- sinks --------------------------------------------
                    Opcode::Out => {
                        let gain = params[0];
                        if stereo {
                            let left = pop(stack)?;
                            let right = pop(stack)?;
                            self.synth.outputs[0] += gain * left;
                            self.synth.outputs[1] += gain * right;
                        } else {
                            let v = pop(stack)?;
                            self.synth.outputs[0] += gain * v;
                        }
                    }
                    Opcode::Outaux => {
                        if stereo {
                            let left = pop(stack)?;
                            let right = pop(stack)?;
                            self.synth.outputs[0] += params[0] * left;
                            self.synth.outputs[1] += params[0] * right;
                            self.synth.outputs[2] += params[1] * left;
                            self.synth.outputs[3] += params[1] * right;
                        } else {
                            let v = pop(stack)?;
                            self.synth.outputs[0] += params[0] * v;
                            self.synth.outputs[2] += params[1] * v;
                        }
                    }
                    Opcode::Aux => {
                        let channel =
                            next_value(&self.byte_patch.values, &mut val)? as usize;
                        if channel + channels > self.synth.outputs.len() {
                            return Err(RenderError::Fault("aux channel out of range"));
                        }
                        if stereo {
                            let left = pop(stack)?;
                            let right = pop(stack)?;
                            self.synth.outputs[channel] += params[0] * left;
                            self.synth.outputs[channel + 1] += params[0] * right;
                        } else {
                            let v = pop(stack)?;
                            self.synth.outputs[channel] += params[0] * v;
                        }
                    }

                    // -- transforms ---------------------------------------
                    Opcode::Distort => {
                        for i in 0..channels {
                            let v = peek(stack, i)?;
                            *peek_mut(stack, i)? = waveshape(v, params[0]);
                        }
                    }
                    Opcode::Gain => {
                        for i in 0..channels {
                            *peek_mut(stack, i)? *= params[0];
                        }
                    }
                    Opcode::Invgain => {
                        for i in 0..channels {
                            *peek_mut(stack, i)? /= params[0];
                        }
                    }
                    Opcode::Clip => {
                        for i in 0..channels {
                            let v = peek(stack, i)?;
                            *peek_mut(stack, i)? = clip(v);
                        }
                    }
                    Opcode::Crush => {
                        for i in 0..channels {
                            let v = peek(stack, i)?;
                            *peek_mut(stack, i)? = crush(v, params[0]);
                        }
                    }
                    Opcode::Pan => {
                        // Mono input is duplicated first, so panning a mono
                        // signal expands it to a stereo pair.
                        if !stereo {
                            let top = peek(stack, 0)?;
                            stack.push(top);
                        }
                        *peek_mut(stack, 1)? *= params[0];
                        *peek_mut(stack, 0)? *= 1.0 - params[0];
                    }

                    // -- modulators ---------------------------------------
                    Opcode::Envelope => {
                        let voice = &mut self.synth.voices[voice_idx];
                        if voice.release {
                            voice.units[unit_idx].state[0] = ENV_RELEASE;
                        }
                        let unit = &mut voice.units[unit_idx];
                        let mut state = unit.state[0];
                        let mut level = unit.state[1];
                        if state == ENV_ATTACK {
                            level += non_linear_map(params[0]);
                            if level >= 1.0 {
                                level = 1.0;
                                state = ENV_DECAY;
                            }
                        } else if state == ENV_DECAY {
                            level -= non_linear_map(params[1]);
                            if level <= params[2] {
                                level = params[2];
                            }
                        } else if state == ENV_RELEASE {
                            level -= non_linear_map(params[3]);
                            if level <= 0.0 {
                                level = 0.0;
                            }
                        }
                        unit.state[0] = state;
                        unit.state[1] = level;
                        let output = level * params[4];
                        stack.push(output);
                        if stereo {
                            stack.push(output);
                        }
                    }
                    Opcode::Hold => {
                        let freq2 = params[0] * params[0];
                        for i in 0..channels {
                            let input = peek(stack, i)?;
                            let unit = &mut self.synth.voices[voice_idx].units[unit_idx];
                            let mut phase = unit.state[i] - freq2;
                            if phase <= 0.0 {
                                unit.state[2 + i] = input;
                                phase += 1.0;
                            }
                            let held = unit.state[2 + i];
                            unit.state[i] = phase;
                            *peek_mut(stack, i)? = held;
                        }
                    }
                    Opcode::Filter => {
                        let freq2 = params[0] * params[0];
                        let res = params[1];
                        let flags = next_value(&self.byte_patch.values, &mut val)?;
                        for i in 0..channels {
                            let input = peek(stack, i)?;
                            let unit = &mut self.synth.voices[voice_idx].units[unit_idx];
                            let mut low = unit.state[i];
                            let mut band = unit.state[2 + i];
                            low += freq2 * band;
                            let high = input - low - res * band;
                            band += freq2 * high;
                            unit.state[i] = low;
                            unit.state[2 + i] = band;
                            let mut output = 0.0;
                            if flags & FILTER_LOWPASS != 0 {
                                output += low;
                            }
                            if flags & FILTER_BANDPASS != 0 {
                                output += band;
                            }
                            if flags & FILTER_HIGHPASS != 0 {
                                output += high;
                            }
                            if flags & FILTER_NEG_BANDPASS != 0 {
                                output -= band;
                            }
                            if flags & FILTER_NEG_HIGHPASS != 0 {
                                output -= high;
                            }
                            *peek_mut(stack, i)? = output;
                        }
                    }
                    Opcode::Compressor => {
                        let top = peek(stack, 0)?;
                        let mut signal_level = top * top;
                        if stereo {
                            let right = peek(stack, 1)?;
                            signal_level += right * right;
                        }
                        let unit = &mut self.synth.voices[voice_idx].units[unit_idx];
                        // Attack coefficient while the power envelope
                        // rises, release while it falls.
                        let rising = signal_level >= unit.state[0];
                        let alpha = non_linear_map(params[if rising { 0 } else { 1 }]);
                        let level = unit.state[0] + (signal_level - unit.state[0]) * alpha;
                        unit.state[0] = level;
                        let threshold2 = params[3] * params[3];
                        let mut gain = 1.0f32;
                        if level > threshold2 {
                            gain = ((threshold2 / level) as f64)
                                .powf((params[4] / 2.0) as f64)
                                as f32;
                        }
                        gain /= params[2];
                        stack.push(gain);
                        if stereo {
                            stack.push(gain);
                        }
                    }

                    // -- routing and time ---------------------------------
                    Opcode::Send => {
                        let addr_low = next_value(&self.byte_patch.values, &mut val)?;
                        let addr_high = next_value(&self.byte_patch.values, &mut val)?;
                        let mut addr = u16::from_le_bytes([addr_low, addr_high]);
                        let amount = params[0] * 2.0 - 1.0;
                        let target_voice = if addr & 0x8000 != 0 {
                            addr = addr.wrapping_sub(0x8010);
                            let tv = (addr >> 10) as usize;
                            if tv >= MAX_VOICES {
                                return Err(RenderError::Fault(
                                    "send voice index out of range",
                                ));
                            }
                            tv
                        } else {
                            voice_idx
                        };
                        let target_unit = (((addr & 0x01F0) >> 4) as usize).wrapping_sub(1);
                        if target_unit >= MAX_UNITS {
                            return Err(RenderError::Fault("send unit index out of range"));
                        }
                        let port = (addr & 7) as usize;
                        if port + channels > 8 {
                            return Err(RenderError::Fault("send port out of range"));
                        }
                        for i in 0..channels {
                            let v = peek(stack, i)?;
                            self.synth.voices[target_voice].units[target_unit].ports
                                [port + i] += v * amount;
                        }
                        if addr & 0x8 != 0 {
                            for _ in 0..channels {
                                pop(stack)?;
                            }
                        }
                    }
                    Opcode::Speed => {
                        let top = pop(stack)?;
                        let unit = &mut self.synth.voices[voice_idx].units[unit_idx];
                        // Accumulate 2^(2.207·x) - 1 samples of extra time;
                        // the fraction carries in state[0] so long ramps
                        // stay sample-accurate.
                        let r = unit.state[0]
                            + (((top * 2.206896551724138) as f64).exp2() - 1.0) as f32;
                        let w = (r + 1.5) as i64 - 1;
                        unit.state[0] = r - w as f32;
                        stats.time += w;
                    }
                    Opcode::Sync => {
                        if self.synth.global_time as u8 == 0 {
                            let v = peek(stack, 0)?;
                            *sync_buf
                                .get_mut(sync_pos)
                                .ok_or(RenderError::Fault("sync buffer exhausted"))? = v;
                            sync_pos += 1;
                        }
                    }

                    // -- delay --------------------------------------------
                    Opcode::Delay => {
                        let pregain2 = params[0] * params[0];
                        let dry = params[1];
                        let feedback = params[2];
                        let damp = params[3];
                        let mut index =
                            next_value(&self.byte_patch.values, &mut val)? as usize;
                        let count =
                            next_value(&self.byte_patch.values, &mut val)? as usize;
                        if count == 0 {
                            return Err(RenderError::Fault("delay unit with zero taps"));
                        }
                        let t = self.synth.global_time as u16;
                        // Even counts are note-tracking delays: the tap
                        // time shrinks as the pitch rises.
                        let note_div = if count & 1 == 0 {
                            let note = self.synth.voices[voice_idx].note;
                            ((note as f64 * 0.083333333333).exp2()) as f32
                        } else {
                            1.0
                        };
                        for i in 0..channels {
                            let signal = peek(stack, i)?;
                            let mut output = dry * signal;
                            let mut j = 0;
                            while j < count {
                                let time_mod = self.synth.voices[voice_idx].units
                                    [unit_idx]
                                    .ports[4];
                                let mut delay = *self
                                    .byte_patch
                                    .delay_times
                                    .get(index)
                                    .ok_or(RenderError::Fault(
                                        "delay time index out of range",
                                    ))?
                                    as f32
                                    + time_mod * 32767.0;
                                if count & 1 == 0 {
                                    delay /= note_div;
                                }
                                let line = self
                                    .delay_lines
                                    .get_mut(line_cursor)
                                    .ok_or(RenderError::Fault("delay line pool exhausted"))?;
                                output +=
                                    line.step(t, delay, damp, feedback, pregain2 * signal);
                                line_cursor += 1;
                                index += 1;
                                j += 2;
                            }
                            // The channel's last line carries the DC
                            // blocker for the whole wet mix.
                            let line = &mut self.delay_lines[line_cursor - 1];
                            *peek_mut(stack, i)? = line.dc_block(output);
                        }
                        self.synth.voices[voice_idx].units[unit_idx].ports[4] = 0.0;
                    }

                    // -- oscillator ---------------------------------------
                    Opcode::Oscillator => {
                        let flags = next_value(&self.byte_patch.values, &mut val)?;
                        let note = self.synth.voices[voice_idx].note;
                        let mut detune_stereo = params[1] * 2.0 - 1.0;
                        let unison = (flags & OSC_UNISON_MASK) as usize;
                        let lfo = flags & OSC_LFO != 0;
                        for i in 0..channels {
                            let mut detune = detune_stereo;
                            let mut output = 0.0f32;
                            for j in 0..=unison {
                                let slot = i + 2 * j;
                                let unit =
                                    &mut self.synth.voices[voice_idx].units[unit_idx];
                                let mut pitch =
                                    (64.0 * (params[0] * 2.0 - 1.0) + detune) as f64;
                                if !lfo {
                                    pitch += note as f64;
                                }
                                pitch *= 0.083333333333; // semitones to octaves
                                let mut omega = pitch.exp2();
                                // Audio-rate scaling puts middle C where it
                                // belongs; the LFO constant is historical.
                                omega *= if lfo { 0.000038 } else { 0.000092696138 };
                                unit.state[slot] += omega as f32;
                                unit.state[slot] -=
                                    ((unit.state[slot] + 1.0) as i32 - 1) as f32;
                                let mut phase = unit.state[slot] + params[2];
                                phase -= phase as i32 as f32;
                                let mut color = params[3];
                                let mut amplitude = 0.0f32;
                                if flags & OSC_SINE != 0 {
                                    if phase < color {
                                        amplitude = (2.0
                                            * std::f64::consts::PI
                                            * (phase / color) as f64)
                                            .sin()
                                            as f32;
                                    }
                                } else if flags & OSC_TRISAW != 0 {
                                    if phase >= color {
                                        phase = 1.0 - phase;
                                        color = 1.0 - color;
                                    }
                                    amplitude = phase / color * 2.0 - 1.0;
                                } else if flags & OSC_PULSE != 0 {
                                    amplitude = if phase >= color { -1.0 } else { 1.0 };
                                } else if flags & OSC_GATE != 0 {
                                    // The gate pattern is the raw color and
                                    // shape bytes of this unit's transform
                                    // run.
                                    let bits = ((self.byte_patch.values
                                        [transform_start + 4]
                                        as i32)
                                        << 8)
                                        | self.byte_patch.values[transform_start + 3]
                                            as i32;
                                    amplitude = ((bits
                                        >> ((phase * 16.0 + 0.5) as i32 & 15))
                                        & 1)
                                        as f32;
                                    // state[4 + channel] is the gate
                                    // smoother; it overlaps the phase slot
                                    // of a third unison partial, so gate
                                    // patches keep unison <= 2.
                                    let smoothed = unit.state[4 + i];
                                    amplitude += 0.99609375 * (smoothed - amplitude);
                                    unit.state[4 + i] = amplitude;
                                }
                                output += if flags & OSC_GATE == 0 {
                                    waveshape(amplitude, params[4]) * params[5]
                                } else {
                                    amplitude * params[5]
                                };
                                if j < unison {
                                    // Spread unison partials so they don't
                                    // start in phase.
                                    params[2] += 0.08333333;
                                }
                                detune = -detune * 0.5;
                            }
                            stack.push(output);
                            detune_stereo = -detune_stereo;
                        }
                    }
                }

                unit_idx += 1;
            }

            match stack.len() {
                0..=3 => return Err(RenderError::StackUnderflow),
                4 => {}
                _ => return Err(RenderError::StackNotEmpty),
            }

            buffer[out_pos] = self.synth.outputs[0];
            buffer[out_pos + 1] = self.synth.outputs[1];
            self.synth.outputs[0] = 0.0;
            self.synth.outputs[1] = 0.0;
            out_pos += 2;
            stats.samples += 1;
            stats.time += 1;
            self.synth.global_time = self.synth.global_time.wrapping_add(1);
        }
        Ok(())
    }
}

#[inline]
fn pop(stack: &mut Vec<f32>) -> Result<f32, RenderError> {
    stack.pop().ok_or(RenderError::StackUnderflow)
}

#[inline]
fn peek(stack: &[f32], depth: usize) -> Result<f32, RenderError> {
    let i = stack
        .len()
        .checked_sub(depth + 1)
        .ok_or(RenderError::StackUnderflow)?;
    Ok(stack[i])
}

#[inline]
fn peek_mut(stack: &mut [f32], depth: usize) -> Result<&mut f32, RenderError> {
    let i = stack
        .len()
        .checked_sub(depth + 1)
        .ok_or(RenderError::StackUnderflow)?;
    Ok(&mut stack[i])
}

#[inline]
fn next_value(values: &[u8], cursor: &mut usize) -> Result<u8, RenderError> {
    let v = *values
        .get(*cursor)
        .ok_or(RenderError::ValueStreamEnded)?;
    *cursor += 1;
    Ok(v)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
