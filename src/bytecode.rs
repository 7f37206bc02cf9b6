//! Bytecode: the stable opcode contract, the compiled patch, and the
//! encoder that lowers a [`Patch`] onto it.
//!
//! A compiled song is two parallel byte streams walked in lockstep by the
//! dispatch loop: `commands` (one byte per unit, `opcode << 1 | stereo`)
//! and `values` (the unit's transformable parameters followed by its
//! opcode-specific extra bytes). Delay times live in a separate 16-bit
//! table indexed by the delay units' extra bytes. The opcode numbering
//! and parameter orderings are the contract between this encoder and
//! every interpreter backend — they must not be reordered.

use crate::patch::{Patch, Unit};
use crate::{MAX_COMMANDS, MAX_UNITS, MAX_VALUES, MAX_VOICES};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Opcode table
// ---------------------------------------------------------------------------

/// The unit opcodes. A command byte is `opcode << 1 | stereo`; opcode 0
/// (`advance`) is the end-of-voice separator, every other opcode names a
/// DSP unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Advance = 0,
    Add = 1,
    Addp = 2,
    Pop = 3,
    Loadnote = 4,
    Mul = 5,
    Mulp = 6,
    Push = 7,
    Xch = 8,
    Distort = 9,
    Hold = 10,
    Crush = 11,
    Gain = 12,
    Invgain = 13,
    Filter = 14,
    Clip = 15,
    Pan = 16,
    Delay = 17,
    Compressor = 18,
    Speed = 19,
    Out = 20,
    Outaux = 21,
    Aux = 22,
    Send = 23,
    Envelope = 24,
    Noise = 25,
    Oscillator = 26,
    Loadval = 27,
    Receive = 28,
    In = 29,
    Sync = 30,
}

/// Oscillator waveform select: sine burst over `color` of the cycle.
pub const OSC_SINE: u8 = 0x40;
/// Oscillator waveform select: triangle/saw morph around `color`.
pub const OSC_TRISAW: u8 = 0x20;
/// Oscillator waveform select: pulse with width `color`.
pub const OSC_PULSE: u8 = 0x10;
/// Oscillator waveform select: 16-step gate pattern. The pattern bits are
/// the raw `color` (low byte) and `shape` (high byte) parameter bytes.
pub const OSC_GATE: u8 = 0x04;
/// Oscillator runs at LFO rate and ignores the voice note.
pub const OSC_LFO: u8 = 0x08;
/// Low two bits of the oscillator flags: additional unison partials.
pub const OSC_UNISON_MASK: u8 = 0x03;

/// Filter output mix flags: add the lowpass tap.
pub const FILTER_LOWPASS: u8 = 0x40;
/// Filter output mix flags: add the bandpass tap.
pub const FILTER_BANDPASS: u8 = 0x20;
/// Filter output mix flags: add the highpass tap.
pub const FILTER_HIGHPASS: u8 = 0x10;
/// Filter output mix flags: subtract the bandpass tap.
pub const FILTER_NEG_BANDPASS: u8 = 0x08;
/// Filter output mix flags: subtract the highpass tap.
pub const FILTER_NEG_HIGHPASS: u8 = 0x04;

impl Opcode {
    /// Decode the opcode half of a command byte (the byte shifted right
    /// by one). Returns `None` for numbers outside the table.
    pub fn from_u8(opcode: u8) -> Option<Self> {
        use Opcode::*;
        Some(match opcode {
            0 => Advance,
            1 => Add,
            2 => Addp,
            3 => Pop,
            4 => Loadnote,
            5 => Mul,
            6 => Mulp,
            7 => Push,
            8 => Xch,
            9 => Distort,
            10 => Hold,
            11 => Crush,
            12 => Gain,
            13 => Invgain,
            14 => Filter,
            15 => Clip,
            16 => Pan,
            17 => Delay,
            18 => Compressor,
            19 => Speed,
            20 => Out,
            21 => Outaux,
            22 => Aux,
            23 => Send,
            24 => Envelope,
            25 => Noise,
            26 => Oscillator,
            27 => Loadval,
            28 => Receive,
            29 => In,
            30 => Sync,
            _ => return None,
        })
    }

    /// Look up an opcode by its unit type name.
    pub fn from_name(name: &str) -> Option<Self> {
        use Opcode::*;
        Some(match name {
            "advance" => Advance,
            "add" => Add,
            "addp" => Addp,
            "pop" => Pop,
            "loadnote" => Loadnote,
            "mul" => Mul,
            "mulp" => Mulp,
            "push" => Push,
            "xch" => Xch,
            "distortion" => Distort,
            "hold" => Hold,
            "crush" => Crush,
            "gain" => Gain,
            "invgain" => Invgain,
            "filter" => Filter,
            "clip" => Clip,
            "pan" => Pan,
            "delay" => Delay,
            "compressor" => Compressor,
            "speed" => Speed,
            "out" => Out,
            "outaux" => Outaux,
            "aux" => Aux,
            "send" => Send,
            "envelope" => Envelope,
            "noise" => Noise,
            "oscillator" => Oscillator,
            "loadval" => Loadval,
            "receive" => Receive,
            "in" => In,
            "sync" => Sync,
            _ => return None,
        })
    }

    /// The unit type name (inverse of [`Opcode::from_name`]).
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Advance => "advance",
            Add => "add",
            Addp => "addp",
            Pop => "pop",
            Loadnote => "loadnote",
            Mul => "mul",
            Mulp => "mulp",
            Push => "push",
            Xch => "xch",
            Distort => "distortion",
            Hold => "hold",
            Crush => "crush",
            Gain => "gain",
            Invgain => "invgain",
            Filter => "filter",
            Clip => "clip",
            Pan => "pan",
            Delay => "delay",
            Compressor => "compressor",
            Speed => "speed",
            Out => "out",
            Outaux => "outaux",
            Aux => "aux",
            Send => "send",
            Envelope => "envelope",
            Noise => "noise",
            Oscillator => "oscillator",
            Loadval => "loadval",
            Receive => "receive",
            In => "in",
            Sync => "sync",
        }
    }

    /// Names of the transformable parameters, in value-stream order.
    /// Transformables pass through the port-modulation phase
    /// (`value/128 + port`) before the unit reads them.
    pub fn transform_params(self) -> &'static [&'static str] {
        use Opcode::*;
        match self {
            Distort => &["drive"],
            Hold => &["holdfreq"],
            Crush => &["resolution"],
            Gain => &["gain"],
            Invgain => &["invgain"],
            Filter => &["frequency", "resonance"],
            Pan => &["panning"],
            // The fifth delay port (index 4) is the delay-time modulation
            // input, read by the unit itself rather than the transform
            // phase — it has no value byte.
            Delay => &["pregain", "dry", "feedback", "damp"],
            Compressor => &["attack", "release", "invgain", "threshold", "ratio"],
            Out => &["gain"],
            Outaux => &["outgain", "auxgain"],
            Aux => &["gain"],
            Send => &["amount"],
            Envelope => &["attack", "decay", "sustain", "release", "gain"],
            Noise => &["shape", "gain"],
            Oscillator => &["transpose", "detune", "phase", "color", "shape", "gain"],
            Loadval => &["value"],
            _ => &[],
        }
    }

    /// Number of transformable parameter bytes this opcode consumes.
    #[inline]
    pub fn transform_count(self) -> usize {
        self.transform_params().len()
    }

    /// Number of extra value bytes (flags, channels, addresses) the unit
    /// reads directly after the transformables.
    pub fn extra_count(self) -> usize {
        use Opcode::*;
        match self {
            Filter | Aux | In | Oscillator => 1,
            Delay | Send => 2,
            _ => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled patch
// ---------------------------------------------------------------------------

/// The immutable compiled representation of a song, consumed by the
/// interpreter. Produced by [`encode`]; replaced wholesale on update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BytePatch {
    /// One byte per unit plus an `advance` terminator per instrument.
    pub commands: Vec<u8>,
    /// Parameter bytes, consumed in lockstep with `commands`.
    pub values: Vec<u8>,
    /// Delay tap times in samples, indexed by the delay units.
    pub delay_times: Vec<u16>,
    /// Total voice count across all instruments.
    pub num_voices: usize,
    /// Per-voice bit, tested most-significant-first as voices advance:
    /// set means the voice replays the previous voice's program.
    pub polyphony_bitmask: u32,
}

/// One decoded instruction from the parallel command/value streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub opcode: Opcode,
    pub stereo: bool,
    /// Raw transformable parameter bytes.
    pub transform_values: &'a [u8],
    /// Raw opcode-specific extra bytes (flags, channels, addresses).
    pub extra_values: &'a [u8],
}

/// Errors from [`BytePatch::decode`] on a malformed stream pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode in command byte {0:#04x}")]
    InvalidOpcode(u8),
    #[error("value stream ended prematurely")]
    ValueStreamEnded,
}

impl BytePatch {
    /// Decode the command/value streams back into a flat instruction
    /// list, including the `advance` separators. The instruction list
    /// fully describes the DSP graph, so encode → decode is a loss-free
    /// round trip over opcode order, stereo bits, and parameter bytes.
    pub fn decode(&self) -> Result<Vec<Instruction<'_>>, DecodeError> {
        let mut out = Vec::new();
        let mut val = 0usize;
        for &byte in &self.commands {
            let opcode =
                Opcode::from_u8(byte >> 1).ok_or(DecodeError::InvalidOpcode(byte))?;
            let tcount = opcode.transform_count();
            let ecount = opcode.extra_count();
            if self.values.len() < val + tcount + ecount {
                return Err(DecodeError::ValueStreamEnded);
            }
            out.push(Instruction {
                opcode,
                stereo: byte & 1 == 1,
                transform_values: &self.values[val..val + tcount],
                extra_values: &self.values[val + tcount..val + tcount + ecount],
            });
            val += tcount + ecount;
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Errors that reject a patch at compile time. A failed encode leaves the
/// interpreter's installed program untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("instrument {instrument} has {units} units, at most {MAX_UNITS} supported")]
    TooManyUnits { instrument: usize, units: usize },
    #[error("instrument {instrument} has zero voices")]
    ZeroVoices { instrument: usize },
    #[error("unknown unit type {kind:?} (instrument {instrument}, unit {unit})")]
    UnknownUnitType {
        kind: String,
        instrument: usize,
        unit: usize,
    },
    #[error("missing parameter {name:?} (instrument {instrument}, unit {unit})")]
    MissingParameter {
        name: &'static str,
        instrument: usize,
        unit: usize,
    },
    #[error("patch needs {0} voices, at most {MAX_VOICES} supported")]
    TooManyVoices(usize),
    #[error("command stream too long: {0} bytes, at most {MAX_COMMANDS}")]
    CommandStreamTooLong(usize),
    #[error("value stream too long: {0} bytes, at most {MAX_VALUES}")]
    ValueStreamTooLong(usize),
    #[error("delay unit has no taps (instrument {instrument}, unit {unit})")]
    NoDelayTaps { instrument: usize, unit: usize },
    #[error("delay unit has too many taps (instrument {instrument}, unit {unit})")]
    TooManyDelayTaps { instrument: usize, unit: usize },
    #[error("delay time table too long: {0} entries, at most 256 addressable")]
    DelayTableTooLong(usize),
    #[error("send target out of range (instrument {instrument}, unit {unit})")]
    BadSendTarget { instrument: usize, unit: usize },
}

/// Compile a [`Patch`] into a [`BytePatch`], enforcing the static limits.
pub fn encode(patch: &Patch) -> Result<BytePatch, EncodeError> {
    let mut commands = Vec::new();
    let mut values = Vec::new();
    let mut delay_times: Vec<u16> = Vec::new();
    let mut polyphony_bitmask: u32 = 0;
    let mut num_voices = 0usize;

    for (instrument, instr) in patch.instruments.iter().enumerate() {
        if instr.units.len() > MAX_UNITS {
            return Err(EncodeError::TooManyUnits {
                instrument,
                units: instr.units.len(),
            });
        }
        if instr.num_voices == 0 {
            return Err(EncodeError::ZeroVoices { instrument });
        }
        for (unit, u) in instr.units.iter().enumerate() {
            let op = match Opcode::from_name(&u.kind) {
                Some(Opcode::Advance) | None => {
                    return Err(EncodeError::UnknownUnitType {
                        kind: u.kind.clone(),
                        instrument,
                        unit,
                    })
                }
                Some(op) => op,
            };
            commands.push((op as u8) << 1 | u.stereo as u8);
            for &name in op.transform_params() {
                values.push(required(u, name, instrument, unit)?);
            }
            match op {
                Opcode::Filter => values.push(required(u, "flags", instrument, unit)?),
                Opcode::Oscillator => values.push(required(u, "flags", instrument, unit)?),
                Opcode::Aux | Opcode::In => {
                    values.push(required(u, "channel", instrument, unit)?)
                }
                Opcode::Send => {
                    let addr = send_address(u, instrument, unit)?;
                    values.push(addr as u8);
                    values.push((addr >> 8) as u8);
                }
                Opcode::Delay => {
                    if u.delay_times.is_empty() {
                        return Err(EncodeError::NoDelayTaps { instrument, unit });
                    }
                    // The count byte holds 2·taps - 1 (+1 when tracking).
                    if u.delay_times.len() > 127 {
                        return Err(EncodeError::TooManyDelayTaps { instrument, unit });
                    }
                    if delay_times.len() + u.delay_times.len() * u.channels() > 256 {
                        return Err(EncodeError::DelayTableTooLong(
                            delay_times.len() + u.delay_times.len() * u.channels(),
                        ));
                    }
                    values.push(delay_times.len() as u8);
                    // Even count marks a note-tracking (pitched) delay;
                    // the tap loop consumes ceil(count / 2) lines per
                    // channel either way.
                    let note_tracking = optional(u, "notetracking") != 0;
                    values.push((2 * u.delay_times.len() - 1 + note_tracking as usize) as u8);
                    // The interpreter walks the table linearly across
                    // channels, so a stereo delay's times appear once per
                    // channel.
                    for _ in 0..u.channels() {
                        delay_times.extend_from_slice(&u.delay_times);
                    }
                }
                _ => {}
            }
        }
        commands.push((Opcode::Advance as u8) << 1);
        num_voices += instr.num_voices as usize;
        for _ in 1..instr.num_voices {
            polyphony_bitmask = (polyphony_bitmask << 1) | 1;
        }
        polyphony_bitmask <<= 1;
    }

    if num_voices > MAX_VOICES {
        return Err(EncodeError::TooManyVoices(num_voices));
    }
    if commands.len() > MAX_COMMANDS {
        return Err(EncodeError::CommandStreamTooLong(commands.len()));
    }
    if values.len() > MAX_VALUES {
        return Err(EncodeError::ValueStreamTooLong(values.len()));
    }

    Ok(BytePatch {
        commands,
        values,
        delay_times,
        num_voices,
        polyphony_bitmask,
    })
}

fn required(
    u: &Unit,
    name: &'static str,
    instrument: usize,
    unit: usize,
) -> Result<u8, EncodeError> {
    u.parameters
        .get(name)
        .copied()
        .ok_or(EncodeError::MissingParameter {
            name,
            instrument,
            unit,
        })
}

fn optional(u: &Unit, name: &str) -> u8 {
    u.parameters.get(name).copied().unwrap_or(0)
}

/// Build a send unit's 16-bit target address.
///
/// Required parameters: `unit` (target unit index within the voice) and
/// `port` (0..7). Optional: `voice` (address that absolute voice instead
/// of the sender's own) and `pop` (consume the sent signal).
///
/// Address layout, as the dispatch loop decodes it: bit 15 selects
/// cross-voice routing (the remainder is offset by 0x8010 and carries the
/// voice index above bit 10), bits 4..9 hold the target unit index plus
/// one, bit 3 is the pop flag, bits 0..3 the port.
fn send_address(u: &Unit, instrument: usize, unit: usize) -> Result<u16, EncodeError> {
    let target_unit = required(u, "unit", instrument, unit)? as u16;
    let port = required(u, "port", instrument, unit)? as u16;
    // The unit field is five bits wide (stored plus one), the port three.
    if target_unit > 30 || port > 7 {
        return Err(EncodeError::BadSendTarget { instrument, unit });
    }
    let pop = if optional(u, "pop") != 0 { 0x8 } else { 0 };
    let local = ((target_unit + 1) << 4) | pop | port;
    match u.parameters.get("voice") {
        Some(&voice) => {
            if voice as usize >= MAX_VOICES {
                return Err(EncodeError::BadSendTarget { instrument, unit });
            }
            Ok(0x8010 + (((voice as u16) << 10) | local))
        }
        None => Ok(local),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Instrument, Patch, Unit};

    fn single(unit: Unit) -> Patch {
        Patch::from_instruments(vec![Instrument::new(1, vec![unit])])
    }

    #[test]
    fn opcode_numbers_are_stable() {
        // The compiled contract: spot-check the table endpoints and a few
        // interior opcodes against their fixed numbers.
        assert_eq!(Opcode::Advance as u8, 0);
        assert_eq!(Opcode::Add as u8, 1);
        assert_eq!(Opcode::Filter as u8, 14);
        assert_eq!(Opcode::Delay as u8, 17);
        assert_eq!(Opcode::Oscillator as u8, 26);
        assert_eq!(Opcode::Sync as u8, 30);
        for n in 0..=30u8 {
            let op = Opcode::from_u8(n).unwrap();
            assert_eq!(op as u8, n);
            assert_eq!(Opcode::from_name(op.name()), Some(op));
        }
        assert_eq!(Opcode::from_u8(31), None);
    }

    #[test]
    fn encode_emits_commands_and_values() {
        let patch = Patch::from_instruments(vec![Instrument::new(
            1,
            vec![
                Unit::new("loadval").with("value", 96),
                Unit::new("out").stereo().with("gain", 128),
            ],
        )]);
        let bp = encode(&patch).unwrap();
        assert_eq!(
            bp.commands,
            vec![
                (Opcode::Loadval as u8) << 1,
                (Opcode::Out as u8) << 1 | 1,
                (Opcode::Advance as u8) << 1,
            ]
        );
        assert_eq!(bp.values, vec![96, 128]);
        assert_eq!(bp.num_voices, 1);
        assert_eq!(bp.polyphony_bitmask, 0);
    }

    #[test]
    fn polyphony_bitmask_marks_shared_voices() {
        // Instrument A: 1 voice, instrument B: 3 voices sharing a program.
        let patch = Patch::from_instruments(vec![
            Instrument::new(1, vec![]),
            Instrument::new(3, vec![]),
        ]);
        let bp = encode(&patch).unwrap();
        assert_eq!(bp.num_voices, 4);
        // Voices advance 4 → 0; bits 1 and 2 (tested after the 2nd and
        // 3rd advance) mark B's replaying voices.
        assert_eq!(bp.polyphony_bitmask, 0b110);
    }

    #[test]
    fn delay_encoding_allocates_table_per_channel() {
        let patch = single(
            Unit::new("delay")
                .stereo()
                .with("pregain", 128)
                .with("dry", 64)
                .with("feedback", 96)
                .with("damp", 0)
                .taps(&[1000, 2000]),
        );
        let bp = encode(&patch).unwrap();
        // index 0, count = 2 taps * 2 - 1 (no note tracking)
        assert_eq!(bp.values, vec![128, 64, 96, 0, 0, 3]);
        assert_eq!(bp.delay_times, vec![1000, 2000, 1000, 2000]);
    }

    #[test]
    fn note_tracking_delay_has_even_count() {
        let patch = single(
            Unit::new("delay")
                .with("pregain", 128)
                .with("dry", 0)
                .with("feedback", 0)
                .with("damp", 0)
                .with("notetracking", 1)
                .taps(&[500]),
        );
        let bp = encode(&patch).unwrap();
        assert_eq!(*bp.values.last().unwrap(), 2);
    }

    #[test]
    fn send_address_local_and_global() {
        let local = single(
            Unit::new("send")
                .with("amount", 128)
                .with("unit", 2)
                .with("port", 1)
                .with("pop", 1),
        );
        let bp = encode(&local).unwrap();
        let addr = u16::from_le_bytes([bp.values[1], bp.values[2]]);
        assert_eq!(addr, (3 << 4) | 0x8 | 1);

        let global = single(
            Unit::new("send")
                .with("amount", 128)
                .with("voice", 2)
                .with("unit", 0)
                .with("port", 0),
        );
        let bp = encode(&global).unwrap();
        let addr = u16::from_le_bytes([bp.values[1], bp.values[2]]);
        assert!(addr & 0x8000 != 0);
        assert_eq!(addr, 0x8010 + ((2 << 10) | (1 << 4)));
    }

    #[test]
    fn decode_round_trips() {
        let patch = Patch::from_instruments(vec![Instrument::new(
            2,
            vec![
                Unit::new("envelope")
                    .with("attack", 32)
                    .with("decay", 64)
                    .with("sustain", 96)
                    .with("release", 64)
                    .with("gain", 128),
                Unit::new("oscillator")
                    .stereo()
                    .with("transpose", 64)
                    .with("detune", 70)
                    .with("phase", 0)
                    .with("color", 64)
                    .with("shape", 64)
                    .with("gain", 128)
                    .with("flags", OSC_TRISAW | 1),
                Unit::new("mulp").stereo(),
                Unit::new("out").stereo().with("gain", 128),
            ],
        )]);
        let bp = encode(&patch).unwrap();
        let decoded = bp.decode().unwrap();

        let expected: Vec<(Opcode, bool)> = vec![
            (Opcode::Envelope, false),
            (Opcode::Oscillator, true),
            (Opcode::Mulp, true),
            (Opcode::Out, true),
            (Opcode::Advance, false),
        ];
        let got: Vec<(Opcode, bool)> =
            decoded.iter().map(|i| (i.opcode, i.stereo)).collect();
        assert_eq!(got, expected);

        // Every value byte is owned by exactly one instruction.
        let total: usize = decoded
            .iter()
            .map(|i| i.transform_values.len() + i.extra_values.len())
            .sum();
        assert_eq!(total, bp.values.len());
        assert_eq!(decoded[0].transform_values, &[32, 64, 96, 64, 128]);
        assert_eq!(decoded[1].extra_values, &[OSC_TRISAW | 1]);
    }

    #[test]
    fn rejects_too_many_units() {
        let units = vec![Unit::new("pop"); MAX_UNITS + 1];
        let patch = Patch::from_instruments(vec![Instrument::new(1, units)]);
        assert!(matches!(
            encode(&patch),
            Err(EncodeError::TooManyUnits { instrument: 0, .. })
        ));
    }

    #[test]
    fn rejects_zero_voices() {
        let patch = Patch::from_instruments(vec![Instrument::new(0, vec![])]);
        assert_eq!(
            encode(&patch),
            Err(EncodeError::ZeroVoices { instrument: 0 })
        );
    }

    #[test]
    fn rejects_unknown_unit_type() {
        let patch = single(Unit::new("reverb"));
        assert!(matches!(
            encode(&patch),
            Err(EncodeError::UnknownUnitType { .. })
        ));
    }

    #[test]
    fn rejects_advance_as_unit_type() {
        // The separator is the encoder's to emit, never a unit.
        let patch = single(Unit::new("advance"));
        assert!(matches!(
            encode(&patch),
            Err(EncodeError::UnknownUnitType { .. })
        ));
    }

    #[test]
    fn rejects_missing_parameter() {
        let patch = single(Unit::new("out"));
        assert_eq!(
            encode(&patch),
            Err(EncodeError::MissingParameter {
                name: "gain",
                instrument: 0,
                unit: 0
            })
        );
    }

    #[test]
    fn rejects_too_many_voices() {
        let patch = Patch::from_instruments(vec![Instrument::new(33, vec![])]);
        assert_eq!(encode(&patch), Err(EncodeError::TooManyVoices(33)));
    }

    #[test]
    fn maximal_patch_fills_the_command_stream_exactly() {
        // 32 single-voice instruments of 63 units each compile to exactly
        // MAX_COMMANDS bytes — the limits are mutually consistent, so a
        // patch that passes the voice and unit checks always fits.
        let instr = Instrument::new(1, vec![Unit::new("pop"); MAX_UNITS]);
        let patch = Patch::from_instruments(vec![instr; 32]);
        let bp = encode(&patch).unwrap();
        assert_eq!(bp.commands.len(), MAX_COMMANDS);
    }
}
