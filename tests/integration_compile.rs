//! Compile-and-update behavior through the public facade: what survives a
//! patch swap, what a failed compile must not touch, and model round-trips.

use synthkernel::{encode, Instrument, Interpreter, Opcode, Patch, Unit};

/// Envelope rate for attack byte 64: 2^(-24 · 64/128) = 2^-12. The level
/// climbs by exactly this much per sample, so outputs are bit-exact.
const RATE: f32 = 1.0 / 4096.0;

fn ramp_patch(gain: u8, padded: bool) -> Patch {
    let mut units = vec![
        Unit::new("envelope")
            .with("attack", 64)
            .with("decay", 0)
            .with("sustain", 128)
            .with("release", 0)
            .with("gain", gain),
        Unit::new("out").with("gain", 128),
    ];
    if padded {
        // Stack-neutral units whose only effect is changing the command
        // stream.
        units.push(Unit::new("push"));
        units.push(Unit::new("pop"));
    }
    Patch::from_instruments(vec![Instrument::new(1, units)])
}

fn render_one(interp: &mut Interpreter) -> f32 {
    let mut buffer = [0.0f32; 2];
    let mut sync = [0.0f32; 2];
    interp.render(&mut buffer, &mut sync, 1).unwrap();
    buffer[0]
}

#[test]
fn update_with_identical_commands_preserves_unit_state() {
    let mut interp = Interpreter::new(&ramp_patch(128, false)).unwrap();
    interp.trigger(0, 64);
    for n in 1..=10 {
        assert_eq!(render_one(&mut interp), n as f32 * RATE);
    }

    // Same program, same bytes: the envelope keeps climbing.
    interp.update(&ramp_patch(128, false)).unwrap();
    assert_eq!(render_one(&mut interp), 11.0 * RATE);

    // A value-only change (the gain byte) also keeps the commands equal,
    // so the level survives and only the output scaling moves.
    interp.update(&ramp_patch(64, false)).unwrap();
    assert_eq!(render_one(&mut interp), 12.0 * RATE * 0.5);
}

#[test]
fn update_with_changed_commands_resets_unit_state() {
    let mut interp = Interpreter::new(&ramp_patch(128, false)).unwrap();
    interp.trigger(0, 64);
    for _ in 0..10 {
        render_one(&mut interp);
    }

    // The padded variant moves opcodes around: phase and level memory is
    // invalidated, so the envelope restarts from its attack.
    interp.update(&ramp_patch(128, true)).unwrap();
    assert_eq!(render_one(&mut interp), RATE);
}

#[test]
fn update_preserves_notes_and_release_flags() {
    let patch = Patch::from_instruments(vec![Instrument::new(
        1,
        vec![Unit::new("loadnote"), Unit::new("out").with("gain", 128)],
    )]);
    let mut interp = Interpreter::new(&patch).unwrap();
    interp.trigger(0, 96);
    assert_eq!(render_one(&mut interp), 0.5);

    // Swap in a changed program; the note must survive the unit reset.
    let padded = Patch::from_instruments(vec![Instrument::new(
        1,
        vec![
            Unit::new("loadnote"),
            Unit::new("out").with("gain", 128),
            Unit::new("push"),
            Unit::new("pop"),
        ],
    )]);
    interp.update(&padded).unwrap();
    assert_eq!(render_one(&mut interp), 0.5);
}

#[test]
fn failed_update_leaves_the_old_program_running() {
    let mut interp = Interpreter::new(&ramp_patch(128, false)).unwrap();
    interp.trigger(0, 64);
    for _ in 0..4 {
        render_one(&mut interp);
    }

    let bad = Patch::from_instruments(vec![Instrument::new(1, vec![Unit::new("reverb")])]);
    assert!(interp.update(&bad).is_err());

    // Still the old envelope, still the old state.
    assert_eq!(render_one(&mut interp), 5.0 * RATE);
}

#[test]
fn update_grows_the_delay_pool() {
    // Start with no delay units at all, then swap in a patch that needs
    // lines: rendering must not fault on an exhausted pool.
    let plain = Patch::from_instruments(vec![Instrument::new(
        1,
        vec![
            Unit::new("loadval").with("value", 96),
            Unit::new("out").with("gain", 128),
        ],
    )]);
    let echoed = Patch::from_instruments(vec![Instrument::new(
        1,
        vec![
            Unit::new("loadval").with("value", 96),
            Unit::new("delay")
                .with("pregain", 128)
                .with("dry", 128)
                .with("feedback", 64)
                .with("damp", 0)
                .taps(&[10]),
            Unit::new("out").with("gain", 128),
        ],
    )]);

    let mut interp = Interpreter::new(&plain).unwrap();
    interp.trigger(0, 64);
    render_one(&mut interp);

    interp.update(&echoed).unwrap();
    let mut buffer = [0.0f32; 64];
    let mut sync = [0.0f32; 2];
    let stats = interp.render(&mut buffer, &mut sync, 32).unwrap();
    assert_eq!(stats.samples, 32);
    assert!(
        buffer[30] > 0.5,
        "echo of the constant should arrive after 10 samples"
    );
}

#[test]
fn constructor_rejects_bad_patches() {
    let bad = Patch::from_instruments(vec![Instrument::new(1, vec![Unit::new("reverb")])]);
    assert!(Interpreter::new(&bad).is_err());
}

// ===========================================================================
// Model round-trips
// ===========================================================================

#[test]
fn patch_serde_round_trip() {
    let patch = synthkernel::presets::echo_pad();
    let json = serde_json::to_string(&patch).unwrap();
    let back: Patch = serde_json::from_str(&json).unwrap();
    assert_eq!(back, patch);
    assert_eq!(encode(&back).unwrap(), encode(&patch).unwrap());
}

#[test]
fn compiled_patch_decodes_to_the_same_graph() {
    let patch = synthkernel::presets::lead();
    let interp = Interpreter::new(&patch).unwrap();
    let decoded = interp.byte_patch().decode().unwrap();

    let kinds: Vec<&str> = decoded.iter().map(|i| i.opcode.name()).collect();
    assert_eq!(
        kinds,
        vec!["envelope", "oscillator", "mulp", "out", "advance"]
    );
    assert!(decoded[0..4].iter().all(|i| i.stereo));
    assert_eq!(decoded[4].opcode, Opcode::Advance);
}
