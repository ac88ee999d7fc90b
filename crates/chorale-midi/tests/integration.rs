//! Integration tests for chorale-midi.
//!
//! These exercise sources, routes and the router together without hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use chorale_midi::modifier::{Chord, KeyRange, Transpose, VelocityScale};
use chorale_midi::{
    fault_channel, Error, MidiDestination, MidiMessage, MidiModifier, MidiRecorder, MidiRouter,
    MidiSource, ModifierConfig, Result,
};
use parking_lot::Mutex;

#[derive(Default)]
struct Capture {
    fail_on: Option<usize>,
    attempts: AtomicUsize,
    received: Mutex<Vec<MidiMessage>>,
}

impl MidiDestination for Capture {
    fn name(&self) -> &str {
        "capture"
    }

    fn send(&self, message: &MidiMessage) -> Result<()> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(n) {
            return Err(Error::Send("cable pulled".into()));
        }
        self.received.lock().push(*message);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Modifier chains
// ---------------------------------------------------------------------------

#[test]
fn test_transpose_then_velocity_scale() {
    let router = MidiRouter::new();
    let source = MidiSource::new("keyboard");
    let dest = Arc::new(Capture::default());

    let route = router.connect(&source, dest.clone());
    route.add_processor(MidiModifier::new(Transpose::new(12)));
    route.add_processor(MidiModifier::new(VelocityScale::new(0.5).unwrap()));
    route.start();

    source.emit_message(MidiMessage::note_on(0, 60, 100));

    let received = dest.received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].note(), Some(72));
    assert_eq!(received[0].velocity(), Some(50));
}

#[test]
fn test_disabled_modifier_is_skipped() {
    let source = MidiSource::new("keyboard");
    let dest = Arc::new(Capture::default());
    let router = MidiRouter::new();
    let route = router.connect(&source, dest.clone());

    let transpose = MidiModifier::new(Transpose::new(5));
    route.add_processor(transpose.clone());
    route.start();

    transpose.set_enabled(false);
    source.emit_message(MidiMessage::note_on(0, 60, 100));
    transpose.set_enabled(true);
    source.emit_message(MidiMessage::note_on(0, 60, 100));

    let notes: Vec<_> = dest.received.lock().iter().filter_map(|m| m.note()).collect();
    assert_eq!(notes, vec![60, 65]);
}

#[test]
fn test_chord_fan_out_is_seen_by_later_modifiers() {
    let source = MidiSource::new("keyboard");
    let dest = Arc::new(Capture::default());
    let router = MidiRouter::new();
    let route = router.connect(&source, dest.clone());

    route.add_processor(MidiModifier::new(Chord::major()));
    // Drops the fifth of C major (67)
    route.add_processor(MidiModifier::new(KeyRange::new(0, 65).unwrap()));
    route.start();

    source.emit_message(MidiMessage::note_on(0, 60, 100));
    let notes: Vec<_> = dest.received.lock().iter().filter_map(|m| m.note()).collect();
    assert_eq!(notes, vec![60, 64]);
}

#[test]
fn test_chain_survives_preset_round_trip() {
    let source = MidiSource::new("keyboard");
    let router = MidiRouter::new();
    let original = router.connect(&source, Arc::new(Capture::default()));
    original.add_processor(ModifierConfig::Transpose { semitones: -3 }.into_modifier().unwrap());
    original.add_processor(
        ModifierConfig::VelocityScale { factor: 2.0 }
            .into_modifier()
            .unwrap(),
    );

    let json = serde_json::to_string(&original.presets()).unwrap();
    let presets: Vec<chorale_midi::ModifierPreset> = serde_json::from_str(&json).unwrap();

    let dest = Arc::new(Capture::default());
    let restored = router.connect(&source, dest.clone());
    for preset in &presets {
        restored.add_processor(MidiModifier::from_preset(preset).unwrap());
    }
    restored.start();

    source.emit_message(MidiMessage::note_on(2, 64, 50));
    assert_eq!(*dest.received.lock(), vec![MidiMessage::note_on(2, 61, 100)]);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

/// Chain edits race with delivery. Every message must see a whole chain:
/// either before or after an edit, never a partial one.
#[test]
fn test_concurrent_edits_never_tear_the_chain() {
    let source = MidiSource::new("sequencer");
    let dest = Arc::new(Capture::default());
    let router = MidiRouter::new();
    let route = router.connect(&source, dest.clone());

    // Two modifiers that must always appear together: +7 then -7
    route.add_processor(MidiModifier::new(Transpose::new(7)));
    route.add_processor(MidiModifier::new(Transpose::new(-7)));
    route.start();

    let stop = Arc::new(AtomicBool::new(false));
    let editor = {
        let route = route.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                // Insert a balanced pair at the front, then remove it again.
                let up = MidiModifier::new(Transpose::new(12));
                let down = MidiModifier::new(Transpose::new(-12));
                route.insert_processor(0, down.clone());
                route.insert_processor(0, up.clone());
                route.remove_processor(up.id());
                route.remove_processor(down.id());
            }
        })
    };

    let emitters: Vec<_> = (0..4)
        .map(|_| {
            let source = source.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    source.emit_message(MidiMessage::note_on(0, 60, 100));
                }
            })
        })
        .collect();

    for emitter in emitters {
        emitter.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    editor.join().unwrap();

    // Published states net to 0 or -12. A torn read of the base pair would
    // show up as 67 or 53.
    let received = dest.received.lock();
    assert_eq!(received.len(), 8_000);
    for message in received.iter() {
        assert!(
            matches!(message.note(), Some(60) | Some(48)),
            "unexpected note {:?}",
            message.note()
        );
    }
    // The steady-state chain is balanced
    assert_eq!(route.processors().len(), 2);
}

#[test]
fn test_concurrent_edits_preserve_whole_snapshots() {
    // Every published state is [], [+k] or [+k, -k].
    let source = MidiSource::new("sequencer");
    let dest = Arc::new(Capture::default());
    let router = MidiRouter::new();
    let route = router.connect(&source, dest.clone());
    route.start();

    let stop = Arc::new(AtomicBool::new(false));
    let editor = {
        let route = route.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut k: i8 = 1;
            while !stop.load(Ordering::Relaxed) {
                route.clear_processors();
                route.add_processor(MidiModifier::new(Transpose::new(k)));
                route.add_processor(MidiModifier::new(Transpose::new(-k)));
                k = k % 12 + 1;
            }
        })
    };

    for _ in 0..5_000 {
        source.emit_message(MidiMessage::note_on(0, 60, 100));
    }
    stop.store(true, Ordering::Relaxed);
    editor.join().unwrap();

    // Only [+k] moves the note, by at most 12.
    for message in dest.received.lock().iter() {
        let note = message.note().unwrap();
        assert!((60..=72).contains(&note), "unexpected note {note}");
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

#[test]
fn test_failure_on_message_n_stops_delivery() {
    let source = MidiSource::new("keyboard");
    let dest = Arc::new(Capture {
        fail_on: Some(3),
        ..Default::default()
    });
    let router = MidiRouter::new();
    let (observer, faults) = fault_channel(8);
    router.observe(observer);
    let route = router.connect(&source, dest.clone());
    route.start();

    for note in 0..10u8 {
        source.emit_message(MidiMessage::note_on(0, 60 + note, 100));
    }

    assert!(route.is_faulted());
    // Messages 0..3 delivered; message 3 failed; nothing after it was attempted
    assert_eq!(dest.received.lock().len(), 3);
    assert_eq!(dest.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(faults.len(), 1);
    assert_eq!(route.stats().dropped, 6);
}

#[test]
fn test_fault_isolated_to_one_route() {
    let source = MidiSource::new("keyboard");
    let broken = Arc::new(Capture {
        fail_on: Some(0),
        ..Default::default()
    });
    let healthy = Arc::new(Capture::default());
    let router = MidiRouter::new();
    router.connect(&source, broken).start();
    router.connect(&source, healthy.clone()).start();

    for note in 60..64 {
        source.emit_message(MidiMessage::note_on(0, note, 100));
    }
    assert_eq!(healthy.received.lock().len(), 4);
    assert_eq!(router.faulted_routes().len(), 1);
}

#[test]
fn test_fault_is_monotonic_under_concurrent_emission() {
    let source = MidiSource::new("keyboard");
    let dest = Arc::new(Capture {
        fail_on: Some(100),
        ..Default::default()
    });
    let router = MidiRouter::new();
    let route = router.connect(&source, dest.clone());
    route.start();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let source = source.clone();
            let route = route.clone();
            thread::spawn(move || {
                let mut seen_faulted = false;
                for _ in 0..200 {
                    source.emit_message(MidiMessage::note_on(0, 60, 100));
                    let faulted = route.is_faulted();
                    assert!(!(seen_faulted && !faulted), "fault flag went back to false");
                    seen_faulted |= faulted;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(route.is_faulted());
    assert!(dest.received.lock().len() <= 100 + 3);
}

// ---------------------------------------------------------------------------
// Recorder alongside routes
// ---------------------------------------------------------------------------

#[test]
fn test_recorder_sees_unmodified_source_stream() {
    let source = MidiSource::new("keyboard");
    let dest = Arc::new(Capture::default());
    let router = MidiRouter::new();
    let route = router.connect(&source, dest.clone());
    route.add_processor(MidiModifier::new(Transpose::new(1)));
    route.start();

    let recorder = MidiRecorder::new();
    source.subscribe(recorder.clone());
    recorder.start();
    source.emit_message(MidiMessage::note_on(0, 60, 100));
    source.emit_message(MidiMessage::note_off(0, 60, 0));
    recorder.stop();

    let smf = recorder.to_smf_bytes(480, 120.0).unwrap();
    let events = chorale_midi::read_smf(&smf).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(dest.received.lock()[0].note(), Some(61));
}
