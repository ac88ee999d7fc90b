//! End-to-end tests through the umbrella crate: MIDI in, audio out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chorale::prelude::*;
use chorale::{fault_channel, MidiRecorder};
use parking_lot::Mutex;

const SR: f32 = 48_000.0;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine(release: f32) -> ChoraleEngine {
    let definition = VoiceDefinition::builder("sine")
        .waveform(Waveform::Sine)
        .envelope(EnvelopeConfig::new(0.01, 0.05, 0.8, release))
        .build()
        .unwrap();
    ChoraleEngine::builder()
        .sample_rate(SR)
        .instrument(Instrument::single("sine", definition))
        .build()
        .unwrap()
}

fn render(engine: &mut ChoraleEngine, frames: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; frames * 2];
    assert_eq!(engine.render(&mut out, frames).unwrap(), frames);
    out
}

/// Captures everything it receives; optionally fails on the Nth message.
struct Capture {
    name: String,
    received: Mutex<Vec<MidiMessage>>,
    attempts: AtomicUsize,
    fail_on: Option<usize>,
}

impl Capture {
    fn new(fail_on: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            name: "capture".into(),
            received: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_on,
        })
    }
}

impl MidiDestination for Capture {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &MidiMessage) -> chorale::midi::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(attempt) == self.fail_on {
            return Err(chorale::midi::Error::Send("port unplugged".into()));
        }
        self.received.lock().push(*message);
        Ok(())
    }
}

#[test]
fn test_note_plays_and_is_removed_after_release() {
    init_tracing();
    let mut engine = engine(0.1);
    let keyboard = MidiSource::new("keyboard");
    engine.connect_source(&keyboard).unwrap();

    keyboard.emit_message(MidiMessage::note_on(0, 69, 100));
    let block = render(&mut engine, 4_800);
    assert_eq!(engine.mixer().active_voices(), 1);
    let peak = block.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.3, "peak {peak}");

    keyboard.emit_message(MidiMessage::note_off(0, 69, 0));
    render(&mut engine, 2_400);
    assert_eq!(engine.mixer().active_voices(), 1);

    // 0.1 s release = 4800 frames from note-off
    render(&mut engine, 2_500);
    assert_eq!(engine.mixer().active_voices(), 0);
    assert!(render(&mut engine, 256).iter().all(|&s| s == 0.0));
}

#[test]
fn test_transpose_then_velocity_scale() {
    let source = MidiSource::new("in");
    let capture = Capture::new(None);
    let engine = engine(0.1);
    let route = engine.connect(&source, capture.clone());
    route.add_processor(ModifierConfig::Transpose { semitones: 12 }.into_modifier().unwrap());
    route.add_processor(ModifierConfig::VelocityScale { factor: 0.5 }.into_modifier().unwrap());

    source.emit_message(MidiMessage::note_on(0, 60, 100));

    let received = capture.received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].note(), Some(72));
    assert_eq!(received[0].velocity(), Some(50));
}

#[test]
fn test_send_failure_faults_route_only() {
    init_tracing();
    let engine = engine(0.1);
    let (observer, faults) = fault_channel(8);
    engine.router().observe(observer);

    let source = MidiSource::new("in");
    let failing = Capture::new(Some(3));
    let healthy = Capture::new(None);
    let bad_route = engine.connect(&source, failing.clone());
    let good_route = engine.connect(&source, healthy.clone());

    for note in 60..66 {
        source.emit_message(MidiMessage::note_on(0, note, 100));
    }

    assert!(bad_route.is_faulted());
    assert!(!good_route.is_faulted());
    assert_eq!(failing.attempts.load(Ordering::SeqCst), 3);
    let delivered: Vec<_> = failing.received.lock().iter().filter_map(|m| m.note()).collect();
    assert_eq!(delivered, vec![60, 61]);
    assert_eq!(healthy.received.lock().len(), 6);

    let fault = faults.try_recv().unwrap();
    assert_eq!(fault.route, bad_route.id());
    assert!(faults.try_recv().is_err());

    // A rebuilt route carries traffic again
    let rebuilt = engine.router().reconstruct(bad_route.id()).unwrap();
    source.emit_message(MidiMessage::note_on(0, 70, 100));
    assert!(!rebuilt.is_faulted());
    assert_eq!(failing.received.lock().last().and_then(|m| m.note()), Some(70));
}

#[test]
fn test_program_change_switches_instrument() {
    let bank = Arc::new(StaticBank::new());
    let sampled = SampleData::new(vec![0.5f32; 480], SR, 60).unwrap();
    let drum = VoiceDefinition::builder("hit")
        .envelope(EnvelopeConfig::organ())
        .sample(Arc::new(sampled))
        .build()
        .unwrap();
    bank.insert(0, 10, Instrument::single("kit", drum));

    let mut engine = ChoraleEngine::builder()
        .sample_rate(SR)
        .bank(bank)
        .build()
        .unwrap();
    let keyboard = MidiSource::new("pads");
    engine.connect_source(&keyboard).unwrap();

    keyboard.emit_message(MidiMessage::program_change(9, 10));
    assert_eq!(engine.synth().instrument(9).name(), "kit");
    assert_eq!(engine.synth().instrument(0).name(), "default");

    keyboard.emit_message(MidiMessage::note_on(9, 60, 127));
    render(&mut engine, 256);
    assert_eq!(engine.mixer().active_voices(), 1);
    // One-shot sample of 480 frames ends on its own, no note-off needed
    render(&mut engine, 512);
    assert_eq!(engine.mixer().active_voices(), 0);
}

#[test]
fn test_config_chain_applies_to_synth_routes() {
    let config: EngineConfig = serde_json::from_str(
        r#"{
            "mixer": { "sample_rate": 48000.0, "max_voices": 4 },
            "synth_chain": [
                { "id": 7, "enabled": true, "config": { "type": "chord", "intervals": [4, 7] } }
            ]
        }"#,
    )
    .unwrap();

    let mut engine = ChoraleEngine::builder().config(config).build().unwrap();
    let keyboard = MidiSource::new("keyboard");
    let route = engine.connect_source(&keyboard).unwrap();
    assert_eq!(route.processors().len(), 1);

    keyboard.emit_message(MidiMessage::note_on(0, 60, 100));
    render(&mut engine, 64);
    assert_eq!(engine.mixer().active_voices(), 3);
}

#[test]
fn test_invalid_config_is_rejected() {
    assert!(matches!(
        ChoraleEngine::builder().max_voices(0).build(),
        Err(chorale::Error::Core(_))
    ));
    let bad_chain = EngineConfig {
        synth_chain: vec![chorale::midi::ModifierPreset {
            id: chorale::midi::ModifierId(1),
            enabled: true,
            config: ModifierConfig::VelocityScale { factor: -1.0 },
        }],
        ..EngineConfig::default()
    };
    assert!(matches!(
        ChoraleEngine::builder().config(bad_chain).build(),
        Err(chorale::Error::Midi(_))
    ));
}

#[test]
fn test_recorder_tap_alongside_synth() {
    let mut engine = engine(0.05);
    let keyboard = MidiSource::new("keyboard");
    engine.connect_source(&keyboard).unwrap();

    let recorder = MidiRecorder::new();
    keyboard.subscribe(recorder.clone());
    recorder.start();

    keyboard.emit_message(MidiMessage::note_on(0, 64, 90));
    keyboard.emit_message(MidiMessage::note_off(0, 64, 0));
    render(&mut engine, 128);

    assert_eq!(recorder.event_count(), 2);
    let smf = recorder.to_smf_bytes(480, 120.0).unwrap();
    assert_eq!(&smf[..4], b"MThd");
}

#[test]
fn test_mixer_taken_for_custom_driver() {
    let mut engine = engine(0.05);
    let mut mixer = engine.take_mixer().unwrap();
    let mut out = vec![0.0f32; 64];
    assert!(matches!(
        engine.render(&mut out, 32),
        Err(chorale::Error::MixerInUse)
    ));
    assert_eq!(mixer.render(&mut out, 32), 32);
}
