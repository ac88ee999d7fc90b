//! Recording tap and Standard MIDI File conversion.
//!
//! [`MidiRecorder`] is a read-only listener: subscribe it to a source next to
//! any routes and it captures what the source emits, stamped with its own
//! clock. Captures are written as format 0 SMF with metrical timing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use midly::live::LiveEvent;
use midly::num::{u15, u24, u28};
use midly::{Format, Header, MetaMessage, Smf, Timing, TrackEvent, TrackEventKind};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{MidiMessage, MidiPacket, SysExMessage, Timestamp};
use crate::source::{next_listener_id, ListenerId, MidiListener};

const DEFAULT_US_PER_BEAT: u32 = 500_000;

/// One captured packet. `time` is microseconds since recording started.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub time: Timestamp,
    pub packet: MidiPacket,
}

pub struct MidiRecorder {
    id: ListenerId,
    recording: AtomicBool,
    origin: Mutex<Option<Instant>>,
    events: Mutex<Vec<RecordedEvent>>,
}

impl MidiRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_listener_id(),
            recording: AtomicBool::new(false),
            origin: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        })
    }

    /// Clears previous captures and starts the clock.
    pub fn start(&self) {
        self.events.lock().clear();
        *self.origin.lock() = Some(Instant::now());
        self.recording.store(true, Ordering::Release);
        debug!("Recorder {} started", self.id);
    }

    pub fn stop(&self) {
        self.recording.store(false, Ordering::Release);
        debug!(
            "Recorder {} stopped with {} events",
            self.id,
            self.events.lock().len()
        );
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    /// Takes the captured events, leaving the recorder empty.
    pub fn take_events(&self) -> Vec<RecordedEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Encodes the current capture without consuming it.
    pub fn to_smf_bytes(&self, ppq: u16, bpm: f64) -> Result<Vec<u8>> {
        write_smf(&self.events.lock(), ppq, bpm)
    }

    fn elapsed_us(&self) -> Timestamp {
        self.origin
            .lock()
            .map(|origin| origin.elapsed().as_micros() as Timestamp)
            .unwrap_or(0)
    }
}

impl MidiListener for MidiRecorder {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    fn on_packet(&self, packet: &MidiPacket) {
        if !self.is_recording() {
            return;
        }
        let time = self.elapsed_us();
        self.events.lock().push(RecordedEvent {
            time,
            packet: packet.clone(),
        });
    }
}

impl std::fmt::Debug for MidiRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiRecorder")
            .field("id", &self.id)
            .field("recording", &self.is_recording())
            .field("events", &self.event_count())
            .finish()
    }
}

fn us_to_ticks(us: u64, ppq: u16, bpm: f64) -> u64 {
    (us as f64 * ppq as f64 * bpm / 60_000_000.0).round() as u64
}

/// Encodes events as a format 0 SMF. Events must be in time order.
pub fn write_smf(events: &[RecordedEvent], ppq: u16, bpm: f64) -> Result<Vec<u8>> {
    if ppq == 0 || ppq > 0x7FFF {
        return Err(Error::InvalidConfig(format!("ppq must be 1-32767, got {ppq}")));
    }
    if !(bpm.is_finite() && bpm > 0.0) {
        return Err(Error::InvalidConfig(format!("bpm must be positive, got {bpm}")));
    }

    // SMF stores SysEx without the leading F0
    let sysex_bodies: Vec<Option<&[u8]>> = events
        .iter()
        .map(|e| match &e.packet {
            MidiPacket::SysEx(s) => Some(&s.bytes()[1..]),
            MidiPacket::Channel(_) => None,
        })
        .collect();

    let us_per_beat = (60_000_000.0 / bpm).round().clamp(1.0, 0xFF_FFFF as f64) as u32;
    let mut track = Vec::with_capacity(events.len() + 2);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_beat))),
    });

    let mut last_tick = 0u64;
    for (event, sysex) in events.iter().zip(&sysex_bodies) {
        let kind = match (&event.packet, sysex) {
            (MidiPacket::Channel(message), _) => {
                let (bytes, len) = message.to_bytes();
                match LiveEvent::parse(&bytes[..len])? {
                    LiveEvent::Midi { channel, message } => TrackEventKind::Midi { channel, message },
                    _ => continue,
                }
            }
            (MidiPacket::SysEx(_), Some(body)) => TrackEventKind::SysEx(*body),
            (MidiPacket::SysEx(_), None) => continue,
        };

        let tick = us_to_ticks(event.time, ppq, bpm).max(last_tick);
        let delta = (tick - last_tick).min(0x0FFF_FFFF) as u32;
        last_tick = tick;
        track.push(TrackEvent {
            delta: u28::new(delta),
            kind,
        });
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(ppq))),
        tracks: vec![track],
    };
    let mut out = Vec::new();
    smf.write_std(&mut out)?;
    debug!("Wrote SMF: {} events, {} bytes", events.len(), out.len());
    Ok(out)
}

/// Decodes an SMF into time-ordered events.
///
/// Times use the first tempo event found (120 BPM if none). Tracks are merged.
pub fn read_smf(data: &[u8]) -> Result<Vec<RecordedEvent>> {
    let smf = Smf::parse(data)?;
    let ppq = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int() as u64,
        Timing::Timecode(..) => {
            return Err(Error::MidiFile("timecode timing is not supported".into()));
        }
    };

    let us_per_beat = smf
        .tracks
        .iter()
        .flat_map(|t| t.iter())
        .find_map(|e| match e.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(t.as_int()),
            _ => None,
        })
        .unwrap_or(DEFAULT_US_PER_BEAT) as u64;

    let mut events = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track.iter() {
            tick += event.delta.as_int() as u64;
            let time = tick * us_per_beat / ppq;
            let packet = match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let mut bytes = Vec::with_capacity(3);
                    LiveEvent::Midi { channel, message }.write_std(&mut bytes)?;
                    MidiPacket::Channel(MidiMessage::from_bytes(&bytes, time)?)
                }
                TrackEventKind::SysEx(body) => {
                    let mut bytes = Vec::with_capacity(body.len() + 1);
                    bytes.push(0xF0);
                    bytes.extend_from_slice(body);
                    match SysExMessage::new(bytes, time) {
                        Ok(sysex) => MidiPacket::SysEx(sysex),
                        // Split SysEx packets are not reassembled
                        Err(_) => continue,
                    }
                }
                _ => continue,
            };
            events.push(RecordedEvent { time, packet });
        }
    }
    events.sort_by_key(|e| e.time);
    debug!("Read SMF: {} events at {} ticks/beat", events.len(), ppq);
    Ok(events)
}
