// Optional capture of the generated chord stream to a MIDI file.
//
// The service hands every in-range note event to the recorder as it goes out
// on the wire. Events accumulate in memory with wall-clock offsets from the
// moment the recorder was created; `finish()` converts them to a Standard
// MIDI File and writes it in one shot when the server stops. Nothing is ever
// read back — the capture exists so a take can be listened to later.
//
// Uses the `midly` crate for MIDI writing. Output is SMF Format 0 (single
// track) at a fixed 120 BPM, so one wall-clock second spans two quarter
// notes of MIDI time.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use midly::{
    Format, Header, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// Tempo meta value: microseconds per quarter note (120 BPM).
const MICROS_PER_QUARTER: u32 = 500_000;

/// One captured note event. Velocity 0 is a note-off.
struct CapturedEvent {
    at: Duration,
    pitch: u8,
    velocity: u8,
}

/// Accumulates the outgoing chord stream and writes it as one SMF.
pub struct SessionRecorder {
    path: PathBuf,
    started: Instant,
    events: Vec<CapturedEvent>,
}

impl SessionRecorder {
    pub fn new(path: PathBuf) -> Self {
        SessionRecorder {
            path,
            started: Instant::now(),
            events: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Capture one note event at the current wall-clock offset. The caller
    /// has already range-checked pitch and velocity to 0-127.
    pub fn record_note(&mut self, pitch: u8, velocity: u8) {
        self.push_event(self.started.elapsed(), pitch, velocity);
    }

    fn push_event(&mut self, at: Duration, pitch: u8, velocity: u8) {
        self.events.push(CapturedEvent {
            at,
            pitch,
            velocity,
        });
    }

    /// Convert the capture to an SMF and write it to the configured path.
    pub fn finish(self) -> Result<(), Box<dyn std::error::Error>> {
        let smf = self.to_smf();
        let mut buf = Vec::new();
        smf.write(&mut buf)?;
        std::fs::write(&self.path, &buf)?;
        Ok(())
    }

    /// Build the in-memory SMF: tempo meta, then every captured event with
    /// its wall-clock offset converted to a tick delta.
    fn to_smf(&self) -> Smf<'static> {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
        ));

        let mut track: Track<'static> = Vec::new();
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(midly::MetaMessage::TrackName(b"chroma chords")),
        });
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(midly::MetaMessage::Tempo(u24::new(MICROS_PER_QUARTER))),
        });

        let mut last_tick: u32 = 0;
        for event in &self.events {
            let tick = tick_at(event.at);
            let delta = tick.saturating_sub(last_tick);
            last_tick = tick;

            let message = if event.velocity == 0 {
                MidiMessage::NoteOff {
                    key: u7::new(event.pitch),
                    vel: u7::new(0),
                }
            } else {
                MidiMessage::NoteOn {
                    key: u7::new(event.pitch),
                    vel: u7::new(event.velocity),
                }
            };
            track.push(TrackEvent {
                delta: u28::new(delta),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message,
                },
            });
        }

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);

        smf
    }
}

/// Absolute tick for a wall-clock offset at the fixed tempo.
fn tick_at(at: Duration) -> u32 {
    let ticks =
        at.as_micros() * u128::from(TICKS_PER_QUARTER) / u128::from(MICROS_PER_QUARTER);
    #[expect(clippy::cast_possible_truncation)]
    let ticks = ticks as u32;
    ticks
}
