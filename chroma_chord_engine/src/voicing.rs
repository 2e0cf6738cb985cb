// Intensity-driven chord voicing.
//
// A pure mapping from a chord's thresholded histogram plus a 0-1 intensity
// scalar to concrete MIDI notes. Intensity picks the octave register
// (harder playing reaches lower and wider) and sets one shared velocity;
// per-class amounts above `lower_octave_threshold` drop their note an
// extra octave so the strongest chord tones anchor the bottom.
//
// Two inclusion tests meet here and they are intentionally different:
// computing the thresholded histogram keeps entries strictly greater than
// the note threshold, while voicing includes amounts greater than OR equal
// to it. Renormalization in between means an entry can survive the first
// test and still fail the second. Inherited boundary tuning; both
// comparisons are kept exactly as they have always been.

use crate::chord::Chord;
use crate::error::GenerationError;

/// One concrete note of a voiced chord. Pitch and velocity are plain `i32`
/// and deliberately unclamped; `midi()` converts to wire-ready bytes and
/// reports a range violation instead of hiding it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoicedNote {
    pub pitch: i32,
    pub velocity: i32,
}

impl VoicedNote {
    /// Wire-ready `(pitch, velocity)`, or the range error if either falls
    /// outside 0-127.
    pub fn midi(&self) -> Result<(u8, u8), GenerationError> {
        let pitch = u8::try_from(self.pitch)
            .ok()
            .filter(|p| *p <= 127)
            .ok_or(GenerationError::MidiRange {
                what: "pitch",
                value: self.pitch,
            })?;
        let velocity = u8::try_from(self.velocity)
            .ok()
            .filter(|v| *v <= 127)
            .ok_or(GenerationError::MidiRange {
                what: "velocity",
                value: self.velocity,
            })?;
        Ok((pitch, velocity))
    }
}

/// Stateless voicer; the only knob is the amount breakpoint that sends a
/// note down an octave.
#[derive(Clone, Copy, Debug)]
pub struct VoicingEngine {
    lower_octave_threshold: f64,
}

impl Default for VoicingEngine {
    fn default() -> Self {
        VoicingEngine::new(0.25)
    }
}

impl VoicingEngine {
    pub fn new(lower_octave_threshold: f64) -> Self {
        VoicingEngine {
            lower_octave_threshold,
        }
    }

    /// Voice `chord` at `intensity`.
    ///
    /// Walks the thresholded histogram in ascending pitch-class order and
    /// includes class `p` with amount `a` iff `a >= chord.note_threshold()`.
    /// Every included note shares velocity `30 + floor(intensity * 97)`.
    /// Final pitch is `base_octave + p + tonic`, unclamped. An empty result
    /// is valid silence, not an error.
    pub fn voice(&self, chord: &Chord, intensity: f64) -> Vec<VoicedNote> {
        let hist = chord.thresholded_histogram();
        #[expect(clippy::cast_possible_truncation)]
        let velocity = 30 + (intensity * 97.0) as i32;

        let mut notes = Vec::new();
        for pc in 0u8..12 {
            let amount = hist[usize::from(pc)];
            if amount < chord.note_threshold() {
                continue;
            }
            let base = self.base_octave(intensity, amount);
            notes.push(VoicedNote {
                pitch: base + i32::from(pc) + i32::from(chord.tonic()),
                velocity,
            });
        }
        notes
    }

    /// Octave table. High intensity reaches for 36 when the amount clears
    /// the lower-octave breakpoint; low intensity floats weak tones up to
    /// 72.
    fn base_octave(&self, intensity: f64, amount: f64) -> i32 {
        let low = amount > self.lower_octave_threshold;
        if intensity >= 0.45 {
            if low { 36 } else { 60 }
        } else if intensity >= 0.25 {
            if low { 48 } else { 60 }
        } else if low {
            48
        } else {
            72
        }
    }
}
