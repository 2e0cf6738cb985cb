// One predicted chord, frozen at the moment of prediction.
//
// A Chord binds the predictor's raw histogram to the tonic and note
// threshold that were live when the melody event arrived, so later control
// changes never leak into a chord already in flight. The thresholded form
// is derived on demand; the raw form is kept because the feedback mode may
// fold either variant back into the rolling buffer.

use crate::error::GenerationError;
use crate::histogram::{ChromaHistogram, PITCH_CLASSES, thresholded};
use crate::voicing::{VoicedNote, VoicingEngine};

/// Immutable chord snapshot: raw histogram + tonic + note threshold.
#[derive(Clone, Debug)]
pub struct Chord {
    tonic: u8,
    raw: ChromaHistogram,
    note_threshold: f64,
}

impl Chord {
    /// Validates everything up front: `raw` must have exactly 12 entries,
    /// `tonic` must be a pitch class (0-11), `note_threshold` must lie in
    /// (0, 1]. Any violation refuses construction; there is no
    /// partially-built Chord.
    pub fn new(raw: &[f64], tonic: u8, note_threshold: f64) -> Result<Self, GenerationError> {
        if raw.len() != PITCH_CLASSES {
            return Err(GenerationError::HistogramShape(raw.len()));
        }
        if tonic > 11 {
            return Err(GenerationError::TonicOutOfRange(i64::from(tonic)));
        }
        // A NaN threshold fails both comparisons and lands here too.
        if !(note_threshold > 0.0 && note_threshold <= 1.0) {
            return Err(GenerationError::ThresholdOutOfRange(note_threshold));
        }
        let mut bins = [0.0; PITCH_CLASSES];
        bins.copy_from_slice(raw);
        Ok(Chord {
            tonic,
            raw: bins,
            note_threshold,
        })
    }

    pub fn tonic(&self) -> u8 {
        self.tonic
    }

    pub fn note_threshold(&self) -> f64 {
        self.note_threshold
    }

    pub fn raw_histogram(&self) -> &ChromaHistogram {
        &self.raw
    }

    /// The raw histogram with everything at or below the note threshold
    /// zeroed and the survivors renormalized to sum 1 (all-zero when
    /// nothing survives). Recomputed per call; it is 12 comparisons.
    pub fn thresholded_histogram(&self) -> ChromaHistogram {
        thresholded(&self.raw, self.note_threshold)
    }

    /// Voice this chord at the given intensity.
    pub fn voiced(&self, voicing: &VoicingEngine, intensity: f64) -> Vec<VoicedNote> {
        voicing.voice(self, intensity)
    }
}
