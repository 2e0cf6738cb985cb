// Error taxonomy for the chord-generation engine.
//
// Three families share one enum:
// - Validation: bad constructor, control, or event arguments. The offending
//   object or parameter change is refused outright; nothing half-built
//   survives.
// - Prediction: the predictor call failed or returned something that cannot
//   be read as a 12-bin distribution.
// - Range: a derived MIDI pitch or velocity left 0-127. The engine never
//   clamps, so the condition stays visible and the emission boundary decides
//   what to do with it.

use thiserror::Error;

/// Errors produced by the chord-generation engine.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Tonic outside the pitch-class range.
    #[error("tonic out of range: {0} (valid 0-11)")]
    TonicOutOfRange(i64),

    /// Note-inclusion threshold outside (0, 1].
    #[error("note threshold out of range: {0} (valid range (0, 1])")]
    ThresholdOutOfRange(f64),

    /// Feedback-mode flag other than 0 (raw) or 1 (thresholded).
    #[error("unknown feedback mode flag: {0} (0 = raw, 1 = thresholded)")]
    UnknownFeedbackMode(i64),

    /// A histogram with other than 12 entries.
    #[error("expected 12 histogram entries, got {0}")]
    HistogramShape(usize),

    /// A rolling window of length zero.
    #[error("sequence length must be at least 1")]
    EmptySequence,

    /// The predictor call itself failed.
    #[error("predictor failed: {0}")]
    Predictor(String),

    /// The predictor returned other than 12 entries.
    #[error("predictor returned {0} entries, expected 12")]
    PredictionShape(usize),

    /// The predictor returned entries that cannot form a distribution.
    #[error("predictor output is not normalizable: {0}")]
    PredictionValues(String),

    /// A voiced pitch or velocity fell outside the representable MIDI range.
    #[error("{what} {value} outside the MIDI range 0-127")]
    MidiRange { what: &'static str, value: i32 },
}
