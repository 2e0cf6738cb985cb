// chroma_chord_engine — the real-time chord-generation core.
//
// Turns a live stream of (melody pitch, intensity) events into voiced
// chords. Every event runs the same pipeline: silence the previous chord,
// fold the melody note into a rolling feature window, ask a pluggable
// predictor for a pitch-class distribution, threshold it into a chord,
// voice the chord by intensity, emit, and feed the chosen histogram
// variant back into the window for the next prediction.
//
// Module overview:
// - `histogram.rs`: the 12-bin chroma histogram type and its pure
//                   normalize/threshold helpers.
// - `buffer.rs`:    `InputSequenceBuffer`, the fixed-length L x 13 rolling
//                   window the predictor reads.
// - `chord.rs`:     `Chord`, an immutable (histogram, tonic, threshold)
//                   snapshot created once per event.
// - `voicing.rs`:   `VoicingEngine`, intensity-driven mapping from a chord
//                   to concrete MIDI notes.
// - `predictor.rs`: the `ChromaPredictor` capability trait and the bundled
//                   transition-table implementation.
// - `session.rs`:   `GenerationSession`, the per-event state machine and
//                   control-parameter owner.
// - `error.rs`:     `GenerationError`, the validation/prediction/range
//                   taxonomy.
//
// The crate is transport-free: events arrive as plain method calls and
// leave through the `ChordSink` trait, so the server crate owns all
// socket concerns.

pub mod buffer;
pub mod chord;
pub mod error;
pub mod histogram;
pub mod predictor;
pub mod session;
pub mod voicing;

pub use buffer::{InputSequenceBuffer, ROW_WIDTH, UpdateDirection, WarmStart};
pub use chord::Chord;
pub use error::GenerationError;
pub use histogram::{ChromaHistogram, PITCH_CLASSES};
pub use predictor::{ChromaPredictor, TransitionModel, TransitionPredictor};
pub use session::{ChordSink, FeedbackMode, GenerationSession, SessionConfig};
pub use voicing::{VoicedNote, VoicingEngine};
