// Protocol messages for controller-generator communication.
//
// Two enums define the full protocol vocabulary:
// - `ControllerMessage`: sent by controller clients (sequencer, keyboard
//   bridge, test harness) to the generator.
// - `GeneratorMessage`: sent by the generator to controller clients.
//
// All types derive `Serialize`/`Deserialize` for JSON framing (see
// `framing.rs`). The wire carries plain integers and floats — this crate has
// no dependency on the engine, so controllers written against it never pull
// in the prediction stack.

use serde::{Deserialize, Serialize};

/// Wire protocol version. Bumped on any incompatible message change; the
/// generator rejects hellos carrying a different version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent by a controller to the generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControllerMessage {
    /// Join the session (handshake). Must be the first message.
    Hello {
        protocol_version: u32,
        client_name: String,
    },
    /// One played melody note: MIDI pitch 0-127 and intensity 0-1.
    MelodyNote { pitch: u8, intensity: f64 },
    /// Change the session tonic (valid range 0-11).
    SetTonic { tonic: i64 },
    /// Change the note-inclusion threshold (valid range (0, 1]).
    SetNoteThreshold { threshold: f64 },
    /// Change the feedback mode: 0 = raw histogram, 1 = thresholded.
    SetFeedbackMode { mode: i64 },
    /// Controller is leaving gracefully.
    Goodbye,
}

/// Messages sent by the generator to controllers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GeneratorMessage {
    /// Handshake accepted; carries the live session parameters.
    Welcome {
        sequence_length: u32,
        tonic: u8,
        note_threshold: f64,
        feedback_mode: u8,
    },
    /// Handshake rejected; the connection closes after this.
    Rejected { reason: String },
    /// Note-on for one voiced chord tone.
    ChordNote { pitch: u8, velocity: u8 },
    /// Note-off for a previously sounding chord tone. Velocity is always 0.
    NoteOff { pitch: u8, velocity: u8 },
    /// Side channel: the thresholded histogram of the just-generated chord.
    Histogram { bins: [f64; 12] },
}
