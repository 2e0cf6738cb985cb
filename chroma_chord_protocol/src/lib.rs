// chroma_chord_protocol — wire protocol for chord-generation sessions.
//
// This crate defines the message types, framing, and serialization used by
// the generator server (`chroma_chord_server`) and controller clients to
// communicate over TCP. It is shared between both sides and has no dependency
// on the engine crate.
//
// Module overview:
// - `message.rs`:  Controller-to-generator and generator-to-controller
//                  message enums, plus the protocol version constant.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then JSON payload.
//
// Design decisions:
// - **JSON serialization.** Human-readable frames make controller bridges
//   (and `nc`-level debugging) trivial; chord traffic is far too small for
//   encoding overhead to matter.
// - **Plain scalars on the wire.** Pitch, tonic, and threshold travel as
//   bare integers/floats; range validation belongs to the engine so that a
//   rejected value provably leaves session parameters unchanged.
// - **No async runtime.** Uses `std::io::Read`/`Write` for framing,
//   compatible with both blocking TCP streams and buffered wrappers.

pub mod framing;
pub mod message;

pub use framing::{MAX_FRAME_LEN, read_frame, write_frame};
pub use message::{ControllerMessage, GeneratorMessage, PROTOCOL_VERSION};
