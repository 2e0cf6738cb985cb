// chroma_chord_server — TCP generator service for live chord accompaniment.
//
// This crate wraps the chord-generation engine in a network service:
// controller clients (a keyboard bridge, a sequencer, a test harness)
// connect over TCP, stream melody notes and control messages in, and
// receive the generated chord traffic broadcast back.
//
// Module overview:
// - `service.rs`:  `GeneratorService` — the one generation session, the
//                  client roster, and the broadcast/range policy. The core
//                  data structure that `server.rs` drives.
// - `server.rs`:   TCP listener, reader threads (one per client), and the
//                  main event loop. Uses `std::net` with a thread-per-reader
//                  architecture and an `mpsc` channel to funnel events into
//                  the single-threaded service.
// - `recorder.rs`: optional capture of the outgoing chord stream to a MIDI
//                  file, written on shutdown.
// - `client.rs`:   blocking `NetClient` for controller processes and tests.
//
// Dependencies: `chroma_chord_engine` (the session itself) and
// `chroma_chord_protocol` (shared message types and framing).
//
// The generator can run as a standalone binary (`main.rs`) or be embedded
// in another process via the library API (`start_server`).

pub mod client;
pub mod recorder;
pub mod server;
pub mod service;

pub use server::start_server;
