// Service state for the generator server.
//
// `GeneratorService` is the central data structure that `server.rs` drives.
// It owns the one `GenerationSession`, the roster of connected controller
// clients, and the optional MIDI capture. All mutation happens through
// methods called from the server's single-threaded event loop — no internal
// locking, and the predictor call inside a melody event blocks the loop by
// design (events are strictly serial).
//
// Key responsibilities:
// - Client management: add/remove clients, assign IDs, version-check and
//   roster-cap on join, Welcome with the live session parameters.
// - Event dispatch: validate incoming melody events, run them through the
//   session, and broadcast the resulting note and histogram traffic to every
//   client.
// - Range policy: a voiced note whose pitch or velocity falls outside 0-127
//   is logged and dropped at this boundary, never clamped. The histogram
//   side channel is unaffected.
//
// Writing to client streams: the service holds cloned `TcpStream` write
// halves wrapped in `BufWriter`. The `send_to` / `broadcast` helpers
// serialize a `GeneratorMessage` to JSON, frame it, and write it out. Write
// errors on a single client are ignored — the reader thread for that client
// will detect the broken pipe and send a `Disconnected` event.

use std::collections::BTreeMap;
use std::fmt;
use std::io::BufWriter;
use std::net::TcpStream;

use chroma_chord_engine::{
    ChordSink, ChromaHistogram, ChromaPredictor, GenerationError, GenerationSession,
    SessionConfig, VoicedNote,
};
use chroma_chord_protocol::framing::write_frame;
use chroma_chord_protocol::message::{GeneratorMessage, PROTOCOL_VERSION};

use crate::recorder::SessionRecorder;

/// Server-local client identifier, assigned at handshake. Never appears on
/// the wire — all chord traffic is broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ClientState {
    name: String,
    writer: BufWriter<TcpStream>,
}

/// Generator service managing one chord session and its controller clients.
pub struct GeneratorService {
    session: GenerationSession,
    clients: BTreeMap<ClientId, ClientState>,
    next_client_id: u32,
    max_clients: u32,
    recorder: Option<SessionRecorder>,
}

impl GeneratorService {
    pub fn new(
        config: &SessionConfig,
        predictor: Box<dyn ChromaPredictor + Send>,
        max_clients: u32,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, GenerationError> {
        Ok(GeneratorService {
            session: GenerationSession::new(config, predictor)?,
            clients: BTreeMap::new(),
            next_client_id: 0,
            max_clients,
            recorder,
        })
    }

    /// Attempt to add a client. Returns the assigned client ID on success,
    /// or an error reason string on failure.
    ///
    /// The returned `ClientId` should be used to tag the reader thread for
    /// this connection so that subsequent events carry the correct ID.
    pub fn add_client(
        &mut self,
        client_name: String,
        protocol_version: u32,
        stream: TcpStream,
    ) -> Result<ClientId, String> {
        if protocol_version != PROTOCOL_VERSION {
            return Err(format!(
                "unsupported protocol version {protocol_version} (server speaks {PROTOCOL_VERSION})"
            ));
        }

        if self.clients.len() as u32 >= self.max_clients {
            return Err("session is full".into());
        }

        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;

        let writer = BufWriter::new(stream);
        self.clients.insert(
            id,
            ClientState {
                name: client_name.clone(),
                writer,
            },
        );

        // Welcome carries the live parameters so late joiners see any
        // control changes made before they arrived.
        let welcome = GeneratorMessage::Welcome {
            sequence_length: self.session.sequence_length() as u32,
            tonic: self.session.tonic(),
            note_threshold: self.session.note_threshold(),
            feedback_mode: self.session.feedback_mode().flag(),
        };
        send_to(&mut self.clients, id, &welcome);

        log::info!(
            "client {id} ({client_name}) joined, roster size {}",
            self.clients.len()
        );
        Ok(id)
    }

    /// Remove a client from the roster.
    pub fn remove_client(&mut self, client_id: ClientId) {
        if let Some(state) = self.clients.remove(&client_id) {
            log::info!(
                "client {client_id} ({}) left, roster size {}",
                state.name,
                self.clients.len()
            );
        }
    }

    /// Validate and run one melody event. An invalid event is logged and
    /// dropped before it reaches the session; a per-event engine failure is
    /// logged and the session rolls itself back. Neither kills the service.
    pub fn handle_melody(&mut self, from: ClientId, pitch: u8, intensity: f64) {
        if pitch > 127 {
            log::warn!("client {from}: melody pitch {pitch} out of range, event dropped");
            return;
        }
        if !intensity.is_finite() {
            log::warn!("client {from}: melody intensity is not finite, event dropped");
            return;
        }

        let mut outbox = Outbox {
            clients: &mut self.clients,
            recorder: self.recorder.as_mut(),
        };
        if let Err(err) = self.session.handle_melody_event(pitch, intensity, &mut outbox) {
            log::warn!("client {from}: melody event (pitch {pitch}) failed: {err}");
        }
    }

    /// Change the session tonic. A rejected value is logged and the prior
    /// one stays in effect.
    pub fn set_tonic(&mut self, from: ClientId, tonic: i64) {
        match self.session.set_tonic(tonic) {
            Ok(()) => log::info!("client {from} set tonic to {tonic}"),
            Err(err) => log::warn!("client {from}: rejected control message: {err}"),
        }
    }

    /// Change the note-inclusion threshold.
    pub fn set_note_threshold(&mut self, from: ClientId, threshold: f64) {
        match self.session.set_note_threshold(threshold) {
            Ok(()) => log::info!("client {from} set note threshold to {threshold}"),
            Err(err) => log::warn!("client {from}: rejected control message: {err}"),
        }
    }

    /// Change the feedback mode from its wire flag.
    pub fn set_feedback_mode(&mut self, from: ClientId, mode: i64) {
        match self.session.set_feedback_mode(mode) {
            Ok(()) => log::info!("client {from} set feedback mode to {mode}"),
            Err(err) => log::warn!("client {from}: rejected control message: {err}"),
        }
    }

    /// Returns the number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Flush the MIDI capture, if one was requested. Called once at
    /// shutdown.
    pub fn finish(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            let path = recorder.path().to_path_buf();
            let events = recorder.event_count();
            match recorder.finish() {
                Ok(()) => {
                    log::info!("wrote {events} captured events to {}", path.display());
                }
                Err(err) => {
                    log::warn!("failed to write capture to {}: {err}", path.display());
                }
            }
        }
    }
}

/// Broadcast sink for one melody event. Converts engine notes to wire
/// messages, dropping any note that fails the 0-127 range check.
struct Outbox<'a> {
    clients: &'a mut BTreeMap<ClientId, ClientState>,
    recorder: Option<&'a mut SessionRecorder>,
}

impl ChordSink for Outbox<'_> {
    fn note(&mut self, note: VoicedNote) {
        let (pitch, velocity) = match note.midi() {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("dropping note: {err}");
                return;
            }
        };
        let msg = if velocity == 0 {
            GeneratorMessage::NoteOff { pitch, velocity }
        } else {
            GeneratorMessage::ChordNote { pitch, velocity }
        };
        broadcast(self.clients, &msg);
        if let Some(recorder) = self.recorder.as_deref_mut() {
            recorder.record_note(pitch, velocity);
        }
    }

    fn histogram(&mut self, bins: &ChromaHistogram) {
        broadcast(self.clients, &GeneratorMessage::Histogram { bins: *bins });
    }
}

/// Send a message to a specific client. Silently ignores write errors
/// (the reader thread will detect the broken pipe).
fn send_to(clients: &mut BTreeMap<ClientId, ClientState>, id: ClientId, msg: &GeneratorMessage) {
    if let Some(state) = clients.get_mut(&id) {
        let _ = write_frame(&mut state.writer, msg);
    }
}

/// Broadcast a message to all connected clients.
fn broadcast(clients: &mut BTreeMap<ClientId, ClientState>, msg: &GeneratorMessage) {
    let ids: Vec<ClientId> = clients.keys().copied().collect();
    for id in ids {
        send_to(clients, id, msg);
    }
}
