// TCP client for connecting to the chord generator.
//
// Provides a non-blocking interface for a controller process to talk to the
// server. `connect()` performs the TCP connect and Hello handshake on the
// calling thread, then spawns a background reader that decodes incoming
// frames into an `mpsc` channel; `poll()` drains that channel without
// blocking. Sends go out synchronously through a `BufWriter` — chord-session
// messages are small enough that a blocking flush is fine.
//
// This module lives in the server crate rather than a crate of its own
// because it is purely std TCP + protocol framing + mpsc — available to the
// integration tests and to any embedding process without further
// dependencies.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chroma_chord_protocol::framing::{read_frame, write_frame};
use chroma_chord_protocol::message::{ControllerMessage, GeneratorMessage, PROTOCOL_VERSION};

/// Session parameters returned by a successful `connect()` handshake.
pub struct WelcomeInfo {
    pub sequence_length: u32,
    pub tonic: u8,
    pub note_threshold: f64,
    pub feedback_mode: u8,
}

/// TCP client for generator communication.
pub struct NetClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<GeneratorMessage>,
    _reader_thread: Option<JoinHandle<()>>,
}

impl NetClient {
    /// Connect to a generator server, perform the Hello handshake, and spawn
    /// a reader thread. Returns the client and welcome info on success.
    pub fn connect(addr: &str, client_name: &str) -> Result<(Self, WelcomeInfo), String> {
        let stream = TcpStream::connect(addr).map_err(|e| format!("connect failed: {e}"))?;
        // Bound the handshake; cleared again before the reader loop starts.
        stream.set_read_timeout(Some(Duration::from_secs(5))).ok();

        let read_half = stream
            .try_clone()
            .map_err(|e| format!("clone failed: {e}"))?;
        let mut reader = BufReader::new(read_half);
        let mut writer = BufWriter::new(stream);

        let hello = ControllerMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            client_name: client_name.into(),
        };
        write_frame(&mut writer, &hello).map_err(|e| format!("send Hello failed: {e}"))?;

        let welcome = match read_frame(&mut reader) {
            Ok(GeneratorMessage::Welcome {
                sequence_length,
                tonic,
                note_threshold,
                feedback_mode,
            }) => WelcomeInfo {
                sequence_length,
                tonic,
                note_threshold,
                feedback_mode,
            },
            Ok(GeneratorMessage::Rejected { reason }) => return Err(format!("rejected: {reason}")),
            Ok(other) => return Err(format!("unexpected response: {other:?}")),
            Err(e) => return Err(format!("read Welcome failed: {e}")),
        };

        if let Ok(inner) = reader.get_ref().try_clone() {
            inner.set_read_timeout(None).ok();
        }

        let (inbox_tx, inbox) = mpsc::channel();
        let reader_thread = thread::spawn(move || read_loop(reader, &inbox_tx));

        Ok((
            Self {
                writer,
                inbox,
                _reader_thread: Some(reader_thread),
            },
            welcome,
        ))
    }

    /// Send one melody note to the generator.
    pub fn send_melody_note(&mut self, pitch: u8, intensity: f64) -> Result<(), String> {
        self.send(&ControllerMessage::MelodyNote { pitch, intensity })
    }

    /// Request a tonic change.
    pub fn send_set_tonic(&mut self, tonic: i64) -> Result<(), String> {
        self.send(&ControllerMessage::SetTonic { tonic })
    }

    /// Request a note-threshold change.
    pub fn send_set_note_threshold(&mut self, threshold: f64) -> Result<(), String> {
        self.send(&ControllerMessage::SetNoteThreshold { threshold })
    }

    /// Request a feedback-mode change (0 = raw, 1 = thresholded).
    pub fn send_set_feedback_mode(&mut self, mode: i64) -> Result<(), String> {
        self.send(&ControllerMessage::SetFeedbackMode { mode })
    }

    /// Send Goodbye and close the connection.
    pub fn disconnect(&mut self) {
        let _ = self.send(&ControllerMessage::Goodbye);
    }

    /// Drain all queued generator messages (non-blocking).
    pub fn poll(&self) -> Vec<GeneratorMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            messages.push(msg);
        }
        messages
    }

    fn send(&mut self, msg: &ControllerMessage) -> Result<(), String> {
        write_frame(&mut self.writer, msg).map_err(|e| format!("send {msg:?} failed: {e}"))
    }
}

/// Reader thread: decode frames in a loop, push to the channel. Exits on any
/// read error (including EOF) or when the caller drops the receiver.
fn read_loop(mut reader: BufReader<TcpStream>, inbox_tx: &Sender<GeneratorMessage>) {
    while let Ok(msg) = read_frame::<_, GeneratorMessage>(&mut reader) {
        if inbox_tx.send(msg).is_err() {
            break;
        }
    }
}
