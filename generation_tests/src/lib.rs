// Test-only controller for generator integration tests.
//
// Wraps the real `NetClient` (from `chroma_chord_server::client`) to provide
// a synchronous, test-friendly API for exercising the full pipeline:
// connect → melody note → session → voicing → broadcast → verify traffic.
//
// The only test-specific code here is the synchronous polling wrappers
// (blocking loops around `NetClient::poll()`). All networking and framing
// uses the same code paths as a real controller.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use chroma_chord_protocol::message::GeneratorMessage;
use chroma_chord_server::client::{NetClient, WelcomeInfo};

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A test controller wrapping a real NetClient.
pub struct TestController {
    client: NetClient,
    pub welcome: WelcomeInfo,
}

impl TestController {
    /// Connect to a generator server and perform the Hello handshake.
    pub fn connect(addr: SocketAddr, name: &str) -> Self {
        let addr_str = addr.to_string();
        let (client, welcome) =
            NetClient::connect(&addr_str, name).expect("TestController::connect failed");
        Self { client, welcome }
    }

    /// Send one melody note to the generator.
    pub fn play(&mut self, pitch: u8, intensity: f64) {
        self.client
            .send_melody_note(pitch, intensity)
            .expect("send_melody_note failed");
    }

    /// Request a tonic change (the server may reject it).
    pub fn set_tonic(&mut self, tonic: i64) {
        self.client.send_set_tonic(tonic).expect("send_set_tonic failed");
    }

    /// Request a note-threshold change.
    pub fn set_note_threshold(&mut self, threshold: f64) {
        self.client
            .send_set_note_threshold(threshold)
            .expect("send_set_note_threshold failed");
    }

    /// Request a feedback-mode change (0 = raw, 1 = thresholded).
    pub fn set_feedback_mode(&mut self, mode: i64) {
        self.client
            .send_set_feedback_mode(mode)
            .expect("send_set_feedback_mode failed");
    }

    /// Raw poll: return all pending generator messages without waiting.
    pub fn poll_raw(&self) -> Vec<GeneratorMessage> {
        self.client.poll()
    }

    /// Blocking poll until one full event's traffic has arrived. An event
    /// always ends with its Histogram broadcast, so this collects messages
    /// until the first Histogram (inclusive) and returns them in arrival
    /// order.
    pub fn poll_until_histogram(&mut self) -> Vec<GeneratorMessage> {
        let start = Instant::now();
        let mut collected = Vec::new();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for Histogram; got {collected:?}"
            );
            for msg in self.client.poll() {
                let is_histogram = matches!(msg, GeneratorMessage::Histogram { .. });
                collected.push(msg);
                if is_histogram {
                    return collected;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Send Goodbye and close the connection.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }
}

/// Split one event's traffic into (note-off pitches, note-on pitches).
/// Panics if a message other than ChordNote/NoteOff/Histogram shows up.
pub fn split_event(messages: &[GeneratorMessage]) -> (Vec<u8>, Vec<u8>) {
    let mut offs = Vec::new();
    let mut ons = Vec::new();
    for msg in messages {
        match msg {
            GeneratorMessage::NoteOff { pitch, velocity } => {
                assert_eq!(*velocity, 0);
                offs.push(*pitch);
            }
            GeneratorMessage::ChordNote { pitch, .. } => ons.push(*pitch),
            GeneratorMessage::Histogram { .. } => {}
            other => panic!("unexpected message in event traffic: {other:?}"),
        }
    }
    (offs, ons)
}
