// TCP server and main event loop for the chord generator.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Accept thread** (`TcpListener::accept()` loop): hands each new TCP
//   connection to the main thread as `LoopEvent::Connected`.
// - **Reader threads** (one per client): call `read_frame()` in a loop and
//   forward each decoded `ControllerMessage` as `LoopEvent::Inbound`. On
//   error or EOF they send `LoopEvent::Dropped` and exit.
// - **Main thread**: owns the `GeneratorService`, receives events from the
//   channel, and dispatches them strictly in arrival order. A melody event
//   blocks the loop for the duration of its predictor call — the session is
//   serial, and a controller that floods events only delays later ones, it
//   never interleaves them.
//
// The main thread is the only writer to client TCP streams (via the
// service's broadcast helpers). Reader threads only read from streams. This
// avoids concurrent read/write on the same `TcpStream`, which is safe on
// most platforms but fragile.
//
// Shutdown: the main thread checks a `running` flag (cleared by
// `ServerHandle::stop`), breaks out of the event loop, and flushes the MIDI
// capture.

use std::io::{BufReader, BufWriter};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use chroma_chord_engine::{ChromaPredictor, SessionConfig};
use chroma_chord_protocol::framing::{read_frame, write_frame};
use chroma_chord_protocol::message::{ControllerMessage, GeneratorMessage};

use crate::recorder::SessionRecorder;
use crate::service::{ClientId, GeneratorService};

/// Events funneled from accept/reader threads into the main thread.
enum LoopEvent {
    Connected(TcpStream),
    Inbound(ClientId, ControllerMessage),
    Dropped(ClientId),
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal the server to stop and wait for it to shut down. The MIDI
    /// capture, if any, is written before this returns.
    pub fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

/// Configuration for starting a generator server.
pub struct ServerConfig {
    pub port: u16,
    pub max_clients: u32,
    pub session: SessionConfig,
    /// Capture the outgoing chord stream to this MIDI file on shutdown.
    pub record_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9963,
            max_clients: 8,
            session: SessionConfig::default(),
            record_path: None,
        }
    }
}

/// Start the generator server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used to
/// let the OS pick a free port).
///
/// Session parameter validation happens here, before any socket is opened;
/// a bad configuration comes back as `InvalidInput`.
pub fn start_server(
    config: ServerConfig,
    predictor: Box<dyn ChromaPredictor + Send>,
) -> std::io::Result<(ServerHandle, std::net::SocketAddr)> {
    let recorder = config.record_path.map(SessionRecorder::new);
    let service = GeneratorService::new(&config.session, predictor, config.max_clients, recorder)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port))?;
    let addr = listener.local_addr()?;
    let running = Arc::new(AtomicBool::new(true));

    let thread = {
        let running = Arc::clone(&running);
        thread::spawn(move || run_server(listener, service, &running))
    };

    Ok((
        ServerHandle {
            running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main server loop. Runs until `running` is cleared.
fn run_server(listener: TcpListener, mut service: GeneratorService, running: &Arc<AtomicBool>) {
    let (event_tx, event_rx) = mpsc::channel::<LoopEvent>();

    // Non-blocking accept so the thread can notice a stop request.
    listener.set_nonblocking(true).ok();
    {
        let running = Arc::clone(running);
        let event_tx = event_tx.clone();
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false).ok();
                        let _ = event_tx.send(LoopEvent::Connected(stream));
                    }
                    Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(50));
                    }
                    Err(_) => break,
                }
            }
        });
    }

    // The timeout only bounds how long a stop request can go unnoticed;
    // there is no periodic work.
    while running.load(Ordering::SeqCst) {
        match event_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                dispatch(&mut service, event, &event_tx, running);
                // Drain whatever piled up while the last event was handled.
                while let Ok(event) = event_rx.try_recv() {
                    dispatch(&mut service, event, &event_tx, running);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    service.finish();
}

fn dispatch(
    service: &mut GeneratorService,
    event: LoopEvent,
    event_tx: &Sender<LoopEvent>,
    running: &Arc<AtomicBool>,
) {
    match event {
        LoopEvent::Connected(stream) => greet(service, stream, event_tx, running),
        LoopEvent::Inbound(client_id, message) => route(service, client_id, message),
        LoopEvent::Dropped(client_id) => service.remove_client(client_id),
    }
}

/// Handshake a new connection: expect Hello as the first frame, add the
/// client to the roster, and spawn its reader thread.
fn greet(
    service: &mut GeneratorService,
    stream: TcpStream,
    event_tx: &Sender<LoopEvent>,
    running: &Arc<AtomicBool>,
) {
    // Bound the handshake; the reader loop clears this again.
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok();

    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);

    let Ok(first) = read_frame::<_, ControllerMessage>(&mut reader) else {
        return;
    };
    let (protocol_version, client_name) = match first {
        ControllerMessage::Hello {
            protocol_version,
            client_name,
        } => (protocol_version, client_name),
        other => {
            log::warn!("first frame was not Hello ({other:?}), dropping connection");
            return;
        }
    };

    let Ok(write_half) = stream.try_clone() else {
        return;
    };
    match service.add_client(client_name, protocol_version, write_half) {
        Ok(client_id) => {
            stream.set_read_timeout(None).ok();
            let event_tx = event_tx.clone();
            let running = Arc::clone(running);
            thread::spawn(move || read_loop(reader, client_id, &event_tx, &running));
        }
        Err(reason) => {
            log::info!("refused connection: {reason}");
            let mut writer = BufWriter::new(stream);
            let _ = write_frame(&mut writer, &GeneratorMessage::Rejected { reason });
        }
    }
}

/// Reader loop for one client. Runs in its own thread until the stream
/// closes, a frame fails to decode, or the client says Goodbye.
fn read_loop(
    mut reader: BufReader<TcpStream>,
    client_id: ClientId,
    event_tx: &Sender<LoopEvent>,
    running: &Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match read_frame::<_, ControllerMessage>(&mut reader) {
            Ok(ControllerMessage::Goodbye) => break,
            Ok(message) => {
                let _ = event_tx.send(LoopEvent::Inbound(client_id, message));
            }
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                // Malformed frame: this client is out, nobody else is.
                log::warn!("client {client_id}: malformed frame ({err}), disconnecting");
                break;
            }
            Err(_) => break, // read error or EOF
        }
    }
    let _ = event_tx.send(LoopEvent::Dropped(client_id));
}

/// Route a decoded message that isn't part of connection setup or teardown
/// (Hello is consumed by `greet`, Goodbye by the reader loop).
fn route(service: &mut GeneratorService, client_id: ClientId, message: ControllerMessage) {
    match message {
        ControllerMessage::MelodyNote { pitch, intensity } => {
            service.handle_melody(client_id, pitch, intensity);
        }
        ControllerMessage::SetTonic { tonic } => {
            service.set_tonic(client_id, tonic);
        }
        ControllerMessage::SetNoteThreshold { threshold } => {
            service.set_note_threshold(client_id, threshold);
        }
        ControllerMessage::SetFeedbackMode { mode } => {
            service.set_feedback_mode(client_id, mode);
        }
        ControllerMessage::Hello { .. } | ControllerMessage::Goodbye => {}
    }
}
