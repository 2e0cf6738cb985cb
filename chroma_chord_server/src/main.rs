// chordgen — CLI entry point for the chroma chord generator.
//
// Starts a standalone generator server that controller clients connect to.
// The server turns incoming melody notes into broadcast chord voicings — see
// `server.rs` for the networking architecture and `service.rs` for the
// dispatch state.
//
// Usage:
//   chordgen [OPTIONS]
//     --port <PORT>            Listen port (default: 9963)
//     --max-clients <N>        Max controller clients (default: 8)
//     --sequence-length <L>    Rolling window length (default: 8)
//     --tonic <PC>             Tonic pitch class 0-11 (default: 0)
//     --threshold <T>          Note-inclusion threshold in (0, 1] (default: 0.14)
//     --feedback <MODE>        Histogram feedback: thresholded | raw
//     --direction <DIR>        Window update direction: append | prepend
//     --warm-start <FILL>      Initial window fill: random | zeros
//     --seed <N>               Seed for the warm-start rows
//     --model <PATH>           Transition model JSON (default: built-in)
//     --record <PATH>          Capture the chord stream to a MIDI file

use std::path::PathBuf;

use chroma_chord_engine::{
    FeedbackMode, TransitionModel, TransitionPredictor, UpdateDirection, WarmStart,
};
use chroma_chord_server::server::{ServerConfig, start_server};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config, model_path) = parse_args();

    let model = match &model_path {
        Some(path) => match TransitionModel::load(path) {
            Ok(model) => {
                log::info!("loaded transition model from {}", path.display());
                model
            }
            Err(err) => {
                log::warn!(
                    "failed to load {}: {err}; using the built-in model",
                    path.display()
                );
                TransitionModel::default_model()
            }
        },
        None => TransitionModel::default_model(),
    };
    let predictor = TransitionPredictor::new(model, config.session.update_direction);

    println!("=== Chroma Chord Generator ===");
    println!(
        "Window {} | tonic {} | threshold {} | feedback {}",
        config.session.sequence_length,
        config.session.tonic,
        config.session.note_threshold,
        match config.session.feedback_mode {
            FeedbackMode::Raw => "raw",
            FeedbackMode::Thresholded => "thresholded",
        },
    );
    if let Some(path) = &config.record_path {
        println!("Recording to {}", path.display());
    }

    let (handle, addr) = match start_server(config, Box::new(predictor)) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start generator: {e}");
            std::process::exit(1);
        }
    };

    println!("Generator listening on {addr}");
    println!("Press Enter to stop.");

    // Block until the operator ends the session. Stopping through the
    // handle lets the MIDI capture flush before exit; a plain SIGINT kill
    // works too but loses the capture.
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    println!("Shutting down...");
    handle.stop();
}

/// Parse command-line arguments into a `ServerConfig` plus the optional
/// model path. Uses simple `std::env::args()` matching — no clap dependency.
fn parse_args() -> (ServerConfig, Option<PathBuf>) {
    let mut config = ServerConfig::default();
    let mut model_path = None;
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                config.port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--max-clients" => {
                i += 1;
                config.max_clients =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--max-clients requires a valid number");
                        std::process::exit(1);
                    });
            }
            "--sequence-length" => {
                i += 1;
                config.session.sequence_length =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--sequence-length requires a valid length");
                        std::process::exit(1);
                    });
            }
            "--tonic" => {
                i += 1;
                config.session.tonic =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--tonic requires a pitch class 0-11");
                        std::process::exit(1);
                    });
            }
            "--threshold" => {
                i += 1;
                config.session.note_threshold =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--threshold requires a number in (0, 1]");
                        std::process::exit(1);
                    });
            }
            "--feedback" => {
                i += 1;
                config.session.feedback_mode = match args.get(i).map(String::as_str) {
                    Some("raw") => FeedbackMode::Raw,
                    Some("thresholded") => FeedbackMode::Thresholded,
                    _ => {
                        eprintln!("--feedback must be 'thresholded' or 'raw'");
                        std::process::exit(1);
                    }
                };
            }
            "--direction" => {
                i += 1;
                config.session.update_direction = match args.get(i).map(String::as_str) {
                    Some("append") => UpdateDirection::Append,
                    Some("prepend") => UpdateDirection::Prepend,
                    _ => {
                        eprintln!("--direction must be 'append' or 'prepend'");
                        std::process::exit(1);
                    }
                };
            }
            "--warm-start" => {
                i += 1;
                config.session.warm_start = match args.get(i).map(String::as_str) {
                    Some("random") => WarmStart::RandomNormalized,
                    Some("zeros") => WarmStart::Zeros,
                    _ => {
                        eprintln!("--warm-start must be 'random' or 'zeros'");
                        std::process::exit(1);
                    }
                };
            }
            "--seed" => {
                i += 1;
                let seed = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--seed requires a valid number");
                    std::process::exit(1);
                });
                config.session.seed = Some(seed);
            }
            "--model" => {
                i += 1;
                model_path = args.get(i).map(PathBuf::from).or_else(|| {
                    eprintln!("--model requires a path");
                    std::process::exit(1);
                });
            }
            "--record" => {
                i += 1;
                config.record_path = args.get(i).map(PathBuf::from).or_else(|| {
                    eprintln!("--record requires a path");
                    std::process::exit(1);
                });
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    (config, model_path)
}

fn print_usage() {
    println!("Usage: chordgen [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port <PORT>            Listen port (default: 9963)");
    println!("  --max-clients <N>        Max controller clients (default: 8)");
    println!("  --sequence-length <L>    Rolling window length (default: 8)");
    println!("  --tonic <PC>             Tonic pitch class 0-11 (default: 0)");
    println!("  --threshold <T>          Note-inclusion threshold in (0, 1] (default: 0.14)");
    println!("  --feedback <MODE>        Histogram feedback: thresholded | raw");
    println!("  --direction <DIR>        Window update direction: append | prepend");
    println!("  --warm-start <FILL>      Initial window fill: random | zeros");
    println!("  --seed <N>               Seed for the warm-start rows");
    println!("  --model <PATH>           Transition model JSON (default: built-in)");
    println!("  --record <PATH>          Capture the chord stream to a MIDI file");
    println!("  --help, -h               Show this help");
}
