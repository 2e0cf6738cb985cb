// The generation session: one melody event in, one chord out.
//
// Owns the only mutable state in the system — the rolling buffer, the
// tonic/threshold/feedback parameters, and the set of currently sounding
// notes. Callers must drive it from a single thread; events are handled
// strictly one at a time and the predictor call blocks in the middle of
// each one, so predictor latency is the tempo ceiling.
//
// Event handling is all-or-nothing. Note-offs for the previous chord go
// out first and are never retracted; every later effect (buffer rows, the
// sounding-note set) either fully lands or is fully rolled back, so a
// failed prediction leaves the session exactly where it was. Re-sending a
// note-off for an already-silent note is harmless downstream, which is
// what makes the early emission safe.

use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::buffer::{InputSequenceBuffer, UpdateDirection, WarmStart};
use crate::chord::Chord;
use crate::error::GenerationError;
use crate::histogram::{ChromaHistogram, PITCH_CLASSES};
use crate::predictor::ChromaPredictor;
use crate::voicing::{VoicedNote, VoicingEngine};

/// Which histogram variant feeds back into the rolling buffer after each
/// event. The side-channel broadcast always carries the thresholded form;
/// this only controls what the predictor sees next time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedbackMode {
    Raw,
    Thresholded,
}

impl FeedbackMode {
    /// Wire flag: 0 = raw, 1 = thresholded. Anything else is refused.
    pub fn from_flag(flag: i64) -> Result<Self, GenerationError> {
        match flag {
            0 => Ok(FeedbackMode::Raw),
            1 => Ok(FeedbackMode::Thresholded),
            other => Err(GenerationError::UnknownFeedbackMode(other)),
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            FeedbackMode::Raw => 0,
            FeedbackMode::Thresholded => 1,
        }
    }
}

/// Session construction parameters. `Default` gives the live-performance
/// values this system has always run with.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Rolling window length L: rows fed to the predictor per event.
    pub sequence_length: usize,
    /// Pitch class 0-11 every histogram index is relative to.
    pub tonic: u8,
    /// Note-inclusion threshold in (0, 1].
    pub note_threshold: f64,
    pub feedback_mode: FeedbackMode,
    pub update_direction: UpdateDirection,
    pub warm_start: WarmStart,
    /// Seed for the warm-start rows; `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Amount breakpoint that drops a voiced note an extra octave.
    pub lower_octave_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            sequence_length: 8,
            tonic: 0,
            note_threshold: 0.14,
            feedback_mode: FeedbackMode::Thresholded,
            update_direction: UpdateDirection::Append,
            warm_start: WarmStart::RandomNormalized,
            seed: None,
            lower_octave_threshold: 0.25,
        }
    }
}

/// Receives the events emitted while handling one melody note. Implemented
/// by the server's broadcast path and by test doubles; the session never
/// sees a socket.
pub trait ChordSink {
    /// A note event. Velocity 0 is a note-off, anything else a note-on.
    fn note(&mut self, note: VoicedNote);
    /// The thresholded histogram of the chord just emitted.
    fn histogram(&mut self, bins: &ChromaHistogram);
}

/// The session state machine. Idle until the first chord sounds, then
/// alternating "stop previous chord, start next one" per melody event.
pub struct GenerationSession {
    predictor: Box<dyn ChromaPredictor + Send>,
    buffer: InputSequenceBuffer,
    voicing: VoicingEngine,
    tonic: u8,
    note_threshold: f64,
    feedback_mode: FeedbackMode,
    previous_chord_notes: Vec<VoicedNote>,
}

impl GenerationSession {
    /// Build a session, validating the tonic and threshold exactly as the
    /// control setters would.
    pub fn new(
        config: &SessionConfig,
        predictor: Box<dyn ChromaPredictor + Send>,
    ) -> Result<Self, GenerationError> {
        let tonic = valid_tonic(i64::from(config.tonic))?;
        let note_threshold = valid_threshold(config.note_threshold)?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let buffer = InputSequenceBuffer::new(
            config.sequence_length,
            config.update_direction,
            config.warm_start,
            &mut rng,
        )?;
        Ok(GenerationSession {
            predictor,
            buffer,
            voicing: VoicingEngine::new(config.lower_octave_threshold),
            tonic,
            note_threshold,
            feedback_mode: config.feedback_mode,
            previous_chord_notes: Vec::new(),
        })
    }

    pub fn tonic(&self) -> u8 {
        self.tonic
    }

    pub fn note_threshold(&self) -> f64 {
        self.note_threshold
    }

    pub fn feedback_mode(&self) -> FeedbackMode {
        self.feedback_mode
    }

    pub fn sequence_length(&self) -> usize {
        self.buffer.capacity()
    }

    /// Handle one melody note: stop the previous chord, predict, voice,
    /// emit, fold the chosen histogram back into the window. Returns the
    /// number of notes in the new chord.
    ///
    /// On an error anywhere in the prediction path the buffer is restored
    /// and the sounding-note set kept, so the next successful event still
    /// stops the right notes.
    pub fn handle_melody_event(
        &mut self,
        midi_pitch: u8,
        intensity: f64,
        sink: &mut dyn ChordSink,
    ) -> Result<usize, GenerationError> {
        let started = Instant::now();

        // Step 1, unconditional: silence the previous chord before any new
        // note can sound.
        for note in &self.previous_chord_notes {
            sink.note(VoicedNote {
                pitch: note.pitch,
                velocity: 0,
            });
        }

        let saved = self.buffer.clone();
        match self.generate(midi_pitch, intensity, sink) {
            Ok(notes) => {
                let count = notes.len();
                self.previous_chord_notes = notes;
                log::debug!(
                    "voiced {count} notes for pitch {midi_pitch} in {} ms",
                    started.elapsed().as_millis()
                );
                Ok(count)
            }
            Err(err) => {
                self.buffer = saved;
                Err(err)
            }
        }
    }

    /// Steps 2-8: everything that can fail. The caller owns the rollback.
    fn generate(
        &mut self,
        midi_pitch: u8,
        intensity: f64,
        sink: &mut dyn ChordSink,
    ) -> Result<Vec<VoicedNote>, GenerationError> {
        let melody_pc = (i32::from(midi_pitch) - i32::from(self.tonic)).rem_euclid(12);
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        self.buffer.update_melody(melody_pc as u8);

        let window = self.buffer.snapshot();
        let raw = self
            .predictor
            .predict(&window)
            .map_err(|e| GenerationError::Predictor(e.to_string()))?;
        let prediction = normalize_prediction(&raw)?;

        let chord = Chord::new(&prediction, self.tonic, self.note_threshold)?;
        let notes = chord.voiced(&self.voicing, intensity);

        for note in &notes {
            sink.note(*note);
        }
        let thresholded = chord.thresholded_histogram();
        sink.histogram(&thresholded);

        let feedback = match self.feedback_mode {
            FeedbackMode::Thresholded => thresholded,
            FeedbackMode::Raw => *chord.raw_histogram(),
        };
        self.buffer.update_histogram(&feedback)?;

        Ok(notes)
    }

    /// Change the tonic. A rejected value leaves the previous one in place.
    pub fn set_tonic(&mut self, tonic: i64) -> Result<(), GenerationError> {
        self.tonic = valid_tonic(tonic)?;
        Ok(())
    }

    /// Change the note-inclusion threshold. All-or-nothing.
    pub fn set_note_threshold(&mut self, threshold: f64) -> Result<(), GenerationError> {
        self.note_threshold = valid_threshold(threshold)?;
        Ok(())
    }

    /// Change the feedback mode from its wire flag. All-or-nothing.
    pub fn set_feedback_mode(&mut self, flag: i64) -> Result<(), GenerationError> {
        self.feedback_mode = FeedbackMode::from_flag(flag)?;
        Ok(())
    }
}

fn valid_tonic(tonic: i64) -> Result<u8, GenerationError> {
    u8::try_from(tonic)
        .ok()
        .filter(|t| *t <= 11)
        .ok_or(GenerationError::TonicOutOfRange(tonic))
}

fn valid_threshold(threshold: f64) -> Result<f64, GenerationError> {
    if threshold > 0.0 && threshold <= 1.0 {
        Ok(threshold)
    } else {
        Err(GenerationError::ThresholdOutOfRange(threshold))
    }
}

/// Check and renormalize a predictor's raw output: exactly 12 entries, all
/// finite and non-negative, positive sum.
fn normalize_prediction(raw: &[f64]) -> Result<ChromaHistogram, GenerationError> {
    if raw.len() != PITCH_CLASSES {
        return Err(GenerationError::PredictionShape(raw.len()));
    }
    let mut bins = [0.0; PITCH_CLASSES];
    bins.copy_from_slice(raw);
    for &bin in &bins {
        if !bin.is_finite() || bin < 0.0 {
            return Err(GenerationError::PredictionValues(format!(
                "bad entry {bin}"
            )));
        }
    }
    let sum: f64 = bins.iter().sum();
    if sum <= 0.0 {
        return Err(GenerationError::PredictionValues(format!(
            "sum {sum} is not positive"
        )));
    }
    for bin in &mut bins {
        *bin /= sum;
    }
    Ok(bins)
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::buffer::ROW_WIDTH;

    type WindowLog = Arc<Mutex<Vec<Vec<[f64; ROW_WIDTH]>>>>;

    #[derive(Debug, Clone, PartialEq)]
    enum SinkEvent {
        Note { pitch: i32, velocity: i32 },
        Histogram([f64; PITCH_CLASSES]),
    }

    /// Sink double that records everything in arrival order.
    #[derive(Default)]
    struct RecordingSink {
        events: Vec<SinkEvent>,
    }

    impl RecordingSink {
        fn note_offs(&self) -> Vec<i32> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    SinkEvent::Note { pitch, velocity: 0 } => Some(*pitch),
                    _ => None,
                })
                .collect()
        }

        fn note_ons(&self) -> Vec<i32> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    SinkEvent::Note { pitch, velocity } if *velocity > 0 => Some(*pitch),
                    _ => None,
                })
                .collect()
        }
    }

    impl ChordSink for RecordingSink {
        fn note(&mut self, note: VoicedNote) {
            self.events.push(SinkEvent::Note {
                pitch: note.pitch,
                velocity: note.velocity,
            });
        }

        fn histogram(&mut self, bins: &ChromaHistogram) {
            self.events.push(SinkEvent::Histogram(*bins));
        }
    }

    /// Predictor double returning a fixed distribution.
    struct FixedPredictor(Vec<f64>);

    impl ChromaPredictor for FixedPredictor {
        fn predict(
            &self,
            _window: &[[f64; ROW_WIDTH]],
        ) -> Result<Vec<f64>, Box<dyn Error + Send + Sync>> {
            Ok(self.0.clone())
        }
    }

    /// Predictor double that logs every window it sees and fails on the
    /// calls listed in `fail_on` (1-based).
    struct SpyPredictor {
        windows: WindowLog,
        output: Vec<f64>,
        fail_on: Vec<usize>,
    }

    impl SpyPredictor {
        fn new(output: Vec<f64>) -> (Self, WindowLog) {
            let windows: WindowLog = Arc::default();
            let spy = SpyPredictor {
                windows: Arc::clone(&windows),
                output,
                fail_on: Vec::new(),
            };
            (spy, windows)
        }
    }

    impl ChromaPredictor for SpyPredictor {
        fn predict(
            &self,
            window: &[[f64; ROW_WIDTH]],
        ) -> Result<Vec<f64>, Box<dyn Error + Send + Sync>> {
            let mut windows = self.windows.lock().unwrap();
            windows.push(window.to_vec());
            if self.fail_on.contains(&windows.len()) {
                return Err("model exploded".into());
            }
            Ok(self.output.clone())
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            warm_start: WarmStart::Zeros,
            seed: Some(7),
            ..SessionConfig::default()
        }
    }

    /// Distribution with two strong classes (0 and 7) that survive the
    /// default 0.14 threshold.
    fn two_peaks() -> Vec<f64> {
        let mut out = vec![0.0; 12];
        out[0] = 0.6;
        out[7] = 0.4;
        out
    }

    fn session_with(predictor: Box<dyn ChromaPredictor + Send>) -> GenerationSession {
        GenerationSession::new(&test_config(), predictor).unwrap()
    }

    #[test]
    fn fresh_session_emits_no_note_offs() {
        let mut session = session_with(Box::new(FixedPredictor(two_peaks())));
        let mut sink = RecordingSink::default();
        let count = session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        assert_eq!(count, 2);
        assert!(sink.note_offs().is_empty());
        // 0.6 and 0.4 both clear the 0.25 breakpoint at intensity 0.5.
        assert_eq!(sink.note_ons(), vec![36, 43]);
    }

    #[test]
    fn note_offs_precede_the_next_chord() {
        let mut session = session_with(Box::new(FixedPredictor(two_peaks())));
        let mut first = RecordingSink::default();
        session.handle_melody_event(60, 0.5, &mut first).unwrap();

        let mut second = RecordingSink::default();
        session.handle_melody_event(64, 0.5, &mut second).unwrap();
        // Offs name exactly the first chord's pitches and come before any
        // note-on.
        assert_eq!(second.note_offs(), vec![36, 43]);
        let first_on = second
            .events
            .iter()
            .position(|e| matches!(e, SinkEvent::Note { velocity, .. } if *velocity > 0))
            .unwrap();
        let last_off = second
            .events
            .iter()
            .rposition(|e| matches!(e, SinkEvent::Note { velocity: 0, .. }))
            .unwrap();
        assert!(last_off < first_on);
    }

    #[test]
    fn histogram_follows_the_note_ons() {
        let mut session = session_with(Box::new(FixedPredictor(two_peaks())));
        let mut sink = RecordingSink::default();
        session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        match sink.events.last().unwrap() {
            SinkEvent::Histogram(bins) => {
                assert!((bins.iter().sum::<f64>() - 1.0).abs() < 1e-9);
                assert!((bins[0] - 0.6).abs() < 1e-9);
            }
            other => panic!("expected histogram last, got {other:?}"),
        }
    }

    #[test]
    fn empty_voicing_is_a_valid_outcome() {
        // Uniform 1/12 never clears the 0.14 threshold: silence, not error.
        let mut session = session_with(Box::new(FixedPredictor(vec![1.0 / 12.0; 12])));
        let mut sink = RecordingSink::default();
        let count = session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        assert_eq!(count, 0);
        assert!(sink.note_ons().is_empty());

        // And the following event has nothing to silence.
        let mut next = RecordingSink::default();
        session.handle_melody_event(62, 0.5, &mut next).unwrap();
        assert!(next.note_offs().is_empty());
    }

    #[test]
    fn pitch_below_tonic_wraps_around() {
        let config = SessionConfig {
            tonic: 11,
            ..test_config()
        };
        let mut session =
            GenerationSession::new(&config, Box::new(FixedPredictor(two_peaks()))).unwrap();
        let mut sink = RecordingSink::default();
        // (0 - 11) mod 12 = 1; must not panic or go negative.
        session.handle_melody_event(0, 0.5, &mut sink).unwrap();
        assert_eq!(sink.note_ons().len(), 2);
    }

    #[test]
    fn failed_prediction_rolls_the_buffer_back() {
        let (mut spy, windows) = SpyPredictor::new(two_peaks());
        spy.fail_on = vec![2];
        let mut session = session_with(Box::new(spy));

        session
            .handle_melody_event(61, 0.5, &mut RecordingSink::default())
            .unwrap();
        let err = session
            .handle_melody_event(62, 0.5, &mut RecordingSink::default())
            .unwrap_err();
        assert!(matches!(err, GenerationError::Predictor(_)));

        let mut third = RecordingSink::default();
        session.handle_melody_event(64, 0.5, &mut third).unwrap();

        // The failed event left the sounding set alone: the offs still
        // name the first chord.
        assert_eq!(third.note_offs(), vec![36, 43]);

        // And its buffer rows were rolled back: the third window shows
        // melody classes 1 and 4 but no trace of the failed 2, and its
        // newest histogram row is still the first event's feedback.
        let windows = windows.lock().unwrap();
        let melody: Vec<f64> = windows[2].iter().map(|row| row[0]).collect();
        assert_eq!(melody, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 4.0]);
        let newest = windows[2].last().unwrap();
        assert!((newest[1] - 0.6).abs() < 1e-9);
        assert!((newest[1 + 7] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn prediction_shape_is_enforced() {
        let mut session = session_with(Box::new(FixedPredictor(vec![0.5; 11])));
        let err = session
            .handle_melody_event(60, 0.5, &mut RecordingSink::default())
            .unwrap_err();
        assert!(matches!(err, GenerationError::PredictionShape(11)));
    }

    #[test]
    fn negative_prediction_entries_are_refused() {
        let mut bad = vec![0.2; 12];
        bad[3] = -0.1;
        let mut session = session_with(Box::new(FixedPredictor(bad)));
        let err = session
            .handle_melody_event(60, 0.5, &mut RecordingSink::default())
            .unwrap_err();
        assert!(matches!(err, GenerationError::PredictionValues(_)));
    }

    #[test]
    fn zero_sum_prediction_is_refused() {
        let mut session = session_with(Box::new(FixedPredictor(vec![0.0; 12])));
        let err = session
            .handle_melody_event(60, 0.5, &mut RecordingSink::default())
            .unwrap_err();
        assert!(matches!(err, GenerationError::PredictionValues(_)));
    }

    #[test]
    fn prediction_is_renormalized_before_thresholding() {
        // Raw weights 6 and 4 normalize to 0.6 / 0.4; the emitted histogram
        // proves the renormalization happened.
        let mut raw = vec![0.0; 12];
        raw[0] = 6.0;
        raw[7] = 4.0;
        let mut session = session_with(Box::new(FixedPredictor(raw)));
        let mut sink = RecordingSink::default();
        session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        match sink.events.last().unwrap() {
            SinkEvent::Histogram(bins) => assert!((bins[0] - 0.6).abs() < 1e-9),
            other => panic!("expected histogram last, got {other:?}"),
        }
    }

    #[test]
    fn set_tonic_rejects_and_keeps_prior_value() {
        let mut session = session_with(Box::new(FixedPredictor(two_peaks())));
        assert!(matches!(
            session.set_tonic(15),
            Err(GenerationError::TonicOutOfRange(15))
        ));
        assert!(matches!(
            session.set_tonic(-1),
            Err(GenerationError::TonicOutOfRange(-1))
        ));
        assert_eq!(session.tonic(), 0);

        // Still generating against the old tonic.
        let mut sink = RecordingSink::default();
        session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        assert_eq!(sink.note_ons(), vec![36, 43]);
    }

    #[test]
    fn accepted_tonic_shifts_subsequent_chords() {
        let mut session = session_with(Box::new(FixedPredictor(two_peaks())));
        session.set_tonic(3).unwrap();
        let mut sink = RecordingSink::default();
        session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        assert_eq!(sink.note_ons(), vec![39, 46]);
    }

    #[test]
    fn set_note_threshold_validates_the_open_interval() {
        let mut session = session_with(Box::new(FixedPredictor(two_peaks())));
        assert!(session.set_note_threshold(0.0).is_err());
        assert!(session.set_note_threshold(1.5).is_err());
        assert!(session.set_note_threshold(f64::NAN).is_err());
        assert!((session.note_threshold() - 0.14).abs() < f64::EPSILON);
        session.set_note_threshold(1.0).unwrap();
        assert!((session.note_threshold() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn set_feedback_mode_accepts_only_known_flags() {
        let mut session = session_with(Box::new(FixedPredictor(two_peaks())));
        session.set_feedback_mode(0).unwrap();
        assert_eq!(session.feedback_mode(), FeedbackMode::Raw);
        session.set_feedback_mode(1).unwrap();
        assert_eq!(session.feedback_mode(), FeedbackMode::Thresholded);
        assert!(matches!(
            session.set_feedback_mode(2),
            Err(GenerationError::UnknownFeedbackMode(2))
        ));
        assert_eq!(session.feedback_mode(), FeedbackMode::Thresholded);
    }

    #[test]
    fn side_channel_is_thresholded_even_in_raw_mode() {
        // 0.5 / 0.4 / 0.1: the 0.1 is cut from the broadcast histogram
        // regardless of what feeds back into the buffer.
        let mut raw = vec![0.0; 12];
        raw[0] = 0.5;
        raw[7] = 0.4;
        raw[2] = 0.1;
        let config = SessionConfig {
            feedback_mode: FeedbackMode::Raw,
            ..test_config()
        };
        let mut session =
            GenerationSession::new(&config, Box::new(FixedPredictor(raw))).unwrap();
        let mut sink = RecordingSink::default();
        session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        match sink.events.last().unwrap() {
            SinkEvent::Histogram(bins) => {
                assert_eq!(bins[2], 0.0);
                assert!((bins[0] - 0.5 / 0.9).abs() < 1e-9);
            }
            other => panic!("expected histogram last, got {other:?}"),
        }
    }

    #[test]
    fn feedback_mode_picks_the_buffer_row() {
        let mut raw = vec![0.0; 12];
        raw[0] = 0.5;
        raw[7] = 0.4;
        raw[2] = 0.1;

        // Raw mode: the 0.1 entry survives into the next window.
        let (spy, raw_windows) = SpyPredictor::new(raw.clone());
        let config = SessionConfig {
            feedback_mode: FeedbackMode::Raw,
            ..test_config()
        };
        let mut session = GenerationSession::new(&config, Box::new(spy)).unwrap();
        let mut sink = RecordingSink::default();
        session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        session.handle_melody_event(62, 0.5, &mut sink).unwrap();
        let newest = *raw_windows.lock().unwrap()[1].last().unwrap();
        assert!((newest[1 + 2] - 0.1).abs() < 1e-9);

        // Thresholded mode: the 0.1 entry is gone.
        let (spy, thr_windows) = SpyPredictor::new(raw);
        let mut session = session_with(Box::new(spy));
        let mut sink = RecordingSink::default();
        session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        session.handle_melody_event(62, 0.5, &mut sink).unwrap();
        let newest = *thr_windows.lock().unwrap()[1].last().unwrap();
        assert_eq!(newest[1 + 2], 0.0);
        assert!((newest[1] - 0.5 / 0.9).abs() < 1e-9);
    }

    #[test]
    fn melody_column_reflects_tonic_relative_classes() {
        let (spy, windows) = SpyPredictor::new(two_peaks());
        let config = SessionConfig {
            tonic: 3,
            ..test_config()
        };
        let mut session = GenerationSession::new(&config, Box::new(spy)).unwrap();
        let mut sink = RecordingSink::default();
        session.handle_melody_event(60, 0.5, &mut sink).unwrap();
        // (60 - 3) mod 12 = 9, at the newest (last) row under Append.
        let window = windows.lock().unwrap()[0].clone();
        assert!((window.last().unwrap()[0] - 9.0).abs() < f64::EPSILON);
    }
}
