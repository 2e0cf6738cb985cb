// Chord predictors.
//
// The session consumes a predictor as an injected capability behind one
// call: an L x 13 feature window in, a raw 12-bin pitch-class distribution
// out. That boundary keeps any model runtime out of the engine; a trained
// network, a remote service, or the transition table below all plug in the
// same way.
//
// `TransitionPredictor` is the bundled implementation: a 12x12 melody-to-
// chord pitch-class table loaded from JSON files exported by the corpus
// analysis pipeline, with a built-in default so the generator runs before
// any corpus exists.

use std::error::Error;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::buffer::{ROW_WIDTH, UpdateDirection};
use crate::histogram::{PITCH_CLASSES, normalized};

/// A chord predictor: maps the rolling feature window to a raw 12-bin
/// pitch-class distribution. Must be deterministic per call and free of
/// side effects the session could observe; whatever it returns is
/// re-validated and renormalized by the session before use.
pub trait ChromaPredictor {
    fn predict(
        &self,
        window: &[[f64; ROW_WIDTH]],
    ) -> Result<Vec<f64>, Box<dyn Error + Send + Sync>>;
}

/// Transition weights for the table predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionModel {
    /// Row = melody pitch class, column = chord pitch-class weight.
    pub transition: [[f64; PITCH_CLASSES]; PITCH_CLASSES],
    /// Per-step weight decay walking back from the newest window row, (0, 1].
    pub recency_decay: f64,
    /// Share of the newest histogram row blended into the output, [0, 1).
    pub history_blend: f64,
}

impl TransitionModel {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let model: TransitionModel = serde_json::from_str(&data)?;
        model.validate()?;
        Ok(model)
    }

    /// Reject tables a predictor cannot work with. Every melody row needs
    /// some positive weight, otherwise that melody note would predict the
    /// zero distribution and fail the whole event.
    fn validate(&self) -> Result<(), String> {
        if !(self.recency_decay > 0.0 && self.recency_decay <= 1.0) {
            return Err(format!("recency_decay {} outside (0, 1]", self.recency_decay));
        }
        if !(0.0..1.0).contains(&self.history_blend) {
            return Err(format!("history_blend {} outside [0, 1)", self.history_blend));
        }
        for (melody, row) in self.transition.iter().enumerate() {
            if row.iter().any(|&w| !w.is_finite() || w < 0.0) {
                return Err(format!("transition row {melody} has a bad weight"));
            }
            if row.iter().sum::<f64>() <= 0.0 {
                return Err(format!("transition row {melody} has no positive weight"));
            }
        }
        Ok(())
    }

    /// Built-in fallback: basic diatonic harmony over a major scale rooted
    /// at pitch class 0, so the generator runs without a trained table.
    /// A melody note votes for every scale-degree triad that contains it,
    /// primary degrees weighted heaviest.
    pub fn default_model() -> Self {
        const TRIADS: [([u8; 3], f64); 7] = [
            ([0, 4, 7], 3.0),  // I
            ([2, 5, 9], 1.0),  // ii
            ([4, 7, 11], 0.8), // iii
            ([5, 9, 0], 2.5),  // IV
            ([7, 11, 2], 2.5), // V
            ([9, 0, 4], 1.2),  // vi
            ([11, 2, 5], 0.5), // vii dim
        ];
        // A small floor keeps chromatic melody notes from producing dead
        // rows.
        let mut transition = [[0.05; PITCH_CLASSES]; PITCH_CLASSES];
        for (members, weight) in TRIADS {
            for &melody in &members {
                for &chord_tone in &members {
                    transition[usize::from(melody)][usize::from(chord_tone)] += weight;
                }
            }
        }
        TransitionModel {
            transition,
            recency_decay: 0.6,
            history_blend: 0.35,
        }
    }
}

/// Table predictor over a `TransitionModel`.
///
/// Walks the window's melody column newest-first with geometric decay,
/// sums the matching transition rows, normalizes, then blends in the
/// newest histogram row so consecutive chords lean on each other instead
/// of lurching.
pub struct TransitionPredictor {
    model: TransitionModel,
    direction: UpdateDirection,
}

impl TransitionPredictor {
    /// `direction` names which end of the window holds the newest row, and
    /// must match the direction the session's buffer was built with.
    pub fn new(model: TransitionModel, direction: UpdateDirection) -> Self {
        TransitionPredictor { model, direction }
    }
}

impl Default for TransitionPredictor {
    fn default() -> Self {
        TransitionPredictor::new(TransitionModel::default_model(), UpdateDirection::Append)
    }
}

impl ChromaPredictor for TransitionPredictor {
    fn predict(
        &self,
        window: &[[f64; ROW_WIDTH]],
    ) -> Result<Vec<f64>, Box<dyn Error + Send + Sync>> {
        if window.is_empty() {
            return Err("empty feature window".into());
        }
        let rows: Vec<&[f64; ROW_WIDTH]> = match self.direction {
            UpdateDirection::Append => window.iter().rev().collect(),
            UpdateDirection::Prepend => window.iter().collect(),
        };

        let mut votes = [0.0; PITCH_CLASSES];
        let mut weight = 1.0;
        for row in &rows {
            let melody = row[0];
            if !(0.0..12.0).contains(&melody) {
                return Err(format!("melody column out of range: {melody}").into());
            }
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let melody = melody as usize;
            for (vote, w) in votes.iter_mut().zip(&self.model.transition[melody]) {
                *vote += weight * w;
            }
            weight *= self.model.recency_decay;
        }

        let melody_term = normalized(&votes);
        let newest_hist = &rows[0][1..];
        let blend = self.model.history_blend;
        let out: Vec<f64> = melody_term
            .iter()
            .zip(newest_hist)
            .map(|(m, h)| (1.0 - blend) * m + blend * h)
            .collect();
        Ok(out)
    }
}
