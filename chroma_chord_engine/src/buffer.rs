// Fixed-length rolling window of (melody pitch class, chroma histogram)
// rows — the predictor's feature input.
//
// The two sequences live in fixed arenas allocated once at construction,
// each with its own head index marking logical row 0. Appending or
// prepending with drop at the far end is plain index arithmetic; nothing
// ever shifts or reallocates. The sequences roll independently because one
// melody event updates the melody column (before prediction) and the
// histogram columns (after voicing) at different points, so mid-event the
// melody runs one step ahead of the histograms. That stagger is what the
// predictor is supposed to see: the new melody note against the chords
// that led up to it.

use rand::Rng;

use crate::error::GenerationError;
use crate::histogram::{ChromaHistogram, PITCH_CLASSES, normalized};

/// Snapshot row width: one melody pitch class plus 12 histogram bins.
pub const ROW_WIDTH: usize = PITCH_CLASSES + 1;

/// Which end new entries land on; the opposite end drops. Fixed for the
/// lifetime of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateDirection {
    /// New entries at the logical end; row 0 is the oldest.
    Append,
    /// New entries at the logical front; row 0 is the newest.
    Prepend,
}

/// Initial buffer contents before any real events arrive. Warm-start rows
/// are never musically meaningful; the first L real updates flush them out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarmStart {
    /// All-zero histogram rows.
    Zeros,
    /// Each histogram row drawn uniformly, then normalized to sum 1.
    RandomNormalized,
}

/// The rolling feature window. Cloning is cheap (two small arenas), which
/// is how the session snapshots it for rollback.
#[derive(Clone, Debug)]
pub struct InputSequenceBuffer {
    melody: Vec<u8>,
    histograms: Vec<ChromaHistogram>,
    /// Arena index of the melody sequence's logical row 0.
    melody_head: usize,
    /// Arena index of the histogram sequence's logical row 0.
    histogram_head: usize,
    direction: UpdateDirection,
}

/// Advance `head` one step in `direction`, returning the arena slot the new
/// entry overwrites.
fn roll(direction: UpdateDirection, len: usize, head: &mut usize) -> usize {
    match direction {
        // Overwrite the oldest entry (logical row 0); the head moves past
        // it, so the slot becomes the logical end.
        UpdateDirection::Append => {
            let slot = *head;
            *head = (*head + 1) % len;
            slot
        }
        // Step the head back onto the logical end and overwrite it; the
        // slot becomes the new logical row 0.
        UpdateDirection::Prepend => {
            *head = (*head + len - 1) % len;
            *head
        }
    }
}

impl InputSequenceBuffer {
    /// Create a buffer of `length` rows. A zero length is refused; the
    /// predictor needs at least one row to look at.
    pub fn new(
        length: usize,
        direction: UpdateDirection,
        warm_start: WarmStart,
        rng: &mut impl Rng,
    ) -> Result<Self, GenerationError> {
        if length == 0 {
            return Err(GenerationError::EmptySequence);
        }
        let histograms = (0..length)
            .map(|_| match warm_start {
                WarmStart::Zeros => [0.0; PITCH_CLASSES],
                WarmStart::RandomNormalized => {
                    let mut row = [0.0; PITCH_CLASSES];
                    for bin in &mut row {
                        *bin = rng.random::<f64>();
                    }
                    normalized(&row)
                }
            })
            .collect();
        Ok(InputSequenceBuffer {
            melody: vec![0; length],
            histograms,
            melody_head: 0,
            histogram_head: 0,
            direction,
        })
    }

    /// Number of rows, fixed at construction.
    pub fn capacity(&self) -> usize {
        self.melody.len()
    }

    /// Roll the melody sequence: drop the entry at the far end, insert
    /// `pitch_class` at the configured end. Callers pass pitch classes
    /// already reduced to 0-11.
    pub fn update_melody(&mut self, pitch_class: u8) {
        let slot = roll(self.direction, self.melody.len(), &mut self.melody_head);
        self.melody[slot] = pitch_class;
    }

    /// Roll the histogram sequence the same way. `h` must have exactly 12
    /// entries; anything else is refused and the buffer is untouched.
    pub fn update_histogram(&mut self, h: &[f64]) -> Result<(), GenerationError> {
        if h.len() != PITCH_CLASSES {
            return Err(GenerationError::HistogramShape(h.len()));
        }
        let slot = roll(self.direction, self.histograms.len(), &mut self.histogram_head);
        self.histograms[slot].copy_from_slice(h);
        Ok(())
    }

    /// The predictor's input: L rows of 13 columns, logical order (row 0
    /// first), each row `[melody_pc, h_0 .. h_11]`. Read-only; reflects the
    /// buffer exactly as of the last update call.
    pub fn snapshot(&self) -> Vec<[f64; ROW_WIDTH]> {
        let len = self.melody.len();
        (0..len)
            .map(|i| {
                let mut row = [0.0; ROW_WIDTH];
                row[0] = f64::from(self.melody[(self.melody_head + i) % len]);
                row[1..].copy_from_slice(&self.histograms[(self.histogram_head + i) % len]);
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn melody_column(buffer: &InputSequenceBuffer) -> Vec<f64> {
        buffer.snapshot().iter().map(|row| row[0]).collect()
    }

    #[test]
    fn zero_length_rejected() {
        let err = InputSequenceBuffer::new(0, UpdateDirection::Append, WarmStart::Zeros, &mut rng())
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptySequence));
    }

    #[test]
    fn snapshot_shape_is_fixed() {
        let mut buffer =
            InputSequenceBuffer::new(5, UpdateDirection::Append, WarmStart::Zeros, &mut rng())
                .unwrap();
        for i in 0..13 {
            buffer.update_melody(i % 12);
            buffer.update_histogram(&[0.1; 12]).unwrap();
            let snap = buffer.snapshot();
            assert_eq!(snap.len(), 5);
            assert!(snap.iter().all(|row| row.len() == ROW_WIDTH));
        }
    }

    #[test]
    fn append_keeps_oldest_first() {
        let mut buffer =
            InputSequenceBuffer::new(3, UpdateDirection::Append, WarmStart::Zeros, &mut rng())
                .unwrap();
        buffer.update_melody(1);
        buffer.update_melody(2);
        assert_eq!(melody_column(&buffer), vec![0.0, 1.0, 2.0]);
        buffer.update_melody(3);
        assert_eq!(melody_column(&buffer), vec![1.0, 2.0, 3.0]);
        buffer.update_melody(4);
        assert_eq!(melody_column(&buffer), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn prepend_keeps_newest_first() {
        let mut buffer =
            InputSequenceBuffer::new(3, UpdateDirection::Prepend, WarmStart::Zeros, &mut rng())
                .unwrap();
        buffer.update_melody(1);
        buffer.update_melody(2);
        assert_eq!(melody_column(&buffer), vec![2.0, 1.0, 0.0]);
        buffer.update_melody(3);
        assert_eq!(melody_column(&buffer), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn histogram_rolls_in_same_direction() {
        let mut buffer =
            InputSequenceBuffer::new(3, UpdateDirection::Append, WarmStart::Zeros, &mut rng())
                .unwrap();
        let mut marked = [0.0; 12];
        marked[4] = 1.0;
        buffer.update_histogram(&marked).unwrap();
        let snap = buffer.snapshot();
        // Newest histogram row sits at the logical end under Append.
        assert_eq!(snap[2][5], 1.0);
        assert_eq!(snap[0][5], 0.0);
    }

    #[test]
    fn melody_and_histogram_roll_independently() {
        let mut buffer =
            InputSequenceBuffer::new(2, UpdateDirection::Append, WarmStart::Zeros, &mut rng())
                .unwrap();
        // Melody advances before the histogram does within one event; the
        // snapshot pairs the new melody with the previous histograms.
        buffer.update_melody(7);
        let snap = buffer.snapshot();
        assert_eq!(snap[1][0], 7.0);
        assert!(snap[1][1..].iter().all(|&bin| bin == 0.0));
    }

    #[test]
    fn wrong_shape_rejected_and_state_kept() {
        let mut buffer =
            InputSequenceBuffer::new(2, UpdateDirection::Append, WarmStart::Zeros, &mut rng())
                .unwrap();
        let before = buffer.snapshot();
        let err = buffer.update_histogram(&[0.5; 11]).unwrap_err();
        assert!(matches!(err, GenerationError::HistogramShape(11)));
        assert_eq!(buffer.snapshot(), before);
    }

    #[test]
    fn random_warm_start_rows_are_normalized() {
        let buffer = InputSequenceBuffer::new(
            4,
            UpdateDirection::Append,
            WarmStart::RandomNormalized,
            &mut rng(),
        )
        .unwrap();
        for row in buffer.snapshot() {
            let sum: f64 = row[1..].iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
            assert!(row[1..].iter().all(|&bin| bin >= 0.0));
        }
    }

    #[test]
    fn seeded_warm_start_is_reproducible() {
        let a = InputSequenceBuffer::new(
            4,
            UpdateDirection::Append,
            WarmStart::RandomNormalized,
            &mut rng(),
        )
        .unwrap();
        let b = InputSequenceBuffer::new(
            4,
            UpdateDirection::Append,
            WarmStart::RandomNormalized,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(a.snapshot(), b.snapshot());
    }
}
