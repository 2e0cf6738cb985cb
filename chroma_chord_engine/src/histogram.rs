// Chroma histogram utilities.
//
// A chroma histogram is a distribution over the 12 pitch classes, indexed
// relative to the session tonic (index 0 = tonic, index 7 = the fifth, and
// so on). Raw histograms carry no sum invariant; the derived forms produced
// here either sum to 1 or stay all-zero when nothing survives the cut.

/// Number of pitch classes in an octave.
pub const PITCH_CLASSES: usize = 12;

/// A distribution over the 12 pitch classes relative to the tonic.
pub type ChromaHistogram = [f64; PITCH_CLASSES];

/// Scale `h` so its entries sum to 1. An all-zero histogram is returned
/// unchanged rather than divided by zero.
pub fn normalized(h: &ChromaHistogram) -> ChromaHistogram {
    let sum: f64 = h.iter().sum();
    if sum <= 0.0 {
        return *h;
    }
    let mut out = *h;
    for bin in &mut out {
        *bin /= sum;
    }
    out
}

/// Zero every entry at or below `threshold` (only strictly greater
/// survives), then renormalize the survivors to sum 1. When nothing
/// survives the result is all-zero, not an error: silence is a valid
/// chord.
pub fn thresholded(h: &ChromaHistogram, threshold: f64) -> ChromaHistogram {
    let mut out = *h;
    for bin in &mut out {
        if *bin <= threshold {
            *bin = 0.0;
        }
    }
    normalized(&out)
}
