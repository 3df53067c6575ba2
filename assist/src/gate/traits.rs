/// A compact summary of a frame, cheap enough to compute on every capture.
#[derive(Debug, Clone, PartialEq)]
pub enum Fingerprint {
    /// Average-hash bits.
    Bits(Vec<bool>),
    /// Normalized luminance histogram.
    Histogram(Vec<f64>),
}

impl Fingerprint {
    /// How different two fingerprints are. Fingerprints of different kinds are
    /// infinitely far apart.
    pub fn delta(&self, other: &Fingerprint) -> f64 {
        match (self, other) {
            (Fingerprint::Bits(a), Fingerprint::Bits(b)) => super::ahash::hamming(a, b) as f64,
            (Fingerprint::Histogram(a), Fingerprint::Histogram(b)) => {
                super::histogram::chi_squared(a, b)
            }
            _ => f64::INFINITY,
        }
    }
}

/// Scene fingerprinting used by the change gate.
///
/// Implementations receive raw JPEG bytes and return `None` if the frame
/// cannot be decoded.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, jpeg_data: &[u8]) -> Option<Fingerprint>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
