use image::imageops::FilterType;
use image::ImageReader;
use std::io::Cursor;

use super::traits::{Fingerprint, Fingerprinter};

/// Compute an aHash (average hash) for a JPEG image at the given hash_size.
/// Returns a binary vector of length hash_size*hash_size, or None if decoding fails.
pub fn compute_ahash(jpeg_data: &[u8], hash_size: u32) -> Option<Vec<bool>> {
    let img = ImageReader::new(Cursor::new(jpeg_data))
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()?;

    let gray = img
        .resize_exact(hash_size, hash_size, FilterType::Nearest)
        .to_luma8();

    let pixels: Vec<u8> = gray.pixels().map(|p| p.0[0]).collect();
    let mean: f64 = pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64;
    let hash: Vec<bool> = pixels.iter().map(|&p| p as f64 > mean).collect();
    Some(hash)
}

/// Compute the hamming distance between two binary hashes.
pub fn hamming(a: &[bool], b: &[bool]) -> u32 {
    a.iter().zip(b.iter()).filter(|(a, b)| a != b).count() as u32
}

/// Average-hash fingerprints: grayscale, shrink to `hash_size` squared, one
/// bit per pixel above the mean. A few milliseconds per frame on a Pi Zero.
pub struct AHashFingerprinter {
    hash_size: u32,
}

impl AHashFingerprinter {
    pub fn new(hash_size: u32) -> Self {
        Self { hash_size }
    }
}

impl Fingerprinter for AHashFingerprinter {
    fn fingerprint(&self, jpeg_data: &[u8]) -> Option<Fingerprint> {
        compute_ahash(jpeg_data, self.hash_size).map(Fingerprint::Bits)
    }

    fn name(&self) -> &str {
        "ahash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{jpeg, Pattern};

    #[test]
    fn hash_has_hash_size_squared_bits() {
        let hash = compute_ahash(&jpeg(Pattern::LeftBright), 8).unwrap();
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn same_image_has_zero_distance() {
        let f = AHashFingerprinter::new(16);
        let a = f.fingerprint(&jpeg(Pattern::LeftBright)).unwrap();
        let b = f.fingerprint(&jpeg(Pattern::LeftBright)).unwrap();
        assert_eq!(a.delta(&b), 0.0);
    }

    #[test]
    fn different_layouts_are_far_apart() {
        let f = AHashFingerprinter::new(16);
        let a = f.fingerprint(&jpeg(Pattern::LeftBright)).unwrap();
        let b = f.fingerprint(&jpeg(Pattern::TopBright)).unwrap();
        // Half the bits flip between a vertical and a horizontal split.
        assert!(a.delta(&b) > 100.0, "delta was {}", a.delta(&b));
    }

    #[test]
    fn garbage_does_not_decode() {
        let f = AHashFingerprinter::new(16);
        assert!(f.fingerprint(&[0xFF, 0xD8, 0x00, 0x01]).is_none());
    }

    #[test]
    fn hamming_counts_differences() {
        assert_eq!(hamming(&[true, false, true], &[true, true, false]), 2);
        assert_eq!(hamming(&[], &[]), 0);
    }
}
