use image::ImageReader;
use std::io::Cursor;

use super::traits::{Fingerprint, Fingerprinter};

const NUM_BINS: usize = 64;
const DOWNSAMPLE_SIZE: u32 = 64;

/// Histogram-based fingerprints.
///
/// Downsamples to 64x64 grayscale and computes a normalized 64-bin histogram;
/// frames are compared via chi-squared distance. Less sensitive to small
/// camera shake than aHash, blind to pure layout changes.
pub struct HistogramFingerprinter;

impl HistogramFingerprinter {
    fn compute_histogram(jpeg_data: &[u8]) -> Option<Vec<f64>> {
        let img = ImageReader::new(Cursor::new(jpeg_data))
            .with_guessed_format()
            .ok()?
            .decode()
            .ok()?;

        let gray = img
            .resize_exact(
                DOWNSAMPLE_SIZE,
                DOWNSAMPLE_SIZE,
                image::imageops::FilterType::Nearest,
            )
            .to_luma8();

        let mut bins = [0u64; NUM_BINS];
        let total_pixels = gray.pixels().len() as f64;

        for pixel in gray.pixels() {
            let bin = (pixel.0[0] as usize * NUM_BINS) / 256;
            bins[bin.min(NUM_BINS - 1)] += 1;
        }

        Some(bins.iter().map(|&count| count as f64 / total_pixels).collect())
    }
}

impl Fingerprinter for HistogramFingerprinter {
    fn fingerprint(&self, jpeg_data: &[u8]) -> Option<Fingerprint> {
        Self::compute_histogram(jpeg_data).map(Fingerprint::Histogram)
    }

    fn name(&self) -> &str {
        "histogram"
    }
}

/// Chi-squared distance between two histograms.
pub fn chi_squared(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let denom = x + y;
        if denom > 1e-10 {
            let diff = x - y;
            sum += (diff * diff) / denom;
        }
    }
    sum
}
