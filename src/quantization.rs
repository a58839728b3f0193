//! Scalar quantization of f32 vectors to u8 codes.
//!
//! A single global `[min, max]` range is calibrated from a sample of stored
//! vectors, then every component maps linearly onto `0..=255`. Memory drops
//! 4x at the cost of bounded reconstruction error; the router re-ranks with
//! dequantized vectors, so quantization only perturbs scores, never drops
//! candidates outright.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Linear f32 -> u8 codec over a fixed global range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    pub min: f32,
    pub max: f32,
    /// `(max - min) / 255`, zero when the calibrated range is degenerate.
    pub scale: f32,
}

/// A quantized vector: one code byte per original component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedVector {
    pub codes: Vec<u8>,
}

impl ScalarQuantizer {
    /// Calibrate the global range from a sample of vectors. An empty sample
    /// or a constant-valued one yields the degenerate codec (scale 0), which
    /// maps everything to the midpoint code.
    pub fn calibrate<'a, I>(sample: I) -> Self
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for vector in sample {
            for &value in vector {
                min = min.min(value);
                max = max.max(value);
            }
        }
        if !min.is_finite() || !max.is_finite() || max <= min {
            debug!("degenerate quantization range, using zero scale");
            let anchor = if min.is_finite() { min } else { 0.0 };
            return Self {
                min: anchor,
                max: anchor,
                scale: 0.0,
            };
        }
        Self {
            min,
            max,
            scale: (max - min) / 255.0,
        }
    }

    /// Map each component onto `0..=255`. With a degenerate range every
    /// component becomes the midpoint code 128.
    pub fn quantize(&self, vector: &[f32]) -> QuantizedVector {
        let codes = if self.scale == 0.0 {
            vec![128u8; vector.len()]
        } else {
            vector
                .iter()
                .map(|&v| {
                    let code = ((v - self.min) / self.scale).round();
                    code.clamp(0.0, 255.0) as u8
                })
                .collect()
        };
        QuantizedVector { codes }
    }

    /// Reconstruct an approximate f32 vector from codes.
    pub fn dequantize(&self, quantized: &QuantizedVector) -> Vec<f32> {
        quantized
            .codes
            .iter()
            .map(|&code| self.min + code as f32 * self.scale)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_within_half_step() {
        let data = [vec![-1.0f32, 0.0, 0.5, 1.0], vec![0.25, -0.75, 0.9, -0.1]];
        let q = ScalarQuantizer::calibrate(data.iter().map(|v| v.as_slice()));
        let half_step = q.scale / 2.0 + 1e-6;
        for v in &data {
            let back = q.dequantize(&q.quantize(v));
            for (orig, approx) in v.iter().zip(&back) {
                assert!(
                    (orig - approx).abs() <= half_step,
                    "{orig} vs {approx} exceeds half quantization step"
                );
            }
        }
    }

    #[test]
    fn test_range_extremes_map_to_code_bounds() {
        let data = [vec![-2.0f32, 3.0]];
        let q = ScalarQuantizer::calibrate(data.iter().map(|v| v.as_slice()));
        let codes = q.quantize(&[-2.0, 3.0]).codes;
        assert_eq!(codes, vec![0, 255]);
        // Out-of-range values clamp instead of wrapping.
        let codes = q.quantize(&[-100.0, 100.0]).codes;
        assert_eq!(codes, vec![0, 255]);
    }

    #[test]
    fn test_degenerate_range_uses_midpoint() {
        let data = [vec![0.5f32, 0.5], vec![0.5, 0.5]];
        let q = ScalarQuantizer::calibrate(data.iter().map(|v| v.as_slice()));
        assert_eq!(q.scale, 0.0);
        let quantized = q.quantize(&[0.5, 0.5, 0.5]);
        assert_eq!(quantized.codes, vec![128, 128, 128]);
        let back = q.dequantize(&quantized);
        assert_eq!(back, vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_empty_sample_is_degenerate() {
        let q = ScalarQuantizer::calibrate(std::iter::empty());
        assert_eq!(q.scale, 0.0);
        assert_eq!(q.min, 0.0);
    }
}
