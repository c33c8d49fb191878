//! Photometric processors: grayscale reduction and z-score
//! normalization over NHWC batches.

use crate::{common::*, stats::PixelStats};

/// ITU-R BT.601 luma weights.
const LUMA_WEIGHTS: [f32; 3] = [0.2989, 0.5870, 0.1140];

/// Reduce an `(N, H, W, 3)` batch to `(N, H, W, 1)` luma.
pub fn to_grayscale(batch: &Array4<f32>) -> Array4<f32> {
    let (num_examples, height, width, channels) = batch.dim();
    debug_assert_eq!(channels, 3);

    let mut output = Array4::<f32>::zeros((num_examples, height, width, 1));
    for n in 0..num_examples {
        for y in 0..height {
            for x in 0..width {
                output[(n, y, x, 0)] = (0..3)
                    .map(|c| batch[(n, y, x, c)] * LUMA_WEIGHTS[c])
                    .sum();
            }
        }
    }
    output
}

/// Z-score normalize the batch in place with split-level moments.
pub fn normalize(batch: &mut Array4<f32>, stats: &PixelStats) {
    let mean = stats.mean as f32;
    let std = stats.std as f32;
    batch.mapv_inplace(|value| (value - mean) / std);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn grayscale_test() {
        let mut batch = Array4::<f32>::zeros((1, 1, 2, 3));
        batch[(0, 0, 0, 0)] = 100.0; // pure red
        batch[(0, 0, 1, 1)] = 100.0; // pure green
        let luma = to_grayscale(&batch);
        assert_eq!(luma.dim(), (1, 1, 2, 1));
        assert_abs_diff_eq!(luma[(0, 0, 0, 0)], 29.89, epsilon = 1e-3);
        assert_abs_diff_eq!(luma[(0, 0, 1, 0)], 58.70, epsilon = 1e-3);
    }

    #[test]
    fn grayscale_white_test() {
        let batch = Array4::from_elem((2, 3, 3, 3), 255.0f32);
        let luma = to_grayscale(&batch);
        // the weights sum to 0.9999
        assert_abs_diff_eq!(luma[(1, 2, 2, 0)], 254.97, epsilon = 0.05);
    }

    #[test]
    fn normalize_test() {
        let mut batch = Array4::from_elem((1, 2, 2, 1), 30.0f32);
        normalize(
            &mut batch,
            &PixelStats {
                mean: 20.0,
                std: 5.0,
            },
        );
        assert_abs_diff_eq!(batch[(0, 0, 0, 0)], 2.0);
    }
}
