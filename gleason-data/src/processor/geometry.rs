//! Spatial processors: crops, flips and rotation over HWC arrays.

use crate::common::*;

/// Cut a random window of `(height, width)` out of the image. The
/// window must fit inside the image.
pub fn random_crop<R>(image: &Array3<f32>, shape: [usize; 2], rng: &mut R) -> Array3<f32>
where
    R: Rng,
{
    let (src_height, src_width, _) = image.dim();
    let [height, width] = shape;
    debug_assert!(height <= src_height && width <= src_width);

    let top = rng.gen_range(0..=src_height - height);
    let left = rng.gen_range(0..=src_width - width);
    image
        .slice(s![top..top + height, left..left + width, ..])
        .to_owned()
}

/// Center-crop the image to `(height, width)`, zero-padding any axis
/// that is shorter than the target. Both can happen at once, one axis
/// cropped and the other padded.
pub fn center_crop_or_pad(image: &Array3<f32>, shape: [usize; 2]) -> Array3<f32> {
    let (src_height, src_width, channels) = image.dim();
    let [height, width] = shape;

    let copy_height = src_height.min(height);
    let copy_width = src_width.min(width);
    let src_top = (src_height - copy_height) / 2;
    let src_left = (src_width - copy_width) / 2;
    let dst_top = (height - copy_height) / 2;
    let dst_left = (width - copy_width) / 2;

    let mut output = Array3::<f32>::zeros((height, width, channels));
    output
        .slice_mut(s![
            dst_top..dst_top + copy_height,
            dst_left..dst_left + copy_width,
            ..
        ])
        .assign(&image.slice(s![
            src_top..src_top + copy_height,
            src_left..src_left + copy_width,
            ..
        ]));
    output
}

pub fn flip_left_right(image: &mut Array3<f32>) {
    image.invert_axis(Axis(1));
}

pub fn flip_top_bottom(image: &mut Array3<f32>) {
    image.invert_axis(Axis(0));
}

/// Rotate the image about its center by `angle` radians on an
/// unchanged canvas. Output pixels are
/// pulled from the source by the inverse rotation with bilinear
/// interpolation; pixels that fall outside the source read as zero.
pub fn rotate(image: &Array3<f32>, angle: f64) -> Array3<f32> {
    let (height, width, channels) = image.dim();
    let (sin, cos) = angle.sin_cos();
    let center_y = (height as f64 - 1.0) / 2.0;
    let center_x = (width as f64 - 1.0) / 2.0;

    let mut output = Array3::<f32>::zeros((height, width, channels));
    for y in 0..height {
        for x in 0..width {
            let dy = y as f64 - center_y;
            let dx = x as f64 - center_x;
            let src_y = center_y + dy * cos - dx * sin;
            let src_x = center_x + dy * sin + dx * cos;

            for c in 0..channels {
                output[(y, x, c)] = sample_bilinear(image, src_y, src_x, c);
            }
        }
    }
    output
}

fn sample_bilinear(image: &Array3<f32>, y: f64, x: f64, channel: usize) -> f32 {
    let (height, width, _) = image.dim();
    let y0 = y.floor();
    let x0 = x.floor();
    let fy = (y - y0) as f32;
    let fx = (x - x0) as f32;

    let fetch = |yi: f64, xi: f64| -> f32 {
        if yi < 0.0 || xi < 0.0 || yi >= height as f64 || xi >= width as f64 {
            0.0
        } else {
            image[(yi as usize, xi as usize, channel)]
        }
    };

    let top = fetch(y0, x0) * (1.0 - fx) + fetch(y0, x0 + 1.0) * fx;
    let bottom = fetch(y0 + 1.0, x0) * (1.0 - fx) + fetch(y0 + 1.0, x0 + 1.0) * fx;
    top * (1.0 - fy) + bottom * fy
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(height: usize, width: usize) -> Array3<f32> {
        Array3::from_shape_fn((height, width, 1), |(y, x, _)| (y * width + x) as f32)
    }

    #[test]
    fn random_crop_bounds_test() {
        let image = ramp(10, 12);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let crop = random_crop(&image, [4, 6], &mut rng);
            assert_eq!(crop.dim(), (4, 6, 1));
            // a crop window is contiguous in the ramp
            let first = crop[(0, 0, 0)];
            assert_abs_diff_eq!(crop[(0, 5, 0)], first + 5.0);
            assert_abs_diff_eq!(crop[(3, 0, 0)], first + 36.0);
        }
    }

    #[test]
    fn full_size_crop_is_identity_test() {
        let image = ramp(6, 6);
        let mut rng = StdRng::seed_from_u64(0);
        let crop = random_crop(&image, [6, 6], &mut rng);
        assert_eq!(crop, image);
    }

    #[test]
    fn center_pad_test() {
        let image = Array3::from_elem((2, 2, 1), 5.0f32);
        let padded = center_crop_or_pad(&image, [4, 4]);
        assert_eq!(padded.dim(), (4, 4, 1));
        assert_abs_diff_eq!(padded[(0, 0, 0)], 0.0);
        assert_abs_diff_eq!(padded[(1, 1, 0)], 5.0);
        assert_abs_diff_eq!(padded[(2, 2, 0)], 5.0);
        assert_abs_diff_eq!(padded[(3, 3, 0)], 0.0);
        assert_abs_diff_eq!(padded.sum(), 20.0);
    }

    #[test]
    fn center_crop_test() {
        let image = ramp(6, 6);
        let cropped = center_crop_or_pad(&image, [2, 2]);
        assert_eq!(cropped.dim(), (2, 2, 1));
        // rows 2..4, cols 2..4 of the ramp
        assert_abs_diff_eq!(cropped[(0, 0, 0)], 14.0);
        assert_abs_diff_eq!(cropped[(1, 1, 0)], 21.0);
    }

    #[test]
    fn mixed_crop_pad_test() {
        let image = Array3::from_elem((6, 2, 1), 1.0f32);
        let output = center_crop_or_pad(&image, [4, 4]);
        assert_eq!(output.dim(), (4, 4, 1));
        // height cropped, width padded
        assert_abs_diff_eq!(output.sum(), 8.0);
        assert_abs_diff_eq!(output[(0, 1, 0)], 1.0);
        assert_abs_diff_eq!(output[(0, 0, 0)], 0.0);
    }

    #[test]
    fn flip_test() {
        let mut image = ramp(2, 3);
        flip_left_right(&mut image);
        assert_abs_diff_eq!(image[(0, 0, 0)], 2.0);
        assert_abs_diff_eq!(image[(0, 2, 0)], 0.0);

        let mut image = ramp(2, 3);
        flip_top_bottom(&mut image);
        assert_abs_diff_eq!(image[(0, 0, 0)], 3.0);
        assert_abs_diff_eq!(image[(1, 0, 0)], 0.0);
    }

    #[test]
    fn zero_rotation_is_identity_test() {
        let image = ramp(5, 5);
        let rotated = rotate(&image, 0.0);
        for (expected, actual) in image.iter().zip(rotated.iter()) {
            assert_abs_diff_eq!(expected, actual, epsilon = 1e-4);
        }
    }

    #[test]
    fn quarter_turn_test() {
        let mut image = Array3::<f32>::zeros((5, 5, 1));
        image[(1, 3, 0)] = 1.0;
        let rotated = rotate(&image, std::f64::consts::FRAC_PI_2);
        // a quarter turn carries (1, 3) to (3, 3)
        assert_abs_diff_eq!(rotated[(3, 3, 0)], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(rotated[(1, 3, 0)], 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(rotated.sum(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn rotation_keeps_canvas_test() {
        let image = ramp(7, 9);
        let rotated = rotate(&image, 0.7);
        assert_eq!(rotated.dim(), image.dim());
    }
}
