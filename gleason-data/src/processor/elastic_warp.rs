//! Elastic deformation via Gaussian-smoothed random displacement
//! fields.
//!
//! A field is drawn once and applied to a whole batch, so the examples
//! of one batch share the same deformation.

use crate::common::*;

/// Peak displacement magnitude in pixels.
const MAX_DISPLACEMENT: f32 = 6.0;
/// Taps of the separable smoothing kernel, spread over +-3 sigma.
const KERNEL_SIZE: usize = 128;
const SIGMA: f64 = 1.0;

/// A dense per-pixel displacement field over an `(height, width)`
/// canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpField {
    flow_y: Array2<f32>,
    flow_x: Array2<f32>,
}

impl WarpField {
    /// Build a field from explicit displacement planes. Mostly useful
    /// for tests; [`generate`](Self::generate) is the production path.
    pub fn new(flow_y: Array2<f32>, flow_x: Array2<f32>) -> Result<Self> {
        ensure!(
            flow_y.dim() == flow_x.dim(),
            "displacement planes disagree in shape: {:?} vs {:?}",
            flow_y.dim(),
            flow_x.dim()
        );
        Ok(Self { flow_y, flow_x })
    }

    /// Draw a random smooth field for an `(height, width)` canvas.
    pub fn generate<R>(height: usize, width: usize, rng: &mut R) -> Self
    where
        R: Rng,
    {
        Self {
            flow_y: smooth_field(height, width, rng),
            flow_x: smooth_field(height, width, rng),
        }
    }

    /// Warp every example of an NHWC batch by this field. Each output
    /// pixel is pulled from its displaced source position with
    /// bilinear interpolation; source positions are clamped to the
    /// image border.
    pub fn apply(&self, batch: &Array4<f32>) -> Array4<f32> {
        let (num_examples, height, width, channels) = batch.dim();
        debug_assert_eq!(self.flow_y.dim(), (height, width));

        let mut output = Array4::<f32>::zeros(batch.dim());
        for n in 0..num_examples {
            for y in 0..height {
                for x in 0..width {
                    let src_y = (y as f32 - self.flow_y[(y, x)])
                        .clamp(0.0, (height - 1) as f32);
                    let src_x = (x as f32 - self.flow_x[(y, x)])
                        .clamp(0.0, (width - 1) as f32);

                    let y0 = src_y.floor() as usize;
                    let x0 = src_x.floor() as usize;
                    let y1 = (y0 + 1).min(height - 1);
                    let x1 = (x0 + 1).min(width - 1);
                    let fy = src_y - y0 as f32;
                    let fx = src_x - x0 as f32;

                    for c in 0..channels {
                        let top = batch[(n, y0, x0, c)] * (1.0 - fx)
                            + batch[(n, y0, x1, c)] * fx;
                        let bottom = batch[(n, y1, x0, c)] * (1.0 - fx)
                            + batch[(n, y1, x1, c)] * fx;
                        output[(n, y, x, c)] = top * (1.0 - fy) + bottom * fy;
                    }
                }
            }
        }
        output
    }
}

fn gaussian_kernel() -> Array1<f32> {
    let kernel: Vec<f32> = (0..KERNEL_SIZE)
        .map(|index| {
            let position =
                -3.0 * SIGMA + 6.0 * SIGMA * index as f64 / (KERNEL_SIZE - 1) as f64;
            (-position * position / (2.0 * SIGMA * SIGMA)).exp() as f32
        })
        .collect();
    let mut kernel = Array1::from_vec(kernel);
    let sum = kernel.sum();
    kernel /= sum;
    kernel
}

/// One smoothed displacement plane: uniform noise in `[-1, 1]`,
/// blurred by a separable Gaussian with zero padding, rescaled so the
/// largest magnitude equals [`MAX_DISPLACEMENT`].
fn smooth_field<R>(height: usize, width: usize, rng: &mut R) -> Array2<f32>
where
    R: Rng,
{
    let noise =
        Array2::from_shape_fn((height, width), |_| rng.gen_range(-1.0f32..1.0));
    let kernel = gaussian_kernel();

    let blurred = convolve_rows(&convolve_rows(&noise, &kernel).reversed_axes(), &kernel)
        .reversed_axes();

    let peak = blurred.iter().fold(0.0f32, |max, &v| max.max(v.abs()));
    if peak <= f32::EPSILON {
        return Array2::zeros((height, width));
    }
    blurred.mapv(|value| value / peak * MAX_DISPLACEMENT)
}

/// Row-wise 1-d convolution with zero padding beyond the edges.
fn convolve_rows(input: &Array2<f32>, kernel: &Array1<f32>) -> Array2<f32> {
    let (height, width) = input.dim();
    let half = kernel.len() / 2;

    let mut output = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut accum = 0.0;
            for (tap, &weight) in kernel.iter().enumerate() {
                let offset = x as isize + tap as isize - half as isize;
                if (0..width as isize).contains(&offset) {
                    accum += input[(y, offset as usize)] * weight;
                }
            }
            output[(y, x)] = accum;
        }
    }
    output
}
