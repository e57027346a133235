use ndarray::{Array2, Array3, ArrayView2};

use crate::error::DetectError;

/// Replaces every output value strictly below `cutoff` with `fill`.
pub fn threshold_outputs(maps: &mut [Array3<f32>], cutoff: f32, fill: f32) {
    for map in maps {
        map.mapv_inplace(|v| if v < cutoff { fill } else { v });
    }
}

/// The smoothing applied to class channels before extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum SmoothingKernel {
    /// A fixed 3x3 low-pass kernel, normalized to unit sum.
    Averaging3x3,
    /// A parametric difference-of-center kernel, positive at the center
    /// with a negative surround.
    MexicanHat {
        /// Kernel side, odd.
        size: usize,
        /// Shape parameter of the hat.
        sigma: f64,
        /// Radial distance multiplier.
        sigma_scale: f64,
    },
}

impl SmoothingKernel {
    /// Materializes the kernel coefficients.
    pub fn build(&self) -> Result<Array2<f32>, DetectError> {
        match *self {
            SmoothingKernel::Averaging3x3 => {
                let mut k = ndarray::arr2(&[
                    [0.3_f32, 0.5, 0.3],
                    [0.5, 1.0, 0.5],
                    [0.3, 0.5, 0.3],
                ]);
                let sum: f32 = k.sum();
                k.mapv_inplace(|v| v / sum);
                Ok(k)
            }
            SmoothingKernel::MexicanHat {
                size,
                sigma,
                sigma_scale,
            } => {
                if size % 2 == 0 {
                    return Err(DetectError::EvenSmoothingKernel { size });
                }
                Ok(mexican_hat(size, sigma, sigma_scale))
            }
        }
    }
}

/// A `size` x `size` mexican-hat kernel, normalized by the absolute value
/// of its sum.
fn mexican_hat(size: usize, sigma: f64, sigma_scale: f64) -> Array2<f32> {
    let cons = 2.0 / ((3.0 * sigma).sqrt() * std::f64::consts::PI.powf(0.75));
    let off = (size - 1) as f64 / 2.0;
    let maxd = {
        let d = (size as f64 - off - 1.0).max(1.0);
        (d * d + d * d).sqrt()
    };
    let mut k = Array2::from_shape_fn((size, size), |(y, x)| {
        let dy = y as f64 - off;
        let dx = x as f64 - off;
        let t = sigma_scale * sigma * (dx * dx + dy * dy).sqrt() / maxd;
        let t2 = t * t;
        (cons * (1.0 - t2 / (sigma * sigma)) * (-t2 / (2.0 * sigma * sigma)).exp()) as f32
    });
    let sum: f32 = k.sum();
    if sum.abs() > f32::EPSILON {
        let norm = sum.abs();
        k.mapv_inplace(|v| v / norm);
    }
    k
}

/// Convolves every class channel of every output map with `kernel`,
/// skipping the background channel.
///
/// Same-size convolution with zero padding at the borders, so map shapes
/// and cell-to-pixel geometry are unchanged.
pub fn smooth_outputs(
    maps: &mut [Array3<f32>],
    kernel: &Array2<f32>,
    background_class: Option<usize>,
) {
    for map in maps {
        let channels = map.dim().0;
        for c in 0..channels {
            if Some(c) == background_class {
                continue;
            }
            let smoothed = convolve_same(map.index_axis(ndarray::Axis(0), c), kernel);
            map.index_axis_mut(ndarray::Axis(0), c).assign(&smoothed);
        }
    }
}

fn convolve_same(src: ArrayView2<'_, f32>, kernel: &Array2<f32>) -> Array2<f32> {
    let (h, w) = src.dim();
    let (kh, kw) = kernel.dim();
    let (ch, cw) = (kh as isize / 2, kw as isize / 2);
    Array2::from_shape_fn((h, w), |(y, x)| {
        let mut acc = 0.0;
        for ky in 0..kh {
            let sy = y as isize + ky as isize - ch;
            if sy < 0 || sy >= h as isize {
                continue;
            }
            for kx in 0..kw {
                let sx = x as isize + kx as isize - cw;
                if sx < 0 || sx >= w as isize {
                    continue;
                }
                acc += src[[sy as usize, sx as usize]] * kernel[[ky, kx]];
            }
        }
        acc
    })
}
