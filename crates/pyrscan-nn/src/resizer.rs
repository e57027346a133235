use ndarray::Array3;

use crate::{error::NnError, rect::Rect};

/// The resizer collaborator: turns the working image into one network
/// input per scale.
///
/// The detector configures a target size per scale, an optional symmetric
/// zero padding and an optional input crop region, then calls
/// [`Resizer::resize`]. After a resize, [`Resizer::source_region`] reports
/// the original-image rectangle the output came from and
/// [`Resizer::content_region`] where that content sits inside the (padded)
/// output, which is what maps output coordinates back to the true input
/// frame.
pub trait Resizer {
    /// Sets the spatial size of the resized content, excluding padding.
    fn set_target(&mut self, height: usize, width: usize);

    /// Sets the symmetric zero padding added on each side of the output.
    fn set_padding(&mut self, hpad: usize, wpad: usize);

    /// Restricts resizing to a region of the source image. `None` uses the
    /// whole image.
    fn set_crop(&mut self, region: Option<Rect>);

    /// Resizes `src` (channel-first) to the configured target.
    fn resize(&mut self, src: &Array3<f32>) -> Result<Array3<f32>, NnError>;

    /// The source-image rectangle the last resize came from.
    fn source_region(&self) -> Rect;

    /// The rectangle of the last output actually covered by resized
    /// content, i.e. the output minus its zero-padding border.
    fn content_region(&self) -> Rect;
}

/// A [`Resizer`] using bilinear interpolation.
#[derive(Debug, Clone)]
pub struct BilinearResizer {
    target: (usize, usize),
    padding: (usize, usize),
    crop: Option<Rect>,
    source: Rect,
}

impl Default for BilinearResizer {
    fn default() -> Self {
        Self::new()
    }
}

impl BilinearResizer {
    /// Creates a resizer with a 1x1 target, no padding and no crop.
    pub fn new() -> Self {
        Self {
            target: (1, 1),
            padding: (0, 0),
            crop: None,
            source: Rect::default(),
        }
    }

    fn resolve_crop(&self, rows: usize, cols: usize) -> Result<Rect, NnError> {
        let mut region = match self.crop {
            Some(r) => r,
            None => return Ok(Rect::new(0.0, 0.0, rows as f32, cols as f32)),
        };
        region.clamp_to(rows as f32, cols as f32);
        if region.height < 1.0 || region.width < 1.0 {
            return Err(NnError::CropOutOfBounds {
                region: region.to_string(),
                height: rows,
                width: cols,
            });
        }
        Ok(region)
    }
}

impl Resizer for BilinearResizer {
    fn set_target(&mut self, height: usize, width: usize) {
        self.target = (height, width);
    }

    fn set_padding(&mut self, hpad: usize, wpad: usize) {
        self.padding = (hpad, wpad);
    }

    fn set_crop(&mut self, region: Option<Rect>) {
        self.crop = region;
    }

    fn resize(&mut self, src: &Array3<f32>) -> Result<Array3<f32>, NnError> {
        let (channels, rows, cols) = src.dim();
        let (th, tw) = self.target;
        if th == 0 || tw == 0 {
            return Err(NnError::EmptyResizeTarget {
                height: th,
                width: tw,
            });
        }
        let region = self.resolve_crop(rows, cols)?;
        self.source = region;

        let (ph, pw) = self.padding;
        let mut dst = Array3::<f32>::zeros((channels, th + 2 * ph, tw + 2 * pw));

        // source step per output cell, sampling edge to edge
        let sy = if th > 1 {
            (region.height - 1.0) / (th - 1) as f32
        } else {
            0.0
        };
        let sx = if tw > 1 {
            (region.width - 1.0) / (tw - 1) as f32
        } else {
            0.0
        };

        for y in 0..th {
            let v = region.h0 + y as f32 * sy;
            let iv0 = (v.floor() as usize).min(rows - 1);
            let iv1 = (iv0 + 1).min(rows - 1);
            let fv = v - iv0 as f32;
            for x in 0..tw {
                let u = region.w0 + x as f32 * sx;
                let iu0 = (u.floor() as usize).min(cols - 1);
                let iu1 = (iu0 + 1).min(cols - 1);
                let fu = u - iu0 as f32;

                let w00 = (1.0 - fv) * (1.0 - fu);
                let w01 = (1.0 - fv) * fu;
                let w10 = fv * (1.0 - fu);
                let w11 = fv * fu;

                for c in 0..channels {
                    dst[[c, y + ph, x + pw]] = src[[c, iv0, iu0]] * w00
                        + src[[c, iv0, iu1]] * w01
                        + src[[c, iv1, iu0]] * w10
                        + src[[c, iv1, iu1]] * w11;
                }
            }
        }
        Ok(dst)
    }

    fn source_region(&self) -> Rect {
        self.source
    }

    fn content_region(&self) -> Rect {
        Rect::new(
            self.padding.0 as f32,
            self.padding.1 as f32,
            self.target.0 as f32,
            self.target.1 as f32,
        )
    }
}
