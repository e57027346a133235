use crate::{error::NnError, rect::Rect};

/// Spatial geometry of one sliding layer: kernel, stride and symmetric
/// zero padding, per axis in (height, width) order.
///
/// Only the geometry matters here. Convolutions, poolings and subsamplings
/// with the same kernel/stride/padding are indistinguishable for shape
/// inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerGeometry {
    /// Kernel size (height, width).
    pub kernel: (usize, usize),
    /// Stride (height, width).
    pub stride: (usize, usize),
    /// Symmetric zero padding (height, width), applied on each side.
    pub padding: (usize, usize),
}

impl LayerGeometry {
    /// A square kernel with a square stride and no padding.
    pub const fn square(kernel: usize, stride: usize) -> Self {
        Self {
            kernel: (kernel, kernel),
            stride: (stride, stride),
            padding: (0, 0),
        }
    }
}

/// An ordered stack of [`LayerGeometry`], modelling the spatial behavior of
/// a feed-forward network from input to one output head.
///
/// Forward shape inference walks the stack front to back; inverse shape
/// inference ([`GeometryStack::backtrack`]) walks it back to front, mapping
/// an output-grid window to the input rectangle that feeds it. The mapping
/// is linear and translation-equivariant, which is what the detector's
/// corner calibration relies on.
#[derive(Debug, Clone, Default)]
pub struct GeometryStack {
    layers: Vec<LayerGeometry>,
}

impl GeometryStack {
    /// Creates a stack from an ordered layer list.
    pub fn new(layers: Vec<LayerGeometry>) -> Self {
        Self { layers }
    }

    /// The layers of this stack.
    pub fn layers(&self) -> &[LayerGeometry] {
        &self.layers
    }

    /// Smallest input (height, width) producing a non-empty output.
    pub fn min_input_size(&self) -> (usize, usize) {
        // walk backwards from a single output cell
        let mut h = 1usize;
        let mut w = 1usize;
        for layer in self.layers.iter().rev() {
            h = (h - 1) * layer.stride.0 + layer.kernel.0;
            w = (w - 1) * layer.stride.1 + layer.kernel.1;
            h = h.saturating_sub(2 * layer.padding.0).max(1);
            w = w.saturating_sub(2 * layer.padding.1).max(1);
        }
        (h, w)
    }

    /// Output (height, width) for an input of the given spatial size.
    ///
    /// Fails when any layer's output collapses to zero cells.
    pub fn output_size(&self, input_hw: (usize, usize)) -> Result<(usize, usize), NnError> {
        let (mut h, mut w) = input_hw;
        for (i, layer) in self.layers.iter().enumerate() {
            let ph = h + 2 * layer.padding.0;
            let pw = w + 2 * layer.padding.1;
            if ph < layer.kernel.0 || pw < layer.kernel.1 {
                return Err(NnError::OutputCollapsed {
                    layer: i,
                    height: input_hw.0,
                    width: input_hw.1,
                });
            }
            h = (ph - layer.kernel.0) / layer.stride.0 + 1;
            w = (pw - layer.kernel.1) / layer.stride.1 + 1;
        }
        Ok((h, w))
    }

    /// Maps a window of output cells back to the input rectangle feeding it.
    ///
    /// A window of `n` cells starting at cell `o` along one axis with
    /// stride `s`, kernel `k` and padding `p` is fed by the input span
    /// starting at `o*s - p` of size `(n-1)*s + k`. Offsets may be negative
    /// when padding reaches outside the input.
    pub fn backtrack(&self, cell: Rect) -> Rect {
        let mut r = cell;
        for layer in self.layers.iter().rev() {
            r.h0 = r.h0 * layer.stride.0 as f32 - layer.padding.0 as f32;
            r.w0 = r.w0 * layer.stride.1 as f32 - layer.padding.1 as f32;
            r.height = (r.height - 1.0) * layer.stride.0 as f32 + layer.kernel.0 as f32;
            r.width = (r.width - 1.0) * layer.stride.1 as f32 + layer.kernel.1 as f32;
        }
        r
    }
}
