use ndarray::Array3;

use crate::{error::NnError, rect::Rect, shape::TensorShape};

/// A single active output cell (or window of cells) used to probe a
/// network's inverse shape inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputProbe {
    /// The input size the probe is asked against.
    pub input: TensorShape,
    /// Output head index.
    pub head: usize,
    /// Active window in output-grid coordinates, usually a 1x1 cell.
    pub cell: Rect,
}

impl OutputProbe {
    /// A 1x1 probe at output cell (`row`, `col`) of `head` for `input`.
    pub fn cell(input: TensorShape, head: usize, row: f32, col: f32) -> Self {
        Self {
            input,
            head,
            cell: Rect::new(row, col, 1.0, 1.0),
        }
    }
}

/// The input rectangles a probed output window corresponds to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backtrack {
    /// Rectangle in raw input space.
    pub input: Rect,
    /// Rectangle in preprocessed (resized/padded) space. Equal to `input`
    /// for networks without an inner preprocessing stage.
    pub preprocessed: Rect,
}

/// The capabilities a trained feed-forward network exposes to the detector.
///
/// Implementations self-report their composition through
/// [`Network::backtrack`]: a network with a resize/pad stage composed
/// inside returns both the raw-input and the post-preprocessing rectangle,
/// instead of the detector having to discover sub-modules at runtime.
pub trait Network {
    /// Runs one forward pass, producing one `classes x H x W` map per
    /// output head.
    fn forward(&mut self, input: &Array3<f32>) -> Result<Vec<Array3<f32>>, NnError>;

    /// The minimum valid input size.
    fn min_input_size(&self) -> TensorShape;

    /// Output map shapes for a given input size, without running a forward
    /// pass.
    fn output_shapes(&self, input: TensorShape) -> Result<Vec<TensorShape>, NnError>;

    /// Inverse shape inference: the input rectangles corresponding to the
    /// probed output window.
    fn backtrack(&self, probe: &OutputProbe) -> Result<Backtrack, NnError>;
}
