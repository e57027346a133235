/// Errors that can occur inside the network and resizer collaborators.
#[derive(Debug, thiserror::Error)]
pub enum NnError {
    /// The input tensor does not match the shape the network expects.
    #[error("invalid input shape: expected {expected} channels, got {got}")]
    InvalidInputChannels {
        /// Number of channels the network was built for.
        expected: usize,
        /// Number of channels of the offending tensor.
        got: usize,
    },

    /// The input is smaller than the network's minimum valid size.
    #[error("input {height}x{width} is below the minimum valid size {min_height}x{min_width}")]
    InputTooSmall {
        /// Input height.
        height: usize,
        /// Input width.
        width: usize,
        /// Minimum valid height.
        min_height: usize,
        /// Minimum valid width.
        min_width: usize,
    },

    /// The spatial output of a layer collapsed to zero cells.
    #[error("output dimensions collapsed to zero at layer {layer} (input {height}x{width})")]
    OutputCollapsed {
        /// Index of the layer whose output became empty.
        layer: usize,
        /// Input height fed to the stack.
        height: usize,
        /// Input width fed to the stack.
        width: usize,
    },

    /// An output-head index beyond the number of heads the network produces.
    #[error("output head {head} requested but the network has {heads} heads")]
    HeadOutOfBounds {
        /// Requested head index.
        head: usize,
        /// Number of heads available.
        heads: usize,
    },

    /// The resizer was asked to produce an empty target.
    #[error("resize target {height}x{width} is empty")]
    EmptyResizeTarget {
        /// Requested target height.
        height: usize,
        /// Requested target width.
        width: usize,
    },

    /// The resizer crop region does not intersect the source image.
    #[error("crop region {region} lies outside the {height}x{width} source")]
    CropOutOfBounds {
        /// The offending crop region, formatted as a rectangle.
        region: String,
        /// Source height.
        height: usize,
        /// Source width.
        width: usize,
    },
}
