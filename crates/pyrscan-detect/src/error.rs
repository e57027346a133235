use pyrscan_nn::NnError;

/// Errors aborting a frame or the detector construction.
///
/// Everything the detector can recover from (missing background class,
/// oversized scales, failed side-effect writes, out-of-bounds crops) is
/// logged through `log::warn!` instead and never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// The scale planner produced zero scales for a frame.
    #[error("0 scales to compute for frame '{frame}'")]
    NoScales {
        /// Identifier of the offending frame.
        frame: String,
    },

    /// A manual scale list was set but is empty.
    #[error("expected at least 1 manual scale but found 0")]
    EmptyManualScales,

    /// A scale-factor list was set but is empty.
    #[error("expected at least 1 scale factor but found 0")]
    EmptyFactorList,

    /// A multiplicative scale step must be greater than 1.
    #[error("scale step must be > 1 but is {step}")]
    InvalidScaleStep {
        /// The offending step value.
        step: f64,
    },

    /// The requested number of interpolated scales is zero.
    #[error("expected at least 1 scale but 0 were requested")]
    ZeroScalesRequested,

    /// The minimum scale bound collapsed to zero on a spatial axis.
    #[error("minimum scale bound collapsed to {height}x{width}, the minimum scale factor is too small")]
    InvalidScaleBounds {
        /// Height of the collapsed bound.
        height: usize,
        /// Width of the collapsed bound.
        width: usize,
    },

    /// Smoothing kernels need a center cell, so their side must be odd.
    #[error("smoothing kernel side must be odd but is {size}")]
    EvenSmoothingKernel {
        /// The offending kernel side.
        size: usize,
    },

    /// An output map is too small for the configured decision policy.
    #[error("output map for scale {scale} head {head} is empty")]
    EmptyOutputMap {
        /// Scale index.
        scale: usize,
        /// Output head index.
        head: usize,
    },

    /// Corner calibration was requested for a scale that is not cached and
    /// cannot be inferred in the current mode.
    #[error("no corner mapping available for scale {scale}")]
    MissingCalibration {
        /// Scale index.
        scale: usize,
    },

    /// The persisted corner table does not match the network topology.
    #[error("corner table holds {rows} rows but {expected} output maps were requested")]
    CornerTableMismatch {
        /// Rows found in the table.
        rows: usize,
        /// Output maps the detector needs.
        expected: usize,
    },

    /// Reading or writing the persisted corner table failed.
    #[error("corner table i/o failed: {0}")]
    CornerTableIo(#[from] std::io::Error),

    /// Decoding a persisted corner table failed.
    #[error("corner table is malformed: {0}")]
    CornerTableDecode(String),

    /// An error bubbled up from the network or resizer collaborator.
    #[error(transparent)]
    Nn(#[from] NnError),
}
