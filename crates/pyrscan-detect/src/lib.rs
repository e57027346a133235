#![deny(missing_docs)]
//! # Pyrscan Detect
//!
//! Multi-scale sliding-window object detection on top of a trained
//! feed-forward network. The [`detector::Detector`] runs the full
//! per-frame pipeline: scale planning, per-scale resize and forward pass,
//! corner calibration, output post-processing, candidate extraction and
//! non-maximum suppression. The network and the resizer are generic
//! collaborators implementing the traits from `pyrscan-nn`.

/// Error types for detection.
pub mod error;

/// Per-frame scale planning.
pub mod scales;

/// Detection candidates and bulk operations on them.
pub mod bbox;

/// Output-grid to pixel calibration and its persisted table.
pub mod calib;

/// Output map thresholding and smoothing.
pub mod postproc;

/// Candidate extraction from output maps.
pub mod extract;

/// Non-maximum suppression.
pub mod nms;

/// The detection pipeline orchestrator.
pub mod detector;

pub use crate::bbox::BoundingBox;
pub use crate::calib::CalibrationMode;
pub use crate::detector::{Detector, DetectorConfig, Padding, SaveConfig};
pub use crate::error::DetectError;
pub use crate::extract::{DecisionPolicy, ExtractConfig};
pub use crate::nms::{NmsConfig, NmsMode};
pub use crate::postproc::SmoothingKernel;
pub use crate::scales::{ScalePlan, ScalePolicy};
