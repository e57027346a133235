#![deny(missing_docs)]
//! # pyrscan-nn
//!
//! Collaborator interfaces and geometry primitives for the multi-scale
//! sliding-window detector in `pyrscan-detect`.
//!
//! The detector never looks inside a network. It relies on three
//! capabilities a trained feed-forward network has to expose:
//!
//! * a forward pass mapping a channel-first tensor to one output map per
//!   output head ([`Network::forward`]),
//! * its minimum valid input size ([`Network::min_input_size`]),
//! * inverse shape inference: which input rectangle does a given output
//!   cell correspond to ([`Network::backtrack`]).
//!
//! The last one replaces any hand-computed receptive-field formula.
//! Networks built from ordinary convolution/pooling layers can implement it
//! with a [`geometry::GeometryStack`].

/// Error types shared by the collaborator interfaces.
pub mod error;

/// Receptive-field geometry helpers for implementing shape inference.
pub mod geometry;

/// The network collaborator interface.
pub mod network;

/// Float rectangles in input, preprocessed and output-grid space.
pub mod rect;

/// The resizer collaborator interface and a bilinear implementation.
pub mod resizer;

/// Ordered channels/height/width size descriptors.
pub mod shape;

pub use error::NnError;
pub use geometry::{GeometryStack, LayerGeometry};
pub use network::{Backtrack, Network, OutputProbe};
pub use rect::Rect;
pub use resizer::{BilinearResizer, Resizer};
pub use shape::TensorShape;
