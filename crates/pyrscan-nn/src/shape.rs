/// An ordered channels x height x width size descriptor.
///
/// Used both for image/tensor dimensions and for the per-frame scale list.
/// The channel dimension is carried along but never rescaled by any of the
/// scaling helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
    /// Number of channels (feature dimension).
    pub channels: usize,
    /// Spatial height.
    pub height: usize,
    /// Spatial width.
    pub width: usize,
}

impl TensorShape {
    /// Creates a new shape.
    pub const fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of spatial pixels.
    pub fn pixels(&self) -> usize {
        self.height * self.width
    }

    /// Returns this shape with both spatial axes multiplied by `factor`,
    /// rounded to the nearest pixel. Channels are left untouched.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            channels: self.channels,
            height: (self.height as f64 * factor).round() as usize,
            width: (self.width as f64 * factor).round() as usize,
        }
    }

    /// Returns this shape with each spatial axis scaled by its own factor.
    pub fn scaled_hw(&self, hfactor: f64, wfactor: f64) -> Self {
        Self {
            channels: self.channels,
            height: (self.height as f64 * hfactor).round() as usize,
            width: (self.width as f64 * wfactor).round() as usize,
        }
    }

    /// Returns this shape with each spatial axis raised to at least the
    /// corresponding axis of `min`.
    pub fn spatial_max(&self, min: &TensorShape) -> Self {
        Self {
            channels: self.channels,
            height: self.height.max(min.height),
            width: self.width.max(min.width),
        }
    }

    /// True when both spatial axes are greater than or equal to `other`'s.
    pub fn spatial_ge(&self, other: &TensorShape) -> bool {
        self.height >= other.height && self.width >= other.width
    }

    /// True when both spatial axes are less than or equal to `other`'s.
    pub fn spatial_le(&self, other: &TensorShape) -> bool {
        self.height <= other.height && self.width <= other.width
    }

    /// True when the spatial axes are equal, ignoring channels.
    pub fn spatial_eq(&self, other: &TensorShape) -> bool {
        self.height == other.height && self.width == other.width
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.height, self.width)
    }
}

impl From<[usize; 3]> for TensorShape {
    fn from(d: [usize; 3]) -> Self {
        Self::new(d[0], d[1], d[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_keeps_channels() {
        let s = TensorShape::new(3, 100, 200).scaled(0.5);
        assert_eq!(s, TensorShape::new(3, 50, 100));
    }

    #[test]
    fn scaled_rounds_to_nearest() {
        let s = TensorShape::new(1, 3, 5).scaled(0.5);
        assert_eq!(s.height, 2);
        assert_eq!(s.width, 3);
    }

    #[test]
    fn spatial_comparisons() {
        let a = TensorShape::new(3, 32, 32);
        let b = TensorShape::new(1, 64, 32);
        assert!(b.spatial_ge(&a));
        assert!(a.spatial_le(&b));
        assert!(!a.spatial_eq(&b));
        assert_eq!(a.spatial_max(&b), TensorShape::new(3, 64, 32));
    }
}
