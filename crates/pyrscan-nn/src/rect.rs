/// A float rectangle given by its top-left corner and size, in row/column
/// order (`h0` is the row of the top edge, `w0` the column of the left
/// edge).
///
/// Rectangles are used in three coordinate frames: the original image, the
/// preprocessed (resized/padded) network input, and the output grid. The
/// frame is implied by context; the operations are frame-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    /// Row of the top edge.
    pub h0: f32,
    /// Column of the left edge.
    pub w0: f32,
    /// Height.
    pub height: f32,
    /// Width.
    pub width: f32,
}

impl Rect {
    /// Creates a new rectangle.
    pub const fn new(h0: f32, w0: f32, height: f32, width: f32) -> Self {
        Self {
            h0,
            w0,
            height,
            width,
        }
    }

    /// Row of the bottom edge.
    pub fn h1(&self) -> f32 {
        self.h0 + self.height
    }

    /// Column of the right edge.
    pub fn w1(&self) -> f32 {
        self.w0 + self.width
    }

    /// Row of the center.
    pub fn hcenter(&self) -> f32 {
        self.h0 + self.height / 2.0
    }

    /// Column of the center.
    pub fn wcenter(&self) -> f32 {
        self.w0 + self.width / 2.0
    }

    /// Area of the rectangle.
    pub fn area(&self) -> f32 {
        self.height * self.width
    }

    /// Half of the diagonal, the radius of the enclosing circle.
    pub fn radius(&self) -> f32 {
        (self.height * self.height + self.width * self.width).sqrt() / 2.0
    }

    /// Area of the intersection with `other`, zero when disjoint.
    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let nh0 = self.h0.max(other.h0);
        let nh1 = self.h1().min(other.h1());
        if nh0 >= nh1 {
            return 0.0;
        }
        let nw0 = self.w0.max(other.w0);
        let nw1 = self.w1().min(other.w1());
        if nw0 >= nw1 {
            return 0.0;
        }
        (nh1 - nh0) * (nw1 - nw0)
    }

    /// Area of the union with `other`.
    pub fn union_area(&self, other: &Rect) -> f32 {
        self.area() + other.area() - self.intersection_area(other)
    }

    /// Intersection over union, in `[0, 1]`. Zero when the union is empty.
    pub fn match_ratio(&self, other: &Rect) -> f32 {
        let u = self.union_area(other);
        if u == 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / u
    }

    /// Euclidean distance between the two centers.
    pub fn center_distance(&self, other: &Rect) -> f32 {
        let dh = other.hcenter() - self.hcenter();
        let dw = other.wcenter() - self.wcenter();
        (dh * dh + dw * dw).sqrt()
    }

    /// Vertical center distance, normalized by this rectangle's height.
    pub fn center_hdistance(&self, other: &Rect) -> f32 {
        (self.hcenter() - other.hcenter()).abs() / self.height
    }

    /// Horizontal center distance, normalized by this rectangle's width.
    pub fn center_wdistance(&self, other: &Rect) -> f32 {
        (self.wcenter() - other.wcenter()).abs() / self.width
    }

    /// Grows or shrinks the rectangle by per-axis factors while keeping the
    /// same center.
    pub fn scale_centered(&mut self, hfact: f32, wfact: f32) {
        let addh = self.height * (hfact - 1.0);
        let addw = self.width * (wfact - 1.0);
        self.h0 -= addh / 2.0;
        self.w0 -= addw / 2.0;
        self.height += addh;
        self.width += addw;
    }

    /// Sets the width to `height * woverh` while keeping the same center.
    pub fn scale_width(&mut self, woverh: f32) {
        let addw = self.height * woverh - self.width;
        self.w0 -= addw / 2.0;
        self.width += addw;
    }

    /// Clamps the rectangle so it lies inside an `imh` x `imw` frame.
    pub fn clamp_to(&mut self, imh: f32, imw: f32) {
        self.h0 = self.h0.max(0.0);
        self.w0 = self.w0.max(0.0);
        self.height = self.height.min(imh - self.h0);
        self.width = self.width.min(imw - self.w0);
    }

    /// True when the rectangle lies entirely inside an `imh` x `imw` frame.
    pub fn is_within(&self, imh: f32, imw: f32) -> bool {
        self.h0 >= 0.0 && self.w0 >= 0.0 && self.h1() <= imh && self.w1() <= imw
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({},{}) {}x{}",
            self.h0, self.w0, self.height, self.width
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn match_ratio_identity() {
        let a = Rect::new(10.0, 20.0, 30.0, 40.0);
        assert_relative_eq!(a.match_ratio(&a), 1.0);
    }

    #[test]
    fn match_ratio_disjoint() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 20.0, 10.0, 10.0);
        assert_relative_eq!(a.match_ratio(&b), 0.0);
        assert_relative_eq!(a.intersection_area(&b), 0.0);
    }

    #[test]
    fn match_ratio_half_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(0.0, 5.0, 10.0, 10.0);
        // intersection 50, union 150
        assert_relative_eq!(a.match_ratio(&b), 1.0 / 3.0);
    }

    #[test]
    fn scale_centered_keeps_center() {
        let mut r = Rect::new(10.0, 10.0, 20.0, 20.0);
        let (hc, wc) = (r.hcenter(), r.wcenter());
        r.scale_centered(2.0, 0.5);
        assert_relative_eq!(r.hcenter(), hc);
        assert_relative_eq!(r.wcenter(), wc);
        assert_relative_eq!(r.height, 40.0);
        assert_relative_eq!(r.width, 10.0);
    }

    #[test]
    fn scale_width_sets_aspect() {
        let mut r = Rect::new(0.0, 0.0, 20.0, 10.0);
        r.scale_width(1.5);
        assert_relative_eq!(r.width, 30.0);
        assert_relative_eq!(r.wcenter(), 5.0);
    }

    #[test]
    fn clamp_to_frame() {
        let mut r = Rect::new(-5.0, -5.0, 20.0, 20.0);
        r.clamp_to(10.0, 12.0);
        assert_relative_eq!(r.h0, 0.0);
        assert_relative_eq!(r.w0, 0.0);
        assert_relative_eq!(r.height, 10.0);
        assert_relative_eq!(r.width, 12.0);
    }
}
