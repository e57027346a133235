use std::cmp::Ordering;

use pyrscan_nn::Rect;

/// A detection candidate carrying its rectangle in every coordinate space
/// it traversed.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    /// Predicted class index.
    pub class_id: usize,
    /// Detection confidence.
    pub confidence: f32,
    /// Rectangle in original image space.
    pub rect: Rect,
    /// Rectangle in preprocessed (resized/padded) space.
    pub pp_rect: Rect,
    /// Rectangle in output-grid space, 1x1 at extraction time.
    pub out_cell: Rect,
    /// Index of the scale this box was extracted at.
    pub scale_index: usize,
    /// Index of the output head this box was extracted from.
    pub head_index: usize,
    /// Per-frame unique id, assigned in extraction order.
    pub instance_id: u32,
    /// Boxes merged into this one by vote accumulation.
    pub children: Vec<BoundingBox>,
    /// Number of boxes accumulated into this one, 1 for a fresh box.
    pub votes: u32,
}

impl BoundingBox {
    /// A fresh single-vote box with empty auxiliary rectangles.
    pub fn new(class_id: usize, confidence: f32, rect: Rect) -> Self {
        Self {
            class_id,
            confidence,
            rect,
            pp_rect: Rect::default(),
            out_cell: Rect::default(),
            scale_index: 0,
            head_index: 0,
            instance_id: 0,
            children: Vec::new(),
            votes: 1,
        }
    }

    /// Multiplies every geometry field by `f`. Confidence and vote count
    /// are left untouched.
    pub fn rescale(&mut self, f: f32) {
        for r in [&mut self.rect, &mut self.pp_rect, &mut self.out_cell] {
            r.h0 *= f;
            r.w0 *= f;
            r.height *= f;
            r.width *= f;
        }
    }

    /// Adds `other`'s geometry (weighted by its vote count), confidence
    /// and vote count onto this box.
    ///
    /// Combined with [`BoundingBox::rescale`] this realizes the
    /// vote-weighted average: scale up by the current vote count,
    /// accumulate, scale back down by the new total.
    pub fn accumulate(&mut self, other: &BoundingBox) {
        let acc = other.votes as f32;
        for (r, o) in [
            (&mut self.rect, &other.rect),
            (&mut self.pp_rect, &other.pp_rect),
            (&mut self.out_cell, &other.out_cell),
        ] {
            r.h0 += o.h0 * acc;
            r.w0 += o.w0 * acc;
            r.height += o.height * acc;
            r.width += o.width * acc;
        }
        self.confidence += other.confidence;
        self.votes += other.votes;
    }

    /// Scales the image-space and preprocessed-space rectangles around
    /// their centers.
    pub fn scale_centered(&mut self, hf: f32, wf: f32) {
        self.rect.scale_centered(hf, wf);
        self.pp_rect.scale_centered(hf, wf);
    }

    /// Clamps the image-space rectangle to the given bounds.
    pub fn clamp_to(&mut self, height: f32, width: f32) {
        self.rect.clamp_to(height, width);
    }
}

/// Stable sort by descending confidence; insertion order is preserved on
/// ties.
pub fn sort_by_confidence(boxes: &mut [BoundingBox]) {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
}

/// Drops every box with confidence strictly below `min_confidence`.
pub fn threshold_boxes(boxes: &mut Vec<BoundingBox>, min_confidence: f32) {
    boxes.retain(|b| b.confidence >= min_confidence);
}

/// Forces every box to the given width/height aspect ratio, keeping the
/// box center and height. A ratio of 1 widens boxes to squares.
pub fn normalize_widths(boxes: &mut [BoundingBox], woverh: f32) {
    for b in boxes.iter_mut() {
        b.rect.scale_width(woverh);
        b.pp_rect.scale_width(woverh);
    }
}

/// Scales every box around its center, skipping the no-op factors.
pub fn scale_centered_all(boxes: &mut [BoundingBox], hf: f32, wf: f32) {
    if hf == 1.0 && wf == 1.0 {
        return;
    }
    for b in boxes.iter_mut() {
        b.scale_centered(hf, wf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn boxed(class_id: usize, confidence: f32, h0: f32, w0: f32) -> BoundingBox {
        BoundingBox::new(class_id, confidence, Rect::new(h0, w0, 10.0, 10.0))
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let mut a = boxed(0, 0.5, 0.0, 0.0);
        a.instance_id = 1;
        let mut b = boxed(0, 0.9, 0.0, 0.0);
        b.instance_id = 2;
        let mut c = boxed(0, 0.5, 0.0, 0.0);
        c.instance_id = 3;
        let mut boxes = vec![a, b, c];
        sort_by_confidence(&mut boxes);
        let ids: Vec<u32> = boxes.iter().map(|b| b.instance_id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn threshold_keeps_boundary_value() {
        let mut boxes = vec![boxed(0, 0.3, 0.0, 0.0), boxed(0, 0.29, 0.0, 0.0)];
        threshold_boxes(&mut boxes, 0.3);
        assert_eq!(boxes.len(), 1);
        assert_relative_eq!(boxes[0].confidence, 0.3);
    }

    #[test]
    fn vote_average_of_two_boxes() {
        let mut a = boxed(1, 0.6, 0.0, 0.0);
        let b = boxed(1, 0.4, 4.0, 8.0);
        // vote-weighted average: scale by own votes, add, divide by total
        a.rescale(a.votes as f32);
        a.accumulate(&b);
        a.rescale(1.0 / a.votes as f32);
        assert_eq!(a.votes, 2);
        assert_relative_eq!(a.rect.h0, 2.0);
        assert_relative_eq!(a.rect.w0, 4.0);
        assert_relative_eq!(a.rect.height, 10.0);
        // confidence is summed, not averaged
        assert_relative_eq!(a.confidence, 1.0);
    }

    #[test]
    fn width_normalization_keeps_center_and_height() {
        let mut boxes = vec![BoundingBox::new(0, 0.5, Rect::new(0.0, 0.0, 10.0, 20.0))];
        normalize_widths(&mut boxes, 1.0);
        let r = &boxes[0].rect;
        assert_relative_eq!(r.height, 10.0);
        assert_relative_eq!(r.width, 10.0);
        assert_relative_eq!(r.wcenter(), 10.0);
    }
}
