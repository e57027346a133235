use log::warn;
use ndarray::Array3;
use pyrscan_nn::Rect;

use crate::{bbox::BoundingBox, calib::CornerMapping, error::DetectError};

/// Which output cells become detection candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecisionPolicy {
    /// Cells whose winning class clears the confidence threshold and is
    /// not the background class.
    #[default]
    Confidence,
    /// Only the four corner cells of each output grid, unconditionally.
    GridCorners,
    /// Only the bottom-right cell of each output grid, unconditionally.
    BottomRight,
}

/// Extraction parameters, fixed at detector construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractConfig {
    /// Cell acceptance policy.
    pub policy: DecisionPolicy,
    /// Confidence threshold applied to every head.
    pub threshold: f32,
    /// Per-head overrides of the scalar threshold; heads past the end of
    /// this list use the scalar.
    pub head_thresholds: Vec<f32>,
    /// Class index never producing detections.
    pub background_class: Option<usize>,
    /// When set, the winning class is ignored and this class's channel is
    /// read instead.
    pub forced_class: Option<usize>,
    /// Drop boxes reaching outside the original image.
    pub ignore_outsiders: bool,
    /// Per-head centered (height, width) box corrections.
    pub box_scalings: Vec<(f32, f32)>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            policy: DecisionPolicy::Confidence,
            threshold: 0.0,
            head_thresholds: Vec::new(),
            background_class: None,
            forced_class: None,
            ignore_outsiders: false,
            box_scalings: Vec::new(),
        }
    }
}

/// Turns thresholded output maps into bounding box candidates.
///
/// The extractor owns the per-frame instance-id counter; the detector
/// calls [`Extractor::begin_frame`] once per frame so ids restart at zero
/// and stay unique within the frame across all scales and heads.
#[derive(Debug, Default)]
pub struct Extractor {
    next_instance: u32,
}

impl Extractor {
    /// Creates an extractor with its id counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the instance-id counter for a new frame.
    pub fn begin_frame(&mut self) {
        self.next_instance = 0;
    }

    /// Extracts candidates from the output maps of one scale.
    ///
    /// `maps` holds one `classes x H x W` map per head and `mappings` the
    /// matching corner calibration. Boxes come out in row-major cell order
    /// per head, heads in order.
    pub fn extract(
        &mut self,
        cfg: &ExtractConfig,
        maps: &[Array3<f32>],
        mappings: &[CornerMapping],
        scale_index: usize,
        image_height: f32,
        image_width: f32,
    ) -> Result<Vec<BoundingBox>, DetectError> {
        let mut boxes = Vec::new();
        for (head, (map, mapping)) in maps.iter().zip(mappings.iter()).enumerate() {
            let (classes, oh, ow) = map.dim();
            if classes == 0 || oh == 0 || ow == 0 {
                return Err(DetectError::EmptyOutputMap {
                    scale: scale_index,
                    head,
                });
            }
            let threshold = cfg
                .head_thresholds
                .get(head)
                .copied()
                .unwrap_or(cfg.threshold);
            let stride_h = mapping.stride_h(oh);
            let stride_w = mapping.stride_w(ow);
            let pp_stride_h = mapping.pp_stride_h(oh);
            let pp_stride_w = mapping.pp_stride_w(ow);
            let forced = match cfg.forced_class {
                Some(c) if c < classes => Some(c),
                Some(c) => {
                    warn!(
                        "forced class {c} out of range for head {head} with {classes} \
                         channels, falling back to the winning class"
                    );
                    None
                }
                None => None,
            };

            for y in 0..oh {
                for x in 0..ow {
                    let (class_id, confidence) = match forced {
                        Some(c) => (c, map[[c, y, x]]),
                        None => winning_class(map, y, x),
                    };
                    let accept = match cfg.policy {
                        DecisionPolicy::Confidence => {
                            confidence >= threshold && Some(class_id) != cfg.background_class
                        }
                        DecisionPolicy::GridCorners => {
                            (y == 0 || y == oh - 1) && (x == 0 || x == ow - 1)
                        }
                        DecisionPolicy::BottomRight => y == oh - 1 && x == ow - 1,
                    };
                    if !accept {
                        continue;
                    }

                    let mut b = BoundingBox::new(
                        class_id,
                        confidence,
                        Rect::new(
                            mapping.top_left.h0 + y as f32 * stride_h,
                            mapping.top_left.w0 + x as f32 * stride_w,
                            mapping.top_left.height,
                            mapping.top_left.width,
                        ),
                    );
                    b.pp_rect = Rect::new(
                        mapping.pp_top_left.h0 + y as f32 * pp_stride_h,
                        mapping.pp_top_left.w0 + x as f32 * pp_stride_w,
                        mapping.pp_top_left.height,
                        mapping.pp_top_left.width,
                    );
                    b.out_cell = Rect::new(y as f32, x as f32, 1.0, 1.0);
                    b.scale_index = scale_index;
                    b.head_index = head;

                    if let Some(&(hf, wf)) = cfg.box_scalings.get(head) {
                        if hf != 1.0 || wf != 1.0 {
                            b.scale_centered(hf, wf);
                        }
                    }
                    if cfg.ignore_outsiders && !b.rect.is_within(image_height, image_width) {
                        continue;
                    }

                    b.instance_id = self.next_instance;
                    self.next_instance += 1;
                    boxes.push(b);
                }
            }
        }
        Ok(boxes)
    }
}

fn winning_class(map: &Array3<f32>, y: usize, x: usize) -> (usize, f32) {
    let classes = map.dim().0;
    let mut best = (0, map[[0, y, x]]);
    for c in 1..classes {
        let v = map[[c, y, x]];
        if v > best.1 {
            best = (c, v);
        }
    }
    best
}
