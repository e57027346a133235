use std::cmp::Ordering;

use crate::bbox::{
    normalize_widths, scale_centered_all, sort_by_confidence, threshold_boxes, BoundingBox,
};

/// Non-maximum suppression strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsMode {
    /// No suppression, only the confidence threshold is applied.
    #[default]
    None,
    /// Overlap pruning: of two matching boxes the lower-confidence one is
    /// dropped.
    Overlap,
    /// Vote merging: clusters of matching same-class boxes collapse into
    /// one averaged box with accumulated confidence.
    Voting,
    /// Vote merging followed by overlap pruning of the representatives.
    VotingOverlap,
}

/// Suppression parameters.
///
/// Two boxes "match" when their inverse overlap `1 - IoU` is at most
/// `max_overlap`, or when their centers are closer than the per-axis
/// distance bounds (expressed as fractions of box height/width). The vote
/// parameters play the same roles during merging.
#[derive(Debug, Clone, PartialEq)]
pub struct NmsConfig {
    /// Suppression strategy.
    pub mode: NmsMode,
    /// Confidence threshold, applied during pruning and again on the final
    /// boxes after post-scaling.
    pub threshold: f32,
    /// Centered (height, width) inflation applied to candidates before
    /// suppression.
    pub pre_scale: (f32, f32),
    /// Centered (height, width) inflation applied to survivors.
    pub post_scale: (f32, f32),
    /// Target width/height ratio of the final boxes; 1 leaves widths
    /// untouched.
    pub woverh: f32,
    /// Maximum inverse overlap for two boxes to match.
    pub max_overlap: f32,
    /// Vertical center-distance bound, as a fraction of box height.
    pub max_hcenter_dist: f32,
    /// Horizontal center-distance bound, as a fraction of box width.
    pub max_wcenter_dist: f32,
    /// Only same-class boxes may prune each other.
    pub same_class_only: bool,
    /// Maximum inverse overlap for two boxes to merge in voting modes.
    pub vote_max_overlap: f32,
    /// Vertical merge bound, as a fraction of half the taller box.
    pub vote_max_hcenter_dist: f32,
    /// Horizontal merge bound, as a fraction of half the wider box.
    pub vote_max_wcenter_dist: f32,
}

impl Default for NmsConfig {
    fn default() -> Self {
        Self {
            mode: NmsMode::None,
            threshold: 0.0,
            pre_scale: (1.0, 1.0),
            post_scale: (1.0, 1.0),
            woverh: 1.0,
            max_overlap: 0.5,
            max_hcenter_dist: 0.0,
            max_wcenter_dist: 0.0,
            same_class_only: false,
            vote_max_overlap: 0.5,
            vote_max_hcenter_dist: 1.0,
            vote_max_wcenter_dist: 1.0,
        }
    }
}

/// Runs suppression over one frame's candidates.
///
/// Pure over its inputs: pre-inflation, the mode's pruning or merging,
/// stable confidence sort, width normalization, post-inflation and the
/// final threshold, in that order.
pub fn suppress(cfg: &NmsConfig, mut boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    if cfg.mode == NmsMode::None {
        threshold_boxes(&mut boxes, cfg.threshold);
        return boxes;
    }
    scale_centered_all(&mut boxes, cfg.pre_scale.0, cfg.pre_scale.1);
    let mut kept = match cfg.mode {
        NmsMode::None => boxes,
        NmsMode::Overlap => overlap_prune(cfg, boxes),
        NmsMode::Voting => merge_votes(cfg, boxes),
        NmsMode::VotingOverlap => {
            let merged = merge_votes(cfg, boxes);
            overlap_prune(cfg, merged)
        }
    };
    sort_by_confidence(&mut kept);
    if cfg.woverh != 1.0 {
        normalize_widths(&mut kept, cfg.woverh);
    }
    scale_centered_all(&mut kept, cfg.post_scale.0, cfg.post_scale.1);
    threshold_boxes(&mut kept, cfg.threshold);
    kept
}

fn boxes_match(cfg: &NmsConfig, a: &BoundingBox, b: &BoundingBox) -> bool {
    if cfg.same_class_only && a.class_id != b.class_id {
        return false;
    }
    if 1.0 - a.rect.match_ratio(&b.rect) <= cfg.max_overlap {
        return true;
    }
    // centers may not come closer than the per-axis bounds, checked from
    // both boxes since the distances are normalized by each box's own size
    (a.rect.center_hdistance(&b.rect) < cfg.max_hcenter_dist
        && a.rect.center_wdistance(&b.rect) < cfg.max_wcenter_dist)
        || (b.rect.center_hdistance(&a.rect) < cfg.max_hcenter_dist
            && b.rect.center_wdistance(&a.rect) < cfg.max_wcenter_dist)
}

/// Greedy pruning against the already-kept set, strongest candidates
/// first. An equal-confidence match keeps the larger of the two boxes;
/// ties between non-matching boxes stay in insertion order.
fn overlap_prune(cfg: &NmsConfig, mut boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    sort_by_confidence(&mut boxes);
    let mut kept: Vec<BoundingBox> = Vec::new();
    'candidates: for b in boxes {
        if b.confidence < cfg.threshold {
            continue;
        }
        for k in kept.iter_mut() {
            if boxes_match(cfg, k, &b) {
                if k.confidence == b.confidence && b.rect.area() > k.rect.area() {
                    *k = b;
                }
                continue 'candidates;
            }
        }
        kept.push(b);
    }
    kept
}

/// Repeatedly merges the closest matching same-class pair into a
/// vote-weighted average box until no pair matches.
fn merge_votes(cfg: &NmsConfig, boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    let mut alive: Vec<Option<BoundingBox>> = boxes.into_iter().map(Some).collect();
    loop {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for i in 0..alive.len() {
            let a = match &alive[i] {
                Some(a) => a,
                None => continue,
            };
            for (j, other) in alive.iter().enumerate().skip(i + 1) {
                if let Some(b) = other {
                    pairs.push((a.rect.center_distance(&b.rect), i, j));
                }
            }
        }
        pairs.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(Ordering::Equal));

        let mut merged_any = false;
        for (_, i, j) in pairs {
            let (a, b) = match (&alive[i], &alive[j]) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            if a.class_id != b.class_id {
                continue;
            }
            let max_hdist = (a.rect.height / 2.0)
                .max(b.rect.height / 2.0)
                * cfg.vote_max_hcenter_dist;
            let max_wdist = (a.rect.width / 2.0)
                .max(b.rect.width / 2.0)
                * cfg.vote_max_wcenter_dist;
            if (a.rect.hcenter() - b.rect.hcenter()).abs() > max_hdist
                || (a.rect.wcenter() - b.rect.wcenter()).abs() > max_wdist
                || 1.0 - a.rect.match_ratio(&b.rect) > cfg.vote_max_overlap
            {
                continue;
            }

            let mut a = match alive[i].take() {
                Some(a) => a,
                None => continue,
            };
            let mut b = match alive[j].take() {
                Some(b) => b,
                None => continue,
            };
            // remember the true boxes composing the merged one
            if a.children.is_empty() {
                let snapshot = a.clone();
                a.children.push(snapshot);
            }
            if b.children.is_empty() {
                a.children.push(b.clone());
            } else {
                a.children.append(&mut b.children);
            }
            // vote-weighted geometry average; confidences add up
            a.rescale(a.votes as f32);
            a.accumulate(&b);
            a.rescale(1.0 / a.votes as f32);
            alive.push(Some(a));
            merged_any = true;
        }

        alive.retain(|s| s.is_some());
        if !merged_any {
            return alive.into_iter().flatten().collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pyrscan_nn::Rect;

    fn candidate(class_id: usize, confidence: f32, h0: f32, w0: f32) -> BoundingBox {
        BoundingBox::new(class_id, confidence, Rect::new(h0, w0, 10.0, 10.0))
    }

    fn overlap_cfg() -> NmsConfig {
        NmsConfig {
            mode: NmsMode::Overlap,
            max_overlap: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn identical_boxes_keep_the_stronger() {
        let boxes = vec![candidate(0, 0.8, 0.0, 0.0), candidate(0, 0.9, 0.0, 0.0)];
        let out = suppress(&overlap_cfg(), boxes);
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn disjoint_boxes_both_survive() {
        let boxes = vec![candidate(0, 0.9, 0.0, 0.0), candidate(0, 0.8, 50.0, 50.0)];
        let out = suppress(&overlap_cfg(), boxes);
        assert_eq!(out.len(), 2);
        assert!(out[0].confidence > out[1].confidence);
    }

    #[test]
    fn confidence_tie_keeps_larger_area() {
        let small = candidate(0, 0.5, 0.0, 0.0);
        let mut large = candidate(0, 0.5, 0.0, 0.0);
        large.rect = Rect::new(-2.0, -2.0, 14.0, 14.0);
        let out = suppress(&overlap_cfg(), vec![small, large]);
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0].rect.height, 14.0);
    }

    #[test]
    fn equal_confidence_disjoint_boxes_keep_insertion_order() {
        // the second box is larger but must not jump ahead of the first
        let first = candidate(0, 0.5, 0.0, 0.0);
        let mut second = candidate(0, 0.5, 50.0, 50.0);
        second.rect = Rect::new(50.0, 50.0, 20.0, 20.0);
        let out = suppress(&overlap_cfg(), vec![first, second]);
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out[0].rect.h0, 0.0);
        assert_relative_eq!(out[1].rect.h0, 50.0);
    }

    #[test]
    fn close_centers_match_even_without_overlap_bound() {
        let cfg = NmsConfig {
            mode: NmsMode::Overlap,
            max_overlap: 0.0,
            max_hcenter_dist: 0.5,
            max_wcenter_dist: 0.5,
            ..Default::default()
        };
        // shifted by 2 pixels: inverse overlap is high but centers are
        // within half a box size of each other
        let boxes = vec![candidate(0, 0.9, 0.0, 0.0), candidate(0, 0.7, 2.0, 2.0)];
        let out = suppress(&cfg, boxes);
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn same_class_only_spares_other_classes() {
        let cfg = NmsConfig {
            same_class_only: true,
            ..overlap_cfg()
        };
        let boxes = vec![candidate(0, 0.9, 0.0, 0.0), candidate(1, 0.8, 0.0, 0.0)];
        let out = suppress(&cfg, boxes);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn none_mode_only_thresholds() {
        let cfg = NmsConfig {
            threshold: 0.5,
            ..Default::default()
        };
        let boxes = vec![candidate(0, 0.9, 0.0, 0.0), candidate(0, 0.4, 0.0, 0.0)];
        let out = suppress(&cfg, boxes);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn voting_merges_cluster_into_average() {
        let cfg = NmsConfig {
            mode: NmsMode::Voting,
            vote_max_overlap: 0.8,
            vote_max_hcenter_dist: 1.0,
            vote_max_wcenter_dist: 1.0,
            ..Default::default()
        };
        let boxes = vec![
            candidate(0, 0.5, 0.0, 0.0),
            candidate(0, 0.5, 2.0, 2.0),
            candidate(0, 0.5, 4.0, 4.0),
        ];
        let out = suppress(&cfg, boxes);
        assert_eq!(out.len(), 1);
        let rep = &out[0];
        assert_eq!(rep.votes, 3);
        assert_eq!(rep.children.len(), 3);
        // confidences accumulate, geometry averages
        assert_relative_eq!(rep.confidence, 1.5);
        assert_relative_eq!(rep.rect.hcenter(), 7.0, epsilon = 1e-4);
    }

    #[test]
    fn voting_never_merges_across_classes() {
        let cfg = NmsConfig {
            mode: NmsMode::Voting,
            vote_max_overlap: 1.0,
            ..Default::default()
        };
        let boxes = vec![candidate(0, 0.5, 0.0, 0.0), candidate(1, 0.5, 0.0, 0.0)];
        let out = suppress(&cfg, boxes);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn voting_overlap_prunes_representatives() {
        let cfg = NmsConfig {
            mode: NmsMode::VotingOverlap,
            max_overlap: 0.5,
            vote_max_overlap: 0.2,
            ..Default::default()
        };
        // two tight clusters on the same spot, different vote support
        let boxes = vec![
            candidate(0, 0.5, 0.0, 0.0),
            candidate(0, 0.5, 1.0, 1.0),
            candidate(0, 0.3, 0.5, 0.5),
        ];
        let out = suppress(&cfg, boxes);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn width_normalization_and_post_scale_apply_to_survivors() {
        let cfg = NmsConfig {
            woverh: 2.0,
            post_scale: (1.0, 1.0),
            threshold: 0.1,
            ..overlap_cfg()
        };
        let boxes = vec![candidate(0, 0.9, 0.0, 0.0)];
        let out = suppress(&cfg, boxes);
        assert_relative_eq!(out[0].rect.width, 20.0);
        assert_relative_eq!(out[0].rect.height, 10.0);
    }
}
