use log::warn;
use pyrscan_nn::TensorShape;

use crate::error::DetectError;

/// How the per-frame list of target resolutions is generated.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalePolicy {
    /// A single scale, the image's original size.
    Original,
    /// A single scale, the network's minimum input size.
    NetworkMin,
    /// Caller-supplied scale list, used verbatim.
    Manual(Vec<TensorShape>),
    /// One scale per factor, each applied to the image's original size.
    Factors(Vec<f64>),
    /// `n` scales interpolated multiplicatively between the minimum and
    /// maximum bounds, largest first.
    NumScales(u32),
    /// Fixed multiplicative step from the maximum bound down to the
    /// minimum bound (the minimum acts as the stopping boundary).
    StepDown {
        /// Multiplicative step between consecutive scales, > 1.
        step: f64,
    },
    /// Fixed multiplicative step from the minimum bound up to the maximum
    /// bound, each candidate clamped to at least the minimum per axis.
    StepUp {
        /// Multiplicative step between consecutive scales, > 1.
        step: f64,
    },
}

/// The scaling policy plus its bounds, fixed at detector construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalePlan {
    /// Scale generation policy.
    pub policy: ScalePolicy,
    /// Minimum bound as a factor of the network's minimum input size. Must
    /// be large enough to keep both spatial axes of the bound at least 1.
    pub min_scale_factor: f64,
    /// Maximum bound as a factor of the image's original size.
    pub max_scale_factor: f64,
    /// Scales with a side larger than this are dropped with a warning.
    pub max_side: Option<usize>,
    /// Fixed (height, width) pixel amount removed from every target scale,
    /// compensating padding added later in the pipeline.
    pub pad_removal: Option<(usize, usize)>,
}

impl Default for ScalePlan {
    fn default() -> Self {
        Self {
            policy: ScalePolicy::Original,
            min_scale_factor: 1.0,
            max_scale_factor: 1.0,
            max_side: None,
            pad_removal: None,
        }
    }
}

impl ScalePlan {
    /// A plan running a single forward pass at the image's original size.
    pub fn original() -> Self {
        Self::default()
    }

    /// A plan with the given policy and default bounds.
    pub fn with_policy(policy: ScalePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }
}

/// Computes the ordered, non-empty list of target resolutions for one
/// frame.
///
/// `net_min` is the network's minimum valid input and `input` the frame's
/// native size. The channel dimension of every produced scale equals
/// `input.channels`; only spatial axes are scaled. Fails with
/// [`DetectError::NoScales`] when the final list comes out empty.
pub fn plan_scales(
    plan: &ScalePlan,
    net_min: TensorShape,
    input: TensorShape,
    frame: &str,
) -> Result<Vec<TensorShape>, DetectError> {
    // minimum bound: factor of the network minimum, channels untouched
    let min_bound = TensorShape {
        channels: input.channels,
        ..net_min.scaled(plan.min_scale_factor)
    };
    // a zero axis would never be reached by the stepping policies
    if min_bound.height == 0 || min_bound.width == 0 {
        return Err(DetectError::InvalidScaleBounds {
            height: min_bound.height,
            width: min_bound.width,
        });
    }
    // maximum bound: factor of the original size, at least the network
    // minimum on each axis
    let max_bound = input
        .scaled(plan.max_scale_factor)
        .spatial_max(&TensorShape {
            channels: input.channels,
            ..net_min
        });

    let mut scales = match &plan.policy {
        ScalePolicy::Original => vec![input],
        ScalePolicy::NetworkMin => vec![TensorShape {
            channels: input.channels,
            ..net_min
        }],
        ScalePolicy::Manual(list) => {
            if list.is_empty() {
                return Err(DetectError::EmptyManualScales);
            }
            list.clone()
        }
        ScalePolicy::Factors(factors) => {
            if factors.is_empty() {
                return Err(DetectError::EmptyFactorList);
            }
            factors.iter().map(|&f| input.scaled(f)).collect()
        }
        ScalePolicy::NumScales(n) => interpolated_scales(*n, min_bound, max_bound)?,
        ScalePolicy::StepDown { step } => stepped_down_scales(*step, min_bound, max_bound)?,
        ScalePolicy::StepUp { step } => stepped_up_scales(*step, input, min_bound, max_bound)?,
    };

    if let Some((ph, pw)) = plan.pad_removal {
        scales.retain_mut(|s| {
            if s.height > ph && s.width > pw {
                s.height -= ph;
                s.width -= pw;
                true
            } else {
                warn!("dropping scale {s}, smaller than the {ph}x{pw} pad removal");
                false
            }
        });
    }

    if let Some(max_side) = plan.max_side {
        scales.retain(|s| {
            let keep = s.height <= max_side && s.width <= max_side;
            if !keep {
                warn!("dropping scale {s}, larger than the {max_side} pixel maximum");
            }
            keep
        });
    }

    if scales.is_empty() {
        return Err(DetectError::NoScales {
            frame: frame.to_string(),
        });
    }
    Ok(scales)
}

/// `n` multiplicatively interpolated scales between `min` and `max`,
/// largest first, with `max` always included.
fn interpolated_scales(
    n: u32,
    min: TensorShape,
    max: TensorShape,
) -> Result<Vec<TensorShape>, DetectError> {
    if n == 0 {
        return Err(DetectError::ZeroScalesRequested);
    }
    // n is capped by the integer pixel steps available between min and max
    let span = (max.height.saturating_sub(min.height)).min(max.width.saturating_sub(min.width));
    let mut n = n;
    if n as usize > span {
        let clamped = if min.spatial_eq(&max) { 1 } else { 2 };
        warn!(
            "requested {n} scales but only {span} integer steps exist between \
             {min} and {max}, clamping to {clamped}"
        );
        n = clamped;
    }

    if min.spatial_eq(&max) || n == 1 {
        return Ok(vec![max]);
    }
    if n == 2 {
        return Ok(vec![max, min]);
    }
    // multiplicative step from the tighter of the two axis ratios
    let ratio = (max.height as f64 / min.height as f64).min(max.width as f64 / min.width as f64);
    let step = (ratio.ln() / (n - 1) as f64).exp();
    let mut scales = vec![max];
    let mut f = step;
    for _ in 1..n {
        scales.push(max.scaled(1.0 / f));
        f *= step;
    }
    Ok(scales)
}

/// Steps from `max` down by `1/step` until falling below `min`.
fn stepped_down_scales(
    step: f64,
    min: TensorShape,
    max: TensorShape,
) -> Result<Vec<TensorShape>, DetectError> {
    if step <= 1.0 {
        return Err(DetectError::InvalidScaleStep { step });
    }
    let mut scales = Vec::new();
    let mut f = 1.0;
    loop {
        let d = max.scaled(f);
        if !d.spatial_ge(&min) {
            break;
        }
        scales.push(d);
        f /= step;
    }
    Ok(scales)
}

/// Steps from the native size scaled to just reach `min`, up by `step`
/// until exceeding `max`, largest first.
fn stepped_up_scales(
    step: f64,
    input: TensorShape,
    min: TensorShape,
    max: TensorShape,
) -> Result<Vec<TensorShape>, DetectError> {
    if step <= 1.0 {
        return Err(DetectError::InvalidScaleStep { step });
    }
    let mut scales = Vec::new();
    let mut f = (min.height as f64 / input.height as f64)
        .max(min.width as f64 / input.width as f64);
    loop {
        let d = input.scaled(f);
        if !d.spatial_le(&max) {
            break;
        }
        scales.insert(0, d.spatial_max(&min));
        f *= step;
    }
    Ok(scales)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET: TensorShape = TensorShape::new(1, 32, 32);

    #[test]
    fn original_single_scale() {
        let input = TensorShape::new(3, 240, 320);
        let scales = plan_scales(&ScalePlan::original(), NET, input, "f0").unwrap();
        assert_eq!(scales, vec![input]);
    }

    #[test]
    fn network_min_keeps_input_channels() {
        let input = TensorShape::new(3, 240, 320);
        let plan = ScalePlan::with_policy(ScalePolicy::NetworkMin);
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert_eq!(scales, vec![TensorShape::new(3, 32, 32)]);
    }

    #[test]
    fn factors_scale_spatial_axes_only() {
        let input = TensorShape::new(3, 100, 200);
        let plan = ScalePlan::with_policy(ScalePolicy::Factors(vec![1.0, 0.5]));
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert_eq!(
            scales,
            vec![TensorShape::new(3, 100, 200), TensorShape::new(3, 50, 100)]
        );
        for s in &scales {
            assert_eq!(s.channels, input.channels);
        }
    }

    #[test]
    fn empty_factor_list_fails() {
        let plan = ScalePlan::with_policy(ScalePolicy::Factors(vec![]));
        let err = plan_scales(&plan, NET, TensorShape::new(1, 64, 64), "f0").unwrap_err();
        assert!(matches!(err, DetectError::EmptyFactorList));
    }

    #[test]
    fn empty_manual_list_fails() {
        let plan = ScalePlan::with_policy(ScalePolicy::Manual(vec![]));
        let err = plan_scales(&plan, NET, TensorShape::new(1, 64, 64), "f0").unwrap_err();
        assert!(matches!(err, DetectError::EmptyManualScales));
    }

    #[test]
    fn nscales_min_equals_max_yields_single_max() {
        // input == network minimum, so min and max bounds coincide
        let input = TensorShape::new(1, 32, 32);
        let plan = ScalePlan::with_policy(ScalePolicy::NumScales(5));
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert_eq!(scales, vec![TensorShape::new(1, 32, 32)]);
    }

    #[test]
    fn nscales_two_returns_max_then_min() {
        let input = TensorShape::new(1, 128, 128);
        let plan = ScalePlan::with_policy(ScalePolicy::NumScales(2));
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert_eq!(
            scales,
            vec![TensorShape::new(1, 128, 128), TensorShape::new(1, 32, 32)]
        );
    }

    #[test]
    fn nscales_three_halves_each_step() {
        // 32 -> 128 over 3 scales: step factor 2, middle scale 64
        let input = TensorShape::new(1, 128, 128);
        let plan = ScalePlan::with_policy(ScalePolicy::NumScales(3));
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert_eq!(scales.len(), 3);
        assert_eq!(scales[0], TensorShape::new(1, 128, 128));
        assert_eq!(scales[1], TensorShape::new(1, 64, 64));
        assert_eq!(scales[2], TensorShape::new(1, 32, 32));
    }

    #[test]
    fn nscales_excessive_clamps_to_two() {
        // only 1 integer step between 32 and 33 but 10 scales requested
        let input = TensorShape::new(1, 33, 33);
        let plan = ScalePlan::with_policy(ScalePolicy::NumScales(10));
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert_eq!(scales.len(), 2);
        assert_eq!(scales[0], TensorShape::new(1, 33, 33));
        assert_eq!(scales[1], TensorShape::new(1, 32, 32));
    }

    #[test]
    fn step_down_includes_min_boundary() {
        let input = TensorShape::new(1, 128, 128);
        let plan = ScalePlan::with_policy(ScalePolicy::StepDown { step: 2.0 });
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert_eq!(
            scales,
            vec![
                TensorShape::new(1, 128, 128),
                TensorShape::new(1, 64, 64),
                TensorShape::new(1, 32, 32),
            ]
        );
    }

    #[test]
    fn step_up_clamps_to_min_and_orders_largest_first() {
        let input = TensorShape::new(1, 64, 128);
        let plan = ScalePlan::with_policy(ScalePolicy::StepUp { step: 2.0 });
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert!(!scales.is_empty());
        for w in scales.windows(2) {
            assert!(w[0].pixels() >= w[1].pixels());
        }
        for s in &scales {
            assert!(s.spatial_ge(&TensorShape::new(1, 32, 32)));
        }
    }

    #[test]
    fn invalid_step_fails() {
        let plan = ScalePlan::with_policy(ScalePolicy::StepDown { step: 0.5 });
        let err = plan_scales(&plan, NET, TensorShape::new(1, 64, 64), "f0").unwrap_err();
        assert!(matches!(err, DetectError::InvalidScaleStep { .. }));
    }

    #[test]
    fn collapsed_min_bound_fails_for_step_down() {
        let mut plan = ScalePlan::with_policy(ScalePolicy::StepDown { step: 2.0 });
        plan.min_scale_factor = 0.0;
        let err = plan_scales(&plan, NET, TensorShape::new(1, 128, 128), "f0").unwrap_err();
        assert!(matches!(err, DetectError::InvalidScaleBounds { .. }));
    }

    #[test]
    fn collapsed_min_bound_fails_for_step_up() {
        let mut plan = ScalePlan::with_policy(ScalePolicy::StepUp { step: 2.0 });
        plan.min_scale_factor = 0.0;
        let err = plan_scales(&plan, NET, TensorShape::new(1, 128, 128), "f0").unwrap_err();
        assert!(matches!(err, DetectError::InvalidScaleBounds { .. }));
    }

    #[test]
    fn max_side_drops_not_fails() {
        let input = TensorShape::new(1, 128, 128);
        let mut plan = ScalePlan::with_policy(ScalePolicy::NumScales(3));
        plan.max_side = Some(100);
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert_eq!(
            scales,
            vec![TensorShape::new(1, 64, 64), TensorShape::new(1, 32, 32)]
        );
    }

    #[test]
    fn all_scales_dropped_is_a_named_error() {
        let input = TensorShape::new(1, 128, 128);
        let mut plan = ScalePlan::original();
        plan.max_side = Some(100);
        let err = plan_scales(&plan, NET, input, "frame_17").unwrap_err();
        match err {
            DetectError::NoScales { frame } => assert_eq!(frame, "frame_17"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn pad_removal_shrinks_targets() {
        let input = TensorShape::new(1, 128, 128);
        let mut plan = ScalePlan::original();
        plan.pad_removal = Some((74, 46));
        let scales = plan_scales(&plan, NET, input, "f0").unwrap();
        assert_eq!(scales, vec![TensorShape::new(1, 54, 82)]);
    }
}
