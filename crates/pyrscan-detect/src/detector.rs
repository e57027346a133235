use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use ndarray::{Array2, Array3, Axis};
use pyrscan_nn::{Network, Rect, Resizer, TensorShape};

use crate::{
    bbox::{sort_by_confidence, BoundingBox},
    calib::{CalibrationMode, CornerCache, CornerMapping},
    error::DetectError,
    extract::{ExtractConfig, Extractor},
    nms::{suppress, NmsConfig},
    postproc::{smooth_outputs, threshold_outputs, SmoothingKernel},
    scales::{plan_scales, ScalePlan},
};

/// Zero padding added around every resized scale.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Padding {
    /// No padding.
    #[default]
    None,
    /// Per-axis fractions of the network's minimum input size.
    Fraction(f32, f32),
    /// Absolute per-axis pixel amounts.
    Pixels(usize, usize),
}

/// Where and how detected crops are persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveConfig {
    /// Root directory; one sub-directory per class is created inside.
    pub directory: PathBuf,
    /// Cap on saved crops per frame, strongest detections first.
    pub max_per_frame: Option<usize>,
}

/// Full detector configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Scale generation policy and bounds.
    pub scale_plan: ScalePlan,
    /// Class labels, indexed by class id.
    pub labels: Vec<String>,
    /// Label of the background class, resolved against `labels`.
    pub background_name: Option<String>,
    /// Label of the mask class, resolved against `labels`.
    pub mask_name: Option<String>,
    /// Multiplier applied to the input image before any processing.
    pub input_gain: f32,
    /// Zero padding around every scale.
    pub padding: Padding,
    /// Candidate extraction parameters.
    pub extract: ExtractConfig,
    /// Suppression parameters.
    pub nms: NmsConfig,
    /// Output smoothing, applied to non-background class channels.
    pub smoothing: Option<SmoothingKernel>,
    /// Hard output threshold as (cutoff, fill), applied before smoothing.
    pub outputs_threshold: Option<(f32, f32)>,
    /// Corner calibration source.
    pub calibration: CalibrationMode,
    /// Directory receiving raw output map dumps, one file per scale and
    /// head per frame.
    pub outputs_dump: Option<PathBuf>,
    /// Crop persistence.
    pub save: Option<SaveConfig>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            scale_plan: ScalePlan::default(),
            labels: Vec::new(),
            background_name: None,
            mask_name: None,
            input_gain: 1.0,
            padding: Padding::None,
            extract: ExtractConfig::default(),
            nms: NmsConfig::default(),
            smoothing: None,
            outputs_threshold: None,
            calibration: CalibrationMode::Infer,
            outputs_dump: None,
            save: None,
        }
    }
}

/// Multi-scale sliding-window detector over a trained network.
///
/// The detector owns its network and resizer collaborators and all
/// per-frame state. Each [`Detector::detect`] call runs the full pipeline:
/// scale planning (on input dimension changes), per-scale resize + forward
/// + corner calibration, output post-processing, candidate extraction,
/// confidence sorting, suppression, and the optional side effects (output
/// dumping, crop saving). Repeated calls on the same frame with unchanged
/// configuration return identical results.
pub struct Detector<N: Network, R: Resizer> {
    net: N,
    resizer: R,
    cfg: DetectorConfig,
    extractor: Extractor,
    corners: CornerCache,
    kernel: Option<Array2<f32>>,
    background_class: Option<usize>,
    mask_class: Option<usize>,
    scales: Vec<TensorShape>,
    input_dims: Option<TensorShape>,
    image: Array3<f32>,
    preprocessed: Vec<Array3<f32>>,
    detections: Vec<BoundingBox>,
    last_mask: Option<Array2<f32>>,
    saved_counters: Vec<usize>,
}

impl<N: Network, R: Resizer> Detector<N, R> {
    /// Builds a detector around its collaborators.
    ///
    /// Class-name lookups that fail only log a warning; a loadable corner
    /// table that cannot be read is fatal.
    pub fn new(net: N, resizer: R, mut cfg: DetectorConfig) -> Result<Self, DetectError> {
        let corners = CornerCache::new(cfg.calibration.clone())?;
        let kernel = match &cfg.smoothing {
            Some(k) => Some(k.build()?),
            None => None,
        };
        let background_class = cfg
            .background_name
            .take()
            .and_then(|name| resolve_class(&cfg.labels, &name, "background"));
        let mask_class = cfg
            .mask_name
            .take()
            .and_then(|name| resolve_class(&cfg.labels, &name, "mask"));
        cfg.extract.background_class = background_class;
        Ok(Self {
            net,
            resizer,
            cfg,
            extractor: Extractor::new(),
            corners,
            kernel,
            background_class,
            mask_class,
            scales: Vec::new(),
            input_dims: None,
            image: Array3::zeros((1, 1, 1)),
            preprocessed: Vec::new(),
            detections: Vec::new(),
            last_mask: None,
            saved_counters: Vec::new(),
        })
    }

    /// The scales planned for the current input dimensions.
    pub fn scales(&self) -> &[TensorShape] {
        &self.scales
    }

    /// The detections of the last frame.
    pub fn detections(&self) -> &[BoundingBox] {
        &self.detections
    }

    /// The class labels.
    pub fn labels(&self) -> &[String] {
        &self.cfg.labels
    }

    /// The label of a class id, when one is configured.
    pub fn class_name(&self, class_id: usize) -> Option<&str> {
        self.cfg.labels.get(class_id).map(String::as_str)
    }

    /// Re-resolves the background class by label. Unknown labels leave the
    /// current setting untouched with a warning.
    pub fn set_background_class(&mut self, name: &str) {
        if let Some(id) = resolve_class(&self.cfg.labels, name, "background") {
            self.background_class = Some(id);
            self.cfg.extract.background_class = Some(id);
        }
    }

    /// Re-resolves the mask class by label. Unknown labels leave the
    /// current setting untouched with a warning.
    pub fn set_mask_class(&mut self, name: &str) {
        if let Some(id) = resolve_class(&self.cfg.labels, name, "mask") {
            self.mask_class = Some(id);
        }
    }

    /// The mask class's raw response map at the largest scale of the last
    /// frame.
    pub fn mask(&self) -> Option<&Array2<f32>> {
        self.last_mask.as_ref()
    }

    /// Total crops persisted since construction.
    pub fn total_saved(&self) -> usize {
        self.saved_counters.iter().sum()
    }

    /// Runs the full pipeline on a single-channel image.
    pub fn detect_gray(
        &mut self,
        image: &Array2<f32>,
        frame: &str,
    ) -> Result<&[BoundingBox], DetectError> {
        let promoted = image.clone().insert_axis(Axis(0));
        self.detect(&promoted, frame)
    }

    /// Runs the full pipeline on a channel-first image and returns the
    /// final detections, strongest first.
    pub fn detect(
        &mut self,
        image: &Array3<f32>,
        frame: &str,
    ) -> Result<&[BoundingBox], DetectError> {
        let (c, h, w) = image.dim();
        let dims = TensorShape::new(c, h, w);

        self.image = image.clone();
        if self.cfg.input_gain != 1.0 {
            let gain = self.cfg.input_gain;
            self.image.mapv_inplace(|v| v * gain);
        }

        // scale planning only reruns when the input dimensions change
        if self.input_dims != Some(dims) {
            let net_min = self.net.min_input_size();
            self.scales = plan_scales(&self.cfg.scale_plan, net_min, dims, frame)?;
            self.corners.invalidate(self.scales.len());
            self.input_dims = Some(dims);
            debug!("planned {} scales for input {dims}", self.scales.len());
        }

        self.extractor.begin_frame();
        self.preprocessed.clear();
        self.last_mask = None;
        let mut candidates = Vec::new();
        let net_min = self.net.min_input_size();
        let scales = self.scales.clone();

        for (si, scale) in scales.iter().enumerate() {
            let (mut ph, mut pw) = match self.cfg.padding {
                Padding::None => (0, 0),
                Padding::Fraction(fh, fw) => (
                    (net_min.height as f32 * fh) as usize,
                    (net_min.width as f32 * fw) as usize,
                ),
                Padding::Pixels(ph, pw) => (ph, pw),
            };
            // pad small scales up to the network minimum
            if scale.height + 2 * ph < net_min.height {
                ph = (net_min.height - scale.height).div_ceil(2);
            }
            if scale.width + 2 * pw < net_min.width {
                pw = (net_min.width - scale.width).div_ceil(2);
            }

            self.resizer.set_target(scale.height, scale.width);
            self.resizer.set_padding(ph, pw);
            self.resizer.set_crop(None);
            let input = self.resizer.resize(&self.image)?;
            let (ic, ih, iw) = input.dim();
            let input_shape = TensorShape::new(ic, ih, iw);

            let mut outputs = self.net.forward(&input)?;
            let out_shapes: Vec<TensorShape> = outputs
                .iter()
                .map(|o| {
                    let (oc, oh, ow) = o.dim();
                    TensorShape::new(oc, oh, ow)
                })
                .collect();

            let mappings = self
                .corners
                .get_or_infer(si, &self.net, input_shape, &out_shapes)?
                .to_vec();

            if let Some(dir) = &self.cfg.outputs_dump {
                if let Err(e) = dump_outputs(dir, frame, si, &outputs) {
                    warn!("failed to dump outputs of scale {si}: {e}");
                }
            }

            if let Some((cutoff, fill)) = self.cfg.outputs_threshold {
                threshold_outputs(&mut outputs, cutoff, fill);
            }
            if let Some(kernel) = &self.kernel {
                smooth_outputs(&mut outputs, kernel, self.background_class);
            }

            if si == 0 {
                if let Some(mask_class) = self.mask_class {
                    if let Some(first) = outputs.first() {
                        if mask_class < first.dim().0 {
                            self.last_mask =
                                Some(first.index_axis(Axis(0), mask_class).to_owned());
                        }
                    }
                }
            }

            // map the calibrated corners from preprocessed coordinates
            // back to the original image
            let content = self.resizer.content_region();
            let source = self.resizer.source_region();
            let mappings: Vec<CornerMapping> = mappings
                .iter()
                .map(|m| to_original_space(m, &content, &source))
                .collect();

            let scale_boxes = self.extractor.extract(
                &self.cfg.extract,
                &outputs,
                &mappings,
                si,
                h as f32,
                w as f32,
            )?;
            candidates.extend(scale_boxes);
            self.preprocessed.push(input);
        }

        if let Err(e) = self.corners.save_if_complete() {
            warn!("failed to persist corner table: {e}");
        }

        sort_by_confidence(&mut candidates);
        self.detections = suppress(&self.cfg.nms, candidates);
        debug!(
            "frame '{frame}': {} detections across {} scales",
            self.detections.len(),
            scales.len()
        );

        if let Err(e) = self.save_crops() {
            warn!("failed to save detection crops: {e}");
        }
        Ok(&self.detections)
    }

    /// Clamped crops of the last frame's detections from the original
    /// image. Boxes with no in-bounds area are skipped with a warning.
    pub fn originals(&self) -> Vec<Array3<f32>> {
        let mut crops = Vec::with_capacity(self.detections.len());
        for b in &self.detections {
            match crop_rect(&self.image, &b.rect) {
                Some(c) => crops.push(c),
                None => warn!(
                    "skipping out-of-bounds crop {} of class {}",
                    b.rect, b.class_id
                ),
            }
        }
        crops
    }

    /// The network-input crop behind one detection, from the preprocessed
    /// buffer of its scale.
    pub fn preprocessed(&self, b: &BoundingBox) -> Option<Array3<f32>> {
        let buffer = self.preprocessed.get(b.scale_index)?;
        crop_rect(buffer, &b.pp_rect)
    }

    /// Up to `max` preprocessed detection windows, strongest first, or
    /// most-different-first when `diverse` is set.
    ///
    /// Diversity ordering is quadratic, so at most `pre_diverse_max`
    /// windows (never less than `max`) enter the reordering.
    pub fn preprocessed_windows(
        &self,
        max: usize,
        diverse: bool,
        pre_diverse_max: usize,
    ) -> Vec<Array3<f32>> {
        let cap = if diverse { pre_diverse_max.max(max) } else { max };
        let mut windows: Vec<Array3<f32>> = self
            .detections
            .iter()
            .take(cap)
            .filter_map(|b| self.preprocessed(b))
            .collect();
        if diverse {
            order_by_difference(&mut windows);
        }
        windows.truncate(max);
        windows
    }

    fn save_crops(&mut self) -> Result<(), DetectError> {
        let save = match &self.cfg.save {
            Some(s) => s.clone(),
            None => return Ok(()),
        };
        let mut saved_this_frame = 0;
        for b in &self.detections {
            if let Some(max) = save.max_per_frame {
                if saved_this_frame >= max {
                    break;
                }
            }
            let crop = match crop_rect(&self.image, &b.rect) {
                Some(c) => c,
                None => {
                    warn!("skipping out-of-bounds crop {}", b.rect);
                    continue;
                }
            };
            let name = match self.cfg.labels.get(b.class_id) {
                Some(l) => l.clone(),
                None => format!("class{}", b.class_id),
            };
            let dir = save.directory.join(&name);
            fs::create_dir_all(&dir)?;
            if self.saved_counters.len() <= b.class_id {
                self.saved_counters.resize(b.class_id + 1, 0);
            }
            self.saved_counters[b.class_id] += 1;
            let counter = self.saved_counters[b.class_id];
            dump_tensor(&dir.join(format!("{name}_{counter:06}.bin")), &crop)?;
            saved_this_frame += 1;
        }
        Ok(())
    }
}

fn resolve_class(labels: &[String], name: &str, role: &str) -> Option<usize> {
    match labels.iter().position(|l| l == name) {
        Some(id) => Some(id),
        None => {
            warn!("{role} class '{name}' not found among {} labels", labels.len());
            None
        }
    }
}

/// Converts a corner mapping's network-input rectangles into original
/// image coordinates, using the resizer's content and source regions.
fn to_original_space(m: &CornerMapping, content: &Rect, source: &Rect) -> CornerMapping {
    let fh = if content.height > 0.0 {
        source.height / content.height
    } else {
        1.0
    };
    let fw = if content.width > 0.0 {
        source.width / content.width
    } else {
        1.0
    };
    let convert = |r: &Rect| {
        Rect::new(
            (r.h0 - content.h0) * fh + source.h0,
            (r.w0 - content.w0) * fw + source.w0,
            r.height * fh,
            r.width * fw,
        )
    };
    CornerMapping {
        top_left: convert(&m.top_left),
        top_right: convert(&m.top_right),
        bottom_left: convert(&m.bottom_left),
        bottom_right: convert(&m.bottom_right),
        pp_top_left: m.pp_top_left,
        pp_top_right: m.pp_top_right,
        pp_bottom_left: m.pp_bottom_left,
        pp_bottom_right: m.pp_bottom_right,
    }
}

fn crop_rect(image: &Array3<f32>, rect: &Rect) -> Option<Array3<f32>> {
    let (_, h, w) = image.dim();
    let mut r = *rect;
    r.clamp_to(h as f32, w as f32);
    let h0 = r.h0.round() as usize;
    let w0 = r.w0.round() as usize;
    let h1 = (r.h1().round() as usize).min(h);
    let w1 = (r.w1().round() as usize).min(w);
    if h1 <= h0 || w1 <= w0 {
        return None;
    }
    Some(image.slice(ndarray::s![.., h0..h1, w0..w1]).to_owned())
}

/// Greedy most-different-first reordering: each position receives the
/// remaining sample with the largest summed distance to everything already
/// placed.
fn order_by_difference(samples: &mut [Array3<f32>]) {
    for i in 1..samples.len() {
        let mut best = i;
        let mut best_dist = f32::MIN;
        for j in i..samples.len() {
            let d: f32 = samples[..i]
                .iter()
                .map(|placed| sample_distance(placed, &samples[j]))
                .sum();
            if d > best_dist {
                best_dist = d;
                best = j;
            }
        }
        samples.swap(i, best);
    }
}

fn sample_distance(a: &Array3<f32>, b: &Array3<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[derive(bincode::Encode, bincode::Decode)]
struct TensorDump {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

fn dump_tensor(path: &Path, tensor: &Array3<f32>) -> Result<(), DetectError> {
    let (channels, height, width) = tensor.dim();
    let dump = TensorDump {
        channels,
        height,
        width,
        data: tensor.iter().copied().collect(),
    };
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::encode_into_std_write(&dump, &mut writer, bincode::config::standard())
        .map_err(|e| DetectError::CornerTableDecode(e.to_string()))?;
    Ok(())
}

fn dump_outputs(
    dir: &Path,
    frame: &str,
    scale: usize,
    outputs: &[Array3<f32>],
) -> Result<(), DetectError> {
    fs::create_dir_all(dir)?;
    for (head, map) in outputs.iter().enumerate() {
        dump_tensor(&dir.join(format!("{frame}_s{scale}_h{head}.bin")), map)?;
    }
    Ok(())
}
