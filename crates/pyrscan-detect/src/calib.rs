use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use log::debug;
use pyrscan_nn::{Network, OutputProbe, Rect, TensorShape};

use crate::error::DetectError;

/// The four corner rectangles of one output map, in original-input space
/// and in preprocessed space.
///
/// The corners anchor the linear map from output-grid coordinates to pixel
/// rectangles: the top-left corner gives the offset and window size, and
/// the opposite corners give the per-axis stride.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerMapping {
    /// Input rectangle of output cell (0, 0).
    pub top_left: Rect,
    /// Input rectangle of output cell (0, W-1).
    pub top_right: Rect,
    /// Input rectangle of output cell (H-1, 0).
    pub bottom_left: Rect,
    /// Input rectangle of output cell (H-1, W-1).
    pub bottom_right: Rect,
    /// Preprocessed-space rectangle of output cell (0, 0).
    pub pp_top_left: Rect,
    /// Preprocessed-space rectangle of output cell (0, W-1).
    pub pp_top_right: Rect,
    /// Preprocessed-space rectangle of output cell (H-1, 0).
    pub pp_bottom_left: Rect,
    /// Preprocessed-space rectangle of output cell (H-1, W-1).
    pub pp_bottom_right: Rect,
}

impl CornerMapping {
    /// Input pixels per output row, derived from the left corner column.
    pub fn stride_h(&self, output_h: usize) -> f32 {
        if output_h <= 1 {
            return 0.0;
        }
        (self.bottom_left.h0 - self.top_left.h0) / (output_h - 1) as f32
    }

    /// Input pixels per output column, derived from the top corner row.
    pub fn stride_w(&self, output_w: usize) -> f32 {
        if output_w <= 1 {
            return 0.0;
        }
        (self.top_right.w0 - self.top_left.w0) / (output_w - 1) as f32
    }

    /// Preprocessed pixels per output row.
    pub fn pp_stride_h(&self, output_h: usize) -> f32 {
        if output_h <= 1 {
            return 0.0;
        }
        (self.pp_bottom_left.h0 - self.pp_top_left.h0) / (output_h - 1) as f32
    }

    /// Preprocessed pixels per output column.
    pub fn pp_stride_w(&self, output_w: usize) -> f32 {
        if output_w <= 1 {
            return 0.0;
        }
        (self.pp_top_right.w0 - self.pp_top_left.w0) / (output_w - 1) as f32
    }
}

/// Where the per-scale corner mappings come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationMode {
    /// Probe the network's inverse shape inference, keep results in memory.
    Infer,
    /// Probe the network and additionally persist the table to this path.
    InferAndSave(PathBuf),
    /// Read the table from this path; the network is never probed.
    Load(PathBuf),
}

/// The persisted calibration table.
///
/// Logical layout `[num_output_maps, 4, 4]` per space: the first axis runs
/// over output maps in scale-major, head-minor order; the middle axis over
/// the corners TL, TR, BL, BR; the last axis holds
/// (offset-h, offset-w, size-h, size-w). `rows` is the original-input
/// table, `pp_rows` the preprocessed-space table, always written and read
/// together.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct CornerTable {
    /// Original-input-space corner rows.
    pub rows: Vec<[[f32; 4]; 4]>,
    /// Preprocessed-space corner rows.
    pub pp_rows: Vec<[[f32; 4]; 4]>,
}

fn rect_to_row(r: &Rect) -> [f32; 4] {
    [r.h0, r.w0, r.height, r.width]
}

fn rect_from_row(row: &[f32; 4]) -> Rect {
    Rect::new(row[0], row[1], row[2], row[3])
}

fn mapping_to_rows(m: &CornerMapping) -> ([[f32; 4]; 4], [[f32; 4]; 4]) {
    (
        [
            rect_to_row(&m.top_left),
            rect_to_row(&m.top_right),
            rect_to_row(&m.bottom_left),
            rect_to_row(&m.bottom_right),
        ],
        [
            rect_to_row(&m.pp_top_left),
            rect_to_row(&m.pp_top_right),
            rect_to_row(&m.pp_bottom_left),
            rect_to_row(&m.pp_bottom_right),
        ],
    )
}

fn mapping_from_rows(row: &[[f32; 4]; 4], pp_row: &[[f32; 4]; 4]) -> CornerMapping {
    CornerMapping {
        top_left: rect_from_row(&row[0]),
        top_right: rect_from_row(&row[1]),
        bottom_left: rect_from_row(&row[2]),
        bottom_right: rect_from_row(&row[3]),
        pp_top_left: rect_from_row(&pp_row[0]),
        pp_top_right: rect_from_row(&pp_row[1]),
        pp_bottom_left: rect_from_row(&pp_row[2]),
        pp_bottom_right: rect_from_row(&pp_row[3]),
    }
}

/// Per-scale cache of corner mappings with explicit invalidation.
///
/// In the inference modes a scale is probed at most once and kept until
/// [`CornerCache::invalidate`] (called by the detector when input
/// dimensions change). In load mode the mappings come from the persisted
/// table and the network is never probed.
#[derive(Debug)]
pub struct CornerCache {
    mode: CalibrationMode,
    per_scale: Vec<Option<Vec<CornerMapping>>>,
    loaded: Option<CornerTable>,
    saved: bool,
}

impl CornerCache {
    /// Creates a cache; in [`CalibrationMode::Load`] the table is read from
    /// disk immediately.
    pub fn new(mode: CalibrationMode) -> Result<Self, DetectError> {
        let loaded = match &mode {
            CalibrationMode::Load(path) => {
                let mut reader = BufReader::new(File::open(path)?);
                let table: CornerTable =
                    bincode::decode_from_std_read(&mut reader, bincode::config::standard())
                        .map_err(|e| DetectError::CornerTableDecode(e.to_string()))?;
                if table.rows.len() != table.pp_rows.len() {
                    return Err(DetectError::CornerTableDecode(format!(
                        "input table holds {} rows but preprocessed table holds {}",
                        table.rows.len(),
                        table.pp_rows.len()
                    )));
                }
                debug!("loaded corner table with {} rows", table.rows.len());
                Some(table)
            }
            _ => None,
        };
        Ok(Self {
            mode,
            per_scale: Vec::new(),
            loaded,
            saved: false,
        })
    }

    /// Drops every cached mapping and resizes the cache to `num_scales`.
    pub fn invalidate(&mut self, num_scales: usize) {
        self.per_scale.clear();
        self.per_scale.resize(num_scales, None);
    }

    /// Drops the cached mappings of one scale.
    pub fn invalidate_scale(&mut self, scale: usize) {
        if let Some(slot) = self.per_scale.get_mut(scale) {
            *slot = None;
        }
    }

    /// Returns the corner mappings of `scale`, one per output head,
    /// probing the network or reading the loaded table on a cache miss.
    ///
    /// `outputs` holds the shape of each output map the forward pass
    /// produced for this scale; `input` is the (preprocessed) input size
    /// the maps came from.
    pub fn get_or_infer<N: Network>(
        &mut self,
        scale: usize,
        net: &N,
        input: TensorShape,
        outputs: &[TensorShape],
    ) -> Result<&[CornerMapping], DetectError> {
        if scale >= self.per_scale.len() {
            self.per_scale.resize(scale + 1, None);
        }
        if self.per_scale[scale].is_none() {
            let mappings = match (&self.mode, &self.loaded) {
                (CalibrationMode::Load(_), Some(table)) => {
                    load_mappings(table, scale, outputs.len())?
                }
                (CalibrationMode::Load(_), None) => {
                    return Err(DetectError::MissingCalibration { scale })
                }
                _ => infer_mappings(net, input, outputs)?,
            };
            self.per_scale[scale] = Some(mappings);
        }
        match &self.per_scale[scale] {
            Some(m) => Ok(m.as_slice()),
            None => Err(DetectError::MissingCalibration { scale }),
        }
    }

    /// Persists the table once every scale is calibrated, when the mode
    /// asks for it. A no-op in the other modes and after a successful save.
    pub fn save_if_complete(&mut self) -> Result<(), DetectError> {
        let path = match &self.mode {
            CalibrationMode::InferAndSave(path) if !self.saved => path.clone(),
            _ => return Ok(()),
        };
        if self.per_scale.is_empty() || self.per_scale.iter().any(|s| s.is_none()) {
            return Ok(());
        }
        let mut table = CornerTable {
            rows: Vec::new(),
            pp_rows: Vec::new(),
        };
        for mappings in self.per_scale.iter().flatten() {
            for m in mappings {
                let (row, pp_row) = mapping_to_rows(m);
                table.rows.push(row);
                table.pp_rows.push(pp_row);
            }
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        bincode::encode_into_std_write(&table, &mut writer, bincode::config::standard())
            .map_err(|e| DetectError::CornerTableDecode(e.to_string()))?;
        debug!(
            "saved corner table with {} rows to {}",
            table.rows.len(),
            path.display()
        );
        self.saved = true;
        Ok(())
    }
}

fn load_mappings(
    table: &CornerTable,
    scale: usize,
    heads: usize,
) -> Result<Vec<CornerMapping>, DetectError> {
    let base = scale * heads;
    if base + heads > table.rows.len() {
        return Err(DetectError::CornerTableMismatch {
            rows: table.rows.len(),
            expected: base + heads,
        });
    }
    Ok((0..heads)
        .map(|h| mapping_from_rows(&table.rows[base + h], &table.pp_rows[base + h]))
        .collect())
}

fn infer_mappings<N: Network>(
    net: &N,
    input: TensorShape,
    outputs: &[TensorShape],
) -> Result<Vec<CornerMapping>, DetectError> {
    let mut mappings = Vec::with_capacity(outputs.len());
    for (head, out) in outputs.iter().enumerate() {
        let (last_row, last_col) = (out.height.saturating_sub(1), out.width.saturating_sub(1));
        let corners = [
            (0, 0),
            (0, last_col),
            (last_row, 0),
            (last_row, last_col),
        ];
        let mut tracks = Vec::with_capacity(4);
        for (row, col) in corners {
            let probe = OutputProbe::cell(input, head, row as f32, col as f32);
            tracks.push(net.backtrack(&probe)?);
        }
        mappings.push(CornerMapping {
            top_left: tracks[0].input,
            top_right: tracks[1].input,
            bottom_left: tracks[2].input,
            bottom_right: tracks[3].input,
            pp_top_left: tracks[0].preprocessed,
            pp_top_right: tracks[1].preprocessed,
            pp_bottom_left: tracks[2].preprocessed,
            pp_bottom_right: tracks[3].preprocessed,
        });
    }
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use pyrscan_nn::{Backtrack, GeometryStack, LayerGeometry, NnError};
    use std::cell::Cell;

    // Single conv layer, counts inverse-inference probes.
    struct ProbeNet {
        geo: GeometryStack,
        probes: Cell<usize>,
    }

    impl ProbeNet {
        fn conv5s1() -> Self {
            Self {
                geo: GeometryStack::new(vec![LayerGeometry::square(5, 1)]),
                probes: Cell::new(0),
            }
        }
    }

    impl Network for ProbeNet {
        fn forward(&mut self, input: &Array3<f32>) -> Result<Vec<Array3<f32>>, NnError> {
            let (_, h, w) = input.dim();
            let (oh, ow) = self.geo.output_size((h, w))?;
            Ok(vec![Array3::zeros((2, oh, ow))])
        }

        fn min_input_size(&self) -> TensorShape {
            let (h, w) = self.geo.min_input_size();
            TensorShape::new(1, h, w)
        }

        fn output_shapes(&self, input: TensorShape) -> Result<Vec<TensorShape>, NnError> {
            let (oh, ow) = self.geo.output_size((input.height, input.width))?;
            Ok(vec![TensorShape::new(2, oh, ow)])
        }

        fn backtrack(&self, probe: &OutputProbe) -> Result<Backtrack, NnError> {
            self.probes.set(self.probes.get() + 1);
            let rect = self.geo.backtrack(probe.cell);
            Ok(Backtrack {
                input: rect,
                preprocessed: rect,
            })
        }
    }

    fn shapes(net: &ProbeNet, input: TensorShape) -> Vec<TensorShape> {
        net.output_shapes(input).unwrap()
    }

    #[test]
    fn inferred_strides_connect_opposite_corners() {
        let net = ProbeNet::conv5s1();
        let input = TensorShape::new(1, 32, 48);
        let outs = shapes(&net, input);
        let mut cache = CornerCache::new(CalibrationMode::Infer).unwrap();
        cache.invalidate(1);
        let mappings = cache.get_or_infer(0, &net, input, &outs).unwrap();
        let m = &mappings[0];
        let (oh, ow) = (outs[0].height, outs[0].width);
        assert_relative_eq!(
            m.top_left.h0 + m.stride_h(oh) * (oh - 1) as f32,
            m.bottom_left.h0
        );
        assert_relative_eq!(
            m.top_left.w0 + m.stride_w(ow) * (ow - 1) as f32,
            m.top_right.w0
        );
        // conv stride 1, kernel 5
        assert_relative_eq!(m.stride_h(oh), 1.0);
        assert_relative_eq!(m.top_left.height, 5.0);
    }

    #[test]
    fn second_lookup_hits_the_cache() {
        let net = ProbeNet::conv5s1();
        let input = TensorShape::new(1, 16, 16);
        let outs = shapes(&net, input);
        let mut cache = CornerCache::new(CalibrationMode::Infer).unwrap();
        cache.invalidate(1);
        cache.get_or_infer(0, &net, input, &outs).unwrap();
        let after_first = net.probes.get();
        cache.get_or_infer(0, &net, input, &outs).unwrap();
        assert_eq!(net.probes.get(), after_first);
        cache.invalidate(1);
        cache.get_or_infer(0, &net, input, &outs).unwrap();
        assert!(net.probes.get() > after_first);
    }

    #[test]
    fn save_then_load_reproduces_mappings_without_probing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corners.bin");
        let net = ProbeNet::conv5s1();
        let input = TensorShape::new(1, 20, 24);
        let outs = shapes(&net, input);

        let mut cache = CornerCache::new(CalibrationMode::InferAndSave(path.clone())).unwrap();
        cache.invalidate(1);
        let inferred = cache.get_or_infer(0, &net, input, &outs).unwrap().to_vec();
        cache.save_if_complete().unwrap();

        let fresh = ProbeNet::conv5s1();
        let mut loaded = CornerCache::new(CalibrationMode::Load(path)).unwrap();
        loaded.invalidate(1);
        let from_disk = loaded.get_or_infer(0, &fresh, input, &outs).unwrap();
        assert_eq!(from_disk, inferred.as_slice());
        assert_eq!(fresh.probes.get(), 0);
    }

    #[test]
    fn short_table_is_a_mismatch_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corners.bin");
        let table = CornerTable {
            rows: vec![[[0.0; 4]; 4]],
            pp_rows: vec![[[0.0; 4]; 4]],
        };
        let mut writer = BufWriter::new(File::create(&path).unwrap());
        bincode::encode_into_std_write(&table, &mut writer, bincode::config::standard()).unwrap();
        drop(writer);

        let net = ProbeNet::conv5s1();
        let input = TensorShape::new(1, 16, 16);
        let outs = shapes(&net, input);
        let mut cache = CornerCache::new(CalibrationMode::Load(path)).unwrap();
        cache.invalidate(2);
        assert!(cache.get_or_infer(0, &net, input, &outs).is_ok());
        let err = cache.get_or_infer(1, &net, input, &outs).unwrap_err();
        assert!(matches!(err, DetectError::CornerTableMismatch { .. }));
    }
}
