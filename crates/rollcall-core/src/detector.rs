//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640×640 model input, decodes the three
//! anchor-free stride heads and suppresses overlaps with NMS. Boxes and
//! landmarks come back in the coordinate space of the input frame.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty input frame")]
    EmptyFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when letterboxing into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, input: usize) -> Self {
        let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (input as f32 - new_w) / 2.0,
            pad_y: (input as f32 - new_h) / 2.0,
        }
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(path = model_path, outputs = ?output_names, "loaded SCRFD model");

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = output_indices_by_name(&output_names).unwrap_or_else(|| {
            tracing::info!(?output_names, "SCRFD: unnamed outputs, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        });
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Detect faces in an RGB frame, highest confidence first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::EmptyFrame);
        }

        let (input, letterbox) = preprocess(frame, self.input_size);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            candidates.extend(decode_stride(
                StrideHeads { scores, bboxes, kps },
                stride,
                self.input_size,
                &letterbox,
            ));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox an RGB frame into a normalised NCHW tensor.
fn preprocess(frame: &RgbImage, input: usize) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width() as usize, frame.height() as usize, input);
    let new_w = ((frame.width() as f32 * letterbox.scale).round() as u32).clamp(1, input as u32);
    let new_h = ((frame.height() as f32 * letterbox.scale).round() as u32).clamp(1, input as u32);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let x0 = letterbox.pad_x.floor() as usize;
    let y0 = letterbox.pad_y.floor() as usize;

    // Padding is left at 0.0, which is SCRFD_MEAN after normalisation.
    let mut tensor = Array4::<f32>::zeros((1, 3, input, input));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = x0 + x as usize;
        let ty = y0 + y as usize;
        if tx >= input || ty >= input {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Find outputs named `score_8`, `bbox_8`, `kps_8`, ... for every stride.
fn output_indices_by_name(names: &[String]) -> Option<[StrideOutputIndices; 3]> {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut indices = [(0, 0, 0); 3];
    for (slot, &stride) in indices.iter_mut().zip(SCRFD_STRIDES.iter()) {
        *slot = (find("score", stride)?, find("bbox", stride)?, find("kps", stride)?);
    }
    Some(indices)
}

/// Raw output slices for one stride level.
struct StrideHeads<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode detections for a single stride level.
fn decode_stride(heads: StrideHeads<'_>, stride: usize, input: usize, letterbox: &Letterbox) -> Vec<BoundingBox> {
    let grid = input / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = heads.scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCRFD_CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * s;
        let anchor_y = (cell / grid) as f32 * s;

        let Some(d) = heads.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.unmap(anchor_x - d[0] * s, anchor_y - d[1] * s);
        let (x2, y2) = letterbox.unmap(anchor_x + d[2] * s, anchor_y + d[3] * s);

        let landmarks = heads.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(anchor_x + k[i * 2] * s, anchor_y + k[i * 2 + 1] * s))
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
