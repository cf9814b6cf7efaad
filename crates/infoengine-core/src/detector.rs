//! Face detection on photos with an SCRFD ONNX export (`det_10g.onnx`).
//!
//! The photo is letterboxed onto a 640 square, run once, and each of the
//! three feature-map heads is decoded into boxes with five landmarks.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIDE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_SCALE: f32 = 128.0;
const MIN_SCORE: f32 = 0.5;
const MAX_OVERLAP: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const OUTPUTS_PER_HEAD: usize = 3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model missing at {0} (expected det_10g.onnx)")]
    ModelNotFound(String),
    #[error("detection model output unusable: {0}")]
    InferenceFailed(String),
    #[error("onnx runtime: {0}")]
    Ort(#[from] ort::Error),
}

/// Where a single stride's tensors sit in the session outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Head {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Scale and padding applied when fitting the photo into the input square.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let side = INPUT_SIDE as f32;
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let scale = (side / w).min(side / h);
        let (fw, fh) = Self::fitted(w, h, scale);
        Self {
            scale,
            pad_x: (side - fw as f32) / 2.0,
            pad_y: (side - fh as f32) / 2.0,
        }
    }

    fn fitted(w: f32, h: f32, scale: f32) -> (u32, u32) {
        let clamp = |v: f32| (v.round() as u32).clamp(1, INPUT_SIDE as u32);
        (clamp(w * scale), clamp(h * scale))
    }

    /// Map a point in input-square space back onto the photo.
    fn photo_point(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub struct FaceDetector {
    session: Session,
    heads: [Head; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.is_file() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let wanted = STRIDES.len() * OUTPUTS_PER_HEAD;
        if names.len() < wanted {
            return Err(DetectorError::InferenceFailed(format!(
                "{} outputs, need {wanted}",
                names.len()
            )));
        }

        let heads = heads_from_names(&names);
        tracing::info!(path = %model_path.display(), ?heads, "detection model ready");

        Ok(Self { session, heads })
    }

    /// Faces in `image`, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = to_input(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let tensor = |index: usize, stride: usize| {
            outputs[index]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::InferenceFailed(format!("output {index} (stride {stride}): {e}")))
        };

        let mut candidates = Vec::new();
        for (head, stride) in self.heads.iter().zip(STRIDES) {
            let maps = HeadMaps {
                scores: tensor(head.score, stride)?,
                bboxes: tensor(head.bbox, stride)?,
                kps: tensor(head.kps, stride)?,
            };
            candidates.extend(decode_head(&maps, stride, letterbox, MIN_SCORE));
        }

        let faces = suppress(candidates, MAX_OVERLAP);
        tracing::debug!(faces = faces.len(), "detection finished");
        Ok(faces)
    }
}

/// Letterbox into a normalised NCHW tensor. Padding is left at zero, which
/// is the mean pixel after normalisation.
fn to_input(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let (w, h) = Letterbox::fitted(image.width().max(1) as f32, image.height().max(1) as f32, letterbox.scale);
    let resized = imageops::resize(image, w, h, FilterType::Triangle);

    let (left, top) = (letterbox.pad_x.floor() as usize, letterbox.pad_y.floor() as usize);
    let mut input = Array4::<f32>::zeros((1, 3, INPUT_SIDE, INPUT_SIDE));
    for (x, y, px) in resized.enumerate_pixels() {
        let (col, row) = (left + x as usize, top + y as usize);
        for (channel, &value) in px.0.iter().enumerate() {
            input[[0, channel, row, col]] = (value as f32 - PIXEL_MEAN) / PIXEL_SCALE;
        }
    }
    (input, letterbox)
}

/// Match outputs named `score_<stride>`, `bbox_<stride>` and `kps_<stride>`.
/// Exports with anonymous outputs are assumed to list every score map, then
/// every box map, then every landmark map.
fn heads_from_names(names: &[String]) -> [Head; 3] {
    let index_of = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<Head>> = STRIDES
        .iter()
        .map(|&s| {
            Some(Head {
                score: index_of("score", s)?,
                bbox: index_of("bbox", s)?,
                kps: index_of("kps", s)?,
            })
        })
        .collect();

    match named.and_then(|heads| <[Head; 3]>::try_from(heads).ok()) {
        Some(heads) => heads,
        None => {
            tracing::debug!(?names, "unnamed detector outputs, mapping by position");
            std::array::from_fn(|i| Head { score: i, bbox: i + 3, kps: i + 6 })
        }
    }
}

struct HeadMaps<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Boxes above `min_score` from one head, in photo coordinates.
///
/// Each grid cell holds `ANCHORS_PER_CELL` anchors centred on the cell's
/// top-left corner. Box and landmark offsets are in units of the stride.
fn decode_head(maps: &HeadMaps<'_>, stride: usize, letterbox: Letterbox, min_score: f32) -> Vec<BoundingBox> {
    let cols = INPUT_SIDE / stride;
    let anchors = cols * cols * ANCHORS_PER_CELL;
    let step = stride as f32;

    maps.scores
        .iter()
        .take(anchors)
        .enumerate()
        .filter(|&(_, &score)| score > min_score)
        .filter_map(|(i, &score)| {
            let cell = i / ANCHORS_PER_CELL;
            let cx = (cell % cols) as f32 * step;
            let cy = (cell / cols) as f32 * step;

            let d = maps.bboxes.get(4 * i..4 * i + 4)?;
            let (left, top) = letterbox.photo_point(cx - d[0] * step, cy - d[1] * step);
            let (right, bottom) = letterbox.photo_point(cx + d[2] * step, cy + d[3] * step);

            let landmarks = maps.kps.get(10 * i..10 * i + 10).map(|k| {
                std::array::from_fn(|p| letterbox.photo_point(cx + k[2 * p] * step, cy + k[2 * p + 1] * step))
            });

            Some(BoundingBox {
                x: left,
                y: top,
                width: right - left,
                height: bottom - top,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest confidence wins.
fn suppress(mut candidates: Vec<BoundingBox>, max_overlap: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !kept.iter().any(|k| overlap(k, &candidate) > max_overlap) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection over union.
fn overlap(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = (a.x + a.width).min(b.x + b.width) - a.x.max(b.x);
    let h = (a.y + a.height).min(b.y + b.height) - a.y.max(b.y);
    let shared = w.max(0.0) * h.max(0.0);
    let total = a.width * a.height + b.width * b.height - shared;
    if total > 0.0 { shared / total } else { 0.0 }
}
