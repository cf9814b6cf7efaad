//! Face embeddings from the w600k_r50 ArcFace ONNX export.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Pixels map onto [-1, 1].
const PIXEL_CENTRE: f32 = 127.5;
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognition model missing at {0} (expected w600k_r50.onnx)")]
    ModelNotFound(String),
    #[error("recognition model output unusable: {0}")]
    InferenceFailed(String),
    #[error("detected face carries no landmarks to align with")]
    NoLandmarks,
    #[error("onnx runtime: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.is_file() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "recognition model ready");

        Ok(Self { session })
    }

    /// Unit-length embedding of `face`, aligned from its landmarks first.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let input = to_input(&alignment::align_face(image, landmarks));

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(e.to_string()))?;

        if values.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "{} values, need {ARCFACE_EMBEDDING_DIM}",
                values.len()
            )));
        }

        Ok(Embedding {
            values: unit_length(values),
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

fn to_input(aligned: &RgbImage) -> Array4<f32> {
    let side = ALIGNED_SIZE as usize;
    Array4::from_shape_fn((1, 3, side, side), |(_, channel, row, col)| {
        let px = aligned.get_pixel(col as u32, row as u32);
        (px.0[channel] as f32 - PIXEL_CENTRE) / PIXEL_CENTRE
    })
}

/// Scale to unit L2 norm. The zero vector is returned unchanged.
fn unit_length(values: &[f32]) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return values.to_vec();
    }
    values.iter().map(|v| v / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_input_layout_and_scaling() {
        let mut crop = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([0, 255, 51]));
        crop.put_pixel(7, 2, Rgb([255, 0, 0]));
        let input = to_input(&crop);

        assert_eq!(input.shape(), &[1, 3, 112, 112]);
        assert_eq!(input[[0, 0, 0, 0]], -1.0);
        assert_eq!(input[[0, 1, 0, 0]], 1.0);
        assert!((input[[0, 2, 0, 0]] + 0.6).abs() < 1e-6);
        // Row is the y coordinate.
        assert_eq!(input[[0, 0, 2, 7]], 1.0);
        assert_eq!(input[[0, 0, 7, 2]], -1.0);
    }

    #[test]
    fn test_unit_length() {
        let v = unit_length(&[0.0, -5.0, 12.0]);
        assert!((v[1] + 5.0 / 13.0).abs() < 1e-6);
        assert!((v[2] - 12.0 / 13.0).abs() < 1e-6);
        assert!((v.iter().map(|x| x * x).sum::<f32>() - 1.0).abs() < 1e-6);
        assert_eq!(unit_length(&[0.0; 3]), vec![0.0; 3]);
    }
}
