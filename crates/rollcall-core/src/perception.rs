//! Perception adapter: face detection plus encoding, behind one trait.
//!
//! The pipeline only sees [`Perception`]. [`OnnxPerception`] is the concrete
//! adapter, chaining the SCRFD detector and the ArcFace recognizer.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("perception failed: {0}")]
    Other(String),
}

/// Detect faces in an image and encode each of them.
///
/// Returned boxes are in the coordinate space of `image`. An empty vector is
/// a normal result.
pub trait Perception {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, PerceptionError>;
}

/// SCRFD + ArcFace on ONNX Runtime.
pub struct OnnxPerception {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxPerception {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, PerceptionError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl Perception for OnnxPerception {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, PerceptionError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            match self.recognizer.extract(image, &bbox) {
                Ok(encoding) => faces.push(DetectedFace { bbox, encoding }),
                Err(RecognizerError::NoLandmarks) => {
                    tracing::debug!(confidence = bbox.confidence, "dropping face without landmarks");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(faces)
    }
}
