use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Multiply every coordinate (box and landmarks) by `factor`.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }
}

/// Face encoding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A face found by the perception adapter in a working (downscaled) frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    /// Box in the coordinate space of the image that was analysed.
    pub bbox: BoundingBox,
    pub encoding: Embedding,
}

/// A known person and their reference encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub reference: Embedding,
}

/// Outcome of resolving one encoding against the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identification {
    Known(String),
    Unknown,
}

impl Identification {
    pub const UNKNOWN_LABEL: &'static str = "Unknown";

    pub fn name(&self) -> Option<&str> {
        match self {
            Identification::Known(name) => Some(name),
            Identification::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identification::Known(_))
    }

    /// Text drawn next to the face.
    pub fn label(&self) -> &str {
        self.name().unwrap_or(Self::UNKNOWN_LABEL)
    }
}

/// Result of matching one detected face against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identification: Identification,
    /// Distance to the nearest gallery identity (`+inf` for an empty gallery).
    pub distance: f32,
    pub face: DetectedFace,
}
