//! Identity matching: nearest gallery identity, gated by a distance threshold.
//!
//! Matching is split in two steps that share one distance vector:
//! [`nearest`] picks the argmin (earliest registration wins exact ties) and
//! [`acceptance`] evaluates every identity against the threshold on its own.
//! The final identity is the argmin identity only when its own acceptance
//! flag is set.

use crate::gallery::Gallery;
use crate::types::{DetectedFace, Embedding, Identification, MatchResult};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Minimum cosine similarity for two ArcFace embeddings of the same person.
pub const ARCFACE_MIN_COSINE: f32 = 0.40;

/// [`ARCFACE_MIN_COSINE`] as a Euclidean distance between unit-length
/// embeddings: sqrt(2 - 2 * 0.40).
pub const ARCFACE_MATCH_THRESHOLD: f32 = 1.095;

/// Euclidean distance between two unit vectors whose cosine similarity is `cos`.
pub fn unit_distance_for_cosine(cos: f32) -> f32 {
    (2.0 - 2.0 * cos).max(0.0).sqrt()
}

/// Strategy for resolving a detected face against the gallery.
pub trait Matcher {
    fn compare(&self, face: &DetectedFace, gallery: &Gallery) -> MatchResult;
}

/// Distance from `candidate` to every gallery identity, in gallery order.
pub fn distances(candidate: &Embedding, gallery: &Gallery) -> Vec<f32> {
    gallery
        .identities()
        .iter()
        .map(|identity| candidate.euclidean_distance(&identity.reference))
        .collect()
}

/// Index of the smallest distance. On exact ties the lowest index wins.
///
/// NaN distances never win. Returns `None` for an empty slice or when every
/// distance is NaN.
pub fn nearest(distances: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &d) in distances.iter().enumerate() {
        if d.is_nan() {
            continue;
        }
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((i, d)),
        }
    }
    best.map(|(i, _)| i)
}

/// Per-identity accept flags: `distance <= threshold`.
pub fn acceptance(distances: &[f32], threshold: f32) -> Vec<bool> {
    distances.iter().map(|&d| d <= threshold).collect()
}

/// Euclidean-distance matcher with a fixed acceptance threshold.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, face: &DetectedFace, gallery: &Gallery) -> MatchResult {
        if gallery.is_empty() {
            return MatchResult {
                identification: Identification::Unknown,
                distance: f32::INFINITY,
                face: face.clone(),
            };
        }

        let distances = distances(&face.encoding, gallery);
        let accepted = acceptance(&distances, self.threshold);

        let Some(best) = nearest(&distances) else {
            return MatchResult {
                identification: Identification::Unknown,
                distance: f32::INFINITY,
                face: face.clone(),
            };
        };

        let identification = if accepted[best] {
            Identification::Known(gallery.identities()[best].name.clone())
        } else {
            Identification::Unknown
        };

        MatchResult {
            identification,
            distance: distances[best],
            face: face.clone(),
        }
    }
}
