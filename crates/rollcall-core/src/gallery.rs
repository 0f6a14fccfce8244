//! Identity gallery: the ordered set of known people and their reference
//! encodings, built once at startup from a name → image configuration.
//!
//! Entries that cannot produce an encoding are excluded with a warning; the
//! build itself never fails.

use crate::perception::Perception;
use crate::types::Identity;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read gallery config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid gallery config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One configured person: a display name and a reference image.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub image: PathBuf,
}

/// Gallery configuration file (TOML, `[[identity]]` tables in registration order).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GalleryConfig {
    #[serde(default, rename = "identity")]
    pub entries: Vec<GalleryEntry>,
}

impl GalleryConfig {
    /// Load from a file. Relative image paths resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let text = std::fs::read_to_string(path).map_err(|source| GalleryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&text, base)
    }

    pub fn from_toml_str(text: &str, base_dir: &Path) -> Result<Self, GalleryError> {
        let mut config: GalleryConfig = toml::from_str(text)?;
        for entry in &mut config.entries {
            if entry.image.is_relative() {
                entry.image = base_dir.join(&entry.image);
            }
        }
        Ok(config)
    }
}

/// Why a configured entry did not make it into the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum ExclusionReason {
    ImageUnreadable(String),
    NoFaceDetected,
    PerceptionFailed(String),
    DuplicateName,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::ImageUnreadable(e) => write!(f, "image unreadable: {e}"),
            ExclusionReason::NoFaceDetected => write!(f, "no face found in image"),
            ExclusionReason::PerceptionFailed(e) => write!(f, "perception failed: {e}"),
            ExclusionReason::DuplicateName => write!(f, "name already registered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exclusion {
    pub name: String,
    pub image: PathBuf,
    pub reason: ExclusionReason,
}

/// Outcome of a gallery build: the gallery plus every excluded entry.
#[derive(Debug, Default)]
pub struct GalleryBuild {
    pub gallery: Gallery,
    pub excluded: Vec<Exclusion>,
}

/// Ordered, read-only collection of known identities.
///
/// Order is registration order and decides matcher ties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    /// Build from configured entries, encoding each reference image.
    pub fn build<P: Perception + ?Sized>(entries: &[GalleryEntry], perception: &mut P) -> GalleryBuild {
        let mut identities: Vec<Identity> = Vec::with_capacity(entries.len());
        let mut seen: HashSet<String> = HashSet::new();
        let mut excluded = Vec::new();

        for entry in entries {
            let outcome = if seen.contains(entry.name.as_str()) {
                Err(ExclusionReason::DuplicateName)
            } else {
                encode_entry(entry, perception)
            };

            match outcome {
                Ok(identity) => {
                    tracing::info!(name = %identity.name, "identity registered");
                    seen.insert(identity.name.clone());
                    identities.push(identity);
                }
                Err(reason) => {
                    tracing::warn!(
                        name = %entry.name,
                        image = %entry.image.display(),
                        %reason,
                        "excluding identity from gallery"
                    );
                    excluded.push(Exclusion {
                        name: entry.name.clone(),
                        image: entry.image.clone(),
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            registered = identities.len(),
            excluded = excluded.len(),
            "gallery built"
        );

        GalleryBuild {
            gallery: Gallery { identities },
            excluded,
        }
    }

    /// Wrap already-encoded identities (kept in the given order).
    pub fn from_identities(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.iter().any(|i| i.name == name)
    }
}

fn encode_entry<P: Perception + ?Sized>(entry: &GalleryEntry, perception: &mut P) -> Result<Identity, ExclusionReason> {
    let image = image::open(&entry.image)
        .map_err(|e| ExclusionReason::ImageUnreadable(e.to_string()))?
        .to_rgb8();

    let faces = perception
        .detect_and_encode(&image)
        .map_err(|e| ExclusionReason::PerceptionFailed(e.to_string()))?;

    let face = faces.into_iter().next().ok_or(ExclusionReason::NoFaceDetected)?;
    Ok(Identity {
        name: entry.name.clone(),
        reference: face.encoding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::PerceptionError;
    use crate::types::{BoundingBox, DetectedFace, Embedding};
    use image::{Rgb, RgbImage};

    /// Encodes an image as its top-left pixel; pure black means "no face".
    struct PixelPerception;

    impl Perception for PixelPerception {
        fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, PerceptionError> {
            let p = image.get_pixel(0, 0);
            if p.0 == [0, 0, 0] {
                return Ok(vec![]);
            }
            if p.0 == [255, 0, 255] {
                return Err(PerceptionError::Other("model crashed".into()));
            }
            Ok(vec![DetectedFace {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                    confidence: 1.0,
                    landmarks: None,
                },
                encoding: Embedding::new(p.0.iter().map(|&v| v as f32 / 255.0).collect()),
            }])
        }
    }

    fn write_image(dir: &Path, file: &str, color: [u8; 3]) -> PathBuf {
        let path = dir.join(file);
        RgbImage::from_pixel(4, 4, Rgb(color)).save(&path).unwrap();
        path
    }

    fn entry(name: &str, image: PathBuf) -> GalleryEntry {
        GalleryEntry {
            name: name.to_string(),
            image,
        }
    }

    #[test]
    fn test_build_excludes_missing_and_faceless() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            entry("Ada", write_image(dir.path(), "ada.png", [255, 0, 0])),
            entry("Ghost", dir.path().join("missing.png")),
            entry("Blank", write_image(dir.path(), "blank.png", [0, 0, 0])),
            entry("Bob", write_image(dir.path(), "bob.png", [0, 255, 0])),
        ];

        let build = Gallery::build(&entries, &mut PixelPerception);
        let names: Vec<&str> = build.gallery.identities().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Bob"]);
        assert!(build.gallery.len() <= entries.len());

        assert_eq!(build.excluded.len(), 2);
        assert_eq!(build.excluded[0].name, "Ghost");
        assert!(matches!(build.excluded[0].reason, ExclusionReason::ImageUnreadable(_)));
        assert_eq!(build.excluded[1].name, "Blank");
        assert_eq!(build.excluded[1].reason, ExclusionReason::NoFaceDetected);
    }

    #[test]
    fn test_build_keeps_registration_order_and_first_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            entry("Zed", write_image(dir.path(), "z.png", [10, 10, 10])),
            entry("Amy", write_image(dir.path(), "a.png", [20, 20, 20])),
            entry("Zed", write_image(dir.path(), "z2.png", [30, 30, 30])),
        ];

        let build = Gallery::build(&entries, &mut PixelPerception);
        assert_eq!(build.gallery.len(), 2);
        assert_eq!(build.gallery.identities()[0].name, "Zed");
        assert_eq!(build.gallery.identities()[1].name, "Amy");
        // First registration's encoding wins.
        assert!((build.gallery.identities()[0].reference.values[0] - 10.0 / 255.0).abs() < 1e-6);
        assert_eq!(build.excluded[0].reason, ExclusionReason::DuplicateName);
    }

    #[test]
    fn test_build_perception_failure_is_local() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            entry("Broken", write_image(dir.path(), "m.png", [255, 0, 255])),
            entry("Ok", write_image(dir.path(), "ok.png", [1, 2, 3])),
        ];
        let build = Gallery::build(&entries, &mut PixelPerception);
        assert!(build.gallery.contains("Ok"));
        assert!(!build.gallery.contains("Broken"));
        assert!(matches!(build.excluded[0].reason, ExclusionReason::PerceptionFailed(_)));
    }

    #[test]
    fn test_build_empty_is_valid() {
        let build = Gallery::build(&[], &mut PixelPerception);
        assert!(build.gallery.is_empty());
        assert!(build.excluded.is_empty());
    }

    #[test]
    fn test_config_parse_resolves_relative_paths() {
        let text = r#"
            [[identity]]
            name = "Ada"
            image = "faces/ada.jpg"

            [[identity]]
            name = "Bob"
            image = "/srv/faces/bob.jpg"
        "#;
        let config = GalleryConfig::from_toml_str(text, Path::new("/etc/rollcall")).unwrap();
        assert_eq!(config.entries.len(), 2);
        assert_eq!(config.entries[0].name, "Ada");
        assert_eq!(config.entries[0].image, PathBuf::from("/etc/rollcall/faces/ada.jpg"));
        assert_eq!(config.entries[1].image, PathBuf::from("/srv/faces/bob.jpg"));
    }

    #[test]
    fn test_config_empty_and_invalid() {
        let empty = GalleryConfig::from_toml_str("", Path::new(".")).unwrap();
        assert!(empty.entries.is_empty());
        assert!(GalleryConfig::from_toml_str("[[identity]]\nname = 3", Path::new(".")).is_err());
    }

    #[test]
    fn test_config_load_missing_file() {
        let err = GalleryConfig::load(Path::new("/nonexistent/gallery.toml")).unwrap_err();
        assert!(matches!(err, GalleryError::Read { .. }));
    }
}
