//! rollcall-core: face recognition attendance engine.
//!
//! Faces are detected with SCRFD and encoded with ArcFace (ONNX Runtime, CPU),
//! matched against a gallery of known identities by Euclidean distance, and
//! logged once per identity per day. [`pipeline::Pipeline`] ties the pieces
//! into a single cooperative capture loop.

pub mod alignment;
pub mod annotate;
pub mod detector;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod perception;
pub mod pipeline;
pub mod recognizer;
pub mod sampler;
pub mod types;

pub use annotate::{Annotation, Annotator};
pub use gallery::{Gallery, GalleryBuild, GalleryConfig, GalleryEntry};
pub use ledger::{AttendanceLedger, AttendanceRecord, CsvLedgerStore, LedgerError, LedgerStore};
pub use matcher::{EuclideanMatcher, Matcher};
pub use perception::{OnnxPerception, Perception, PerceptionError};
pub use pipeline::{
    CycleOutcome, CycleReport, DiscardSink, FrameSink, Pipeline, PipelineError, PipelineOptions, PipelineState,
    SourceError, VideoSource,
};
pub use sampler::FrameSampler;
pub use types::{BoundingBox, DetectedFace, Embedding, Identification, Identity, MatchResult};
