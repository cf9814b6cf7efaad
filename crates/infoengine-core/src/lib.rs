//! infoengine-core — Face detection and embedding extraction.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference, plus the distance metrics
//! and matchers used to identify a face against enrolled people.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod recognizer;
pub mod types;

pub use detector::FaceDetector;
pub use encoder::{EncodeError, FaceEncoder, OnnxFaceEncoder};
pub use recognizer::FaceRecognizer;
pub use types::{
    BoundingBox, ClosestMatcher, DistanceMetric, Embedding, FirstMatcher, GalleryEntry,
    MatchPolicy, MatchResult, Matcher,
};
