//! Face Matching Module
//!
//! Identity matching for the recognition pipeline:
//! - Face embeddings and Euclidean distance
//! - `FaceAnalyzer` capability (localization, embedding, landmarks)
//! - Enrolled identity set with nearest-neighbour matching
//! - Enrollment directory loading and refresh

pub mod analyzer;
pub mod embedding;
pub mod enrollment;
pub mod matcher;
pub mod scripted;

pub use analyzer::{FaceAnalyzer, FaceObservation};
pub use embedding::Embedding;
pub use enrollment::{load_enrollment_dir, EnrollmentRegistry};
pub use matcher::{EnrolledSet, Identity, MatchOutcome, MatcherConfig};
pub use scripted::{ScriptedAnalyzer, ScriptedFace};

pub use liveness::geometry::{FaceBox, FaceLandmarks, Point};

use thiserror::Error;

/// Matching error types
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Face analysis failed: {0}")]
    Analyzer(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Enrollment loading error types
#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("Enrollment directory unavailable: {0}")]
    Directory(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid embedding file {path}: {source}")]
    Embedding {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error("No enrollment directory configured")]
    NotConfigured,
}
