//! Face analysis capability

use camera_capture::VideoFrame;
use liveness::geometry::{FaceBox, FaceLandmarks};

use crate::{Embedding, MatchError};

/// One detected face within a frame
#[derive(Debug, Clone, PartialEq)]
pub struct FaceObservation {
    pub face_box: FaceBox,
    pub embedding: Embedding,
    pub landmarks: Option<FaceLandmarks>,
}

/// Face localization, embedding and landmark extraction.
///
/// Implementations must be shareable across worker threads; calls may be
/// CPU-heavy and are run off the async executor.
pub trait FaceAnalyzer: Send + Sync {
    /// Bounding boxes of all faces in the frame
    fn locate(&self, frame: &VideoFrame) -> Result<Vec<FaceBox>, MatchError>;

    /// One embedding per located face, in the same order
    fn embed(&self, frame: &VideoFrame, faces: &[FaceBox]) -> Result<Vec<Embedding>, MatchError>;

    /// Landmarks for a face, if they could be extracted in this frame
    fn landmarks(&self, frame: &VideoFrame, face: &FaceBox) -> Result<Option<FaceLandmarks>, MatchError>;

    /// Locate, embed and extract landmarks for every face in one pass
    fn observe(&self, frame: &VideoFrame) -> Result<Vec<FaceObservation>, MatchError> {
        let faces = self.locate(frame)?;
        let embeddings = self.embed(frame, &faces)?;
        faces
            .into_iter()
            .zip(embeddings)
            .map(|(face_box, embedding)| {
                Ok(FaceObservation {
                    landmarks: self.landmarks(frame, &face_box)?,
                    face_box,
                    embedding,
                })
            })
            .collect()
    }
}
