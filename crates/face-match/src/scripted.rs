//! Scripted face analyzer for replay runs and tests
//!
//! Faces are keyed by frame sequence number. A script file is JSON:
//!
//! ```json
//! {
//!   "frames": { "1": [ { "face_box": {...}, "embedding": [...], "landmarks": {...} } ] },
//!   "default": [],
//!   "fail_sequences": [7]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use camera_capture::VideoFrame;
use liveness::geometry::{FaceBox, FaceLandmarks};
use serde::{Deserialize, Serialize};

use crate::{Embedding, EnrollmentError, FaceAnalyzer, MatchError};

/// One scripted face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedFace {
    pub face_box: FaceBox,
    pub embedding: Embedding,
    #[serde(default)]
    pub landmarks: Option<FaceLandmarks>,
}

/// Analyzer that returns pre-recorded faces per frame sequence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedAnalyzer {
    frames: BTreeMap<u64, Vec<ScriptedFace>>,
    /// Faces for sequences without an entry
    default: Vec<ScriptedFace>,
    /// Sequences on which analysis fails
    fail_sequences: BTreeSet<u64>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(mut self, sequence: u64, faces: Vec<ScriptedFace>) -> Self {
        self.frames.insert(sequence, faces);
        self
    }

    pub fn with_default(mut self, faces: Vec<ScriptedFace>) -> Self {
        self.default = faces;
        self
    }

    pub fn failing_on(mut self, sequence: u64) -> Self {
        self.fail_sequences.insert(sequence);
        self
    }

    /// Load a script from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, EnrollmentError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|source| EnrollmentError::Embedding {
            path: path.display().to_string(),
            source,
        })
    }

    fn faces(&self, frame: &VideoFrame) -> Result<&[ScriptedFace], MatchError> {
        if self.fail_sequences.contains(&frame.sequence) {
            return Err(MatchError::Analyzer(format!(
                "scripted failure on frame {}",
                frame.sequence
            )));
        }
        Ok(self
            .frames
            .get(&frame.sequence)
            .map(Vec::as_slice)
            .unwrap_or(&self.default))
    }
}

fn center_distance(a: &FaceBox, b: &FaceBox) -> u64 {
    let ax = (a.left + a.right) as i64;
    let ay = (a.top + a.bottom) as i64;
    let bx = (b.left + b.right) as i64;
    let by = (b.top + b.bottom) as i64;
    (ax - bx).unsigned_abs() + (ay - by).unsigned_abs()
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn locate(&self, frame: &VideoFrame) -> Result<Vec<FaceBox>, MatchError> {
        Ok(self.faces(frame)?.iter().map(|f| f.face_box).collect())
    }

    fn embed(&self, frame: &VideoFrame, faces: &[FaceBox]) -> Result<Vec<Embedding>, MatchError> {
        let scripted = self.faces(frame)?;
        faces
            .iter()
            .map(|face| {
                scripted
                    .iter()
                    .find(|s| s.face_box == *face)
                    .map(|s| s.embedding.clone())
                    .ok_or_else(|| MatchError::Analyzer(format!("no scripted face at {face:?}")))
            })
            .collect()
    }

    /// Landmarks of the scripted face nearest to `face` (faces drift
    /// slightly between frames of the same window)
    fn landmarks(&self, frame: &VideoFrame, face: &FaceBox) -> Result<Option<FaceLandmarks>, MatchError> {
        Ok(self
            .faces(frame)?
            .iter()
            .min_by_key(|s| center_distance(&s.face_box, face))
            .and_then(|s| s.landmarks.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveness::testing::frontal_landmarks;

    fn face(ear: f32) -> ScriptedFace {
        ScriptedFace {
            face_box: FaceBox::new(50, 200, 150, 100),
            embedding: Embedding::new(vec![0.1, 0.2]),
            landmarks: Some(frontal_landmarks(ear)),
        }
    }

    fn frame(sequence: u64) -> VideoFrame {
        VideoFrame::solid(8, 8, [0, 0, 0]).restamped(0, sequence)
    }

    #[test]
    fn test_faces_by_sequence() {
        let analyzer = ScriptedAnalyzer::new()
            .with_frame(2, vec![face(0.1)])
            .with_default(vec![face(0.3)]);

        let obs = analyzer.observe(&frame(2)).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].landmarks, Some(frontal_landmarks(0.1)));

        let obs = analyzer.observe(&frame(3)).unwrap();
        assert_eq!(obs[0].landmarks, Some(frontal_landmarks(0.3)));
    }

    #[test]
    fn test_no_faces_by_default() {
        assert!(ScriptedAnalyzer::new().observe(&frame(1)).unwrap().is_empty());
    }

    #[test]
    fn test_scripted_failure() {
        let analyzer = ScriptedAnalyzer::new().failing_on(4);
        assert!(matches!(analyzer.locate(&frame(4)), Err(MatchError::Analyzer(_))));
        assert!(analyzer.locate(&frame(5)).is_ok());
    }

    #[test]
    fn test_landmarks_follow_nearest_box() {
        let analyzer = ScriptedAnalyzer::new().with_default(vec![face(0.2)]);
        let shifted = FaceBox::new(52, 203, 151, 104);
        let landmarks = analyzer.landmarks(&frame(1), &shifted).unwrap();
        assert_eq!(landmarks, Some(frontal_landmarks(0.2)));
    }

    #[test]
    fn test_json_script_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        let analyzer = ScriptedAnalyzer::new().with_frame(1, vec![face(0.3)]).failing_on(9);
        std::fs::write(&path, serde_json::to_string(&analyzer).unwrap()).unwrap();

        let loaded = ScriptedAnalyzer::from_json_file(&path).unwrap();
        assert_eq!(loaded.locate(&frame(1)).unwrap().len(), 1);
        assert!(loaded.locate(&frame(9)).is_err());
    }
}
