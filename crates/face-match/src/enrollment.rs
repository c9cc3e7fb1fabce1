//! Enrollment directory loading and the refreshable enrolled set
//!
//! Layout: one sub-directory per identity holding reference images
//! (`.jpg`/`.png`) and/or precomputed embeddings (`.json`, a plain array).

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use camera_capture::VideoFrame;
use tracing::{debug, info, warn};

use crate::{EnrolledSet, Embedding, EnrollmentError, FaceAnalyzer};

/// Load every identity under `dir` into an enrolled set.
///
/// Images without a detectable face or that fail to decode are skipped with
/// a warning. A missing or unreadable root directory is an error.
pub fn load_enrollment_dir(dir: &Path, analyzer: &dyn FaceAnalyzer) -> Result<EnrolledSet, EnrollmentError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| EnrollmentError::Directory(format!("{}: {e}", dir.display())))?;

    let mut identities: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect();
    identities.sort();

    let mut set = EnrolledSet::new();
    for (user_id, user_dir) in identities {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&user_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        files.sort();

        let before = set.len();
        for path in files {
            match extension(&path).as_deref() {
                Some("json") => {
                    let raw = std::fs::read_to_string(&path)?;
                    let embedding: Embedding =
                        serde_json::from_str(&raw).map_err(|source| EnrollmentError::Embedding {
                            path: path.display().to_string(),
                            source,
                        })?;
                    set.add(user_id.clone(), embedding);
                }
                Some("jpg" | "jpeg" | "png") => {
                    if let Some(embedding) = embed_image(&path, analyzer)? {
                        set.add(user_id.clone(), embedding);
                    }
                }
                _ => {}
            }
        }

        debug!(user_id = %user_id, references = set.len() - before, "identity enrolled");
    }

    info!(
        dir = %dir.display(),
        references = set.len(),
        identities = set.identities().len(),
        "enrollment loaded"
    );
    Ok(set)
}

/// Embedding of the first face in a reference image, if any
fn embed_image(path: &Path, analyzer: &dyn FaceAnalyzer) -> Result<Option<Embedding>, EnrollmentError> {
    let img = match image::open(path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable reference image");
            return Ok(None);
        }
    };

    let frame = VideoFrame::from_rgb_image(img, 0, 0);
    let faces = analyzer.locate(&frame)?;
    let Some(first) = faces.first() else {
        warn!(path = %path.display(), "no face in reference image");
        return Ok(None);
    };

    Ok(analyzer.embed(&frame, std::slice::from_ref(first))?.into_iter().next())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Shared, refreshable view of the enrolled set.
///
/// Readers take a cheap `Arc` snapshot; `reload` swaps in a freshly loaded
/// set so in-flight matches keep using the snapshot they started with.
pub struct EnrollmentRegistry {
    dir: Option<PathBuf>,
    analyzer: Arc<dyn FaceAnalyzer>,
    current: RwLock<Arc<EnrolledSet>>,
}

impl EnrollmentRegistry {
    /// Load from `dir` now; fails if the directory cannot be read
    pub fn load(dir: impl Into<PathBuf>, analyzer: Arc<dyn FaceAnalyzer>) -> Result<Self, EnrollmentError> {
        let dir = dir.into();
        let set = load_enrollment_dir(&dir, analyzer.as_ref())?;
        Ok(Self {
            dir: Some(dir),
            analyzer,
            current: RwLock::new(Arc::new(set)),
        })
    }

    /// Registry over a fixed in-memory set (no backing directory)
    pub fn fixed(set: EnrolledSet, analyzer: Arc<dyn FaceAnalyzer>) -> Self {
        Self {
            dir: None,
            analyzer,
            current: RwLock::new(Arc::new(set)),
        }
    }

    /// Current enrolled set
    pub fn snapshot(&self) -> Arc<EnrolledSet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the enrolled set
    pub fn replace(&self, set: EnrolledSet) {
        let set = Arc::new(set);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = set;
    }

    /// Re-read the enrollment directory. On failure the previous set stays.
    pub fn reload(&self) -> Result<usize, EnrollmentError> {
        let dir = self.dir.as_ref().ok_or(EnrollmentError::NotConfigured)?;
        let set = load_enrollment_dir(dir, self.analyzer.as_ref())?;
        let references = set.len();
        self.replace(set);
        info!(references, "enrolled set refreshed");
        Ok(references)
    }

    pub fn analyzer(&self) -> Arc<dyn FaceAnalyzer> {
        Arc::clone(&self.analyzer)
    }
}
