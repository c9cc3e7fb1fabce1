//! Camera Capture Library for the access gate
//!
//! Provides the frame type shared by the recognition pipeline and the
//! `FrameSource` capability the dispatcher pulls frames from:
//! - Live V4L2 capture (Linux)
//! - Scripted sources for simulation and tests
//! - Image sequence replay (frames dumped by an external capture process)

pub mod frame;
pub mod source;
#[cfg(target_os = "linux")]
pub mod v4l2;

pub use frame::VideoFrame;
pub use source::{ImageSequenceSource, ScriptedRead, ScriptedSource};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Frame read failed: {0}")]
    Read(String),

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("End of frame stream")]
    EndOfStream,
}

impl CameraError {
    /// Whether the dispatcher should retry on the next iteration.
    ///
    /// Only the end of a finite stream stops acquisition.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CameraError::EndOfStream | CameraError::Open(_))
    }
}

/// A source of decoded RGB frames.
///
/// `read` blocks until a frame is available (or the read fails). Sources are
/// owned by the dispatcher thread for the lifetime of a session.
pub trait FrameSource: Send {
    /// Read the next frame.
    fn read(&mut self) -> Result<VideoFrame, CameraError>;

    /// Configured output resolution (width, height).
    fn resolution(&self) -> (u32, u32);
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera index (e.g. 0 for the first attached camera)
    pub index: u32,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS for frame acquisition
    pub fps: u32,
    /// Downsampling factor applied before processing (2 = half resolution)
    pub downsample: u32,
    /// Directory of captured frames to replay instead of a live device
    pub frames_dir: Option<PathBuf>,
    /// Restart the replay when the directory is exhausted
    pub loop_frames: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
            downsample: 2,
            frames_dir: None,
            loop_frames: false,
        }
    }
}

/// Open the frame source described by `config`.
///
/// `frames_dir` selects replay; otherwise the live device at `index` is
/// opened. A missing or unusable source is a startup failure.
pub fn open(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    match &config.frames_dir {
        Some(dir) => {
            let source = ImageSequenceSource::open(dir, config.width, config.height, config.loop_frames)?;
            tracing::info!(
                dir = %dir.display(),
                frames = source.len(),
                width = config.width,
                height = config.height,
                "frame replay source opened"
            );
            Ok(Box::new(source))
        }
        None => open_live(config),
    }
}

#[cfg(target_os = "linux")]
fn open_live(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    Ok(Box::new(v4l2::V4l2Camera::open(config)?))
}

#[cfg(not(target_os = "linux"))]
fn open_live(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    Err(CameraError::Open(format!(
        "live capture of camera {} needs V4L2; set camera.frames_dir",
        config.index
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_fails() {
        let config = CameraConfig {
            index: 250,
            ..CameraConfig::default()
        };
        let err = open(&config).err().unwrap();
        assert!(matches!(err, CameraError::Open(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_read_errors_are_transient() {
        assert!(CameraError::Read("usb hiccup".into()).is_transient());
        assert!(CameraError::Decode("bad jpeg".into()).is_transient());
        assert!(!CameraError::EndOfStream.is_transient());
    }
}
