//! Frame sources: scripted (simulation) and image-sequence replay

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::{CameraError, FrameSource, VideoFrame};

/// One scripted read outcome
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    Frame(VideoFrame),
    /// Simulated hardware hiccup
    Failure,
}

/// Frame source that replays a fixed script of reads.
///
/// Used for simulation runs and tests. Returns `EndOfStream` once the script
/// is exhausted unless looping is enabled.
pub struct ScriptedSource {
    script: VecDeque<ScriptedRead>,
    replay: Vec<ScriptedRead>,
    looping: bool,
    resolution: (u32, u32),
}

impl ScriptedSource {
    pub fn new(reads: Vec<ScriptedRead>) -> Self {
        let resolution = reads
            .iter()
            .find_map(|r| match r {
                ScriptedRead::Frame(f) => Some((f.width, f.height)),
                ScriptedRead::Failure => None,
            })
            .unwrap_or((0, 0));
        Self {
            script: reads.iter().cloned().collect(),
            replay: reads,
            looping: false,
            resolution,
        }
    }

    /// Script consisting only of frames
    pub fn from_frames(frames: Vec<VideoFrame>) -> Self {
        Self::new(frames.into_iter().map(ScriptedRead::Frame).collect())
    }

    /// Restart from the beginning when exhausted
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Reads left before the script is exhausted
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<VideoFrame, CameraError> {
        if self.script.is_empty() && self.looping && !self.replay.is_empty() {
            self.script = self.replay.iter().cloned().collect();
        }
        match self.script.pop_front() {
            Some(ScriptedRead::Frame(frame)) => Ok(frame),
            Some(ScriptedRead::Failure) => Err(CameraError::Read("scripted failure".into())),
            None => Err(CameraError::EndOfStream),
        }
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

/// Replays a directory of still images (sorted by file name) as a stream.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    cursor: usize,
    width: u32,
    height: u32,
    looping: bool,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

impl ImageSequenceSource {
    /// Open a replay source over `dir`.
    ///
    /// Images that do not match the configured resolution are resized on read.
    pub fn open(dir: &Path, width: u32, height: u32, looping: bool) -> Result<Self, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Open(format!("{}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CameraError::Open(format!(
                "{}: no image frames found",
                dir.display()
            )));
        }

        Ok(Self {
            files,
            cursor: 0,
            width,
            height,
            looping,
        })
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read(&mut self) -> Result<VideoFrame, CameraError> {
        if self.cursor >= self.files.len() {
            if !self.looping {
                return Err(CameraError::EndOfStream);
            }
            self.cursor = 0;
        }
        let path = &self.files[self.cursor];
        self.cursor += 1;

        let img = image::open(path)
            .map_err(|e| CameraError::Decode(format!("{}: {e}", path.display())))?
            .to_rgb8();

        let img = if img.dimensions() != (self.width, self.height) {
            debug!(
                path = %path.display(),
                from = ?img.dimensions(),
                "resizing replay frame"
            );
            image::imageops::resize(&img, self.width, self.height, image::imageops::FilterType::Triangle)
        } else {
            img
        };

        Ok(VideoFrame::from_rgb_image(img, now_ns(), self.cursor as u64))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Wall-clock timestamp in nanoseconds
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_source_reports_failures_then_ends() {
        let frame = VideoFrame::solid(4, 4, [0, 0, 0]);
        let mut source = ScriptedSource::new(vec![
            ScriptedRead::Failure,
            ScriptedRead::Frame(frame),
        ]);
        assert_eq!(source.resolution(), (4, 4));
        assert!(matches!(source.read(), Err(CameraError::Read(_))));
        assert!(source.read().is_ok());
        assert!(matches!(source.read(), Err(CameraError::EndOfStream)));
    }

    #[test]
    fn test_scripted_source_loops() {
        let frame = VideoFrame::solid(2, 2, [1, 1, 1]);
        let mut source = ScriptedSource::from_frames(vec![frame]).looping();
        for _ in 0..5 {
            assert!(source.read().is_ok());
        }
    }

    #[test]
    fn test_image_sequence_replay_and_resize() {
        let dir = tempfile::tempdir().unwrap();
        for (i, shade) in [0u8, 128, 255].iter().enumerate() {
            let img = image::RgbImage::from_pixel(8, 6, image::Rgb([*shade, *shade, *shade]));
            img.save(dir.path().join(format!("frame_{i:03}.png"))).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 4, 3, false).unwrap();
        assert_eq!(source.len(), 3);

        let first = source.read().unwrap();
        assert_eq!((first.width, first.height), (4, 3));
        assert_eq!(first.get_pixel(0, 0), Some([0, 0, 0]));
        source.read().unwrap();
        let last = source.read().unwrap();
        assert_eq!(last.get_pixel(1, 1), Some([255, 255, 255]));
        assert!(matches!(source.read(), Err(CameraError::EndOfStream)));
    }

    #[test]
    fn test_image_sequence_empty_dir_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path(), 4, 4, false),
            Err(CameraError::Open(_))
        ));
    }
}
