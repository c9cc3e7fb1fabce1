//! Video frame types and processing

use image::RgbImage;

/// Decoded RGB video frame
///
/// Frames are immutable once produced; the pipeline shares them behind `Arc`.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the UNIX epoch)
    pub timestamp_ns: u64,
    /// Frame sequence number, monotonically increasing per session
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Create a frame filled with a single color
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Self::new(data, width, height, 0, 0)
    }

    /// Wrap an `image` buffer
    pub fn from_rgb_image(img: RgbImage, timestamp_ns: u64, sequence: u64) -> Self {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height, timestamp_ns, sequence)
    }

    /// Copy into an `image` buffer (for drawing and encoding)
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Same pixels, new sequence number and timestamp
    pub fn restamped(mut self, timestamp_ns: u64, sequence: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self.sequence = sequence;
        self
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.data
            .get(idx..idx + 3)
            .map(|p| [p[0], p[1], p[2]])
    }

    /// Convert to grayscale
    pub fn to_grayscale(&self) -> Vec<u8> {
        let mut gray = Vec::with_capacity((self.width * self.height) as usize);
        for pixel in self.data.chunks_exact(3) {
            // Luminance formula: 0.299*R + 0.587*G + 0.114*B
            let y = (pixel[0] as f32 * 0.299
                   + pixel[1] as f32 * 0.587
                   + pixel[2] as f32 * 0.114) as u8;
            gray.push(y);
        }
        gray
    }

    /// Mean absolute grayscale difference against another frame (0-255).
    ///
    /// Returns `None` when the frames have different dimensions.
    pub fn mean_abs_diff(&self, other: &VideoFrame) -> Option<f32> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        Some(mean_abs_diff_gray(&self.to_grayscale(), &other.to_grayscale()))
    }

    /// Resize frame (nearest neighbour)
    pub fn resize(&self, new_width: u32, new_height: u32) -> VideoFrame {
        let mut resized = Vec::with_capacity((new_width * new_height * 3) as usize);

        let x_ratio = self.width as f32 / new_width as f32;
        let y_ratio = self.height as f32 / new_height as f32;

        for y in 0..new_height {
            for x in 0..new_width {
                let x0 = ((x as f32 * x_ratio).floor() as u32).min(self.width.saturating_sub(1));
                let y0 = ((y as f32 * y_ratio).floor() as u32).min(self.height.saturating_sub(1));

                match self.get_pixel(x0, y0) {
                    Some(pixel) => resized.extend_from_slice(&pixel),
                    None => resized.extend_from_slice(&[0, 0, 0]),
                }
            }
        }

        VideoFrame {
            data: resized,
            width: new_width,
            height: new_height,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        }
    }

    /// Shrink by an integer factor for processing efficiency
    pub fn downsample(&self, factor: u32) -> VideoFrame {
        if factor <= 1 || self.width < factor || self.height < factor {
            return self.clone();
        }
        self.resize(self.width / factor, self.height / factor)
    }
}

/// Mean absolute difference between two equally sized grayscale buffers.
pub fn mean_abs_diff_gray(a: &[u8], b: &[u8]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let total: u64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as i16 - *y as i16).unsigned_abs() as u64)
        .sum();
    total as f32 / a.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_halves_dimensions() {
        let frame = VideoFrame::solid(640, 480, [10, 20, 30]);
        let small = frame.downsample(2);
        assert_eq!((small.width, small.height), (320, 240));
        assert_eq!(small.data.len(), 320 * 240 * 3);
        assert_eq!(small.get_pixel(100, 100), Some([10, 20, 30]));
    }

    #[test]
    fn test_downsample_factor_one_is_identity() {
        let frame = VideoFrame::solid(8, 8, [1, 2, 3]);
        let same = frame.downsample(1);
        assert_eq!(same.width, 8);
        assert_eq!(same.data, frame.data);
    }

    #[test]
    fn test_mean_abs_diff_white_block() {
        let a = VideoFrame::solid(10, 10, [0, 0, 0]);
        let mut b = a.clone();
        // Top half white: 50 of 100 pixels at 255
        for px in b.data.chunks_exact_mut(3).take(50) {
            px.copy_from_slice(&[255, 255, 255]);
        }
        let diff = a.mean_abs_diff(&b).unwrap();
        assert!((diff - 127.0).abs() < 1.0, "diff was {diff}");
    }

    #[test]
    fn test_mean_abs_diff_dimension_mismatch() {
        let a = VideoFrame::solid(10, 10, [0, 0, 0]);
        let b = VideoFrame::solid(5, 5, [0, 0, 0]);
        assert!(a.mean_abs_diff(&b).is_none());
    }

    #[test]
    fn test_rgb_image_roundtrip_keeps_stamp() {
        let frame = VideoFrame::solid(4, 3, [9, 8, 7]).restamped(42, 7);
        let img = frame.to_rgb_image().unwrap();
        let back = VideoFrame::from_rgb_image(img, frame.timestamp_ns, frame.sequence);
        assert_eq!(back.sequence, 7);
        assert_eq!(back.data, frame.data);
    }

    proptest::proptest! {
        #[test]
        fn prop_downsample_dimensions(w in 1u32..64, h in 1u32..64, factor in 0u32..6) {
            let frame = VideoFrame::solid(w, h, [1, 2, 3]);
            let small = frame.downsample(factor);
            if factor <= 1 || w < factor || h < factor {
                proptest::prop_assert_eq!((small.width, small.height), (w, h));
            } else {
                proptest::prop_assert_eq!((small.width, small.height), (w / factor, h / factor));
            }
            proptest::prop_assert_eq!(small.data.len(), (small.width * small.height * 3) as usize);
        }
    }
}
