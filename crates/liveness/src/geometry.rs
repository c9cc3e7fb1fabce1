//! Face geometry shared by the evaluators and the matcher

use serde::{Deserialize, Serialize};

/// Pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Centroid of a point set
    pub fn mean(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }
}

/// Face bounding box in processing-frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceBox {
    pub const fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Scale coordinates (e.g. back to full resolution for display)
    pub fn scaled(&self, factor: u32) -> FaceBox {
        FaceBox {
            top: self.top * factor,
            right: self.right * factor,
            bottom: self.bottom * factor,
            left: self.left * factor,
        }
    }
}

/// Facial landmarks used by the liveness evaluators.
///
/// Eye contours follow the 6-point convention (p1..p6 clockwise from the
/// outer corner) required by the eye aspect ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_eye: [Point; 6],
    pub right_eye: [Point; 6],
    /// Nose bridge from the top of the nose to the tip
    pub nose_bridge: Vec<Point>,
}

impl FaceLandmarks {
    pub fn left_eye_center(&self) -> Point {
        Point::mean(&self.left_eye).unwrap_or_default()
    }

    pub fn right_eye_center(&self) -> Point {
        Point::mean(&self.right_eye).unwrap_or_default()
    }

    /// Last point of the nose bridge
    pub fn nose_tip(&self) -> Option<Point> {
        self.nose_bridge.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_box_dimensions() {
        let b = FaceBox::new(50, 200, 150, 100);
        assert_eq!(b.width(), 100);
        assert_eq!(b.height(), 100);
        assert_eq!(b.scaled(2), FaceBox::new(100, 400, 300, 200));
    }

    #[test]
    fn test_inverted_box_has_zero_size() {
        let b = FaceBox::new(100, 10, 50, 20);
        assert_eq!(b.width(), 0);
        assert_eq!(b.height(), 0);
    }

    #[test]
    fn test_point_mean() {
        let c = Point::mean(&[Point::new(0.0, 0.0), Point::new(4.0, 2.0)]).unwrap();
        assert_eq!(c, Point::new(2.0, 1.0));
        assert!(Point::mean(&[]).is_none());
    }
}
