//! Synthetic landmark fixtures for tests and simulation scripts

use crate::geometry::{FaceLandmarks, Point};

/// Six-point eye contour centered at (cx, cy) with the given aspect ratio
pub fn eye_with_ear(cx: f32, cy: f32, ear: f32) -> [Point; 6] {
    let half_open = ear * 30.0 / 2.0;
    [
        Point::new(cx - 15.0, cy),
        Point::new(cx - 5.0, cy - half_open),
        Point::new(cx + 5.0, cy - half_open),
        Point::new(cx + 15.0, cy),
        Point::new(cx + 5.0, cy + half_open),
        Point::new(cx - 5.0, cy + half_open),
    ]
}

/// Level, frontal face with both eyes at the given aspect ratio
pub fn frontal_landmarks(ear: f32) -> FaceLandmarks {
    FaceLandmarks {
        left_eye: eye_with_ear(100.0, 100.0, ear),
        right_eye: eye_with_ear(160.0, 100.0, ear),
        nose_bridge: vec![
            Point::new(130.0, 105.0),
            Point::new(130.0, 112.0),
            Point::new(130.0, 119.0),
            Point::new(130.0, 125.0),
        ],
    }
}

/// Open, closed, closed, closed, open
pub fn blink_window() -> Vec<Option<FaceLandmarks>> {
    [0.3, 0.1, 0.1, 0.1, 0.3]
        .into_iter()
        .map(|ear| Some(frontal_landmarks(ear)))
        .collect()
}
