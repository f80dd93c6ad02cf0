use anyhow::Result;
use tracing::debug;

use crate::mat::Mat;
use crate::segmentation::extract_contours;

#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn xmax(&self) -> i32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> i32 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// The object-detection collaborator. The model itself is a black box that
/// returns axis-aligned boxes in raw frame coordinates; an empty result is a
/// legitimate outcome. Implementations may fail internally, but the
/// perception layer absorbs those errors at this boundary and degrades to
/// zero detections for the cycle.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &Mat) -> Result<Vec<DetectedObject>>;
}

/// Built-in stand-in for an external detection model: finds dark blobs in
/// the lower half of the frame and reports their bounding rectangles.
/// Useful for simulation runs and bench tests without model hardware.
pub struct BlobDetector {
    /// Pixels darker than this on all channels count as obstacle mass
    pub darkness_threshold: u8,
    /// Minimum blob pixel count to report
    pub min_area: f64,
}

impl Default for BlobDetector {
    fn default() -> Self {
        Self {
            darkness_threshold: 60,
            min_area: 150.0,
        }
    }
}

impl ObjectDetector for BlobDetector {
    fn detect(&self, frame: &Mat) -> Result<Vec<DetectedObject>> {
        let mut mask = Mat::new(frame.width, frame.height, 1);
        for y in (frame.height / 2)..frame.height {
            for x in 0..frame.width {
                let [r, g, b] = frame.pixel(x, y);
                if r <= self.darkness_threshold
                    && g <= self.darkness_threshold
                    && b <= self.darkness_threshold
                {
                    mask.set(x, y, 255);
                }
            }
        }

        let mut objects = Vec::new();
        for contour in extract_contours(&mask) {
            let area = contour.area();
            if area < self.min_area {
                continue;
            }
            let (x, y, width, height) = contour.bounding_rect();
            let confidence = (area / 2000.0).min(0.95) as f32;
            objects.push(DetectedObject {
                label: "obstacle".to_string(),
                confidence,
                bbox: BoundingBox {
                    x,
                    y,
                    width,
                    height,
                },
            });
        }

        debug!("Blob detector found {} candidate obstacles", objects.len());
        Ok(objects)
    }
}

/// Detector that never sees anything. Used when running lane-keeping only.
pub struct NullDetector;

impl ObjectDetector for NullDetector {
    fn detect(&self, _frame: &Mat) -> Result<Vec<DetectedObject>> {
        Ok(Vec::new())
    }
}
