use tracing::debug;

use crate::centerline::CenterLineFit;
use crate::config::{LaneConfig, VisionConfig};
use crate::detector::{BoundingBox, DetectedObject};
use crate::geometry::PerspectiveMap;
use crate::mat::Mat;
use crate::segmentation::extract_contours;

/// Estimates forward distance to detected objects by projecting their
/// ground-contact edge into the bird's-eye view and testing lane membership
/// against the fitted center line. Distances are in warped pixels, counted
/// up from the bottom edge; the warped frame height means "nothing ahead".
#[derive(Debug, Clone)]
pub struct ObstacleRanger {
    map: PerspectiveMap,
    frame_width: u32,
    frame_height: u32,
    warped_height: i32,
    lane_width: i32,
    margin: i32,
}

impl ObstacleRanger {
    pub fn new(vision: &VisionConfig, lane: &LaneConfig, map: PerspectiveMap) -> Self {
        Self {
            map,
            frame_width: vision.frame_width,
            frame_height: vision.frame_height,
            warped_height: vision.warped_height as i32,
            lane_width: lane.lane_width,
            margin: lane.in_lane_margin,
        }
    }

    #[allow(dead_code)]
    pub fn max_distance(&self) -> i32 {
        self.warped_height
    }

    /// Distance to one object. The box's bottom edge is drawn on a blank
    /// raw-size mask and rectified with the same perspective map as the
    /// visual frame; the fill is zero so the drawn line stays unambiguous.
    /// An edge that projects entirely outside the warped view yields no
    /// contour, which means the object is unreachable, not an error.
    pub fn distance_to_object(&self, curve: &CenterLineFit, bbox: &BoundingBox) -> i32 {
        let mut edge_mask = Mat::new(self.frame_width, self.frame_height, 1);
        edge_mask.draw_hline(bbox.x, bbox.xmax(), bbox.ymax(), 3, 255);

        let warped_mask = self.map.warp(&edge_mask, [0, 0, 0]);
        let contours = extract_contours(&warped_mask);
        let Some(contour) = contours.first() else {
            return self.warped_height;
        };

        let (warped_xmin, _, width, height) = contour.bounding_rect();
        let warped_xmax = warped_xmin + width;
        let warped_ymax = contour.bounding_rect().1 + height;

        // Lane corridor at the object's height, shrunk for a stricter test
        let center_x = curve.eval(warped_ymax as f64) as i32 + self.margin;
        let right_x = center_x + self.lane_width - self.margin * 2;

        let in_lane = (center_x <= warped_xmin && warped_xmin <= right_x)
            || (center_x <= warped_xmax && warped_xmax <= right_x);

        if in_lane {
            self.warped_height - warped_ymax
        } else {
            self.warped_height
        }
    }

    /// Selects the Most Important Object: the nearest in-lane detection.
    /// No detections, or none in lane, leaves the MIO absent at maximum
    /// distance.
    pub fn find_mio(
        &self,
        curve: &CenterLineFit,
        detections: &[DetectedObject],
    ) -> (Option<DetectedObject>, i32) {
        let mut mio = None;
        let mut mio_distance = self.warped_height;

        for detection in detections {
            let distance = self.distance_to_object(curve, &detection.bbox);
            if distance < mio_distance {
                mio_distance = distance;
                mio = Some(detection.clone());
            }
        }

        if let Some(ref object) = mio {
            debug!(
                "MIO: {} at distance {} (confidence {:.2})",
                object.label, mio_distance, object.confidence
            );
        }

        (mio, mio_distance)
    }
}
