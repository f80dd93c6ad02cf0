use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::centerline::{LaneDetector, LaneEstimate};
use crate::detector::{DetectedObject, ObjectDetector};
use crate::mat::Mat;
use crate::obstacle::ObstacleRanger;

/// Result of one perception cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// No usable lane evidence; the vehicle has nothing to steer toward.
    NoLane,
    /// A fitted center line with obstacle context.
    Guidance {
        /// Lateral offset on the symmetric control range, negative when the
        /// vehicle sits left of lane center
        offset: i32,
        /// Distance to the most important object in warped pixels
        mio_distance: i32,
        mio: Option<DetectedObject>,
    },
}

impl CycleOutcome {
    #[allow(dead_code)]
    pub fn is_guidance(&self) -> bool {
        matches!(self, CycleOutcome::Guidance { .. })
    }
}

/// Runs the lane branch and the object branch of perception concurrently
/// over the same frame and fuses the results.
///
/// Both branches are CPU-bound pixel work, so each runs on the blocking
/// pool. Detector failures degrade to zero detections rather than aborting
/// the cycle; a lane fit failure is a real outcome the control layer must
/// react to, so it propagates as `NoLane`.
pub struct PerceptionFusion {
    lane_detector: Arc<LaneDetector>,
    object_detector: Arc<dyn ObjectDetector>,
    ranger: ObstacleRanger,
}

impl PerceptionFusion {
    pub fn new(
        lane_detector: Arc<LaneDetector>,
        object_detector: Arc<dyn ObjectDetector>,
        ranger: ObstacleRanger,
    ) -> Self {
        Self {
            lane_detector,
            object_detector,
            ranger,
        }
    }

    pub async fn process(&self, frame: Mat) -> Result<CycleOutcome> {
        let (lane_tx, lane_rx) = oneshot::channel();
        let (object_tx, object_rx) = oneshot::channel();

        let lane_frame = frame.clone();
        let lane_detector = Arc::clone(&self.lane_detector);
        tokio::task::spawn_blocking(move || {
            let estimate = lane_detector.detect(&lane_frame);
            let _ = lane_tx.send(estimate);
        });

        let object_detector = Arc::clone(&self.object_detector);
        tokio::task::spawn_blocking(move || {
            let detections = match object_detector.detect(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    warn!("Object detector failed, continuing without detections: {}", e);
                    Vec::new()
                }
            };
            let _ = object_tx.send(detections);
        });

        let (estimate, detections) = futures::future::join(lane_rx, object_rx).await;
        let estimate = estimate.map_err(|_| anyhow!("lane detection task dropped its result"))?;
        let detections =
            detections.map_err(|_| anyhow!("object detection task dropped its result"))?;

        match estimate {
            LaneEstimate::NoFit => {
                debug!("No lane fit this cycle, discarding {} detections", detections.len());
                Ok(CycleOutcome::NoLane)
            }
            LaneEstimate::Fit { curve, offset } => {
                let (mio, mio_distance) = self.ranger.find_mio(&curve, &detections);
                Ok(CycleOutcome::Guidance {
                    offset,
                    mio_distance,
                    mio,
                })
            }
        }
    }
}
