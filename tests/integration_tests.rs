use std::sync::Arc;

use lanepilot::camera::FrameSource;
use lanepilot::centerline::{LaneDetector, LaneEstimate};
use lanepilot::config::LanePilotConfig;
use lanepilot::detector::{BoundingBox, DetectedObject, NullDetector, ObjectDetector};
use lanepilot::geometry::PerspectiveMap;
use lanepilot::mat::Mat;
use lanepilot::motor::{DriveMixer, RecordingMotorDriver};
use lanepilot::obstacle::ObstacleRanger;
use lanepilot::perception::{CycleOutcome, PerceptionFusion};
use lanepilot::pid::PidController;
use lanepilot::pipeline::DriveAssistPipeline;

/// Identity rectification over a 480x720 frame. Raw coordinates equal
/// warped coordinates, so scenes are painted directly in bird's-eye space
/// and every expected value can be derived by hand.
fn identity_config() -> LanePilotConfig {
    let mut config = LanePilotConfig::default();
    config.vision.frame_width = 480;
    config.vision.frame_height = 720;
    let corners = [[0.0, 0.0], [0.0, 720.0], [480.0, 0.0], [480.0, 720.0]];
    config.perspective.raw_points = corners;
    config.perspective.warped_points = corners;
    config
}

fn identity_map(config: &LanePilotConfig) -> PerspectiveMap {
    config.perspective_map().unwrap()
}

fn paint_stripe(frame: &mut Mat, x0: i32, x1: i32) {
    for y in 0..frame.height as i32 {
        for x in x0..=x1 {
            frame.set_pixel(x, y, [255, 255, 255]);
        }
    }
}

fn paint_dark_box(frame: &mut Mat, x0: i32, y0: i32, w: i32, h: i32) {
    for y in y0..(y0 + h) {
        for x in x0..(x0 + w) {
            frame.set_pixel(x, y, [15, 15, 15]);
        }
    }
}

#[test]
fn right_line_scene_gives_the_expected_offset() {
    let config = identity_config();
    let detector = LaneDetector::new(
        &config.vision,
        &config.perspective,
        config.lane.clone(),
        identity_map(&config),
    );

    let mut frame = Mat::new(480, 720, 3);
    paint_stripe(&mut frame, 459, 470);

    match detector.detect(&frame) {
        LaneEstimate::Fit { curve, offset } => {
            // The stripe erodes to columns 460..=469; the traced line shifts
            // left by one lane width to x = 250, half a lane right of that is
            // 355, and 315 - 355 = -40 remaps to -24.
            assert!((curve.eval(720.0) - 250.0).abs() < 1.0);
            assert_eq!(offset, -24);
        }
        LaneEstimate::NoFit => panic!("expected a lane fit"),
    }
}

#[test]
fn featureless_scene_gives_no_fit() {
    let config = identity_config();
    let detector = LaneDetector::new(
        &config.vision,
        &config.perspective,
        config.lane.clone(),
        identity_map(&config),
    );
    let frame = Mat::new(480, 720, 3);
    assert_eq!(detector.detect(&frame), LaneEstimate::NoFit);
}

#[test]
fn obstacle_distance_counts_up_from_the_bottom_edge() {
    let config = identity_config();
    let ranger = ObstacleRanger::new(&config.vision, &config.lane, identity_map(&config));
    let detector = LaneDetector::new(
        &config.vision,
        &config.perspective,
        config.lane.clone(),
        identity_map(&config),
    );

    let mut frame = Mat::new(480, 720, 3);
    paint_stripe(&mut frame, 459, 470);
    let LaneEstimate::Fit { curve, .. } = detector.detect(&frame) else {
        panic!("expected a lane fit");
    };

    // In-lane box with its ground edge at y = 620. The 3-pixel rendered edge
    // reaches row 621, so the warped rectangle bottoms out at 622.
    let bbox = BoundingBox {
        x: 300,
        y: 560,
        width: 50,
        height: 60,
    };
    assert_eq!(ranger.distance_to_object(&curve, &bbox), 720 - 622);

    // A box left of the lane corridor reads as maximum distance.
    let outside = BoundingBox {
        x: 20,
        y: 560,
        width: 50,
        height: 60,
    };
    assert_eq!(ranger.distance_to_object(&curve, &outside), 720);
}

struct StaticDetector(Vec<DetectedObject>);

impl ObjectDetector for StaticDetector {
    fn detect(&self, _frame: &Mat) -> anyhow::Result<Vec<DetectedObject>> {
        Ok(self.0.clone())
    }
}

fn fusion_with(config: &LanePilotConfig, detector: Arc<dyn ObjectDetector>) -> PerceptionFusion {
    let map = identity_map(config);
    let lane_detector = Arc::new(LaneDetector::new(
        &config.vision,
        &config.perspective,
        config.lane.clone(),
        map.clone(),
    ));
    let ranger = ObstacleRanger::new(&config.vision, &config.lane, map);
    PerceptionFusion::new(lane_detector, detector, ranger)
}

#[tokio::test]
async fn fusion_with_no_detections_reports_a_clear_road() {
    let config = identity_config();
    let fusion = fusion_with(&config, Arc::new(NullDetector));

    let mut frame = Mat::new(480, 720, 3);
    paint_stripe(&mut frame, 459, 470);

    match fusion.process(frame).await.unwrap() {
        CycleOutcome::Guidance {
            offset,
            mio_distance,
            mio,
        } => {
            assert_eq!(offset, -24);
            assert_eq!(mio_distance, 720);
            assert!(mio.is_none());
        }
        CycleOutcome::NoLane => panic!("expected guidance"),
    }
}

#[tokio::test]
async fn fusion_selects_the_nearest_in_lane_object() {
    let config = identity_config();
    let near = DetectedObject {
        label: "box".to_string(),
        confidence: 0.9,
        bbox: BoundingBox {
            x: 300,
            y: 560,
            width: 50,
            height: 60,
        },
    };
    let far = DetectedObject {
        label: "cone".to_string(),
        confidence: 0.9,
        bbox: BoundingBox {
            x: 300,
            y: 360,
            width: 50,
            height: 60,
        },
    };
    let fusion = fusion_with(
        &config,
        Arc::new(StaticDetector(vec![far, near.clone()])),
    );

    let mut frame = Mat::new(480, 720, 3);
    paint_stripe(&mut frame, 459, 470);

    match fusion.process(frame).await.unwrap() {
        CycleOutcome::Guidance {
            mio_distance, mio, ..
        } => {
            assert_eq!(mio_distance, 720 - 622);
            assert_eq!(mio.map(|o| o.label), Some("box".to_string()));
        }
        CycleOutcome::NoLane => panic!("expected guidance"),
    }
}

#[tokio::test]
async fn fusion_discards_detections_without_a_lane() {
    let config = identity_config();
    let object = DetectedObject {
        label: "box".to_string(),
        confidence: 0.9,
        bbox: BoundingBox {
            x: 300,
            y: 560,
            width: 50,
            height: 60,
        },
    };
    let fusion = fusion_with(&config, Arc::new(StaticDetector(vec![object])));

    let frame = Mat::new(480, 720, 3);
    assert!(!fusion.process(frame).await.unwrap().is_guidance());
}

struct SceneSource {
    stripe: (i32, i32),
    obstacle: Option<(i32, i32, i32, i32)>,
}

impl FrameSource for SceneSource {
    fn capture(&mut self) -> anyhow::Result<Mat> {
        let mut frame = Mat::new(480, 720, 3);
        // Mid-gray road so dark obstacles stand out.
        frame.fill(120);
        paint_stripe(&mut frame, self.stripe.0, self.stripe.1);
        if let Some((x, y, w, h)) = self.obstacle {
            paint_dark_box(&mut frame, x, y, w, h);
        }
        Ok(frame)
    }
}

#[tokio::test]
async fn pipeline_drives_slower_when_an_obstacle_is_ahead() {
    // A right line at x = 420 puts the lane center exactly under the
    // vehicle, so the clear run cruises straight at base speed and the
    // comparison isolates the distance axis.
    let clear_driver = Arc::new(RecordingMotorDriver::new());
    let mut clear_pipeline = DriveAssistPipeline::new(
        identity_config(),
        Box::new(SceneSource {
            stripe: (419, 430),
            obstacle: None,
        }),
        Arc::new(lanepilot::detector::BlobDetector::default()),
        clear_driver.clone(),
    )
    .unwrap();
    clear_pipeline.process_single_frame().await.unwrap();
    let clear = clear_driver.last().unwrap();

    let blocked_driver = Arc::new(RecordingMotorDriver::new());
    let mut blocked_pipeline = DriveAssistPipeline::new(
        identity_config(),
        Box::new(SceneSource {
            stripe: (419, 430),
            obstacle: Some((290, 500, 60, 120)),
        }),
        Arc::new(lanepilot::detector::BlobDetector::default()),
        blocked_driver.clone(),
    )
    .unwrap();
    blocked_pipeline.process_single_frame().await.unwrap();
    let blocked = blocked_driver.last().unwrap();

    assert!(blocked.left_duty < clear.left_duty);
    assert!(blocked.right_duty < clear.right_duty);
}

#[test]
fn pid_and_mixer_respond_to_lane_offset_symmetrically() {
    let config = LanePilotConfig::default();
    let mixer = DriveMixer::new(config.motor.clone());

    // Offset is vehicle_x minus lane center: negative when the vehicle sits
    // left of lane center. The two signs must produce mirrored wheel splits.
    let mut pid = PidController::new(&config.control.lane);
    let correction = pid.compute(config.control.desired_lane_offset, -24.0);
    assert!(correction > 0.0);
    let command = mixer.mix(correction, 0.0);
    assert!(command.right_duty > command.left_duty);

    let mut pid = PidController::new(&config.control.lane);
    let mirrored = pid.compute(config.control.desired_lane_offset, 24.0);
    let mirrored_command = mixer.mix(mirrored, 0.0);
    assert!(mirrored_command.left_duty > mirrored_command.right_duty);
    assert!((command.right_duty - mirrored_command.left_duty).abs() < 1e-9);
}
