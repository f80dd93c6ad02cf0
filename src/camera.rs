use anyhow::{anyhow, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::config::VisionConfig;
use crate::mat::Mat;

/// Supplies raw RGB frames at the configured dimensions, one per control
/// cycle. Backed by real camera hardware or by the synthetic road scene.
pub trait FrameSource {
    fn capture(&mut self) -> Result<Mat>;
}

pub struct NokhwaCamera {
    camera: Option<Camera>,
    camera_id: u32,
    frame_width: u32,
    frame_height: u32,
    is_initialized: bool,
}

impl NokhwaCamera {
    pub fn new(camera_id: u32, vision: &VisionConfig) -> Self {
        Self {
            camera: None,
            camera_id,
            frame_width: vision.frame_width,
            frame_height: vision.frame_height,
            is_initialized: false,
        }
    }

    pub fn initialize(&mut self) -> Result<()> {
        info!("Initializing camera system - scanning for available cameras");

        let available_cameras = Self::detect_cameras();
        if available_cameras.is_empty() {
            return Err(anyhow!("No cameras detected on this system"));
        }

        info!(
            "Found {} camera(s): {:?}",
            available_cameras.len(),
            available_cameras
        );

        // Requested camera first, then fallbacks
        let camera_indices = if available_cameras.contains(&self.camera_id) {
            vec![self.camera_id]
        } else {
            available_cameras
        };

        for cam_id in camera_indices {
            match self.try_initialize_camera(cam_id) {
                Ok(_) => {
                    self.camera_id = cam_id;
                    info!("Successfully initialized camera {}", cam_id);
                    break;
                }
                Err(e) => {
                    warn!("Failed to initialize camera {}: {}", cam_id, e);
                    continue;
                }
            }
        }

        if !self.is_initialized {
            return Err(anyhow!("Failed to initialize any available camera"));
        }

        Ok(())
    }

    fn try_initialize_camera(&mut self, camera_id: u32) -> Result<()> {
        let camera_index = CameraIndex::Index(camera_id);
        let requested_format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

        let mut camera = Camera::new(camera_index, requested_format)?;
        camera.open_stream()?;

        // Test capture a frame to ensure it works
        let _test_frame = camera.frame()?;

        self.camera = Some(camera);
        self.is_initialized = true;

        Ok(())
    }

    pub fn detect_cameras() -> Vec<u32> {
        let mut cameras = Vec::new();

        // Try camera indices 0-9 (most common range)
        for cam_id in 0..10 {
            let camera_index = CameraIndex::Index(cam_id);
            let requested_format =
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

            if let Ok(_camera) = Camera::new(camera_index, requested_format) {
                cameras.push(cam_id);
            }
        }

        cameras
    }
}

impl FrameSource for NokhwaCamera {
    fn capture(&mut self) -> Result<Mat> {
        let Some(ref mut camera) = self.camera else {
            return Err(anyhow!("Camera not initialized"));
        };

        match camera.frame() {
            Ok(frame) => {
                let decoded = frame.decode_image::<RgbFormat>()?;
                debug!(
                    "Captured camera frame: {}x{}",
                    decoded.width(),
                    decoded.height()
                );

                // The rectification map assumes fixed frame dimensions, so
                // resize whatever the hardware delivered.
                let resized = if decoded.width() != self.frame_width
                    || decoded.height() != self.frame_height
                {
                    image::imageops::resize(
                        &decoded,
                        self.frame_width,
                        self.frame_height,
                        image::imageops::FilterType::Triangle,
                    )
                } else {
                    decoded
                };

                Ok(Mat::from_rgb_image(&resized))
            }
            Err(e) => {
                error!("Camera frame capture failed: {}", e);
                Err(anyhow!("Camera frame capture error: {}", e))
            }
        }
    }
}

impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        if self.is_initialized {
            info!("Camera being dropped, cleaning up");
            if let Some(ref mut camera) = self.camera {
                let _ = camera.stop_stream();
            }
        }
    }
}

/// Renders a straight three-line road scene with light sensor noise.
/// Drives simulation mode and benchmarks when no camera is attached.
pub struct SyntheticCamera {
    frame_width: u32,
    frame_height: u32,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new(vision: &VisionConfig) -> Self {
        Self {
            frame_width: vision.frame_width,
            frame_height: vision.frame_height,
            frame_count: 0,
        }
    }

    fn paint_line(frame: &mut Mat, center_x: i32, dashed: bool, frame_count: u64) {
        let height = frame.height as i32;
        // Lines only exist below the horizon.
        for y in (height / 2)..height {
            if dashed {
                // Dash phase scrolls with the frame counter so the scene moves.
                let phase = (y + frame_count as i32 * 4) / 20;
                if phase % 2 == 0 {
                    continue;
                }
            }
            // Perspective: lines widen and spread toward the bottom.
            let t = (y - height / 2) as f64 / (height / 2) as f64;
            let spread = ((center_x - frame.width as i32 / 2) as f64 * t) as i32;
            let x = frame.width as i32 / 2 + spread;
            let half_width = 1 + (t * 4.0) as i32;
            for dx in -half_width..=half_width {
                frame.set_pixel(x + dx, y, [250, 250, 250]);
            }
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn capture(&mut self) -> Result<Mat> {
        let mut frame = Mat::new(self.frame_width, self.frame_height, 3);
        let mut rng = rand::thread_rng();

        // Asphalt with mild noise.
        for value in frame.data.iter_mut() {
            *value = 70u8.saturating_add(rng.gen_range(0..12));
        }

        let width = self.frame_width as i32;
        Self::paint_line(&mut frame, width / 6, false, self.frame_count);
        Self::paint_line(&mut frame, width / 2, true, self.frame_count);
        Self::paint_line(&mut frame, width * 5 / 6, false, self.frame_count);

        self.frame_count += 1;
        Ok(frame)
    }
}
