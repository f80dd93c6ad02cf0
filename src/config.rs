use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::geometry::PerspectiveMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanePilotConfig {
    pub vision: VisionConfig,
    pub perspective: PerspectiveConfig,
    pub lane: LaneConfig,
    pub motor: MotorConfig,
    pub control: ControlConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Raw camera frame width
    pub frame_width: u32,
    /// Raw camera frame height
    pub frame_height: u32,
    /// Bird's-eye view width
    pub warped_width: u32,
    /// Bird's-eye view height
    pub warped_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerspectiveConfig {
    /// Four raw-view points: top-left, bottom-left, top-right, bottom-right
    pub raw_points: [[f64; 2]; 4],
    /// The matching four bird's-eye view points
    pub warped_points: [[f64; 2]; 4],
    /// Color filling areas outside the source frame after rectification
    pub fill_color: [u8; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneLineConfig {
    /// Label used for debug logging
    pub name: String,
    /// Lower HSV bound for masking this line (H in 0..180)
    pub hsv_low: [u8; 3],
    /// Upper HSV bound
    pub hsv_high: [u8; 3],
    /// X-coordinate where the sliding window starts
    pub initial_x: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    pub lines: Vec<LaneLineConfig>,
    /// Lane width in warped-view pixels
    pub lane_width: i32,
    /// Vehicle x-position in the warped view
    pub vehicle_x: i32,
    /// Sliding window half-width
    pub window_half_width: i32,
    /// Sliding window band height
    pub window_height: i32,
    /// Vertical start offset for the left-line search
    pub left_search_y_offset: i32,
    /// Contours below this area are noise
    pub noise_area_threshold: f64,
    /// Contours below this area (and above noise) are dashed segments
    pub solid_area_threshold: f64,
    /// Corridor shrink for the in-lane obstacle test
    pub in_lane_margin: i32,
    /// Symmetric control range the pixel offset maps into
    pub offset_control_range: i32,
}

impl LaneConfig {
    pub fn line(&self, side: LaneSide) -> &LaneLineConfig {
        &self.lines[side as usize]
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneSide {
    Left = 0,
    Center = 1,
    Right = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorConfig {
    pub min_speed: f64,
    pub max_speed: f64,
    pub base_speed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Gains for the lane-offset axis
    pub lane: PidGains,
    /// Gains for the obstacle-distance axis
    pub mio: PidGains,
    /// Desired lane offset (zero = centered in lane)
    pub desired_lane_offset: f64,
    /// Desired obstacle distance (warped height = nothing ahead)
    pub desired_mio_distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Minimum delay between control cycles in milliseconds
    pub cycle_interval_ms: u64,
}

impl Default for LanePilotConfig {
    fn default() -> Self {
        let warped_width = 480u32;
        let warped_height = 720u32;
        let white_line_low = [0, 0, 200];
        let white_line_high = [180, 50, 255];
        Self {
            vision: VisionConfig {
                frame_width: 640,
                frame_height: 480,
                warped_width,
                warped_height,
            },
            perspective: PerspectiveConfig {
                raw_points: [
                    [110.0, 250.0],  // top-left
                    [-180.0, 400.0], // bottom-left
                    [415.0, 247.0],  // top-right
                    [580.0, 400.0],  // bottom-right
                ],
                warped_points: [
                    [0.0, 0.0],
                    [0.0, warped_height as f64],
                    [warped_width as f64, 0.0],
                    [warped_width as f64, warped_height as f64],
                ],
                fill_color: [255, 255, 255],
            },
            lane: LaneConfig {
                lines: vec![
                    LaneLineConfig {
                        name: "Left".to_string(),
                        hsv_low: white_line_low,
                        hsv_high: white_line_high,
                        initial_x: 20,
                    },
                    LaneLineConfig {
                        name: "Center".to_string(),
                        hsv_low: white_line_low,
                        hsv_high: white_line_high,
                        initial_x: 240,
                    },
                    LaneLineConfig {
                        name: "Right".to_string(),
                        hsv_low: white_line_low,
                        hsv_high: white_line_high,
                        initial_x: 460,
                    },
                ],
                lane_width: 420 - 210,
                vehicle_x: (420 + 210) / 2,
                window_half_width: 60,
                window_height: 50,
                left_search_y_offset: 100,
                noise_area_threshold: 200.0,
                solid_area_threshold: 900.0,
                in_lane_margin: 20,
                offset_control_range: 63,
            },
            motor: MotorConfig {
                min_speed: 0.0,
                max_speed: 255.0,
                base_speed: 100.0,
            },
            control: ControlConfig {
                lane: PidGains {
                    kp: 3.5,
                    ki: 0.0005,
                    kd: 1.2,
                },
                mio: PidGains {
                    kp: 4.0,
                    ki: 0.0002,
                    kd: 1.5,
                },
                desired_lane_offset: 0.0,
                desired_mio_distance: warped_height as f64,
            },
            performance: PerformanceConfig {
                cycle_interval_ms: 100,
            },
        }
    }
}

impl LanePilotConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            // Create default config file
            let default_config = Self::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            fs::write(path, toml_content).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// `LaneSide` indexes the line list by position, so a hand-edited config
    /// with fewer entries would panic mid-cycle instead of failing here.
    fn validate(&self) -> Result<()> {
        if self.lane.lines.len() < 3 {
            bail!(
                "lane configuration must define three lines (left, center, right), found {}",
                self.lane.lines.len()
            );
        }
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Builds the process-lifetime perspective map from the configured
    /// correspondence points.
    pub fn perspective_map(&self) -> Result<PerspectiveMap> {
        PerspectiveMap::new(
            self.perspective.raw_points,
            self.perspective.warped_points,
            (self.vision.frame_width, self.vision.frame_height),
            (self.vision.warped_width, self.vision.warped_height),
        )
    }
}
