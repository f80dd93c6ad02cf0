use anyhow::Result;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::config::MotorConfig;
use crate::geometry::{clamp, remap};

/// Differential-drive command as normalized duty cycles in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveCommand {
    pub left_duty: f64,
    pub right_duty: f64,
}

/// Combines the two control axes into wheel speeds.
///
/// The lane correction steers by speeding one wheel and slowing the other;
/// the distance correction brakes both wheels together as an obstacle
/// closes in. Raw speeds live on the configured `[min, max]` scale and are
/// normalized to duty cycles for the driver.
#[derive(Debug, Clone)]
pub struct DriveMixer {
    config: MotorConfig,
}

impl DriveMixer {
    pub fn new(config: MotorConfig) -> Self {
        Self { config }
    }

    pub fn mix(&self, lane_correction: f64, distance_correction: f64) -> DriveCommand {
        let base = self.config.base_speed;
        let left = base - lane_correction - distance_correction;
        let right = base + lane_correction - distance_correction;

        let min = self.config.min_speed;
        let max = self.config.max_speed;
        let left = clamp(left, min, max);
        let right = clamp(right, min, max);

        debug!("Mixed wheel speeds: left={:.1} right={:.1}", left, right);

        DriveCommand {
            left_duty: remap(left, min, max, 0.0, 1.0),
            right_duty: remap(right, min, max, 0.0, 1.0),
        }
    }

    /// Both wheels stopped. Issued when the control loop exits.
    pub fn stop(&self) -> DriveCommand {
        DriveCommand {
            left_duty: 0.0,
            right_duty: 0.0,
        }
    }
}

/// Sink for drive commands. The real robot backs this with PWM hardware;
/// simulation and tests use the in-process implementations below.
pub trait MotorDriver: Send + Sync {
    fn drive(&self, command: DriveCommand) -> Result<()>;
}

/// Logs each command instead of actuating. Default driver for simulation
/// runs where no motor hardware is attached.
pub struct LoggingMotorDriver;

impl MotorDriver for LoggingMotorDriver {
    fn drive(&self, command: DriveCommand) -> Result<()> {
        info!(
            "Drive: left={:.3} right={:.3}",
            command.left_duty, command.right_duty
        );
        Ok(())
    }
}

/// Records every command for later inspection.
#[allow(dead_code)]
pub struct RecordingMotorDriver {
    pub commands: Mutex<Vec<DriveCommand>>,
}

#[allow(dead_code)]
impl RecordingMotorDriver {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn last(&self) -> Option<DriveCommand> {
        self.commands.lock().ok().and_then(|c| c.last().copied())
    }
}

impl MotorDriver for RecordingMotorDriver {
    fn drive(&self, command: DriveCommand) -> Result<()> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command);
        }
        Ok(())
    }
}
