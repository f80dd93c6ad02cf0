use crate::config::PidGains;

/// Discrete PID controller stepped once per perception cycle. The loop runs
/// at a fixed cadence, so the gains absorb the timestep and no dt term
/// appears here. The integral term is deliberately unbounded; the drive
/// mixer clamps the final motor commands downstream.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    integral: f64,
    previous_error: f64,
}

impl PidController {
    pub fn new(gains: &PidGains) -> Self {
        Self {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            integral: 0.0,
            previous_error: 0.0,
        }
    }

    /// One control step toward `setpoint` from the measured `actual`.
    pub fn compute(&mut self, setpoint: f64, actual: f64) -> f64 {
        let error = setpoint - actual;
        self.integral += error;
        let derivative = error - self.previous_error;
        self.previous_error = error;
        self.kp * error + self.ki * self.integral + self.kd * derivative
    }

}
