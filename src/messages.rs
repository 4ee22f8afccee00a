// Message types exchanged between the control loop and its consumers

use serde::{Deserialize, Serialize};

use crate::robot::{Pose, SensorFrame};

// Wheel velocity request from teleop/scripts, in mm/s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveCommand {
    pub left: i16,
    pub right: i16,
}

impl DriveCommand {
    pub fn new(left: i16, right: i16) -> Self {
        Self { left, right }
    }

    pub fn is_stop(&self) -> bool {
        self.left == 0 && self.right == 0
    }
}

/// Health of the drive watchdog
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

/// One line of telemetry output: latest sensor readings plus dead-reckoned pose
#[derive(Debug, Clone, Serialize)]
pub struct Telemetry {
    pub seq: u64,
    pub elapsed_ms: u64,
    pub pose: Option<Pose>,
    pub sensors: SensorFrame,
}
