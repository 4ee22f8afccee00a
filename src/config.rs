// Timeouts, serial defaults, loop rates
use std::time::Duration;

// Serial port the robot is usually attached to
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

// 500-series robots boot at 115200 baud
pub const DEFAULT_BAUD: u32 = 115_200;

// Read timeout on the serial link
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

// The robot ignores commands for a short while after a mode change
pub const MODE_SWITCH_DELAY: Duration = Duration::from_millis(100);

// The robot streams a frame every 15 ms
pub const STREAM_PERIOD: Duration = Duration::from_millis(15);

// Teleop loop frequency
pub const LOOP_HZ: u64 = 50;

// Drive command watchdog: stop the wheels when input goes quiet
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Wheel speeds for keyboard teleop (mm/s)
pub const TELEOP_SPEEDS: [i16; 3] = [100, 250, 500];

// Calibration: full spins in place the operator drives before ending the run
pub const CALIBRATION_TURNS: f64 = 10.0;

// Right wheel speed for the check circle after calibration (mm/s)
pub const CIRCLE_CHECK_SPEED: i16 = 250;
