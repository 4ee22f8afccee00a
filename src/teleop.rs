// Keyboard teleop: W/S drive, A/D spin, R/F speed, SPACE stop, Q quit
//
// Key presses feed a drive watchdog; a fixed-rate loop sends whatever the
// watchdog allows and dead-reckons the pose from the wheel encoders. Encoder
// deltas are signed by the command the wheels ran under, so reversing wheels
// are not mistaken for counter wraps.

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{CALIBRATION_TURNS, CIRCLE_CHECK_SPEED, CMD_TIMEOUT, LOOP_HZ, TELEOP_SPEEDS};
use crate::messages::{DriveCommand, RuntimeHealth};
use crate::robot::dynamics::calibrated_ratio;
use crate::robot::{ByteTransport, DynamicsModel, EncoderSample, LedFlags, Pose, Result, Roomba};
use crate::runtime::DriveWatchdog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Drive(DriveCommand),
    Faster,
    Slower,
    Clean,
    Spot,
    Max,
    Dock,
    SafeMode,
    ResetPose,
    Calibrate,
    Quit,
}

fn key_action(code: KeyCode, speed: i16) -> Option<KeyAction> {
    let action = match code {
        KeyCode::Char('w') | KeyCode::Up => KeyAction::Drive(DriveCommand::new(speed, speed)),
        KeyCode::Char('s') | KeyCode::Down => KeyAction::Drive(DriveCommand::new(-speed, -speed)),
        // spin in place
        KeyCode::Char('a') | KeyCode::Left => KeyAction::Drive(DriveCommand::new(-speed, speed)),
        KeyCode::Char('d') | KeyCode::Right => KeyAction::Drive(DriveCommand::new(speed, -speed)),
        KeyCode::Char(' ') => KeyAction::Drive(DriveCommand::default()),
        KeyCode::Char('r') => KeyAction::Faster,
        KeyCode::Char('f') => KeyAction::Slower,
        KeyCode::Char('1') => KeyAction::Clean,
        KeyCode::Char('2') => KeyAction::Spot,
        KeyCode::Char('3') => KeyAction::Max,
        KeyCode::Char('4') => KeyAction::Dock,
        KeyCode::Char('n') => KeyAction::SafeMode,
        KeyCode::Char('z') => KeyAction::ResetPose,
        KeyCode::Char('k') => KeyAction::Calibrate,
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
        _ => return None,
    };
    Some(action)
}

/// What the teleop loop is doing besides following the keyboard
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TeleopMode {
    Drive,
    /// Counting ticks while the operator spins the robot in place
    Calibrating { left: i64, right: i64 },
    /// Right wheel circles the stopped left wheel to check a new ratio
    CircleCheck { travelled: f64, target: f64 },
}

/// Keyboard teleop state: watchdog, odometry and calibration
pub struct Teleop {
    watchdog: DriveWatchdog,
    dynamics: DynamicsModel,
    speed_idx: usize,
    mode: TeleopMode,
    // command the wheels have run under since the last encoder sample
    driven: DriveCommand,
    sampled_at: Instant,
}

impl Default for Teleop {
    fn default() -> Self {
        Self::new()
    }
}

impl Teleop {
    pub fn new() -> Self {
        Self {
            watchdog: DriveWatchdog::new(CMD_TIMEOUT),
            dynamics: DynamicsModel::new(),
            speed_idx: 0,
            mode: TeleopMode::Drive,
            driven: DriveCommand::default(),
            sampled_at: Instant::now(),
        }
    }

    pub fn pose(&self) -> Pose {
        self.dynamics.pose()
    }

    pub fn dynamics(&self) -> &DynamicsModel {
        &self.dynamics
    }

    pub fn mode(&self) -> TeleopMode {
        self.mode
    }

    /// Seed the encoder priors so the first tick reads no motion
    pub fn begin<T: ByteTransport>(&mut self, robot: &mut Roomba<T>, now: Instant) -> Result<()> {
        if let Some(sample) = robot.sample_encoders()? {
            self.dynamics.initialize_priors(sample);
        }
        self.sampled_at = now;
        Ok(())
    }

    /// Apply one key press; `false` means quit
    pub fn handle_key<T: ByteTransport>(
        &mut self,
        robot: &mut Roomba<T>,
        code: KeyCode,
        now: Instant,
    ) -> Result<bool> {
        match key_action(code, TELEOP_SPEEDS[self.speed_idx]) {
            Some(KeyAction::Drive(cmd)) => self.watchdog.on_command_at(cmd, now),
            Some(KeyAction::Faster) => {
                self.speed_idx = (self.speed_idx + 1).min(TELEOP_SPEEDS.len() - 1);
                info!("Speed: {} mm/s", TELEOP_SPEEDS[self.speed_idx]);
            }
            Some(KeyAction::Slower) => {
                self.speed_idx = self.speed_idx.saturating_sub(1);
                info!("Speed: {} mm/s", TELEOP_SPEEDS[self.speed_idx]);
            }
            // cleaning and docking hand control back to the robot (passive mode)
            Some(KeyAction::Clean) => robot.clean()?,
            Some(KeyAction::Spot) => robot.spot()?,
            Some(KeyAction::Max) => robot.max()?,
            Some(KeyAction::Dock) => robot.dock()?,
            Some(KeyAction::SafeMode) => {
                robot.safe()?;
                robot.leds(255, 255, LedFlags::default())?;
            }
            Some(KeyAction::ResetPose) => {
                self.dynamics.reset();
                info!("Pose reset");
            }
            Some(KeyAction::Calibrate) => self.toggle_calibration(),
            Some(KeyAction::Quit) => return Ok(false),
            None => {}
        }
        Ok(true)
    }

    fn toggle_calibration(&mut self) {
        self.mode = match self.mode {
            TeleopMode::Drive => {
                info!("Calibrating: spin in place {} times, then press K", CALIBRATION_TURNS);
                TeleopMode::Calibrating { left: 0, right: 0 }
            }
            TeleopMode::Calibrating { left, right } => {
                match calibrated_ratio(self.dynamics.radius(), CALIBRATION_TURNS, left, right) {
                    Some(ratio) => {
                        self.dynamics.set_encoder_ratio(ratio);
                        info!("Encoder ratio {:.6}, driving a check circle", ratio);
                        TeleopMode::CircleCheck {
                            travelled: 0.0,
                            target: 2.0 * PI * 2.0 * self.dynamics.radius(),
                        }
                    }
                    None => {
                        warn!("No encoder ticks counted, ratio unchanged");
                        TeleopMode::Drive
                    }
                }
            }
            TeleopMode::CircleCheck { .. } => {
                info!("Circle check aborted");
                TeleopMode::Drive
            }
        };
    }

    /// One loop tick: actuate, then integrate the encoders
    pub fn step<T: ByteTransport>(&mut self, robot: &mut Roomba<T>, now: Instant) -> Result<DriveCommand> {
        let cmd = match self.mode {
            TeleopMode::CircleCheck { .. } => DriveCommand::new(0, -CIRCLE_CHECK_SPEED),
            _ => self.watchdog.compute_actuation_at(now),
        };
        robot.drive_direct(cmd.right.into(), cmd.left.into())?;

        match robot.sample_encoders() {
            Ok(Some(sample)) => self.integrate(sample, now),
            Ok(None) => {}
            Err(e) if e.is_frame_error() => warn!("Encoder query failed: {}", e),
            Err(e) => return Err(e),
        }
        self.driven = cmd;
        Ok(cmd)
    }

    fn integrate(&mut self, sample: EncoderSample, now: Instant) {
        let (left, right) = self
            .dynamics
            .directed_ticks(sample, self.driven.left, self.driven.right);
        let elapsed = now.saturating_duration_since(self.sampled_at).as_secs_f64();
        self.sampled_at = now;
        self.dynamics.update_ticks(left, right, elapsed);

        match &mut self.mode {
            TeleopMode::Calibrating {
                left: left_total,
                right: right_total,
            } => {
                *left_total += i64::from(left);
                *right_total += i64::from(right);
            }
            TeleopMode::CircleCheck { travelled, target } => {
                *travelled += f64::from(right.unsigned_abs()) * self.dynamics.encoder_ratio();
                if *travelled >= *target {
                    let pose = self.dynamics.pose();
                    info!(
                        "Circle check done: x={:.0}mm y={:.0}mm theta={:.1}deg",
                        pose.x,
                        pose.y,
                        pose.theta.to_degrees()
                    );
                    self.mode = TeleopMode::Drive;
                }
            }
            TeleopMode::Drive => {}
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.watchdog.health()
    }
}

/// Put the robot in safe mode and drive it from the keyboard until Q
pub async fn run<T: ByteTransport>(
    robot: &mut Roomba<T>,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    robot.safe()?;

    info!("Controls: W/S=drive, A/D=spin, R/F=speed, SPACE=stop, Q=quit");
    info!("1=clean 2=spot 3=max 4=dock N=safe mode Z=reset pose K=calibrate");
    info!("Speed: {} mm/s", TELEOP_SPEEDS[0]);

    enable_raw_mode()?;
    let result = drive_loop(robot).await;
    disable_raw_mode()?;

    robot.stop()?;
    result
}

async fn drive_loop<T: ByteTransport>(
    robot: &mut Roomba<T>,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut teleop = Teleop::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut ticks: u64 = 0;

    teleop.begin(robot, Instant::now())?;

    loop {
        tick.tick().await;

        // 1. Drain pending key events
        while event::poll(Duration::ZERO)? {
            let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
                continue;
            };
            if kind == KeyEventKind::Release {
                continue;
            }
            if !teleop.handle_key(robot, code, Instant::now())? {
                return Ok(());
            }
        }

        // 2. Actuate (watchdog zeroes stale commands) and dead-reckon
        teleop.step(robot, Instant::now())?;

        ticks += 1;
        if ticks % LOOP_HZ == 0 {
            let pose = teleop.pose();
            info!(
                "Pose: x={:.0}mm y={:.0}mm theta={:.1}deg ({:?})",
                pose.x,
                pose.y,
                pose.theta.to_degrees(),
                teleop.health()
            );
        }
    }
}
