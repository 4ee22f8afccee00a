// Roomba Open Interface command encoding
//
// Command frame: [opcode, args...], multi-byte arguments big-endian.
// Numeric arguments outside the legal range are clamped, never rejected.

use super::error::{OiError, Result};
use super::sensors::SensorRegistry;

/// Radius sentinel meaning "drive straight"
pub const DRIVE_STRAIGHT: i32 = 0x8000;

pub const MAX_DRIVE_SPEED: i32 = 500;
pub const MAX_DRIVE_RADIUS: i32 = 2000;
pub const MAX_DRIVE_PWM: i32 = 255;
pub const MAX_BRUSH_PWM: i32 = 127;
pub const MAX_VACUUM_PWM: i32 = 127;
pub const MAX_SONG_NOTES: usize = 16;

/// Open Interface opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Start = 128,
    Baud = 129,
    Safe = 131,
    Full = 132,
    Power = 133,
    Spot = 134,
    Clean = 135,
    Max = 136,
    Drive = 137,
    Motors = 138,
    Leds = 139,
    Song = 140,
    Play = 141,
    Sensors = 142,
    SeekDock = 143,
    MotorsPwm = 144,
    DriveDirect = 145,
    DrivePwm = 146,
    Stream = 148,
    QueryList = 149,
    PauseResumeStream = 150,
    DigitLedsAscii = 164,
    Buttons = 165,
}

/// Baud rates the robot can be switched to, with their Open Interface codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baud {
    B300 = 0,
    B600 = 1,
    B1200 = 2,
    B2400 = 3,
    B4800 = 4,
    B9600 = 5,
    B14400 = 6,
    B19200 = 7,
    B28800 = 8,
    B38400 = 9,
    B57600 = 10,
    B115200 = 11,
}

impl Baud {
    pub fn rate(self) -> u32 {
        match self {
            Baud::B300 => 300,
            Baud::B600 => 600,
            Baud::B1200 => 1200,
            Baud::B2400 => 2400,
            Baud::B4800 => 4800,
            Baud::B9600 => 9600,
            Baud::B14400 => 14400,
            Baud::B19200 => 19200,
            Baud::B28800 => 28800,
            Baud::B38400 => 38400,
            Baud::B57600 => 57600,
            Baud::B115200 => 115200,
        }
    }
}

impl TryFrom<u32> for Baud {
    type Error = OiError;

    /// Unrecognized rates are a configuration error, not something to clamp
    fn try_from(rate: u32) -> Result<Self> {
        Ok(match rate {
            300 => Baud::B300,
            600 => Baud::B600,
            1200 => Baud::B1200,
            2400 => Baud::B2400,
            4800 => Baud::B4800,
            9600 => Baud::B9600,
            14400 => Baud::B14400,
            19200 => Baud::B19200,
            28800 => Baud::B28800,
            38400 => Baud::B38400,
            57600 => Baud::B57600,
            115200 => Baud::B115200,
            other => return Err(OiError::UnsupportedBaud(other)),
        })
    }
}

/// Status LEDs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedFlags {
    pub debris: bool,
    pub spot: bool,
    pub dock: bool,
    pub check_robot: bool,
}

impl LedFlags {
    pub fn bits(self) -> u8 {
        pack_bits(&[self.debris, self.spot, self.dock, self.check_robot])
    }
}

/// Cleaning motors on/off and direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorFlags {
    pub side_brush: bool,
    pub vacuum: bool,
    pub main_brush: bool,
    pub side_brush_clockwise: bool,
    pub main_brush_outward: bool,
}

impl MotorFlags {
    pub fn bits(self) -> u8 {
        pack_bits(&[
            self.side_brush,
            self.vacuum,
            self.main_brush,
            self.side_brush_clockwise,
            self.main_brush_outward,
        ])
    }
}

/// Simulated button presses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonFlags {
    pub clean: bool,
    pub spot: bool,
    pub dock: bool,
    pub minute: bool,
    pub hour: bool,
    pub day: bool,
    pub schedule: bool,
    pub clock: bool,
}

impl ButtonFlags {
    pub fn bits(self) -> u8 {
        pack_bits(&[
            self.clean,
            self.spot,
            self.dock,
            self.minute,
            self.hour,
            self.day,
            self.schedule,
            self.clock,
        ])
    }
}

/// Flag i sets bit i
fn pack_bits(flags: &[bool]) -> u8 {
    flags
        .iter()
        .enumerate()
        .filter(|&(_, &set)| set)
        .fold(0u8, |bits, (i, _)| bits | (1 << i))
}

/// An encoded command, ready to be written to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub args: Vec<u8>,
}

impl Command {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            args: Vec::new(),
        }
    }

    fn with_args(opcode: Opcode, args: Vec<u8>) -> Self {
        Self { opcode, args }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.args.len());
        bytes.push(self.opcode as u8);
        bytes.extend_from_slice(&self.args);
        bytes
    }

    pub fn start() -> Self {
        Self::new(Opcode::Start)
    }

    pub fn safe() -> Self {
        Self::new(Opcode::Safe)
    }

    pub fn full() -> Self {
        Self::new(Opcode::Full)
    }

    pub fn power() -> Self {
        Self::new(Opcode::Power)
    }

    pub fn spot() -> Self {
        Self::new(Opcode::Spot)
    }

    pub fn clean() -> Self {
        Self::new(Opcode::Clean)
    }

    pub fn max() -> Self {
        Self::new(Opcode::Max)
    }

    pub fn seek_dock() -> Self {
        Self::new(Opcode::SeekDock)
    }

    pub fn baud(baud: Baud) -> Self {
        Self::with_args(Opcode::Baud, vec![baud as u8])
    }

    /// Drive with a speed (mm/s) and turning radius (mm)
    ///
    /// `radius == DRIVE_STRAIGHT` is sent as-is (unsigned 0x8000); any other
    /// radius is clamped to ±2000.
    pub fn drive(speed: i32, radius: i32) -> Self {
        let speed = clamp_i16(speed, MAX_DRIVE_SPEED);
        let radius = if radius == DRIVE_STRAIGHT {
            (DRIVE_STRAIGHT as u16).to_be_bytes()
        } else {
            clamp_i16(radius, MAX_DRIVE_RADIUS).to_be_bytes()
        };

        let mut args = Vec::with_capacity(4);
        args.extend_from_slice(&speed.to_be_bytes());
        args.extend_from_slice(&radius);
        Self::with_args(Opcode::Drive, args)
    }

    /// Per-wheel velocity (mm/s), right wheel first
    pub fn drive_direct(right: i32, left: i32) -> Self {
        Self::with_args(Opcode::DriveDirect, pair_i16(right, left, MAX_DRIVE_SPEED))
    }

    /// Per-wheel PWM, right wheel first
    pub fn drive_pwm(right: i32, left: i32) -> Self {
        Self::with_args(Opcode::DrivePwm, pair_i16(right, left, MAX_DRIVE_PWM))
    }

    pub fn motors(flags: MotorFlags) -> Self {
        Self::with_args(Opcode::Motors, vec![flags.bits()])
    }

    /// Main and side brush PWM (signed, ±127) and vacuum PWM (0..127)
    pub fn motors_pwm(main: i32, side: i32, vacuum: i32) -> Self {
        let main = main.clamp(-MAX_BRUSH_PWM, MAX_BRUSH_PWM) as i8;
        let side = side.clamp(-MAX_BRUSH_PWM, MAX_BRUSH_PWM) as i8;
        let vacuum = vacuum.clamp(0, MAX_VACUUM_PWM) as u8;
        Self::with_args(Opcode::MotorsPwm, vec![main as u8, side as u8, vacuum])
    }

    /// Status LEDs plus the power LED color (green..red) and intensity
    pub fn leds(color: u8, intensity: u8, flags: LedFlags) -> Self {
        Self::with_args(Opcode::Leds, vec![flags.bits(), color, intensity])
    }

    /// Show up to four characters on the digit display
    pub fn display_ascii(text: &str) -> Self {
        let mut digits = [b' '; 4];
        for (slot, ch) in digits.iter_mut().zip(text.chars()) {
            let upper = ch.to_ascii_uppercase();
            *slot = if upper.is_ascii() { upper as u8 } else { b' ' };
        }
        Self::with_args(Opcode::DigitLedsAscii, digits.to_vec())
    }

    /// Store a song; notes and durations pair up one to one
    pub fn define_song(id: u8, notes: &[u8], durations: &[u8]) -> Result<Self> {
        if notes.len() != durations.len() {
            return Err(OiError::InvalidSong {
                reason: format!(
                    "{} notes but {} durations",
                    notes.len(),
                    durations.len()
                ),
            });
        }
        if notes.len() > MAX_SONG_NOTES {
            return Err(OiError::InvalidSong {
                reason: format!("{} notes, at most {} allowed", notes.len(), MAX_SONG_NOTES),
            });
        }

        let mut args = Vec::with_capacity(2 + 2 * notes.len());
        args.push(id);
        args.push(notes.len() as u8);
        for (&note, &duration) in notes.iter().zip(durations) {
            args.push(note);
            args.push(duration);
        }
        Ok(Self::with_args(Opcode::Song, args))
    }

    pub fn play_song(id: u8) -> Self {
        Self::with_args(Opcode::Play, vec![id])
    }

    pub fn buttons(flags: ButtonFlags) -> Self {
        Self::with_args(Opcode::Buttons, vec![flags.bits()])
    }

    /// Request a single sensor packet by id
    pub fn sensors(id: u8) -> Self {
        Self::with_args(Opcode::Sensors, vec![id])
    }

    /// Request a list of sensors once; bulk names are expanded
    pub fn query_list<S: AsRef<str>>(registry: &SensorRegistry, names: &[S]) -> Result<Self> {
        Ok(Self::with_args(Opcode::QueryList, id_list(registry, names)?))
    }

    /// Ask the robot to stream a list of sensors every 15 ms
    pub fn stream<S: AsRef<str>>(registry: &SensorRegistry, names: &[S]) -> Result<Self> {
        Ok(Self::with_args(Opcode::Stream, id_list(registry, names)?))
    }

    pub fn pause_stream() -> Self {
        Self::with_args(Opcode::PauseResumeStream, vec![0])
    }

    pub fn resume_stream() -> Self {
        Self::with_args(Opcode::PauseResumeStream, vec![1])
    }
}

fn clamp_i16(value: i32, limit: i32) -> i16 {
    value.clamp(-limit, limit) as i16
}

fn pair_i16(first: i32, second: i32, limit: i32) -> Vec<u8> {
    let mut args = Vec::with_capacity(4);
    args.extend_from_slice(&clamp_i16(first, limit).to_be_bytes());
    args.extend_from_slice(&clamp_i16(second, limit).to_be_bytes());
    args
}

/// [count, id...]
fn id_list<S: AsRef<str>>(registry: &SensorRegistry, names: &[S]) -> Result<Vec<u8>> {
    let sensors = registry.expand_all(names)?;
    let count = u8::try_from(sensors.len()).map_err(|_| OiError::MalformedFrame {
        reason: format!("{} sensors do not fit in one request", sensors.len()),
    })?;

    let mut args = Vec::with_capacity(1 + sensors.len());
    args.push(count);
    args.extend(sensors.iter().map(|d| d.id));
    Ok(args)
}
