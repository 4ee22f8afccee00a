// High-level Roomba driver
//
// Owns the byte transport and pairs the command encoder with the stream
// decoder. One driver per physical link; calls are blocking and must come from
// a single thread at a time.

use std::thread::sleep;
use tracing::{debug, info, warn};

use super::commands::{Baud, ButtonFlags, Command, LedFlags, MotorFlags};
use super::decoder::{StreamDecoder, response_len};
use super::dynamics::EncoderSample;
use super::error::Result;
use super::sensors::{ENCODERS, SensorFrame, SensorRegistry};
use super::transport::{ByteTransport, SerialTransport};
use crate::config::{MODE_SWITCH_DELAY, READ_TIMEOUT, STREAM_PERIOD};

/// A Roomba on the other end of a byte transport
pub struct Roomba<T: ByteTransport> {
    transport: T,
    registry: &'static SensorRegistry,
}

impl Roomba<SerialTransport> {
    /// Open the robot's serial port
    pub fn open(port: &str, baud: Baud) -> Result<Self> {
        info!("Opening Roomba on {}", port);
        let transport = SerialTransport::open(port, baud.rate(), READ_TIMEOUT)?;
        Ok(Self::new(transport))
    }

    /// Switch both the robot and the host port to a new baud rate
    pub fn change_baud(&mut self, baud: Baud) -> Result<()> {
        self.send(&Command::baud(baud))?;
        // the robot needs a moment before it listens at the new rate
        sleep(MODE_SWITCH_DELAY);
        self.transport.set_baud_rate(baud.rate())?;
        info!("Switched to {} baud", baud.rate());
        Ok(())
    }
}

impl<T: ByteTransport> Roomba<T> {
    pub fn new(transport: T) -> Self {
        Self::with_registry(transport, SensorRegistry::standard())
    }

    pub fn with_registry(transport: T, registry: &'static SensorRegistry) -> Self {
        Self {
            transport,
            registry,
        }
    }

    pub fn registry(&self) -> &'static SensorRegistry {
        self.registry
    }

    /// Write an encoded command
    pub fn send(&mut self, command: &Command) -> Result<()> {
        debug!("Sending {:?} {:?}", command.opcode, command.args);
        self.transport.write_all(&command.to_bytes())
    }

    fn send_mode(&mut self, command: Command) -> Result<()> {
        self.send(&command)?;
        sleep(MODE_SWITCH_DELAY);
        Ok(())
    }

    // === Modes ===

    /// Start the Open Interface (passive mode)
    pub fn start(&mut self) -> Result<()> {
        self.send_mode(Command::start())
    }

    /// Full control with cliff and wheel-drop safety left on
    pub fn safe(&mut self) -> Result<()> {
        self.send_mode(Command::safe())
    }

    /// Full control with every safety feature off
    pub fn full(&mut self) -> Result<()> {
        self.send_mode(Command::full())
    }

    /// Power the robot off (it drops back to passive mode first)
    pub fn power_down(&mut self) -> Result<()> {
        self.send(&Command::power())
    }

    // === Cleaning ===

    pub fn clean(&mut self) -> Result<()> {
        self.send(&Command::clean())
    }

    pub fn max(&mut self) -> Result<()> {
        self.send(&Command::max())
    }

    pub fn spot(&mut self) -> Result<()> {
        self.send(&Command::spot())
    }

    pub fn dock(&mut self) -> Result<()> {
        self.send(&Command::seek_dock())
    }

    // === Actuators ===

    pub fn drive(&mut self, speed: i32, radius: i32) -> Result<()> {
        self.send(&Command::drive(speed, radius))
    }

    pub fn drive_direct(&mut self, right: i32, left: i32) -> Result<()> {
        self.send(&Command::drive_direct(right, left))
    }

    pub fn drive_pwm(&mut self, right: i32, left: i32) -> Result<()> {
        self.send(&Command::drive_pwm(right, left))
    }

    pub fn stop(&mut self) -> Result<()> {
        info!("Stopping drive wheels");
        self.drive_direct(0, 0)
    }

    pub fn motors(&mut self, flags: MotorFlags) -> Result<()> {
        self.send(&Command::motors(flags))
    }

    pub fn motors_pwm(&mut self, main: i32, side: i32, vacuum: i32) -> Result<()> {
        self.send(&Command::motors_pwm(main, side, vacuum))
    }

    pub fn leds(&mut self, color: u8, intensity: u8, flags: LedFlags) -> Result<()> {
        self.send(&Command::leds(color, intensity, flags))
    }

    pub fn display_ascii(&mut self, text: &str) -> Result<()> {
        self.send(&Command::display_ascii(text))
    }

    pub fn define_song(&mut self, id: u8, notes: &[u8], durations: &[u8]) -> Result<()> {
        self.send(&Command::define_song(id, notes, durations)?)
    }

    pub fn play_song(&mut self, id: u8) -> Result<()> {
        self.send(&Command::play_song(id))
    }

    pub fn buttons(&mut self, flags: ButtonFlags) -> Result<()> {
        self.send(&Command::buttons(flags))
    }

    // === Sensors ===

    /// Blocking one-shot query of the named sensors (bulk names expand)
    pub fn query_list<S: AsRef<str>>(&mut self, names: &[S]) -> Result<SensorFrame> {
        let registry = self.registry;
        let sensors = registry.expand_all(names)?;
        self.send(&Command::query_list(registry, names)?)?;

        let mut response = vec![0u8; response_len(&sensors)];
        self.transport.read_exact(&mut response)?;
        StreamDecoder::new(registry).parse_query_response(&sensors, &response)
    }

    /// Query both wheel encoders
    pub fn sample_encoders(&mut self) -> Result<Option<EncoderSample>> {
        let frame = self.query_list(&[ENCODERS.name])?;
        Ok(EncoderSample::from_frame(&frame))
    }

    /// Ask the robot to stream these sensors every 15 ms
    pub fn stream_samples<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        info!("Streaming {} sensor groups every {:?}", names.len(), STREAM_PERIOD);
        self.send(&Command::stream(self.registry, names)?)
    }

    pub fn pause_stream(&mut self) -> Result<()> {
        self.send(&Command::pause_stream())
    }

    pub fn resume_stream(&mut self) -> Result<()> {
        self.send(&Command::resume_stream())
    }

    /// Read the next streamed frame
    pub fn poll(&mut self) -> Result<SensorFrame> {
        StreamDecoder::new(self.registry).decode(&mut self.transport)
    }
}

impl<T: ByteTransport> Drop for Roomba<T> {
    fn drop(&mut self) {
        // Leave the wheels stopped when the link goes away
        if let Err(e) = self.stop() {
            warn!("Failed to stop robot on drop: {}", e);
        }
    }
}
