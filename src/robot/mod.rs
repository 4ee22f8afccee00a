// Roomba Open Interface protocol engine
//
// Provides:
// - Sensor registry (ids, wire formats, names, bulk groups)
// - Command encoding for every OI opcode
// - Streaming frame decoder with checksum validation and resync
// - Wheel-encoder dead reckoning
// - Byte transports (serial port, in-memory mock)
// - High-level robot driver

pub mod commands;
pub mod decoder;
mod driver;
pub mod dynamics;
mod error;
pub mod sensors;
pub mod transport;

pub use commands::{Baud, ButtonFlags, Command, LedFlags, MotorFlags, Opcode};
pub use decoder::{MAGIC, StreamDecoder, encode_frame};
pub use driver::Roomba;
pub use dynamics::{DynamicsModel, ENCODER_RATIO, EncoderSample, Pose, WHEEL_TRACK_RADIUS};
pub use error::{OiError, Result};
pub use sensors::{SensorFrame, SensorRegistry, SensorValue, WireFormat};
pub use transport::{ByteTransport, MockTransport, SerialTransport};
