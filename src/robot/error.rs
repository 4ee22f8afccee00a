// Error taxonomy for the Open Interface protocol engine

/// Errors raised while talking to the robot or decoding its telemetry
#[derive(Debug, thiserror::Error)]
pub enum OiError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for data from the robot")]
    Timeout,

    /// Frame bytes did not sum to zero. Buffered input has already been discarded.
    #[error("Checksum mismatch: frame sums to 0x{sum:02X}")]
    Checksum { sum: u8 },

    #[error("Unknown sensor id {0}")]
    UnknownSensorId(u8),

    #[error("Unknown sensor '{0}'")]
    UnknownSensorName(String),

    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("Unsupported baud rate {0}")]
    UnsupportedBaud(u32),

    #[error("Invalid song: {reason}")]
    InvalidSong { reason: String },

    #[error("Duplicate sensor {what} in registry: {key}")]
    DuplicateSensor { what: &'static str, key: String },

    #[error("Event loop task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl OiError {
    /// True for errors that only spoil the current frame; the stream can be read again
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            OiError::Checksum { .. } | OiError::UnknownSensorId(_) | OiError::MalformedFrame { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OiError>;
