// Byte transport between the host and the robot
//
// The protocol engine only needs three things from the link: read exactly n
// bytes, write bytes, and throw away whatever input is buffered.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

use super::error::{OiError, Result};

/// Blocking duplex byte link
pub trait ByteTransport: Send {
    /// Fill `buf` completely or fail
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Write all of `bytes`
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Drop any input received but not yet read
    fn discard_buffered(&mut self) -> Result<()>;
}

/// Serial port transport (8N1, no flow control)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port; `timeout` bounds each blocking read
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()?;

        info!("Opened serial port {} at {} baud", path, baud_rate);
        Ok(Self { port })
    }

    /// Change the host side baud rate (after the robot was told to switch)
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.port.set_baud_rate(baud_rate)?;
        Ok(())
    }
}

impl ByteTransport for SerialTransport {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                OiError::Timeout
            } else {
                OiError::Io(e)
            }
        })
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn discard_buffered(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// In-memory transport for tests and dry runs
///
/// Clones share the same buffers, so a test can keep one handle to inject
/// bytes while the robot owns the other.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    discards: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes for the next reads
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().incoming.extend(bytes);
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    pub fn clear_written(&self) {
        self.lock().written.clear();
    }

    /// Bytes injected but not yet read
    pub fn pending(&self) -> usize {
        self.lock().incoming.len()
    }

    /// How many times the buffered input was discarded
    pub fn discards(&self) -> usize {
        self.lock().discards
    }
}

impl ByteTransport for MockTransport {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let wanted = buf.len();
        let mut inner = self.lock();
        if inner.incoming.len() < wanted {
            // Consume what is there, like a port that times out mid-read
            inner.incoming.clear();
            return Err(OiError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("mock transport ran dry wanting {} bytes", wanted),
            )));
        }
        for (slot, byte) in buf.iter_mut().zip(inner.incoming.drain(..wanted)) {
            *slot = byte;
        }
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.lock().written.extend_from_slice(bytes);
        Ok(())
    }

    fn discard_buffered(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.incoming.clear();
        inner.discards += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_reads_in_order() {
        let mock = MockTransport::new();
        let mut port = mock.clone();
        mock.inject(&[1, 2, 3, 4]);

        let mut buf = [0u8; 3];
        port.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(mock.pending(), 1);
    }

    #[test]
    fn test_mock_short_read_fails() {
        let mut mock = MockTransport::new();
        mock.inject(&[1]);
        let mut buf = [0u8; 2];
        assert!(matches!(mock.read_exact(&mut buf), Err(OiError::Io(_))));
    }

    #[test]
    fn test_mock_discard_and_write() {
        let mock = MockTransport::new();
        let mut port = mock.clone();
        mock.inject(&[9, 9, 9]);
        port.discard_buffered().unwrap();
        assert_eq!(mock.pending(), 0);
        assert_eq!(mock.discards(), 1);

        port.write_all(&[128, 131]).unwrap();
        assert_eq!(mock.written(), vec![128, 131]);
        mock.clear_written();
        assert!(mock.written().is_empty());
    }
}
