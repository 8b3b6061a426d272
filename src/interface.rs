//! Serial transport to the programmer board

use std::io::{ErrorKind, Read, Write};
use std::thread::sleep;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::ConnectionError;

const BAUD_RATE: u32 = 19_200;
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const RESET_PULSE: Duration = Duration::from_millis(100);

/// Byte-stream capability consumed by the protocol engine.
///
/// [`read_data`] appends whatever is pending on the line and returns after
/// at most the transport read timeout; returning without new bytes is not an
/// error. The engine polls it until an expected byte count or reply byte
/// shows up.
///
/// [`read_data`]: Transport::read_data
pub trait Transport {
    fn open(&mut self) -> Result<(), ConnectionError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    /// Hardware reset of the attached programmer
    fn reset(&mut self) -> Result<(), ConnectionError>;
    fn write_data(&mut self, data: &[u8]) -> Result<(), ConnectionError>;
    fn read_data(&mut self, buffer: &mut Vec<u8>) -> Result<(), ConnectionError>;
}

/// [Transport] over a host serial port, configured the way the K150-family
/// boards expect it: 19200 baud, 8N1, no flow control.
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(name: &str) -> Self {
        SerialTransport {
            name: name.into(),
            port: None,
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, ConnectionError> {
        self.port.as_mut().ok_or(ConnectionError::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), ConnectionError> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(self.name.as_str(), BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(ConnectionError::OpenFailed)?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn reset(&mut self) -> Result<(), ConnectionError> {
        let port = self.port_mut()?;
        // The board restarts its firmware on a DTR pulse and greets with its
        // version banner; stale input must go away before the pulse.
        port.clear(ClearBuffer::All)?;
        port.write_data_terminal_ready(true)?;
        sleep(RESET_PULSE);
        port.write_data_terminal_ready(false)?;
        sleep(RESET_PULSE);
        Ok(())
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let port = self.port_mut()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read_data(&mut self, buffer: &mut Vec<u8>) -> Result<(), ConnectionError> {
        let port = self.port_mut()?;
        let mut chunk = [0u8; 256];
        match port.read(&mut chunk) {
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(())
            }
            Err(e) => Err(ConnectionError::Io(e)),
        }
    }
}
