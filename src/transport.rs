//! Serial transport for the fixed-frame sensor protocol.
//!
//! The device is a half-duplex RS-485 probe behind a USB adapter: 4800 baud,
//! 8 data bits, no parity, one stop bit. The [`Transport`] trait carries just
//! the write/read pair the poll loop needs; [`SerialTransport`] implements it
//! on the `serialport` crate and [`MockTransport`] scripts responses for
//! tests.
//!
//! All calls are blocking; the poll loop runs them on the blocking thread
//! pool, never directly on the async runtime.

use crate::error::{AppResult, HydrostatError};
use log::{debug, info};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

/// Baud rate the probe speaks. Not configurable on the device.
pub const BAUD_RATE: u32 = 4800;

/// Byte-level transport to the sensor.
pub trait Transport: Send {
    /// Write `data`, returning the number of bytes written.
    fn write(&mut self, data: &[u8]) -> AppResult<usize>;

    /// Read into `buf`, returning the number of bytes read. Zero bytes means
    /// the device hung up or the read timed out at the port level.
    fn read(&mut self, buf: &mut [u8]) -> AppResult<usize>;
}

/// Transport over a physical serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open `port_name` with the probe's fixed line settings and the given
    /// read timeout. `"auto"` selects the first enumerated port.
    pub fn open(port_name: &str, read_timeout: Duration) -> AppResult<Self> {
        if port_name.is_empty() {
            return Err(HydrostatError::Config("serial port cannot be empty".into()));
        }

        let name = if port_name == "auto" {
            let ports = serialport::available_ports().map_err(|e| {
                HydrostatError::Transport(format!(
                    "port enumeration failed ({e}); specify the port explicitly"
                ))
            })?;
            let first = ports
                .first()
                .ok_or_else(|| HydrostatError::Transport("no serial ports found".into()))?;
            info!("serial port set to auto -> choose: {}", first.port_name);
            first.port_name.clone()
        } else {
            port_name.to_string()
        };

        info!("open port: {name}");
        let port = serialport::new(&name, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(read_timeout)
            .open()
            .map_err(|e| HydrostatError::Transport(format!("open serial port '{name}': {e}")))?;

        Ok(Self { port, name })
    }

    pub fn port_name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> AppResult<usize> {
        self.port
            .write(data)
            .map_err(|e| HydrostatError::Transport(format!("write to '{}': {e}", self.name)))
    }

    fn read(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        self.port
            .read(buf)
            .map_err(|e| HydrostatError::Transport(format!("read from '{}': {e}", self.name)))
    }
}

/// Scripted transport for tests: records writes, replays queued responses.
#[derive(Default)]
pub struct MockTransport {
    responses: VecDeque<AppResult<Vec<u8>>>,
    written: Vec<Vec<u8>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response frame for the next read.
    pub fn push_response(&mut self, frame: &[u8]) {
        self.responses.push_back(Ok(frame.to_vec()));
    }

    /// Queue a transport failure for the next read.
    pub fn push_error(&mut self, message: &str) {
        self.responses
            .push_back(Err(HydrostatError::Transport(message.to_string())));
    }

    /// Every frame written so far, in order.
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> AppResult<usize> {
        debug!("mock tx: {data:02x?}");
        self.written.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        match self.responses.pop_front() {
            Some(Ok(frame)) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_replays_responses_in_order() {
        let mut transport = MockTransport::new();
        transport.push_response(&[0xaa; 8]);
        transport.push_response(&[0xbb; 8]);

        let mut buf = [0u8; 8];
        assert_eq!(transport.read(&mut buf).unwrap(), 8);
        assert_eq!(buf, [0xaa; 8]);
        assert_eq!(transport.read(&mut buf).unwrap(), 8);
        assert_eq!(buf, [0xbb; 8]);
    }

    #[test]
    fn test_mock_records_writes() {
        let mut transport = MockTransport::new();
        transport.write(&[0x01, 0x03]).unwrap();
        assert_eq!(transport.written(), &[vec![0x01, 0x03]]);
    }

    #[test]
    fn test_mock_exhausted_reads_zero() {
        let mut transport = MockTransport::new();
        let mut buf = [0u8; 8];
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_mock_injected_error_surfaces() {
        let mut transport = MockTransport::new();
        transport.push_error("wire cut");
        let mut buf = [0u8; 8];
        let err = transport.read(&mut buf).unwrap_err();
        assert!(matches!(err, HydrostatError::Transport(_)));
    }

    #[test]
    fn test_empty_port_name_is_config_error() {
        let err = SerialTransport::open("", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, HydrostatError::Config(_)));
    }
}
