use crate::modem::error::{Error, Result};
use embedded_io::{Read, ReadReady, Write};
use log::{debug, trace};

pub(crate) const READ_CHUNK: usize = 64;

/// Byte-level view of the modem UART.
///
/// Writes are blocking, reads never block: only bytes the UART reports as
/// ready are read.
pub struct SerialTransport<S> {
    serial: S,
}

impl<S> SerialTransport<S>
where
    S: Read + Write + ReadReady,
{
    pub fn new(serial: S) -> Self {
        Self { serial }
    }

    /// Writes `command` followed by the `\r` terminator.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        debug!("[at] -> {command}");
        self.serial
            .write_all(command.as_bytes())
            .map_err(Error::transport)?;
        self.serial.write_all(b"\r").map_err(Error::transport)?;
        self.serial.flush().map_err(Error::transport)
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("[at] -> {} raw bytes", bytes.len());
        self.serial.write_all(bytes).map_err(Error::transport)?;
        self.serial.flush().map_err(Error::transport)
    }

    /// Reads what the UART has ready into `buf`, without blocking.
    pub fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || !self.serial.read_ready().map_err(Error::transport)? {
            return Ok(0);
        }
        self.serial.read(buf).map_err(Error::transport)
    }

    /// Discards whatever is waiting in the UART receive buffer.
    ///
    /// A URC that arrives late for the previous command is lost here.
    pub fn reset_input(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut discarded = 0;
        while self.serial.read_ready().map_err(Error::transport)? {
            let n = self.serial.read(&mut chunk).map_err(Error::transport)?;
            if n == 0 {
                break;
            }
            discarded += n;
        }
        if discarded > 0 {
            debug!("[at] Discarded {discarded} stale bytes");
        }
        Ok(discarded)
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.serial
    }
}
