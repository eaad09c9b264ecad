//! Files in the modem's UFS storage.

use crate::modem::command::{
    command, field, parse_fields, split_fields, text_field, Awaited, UrcMatch,
};
use crate::modem::error::{Error, Result};
use crate::modem::response::{Pattern, Response, CONNECT};
use crate::modem::urc::Urc;
use crate::modem::{Bg95, Watchdog};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use heapless::{String, Vec};
use log::{error, info, warn};
use rand_core::RngCore;

pub const MAX_LISTED_FILES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String<64>,
    pub size: u32,
}

/// Checksum the modem reports after `AT+QFUPL`: XOR of the data taken as
/// big-endian 16-bit words, an odd trailing byte being the high byte.
pub fn upload_checksum(data: &[u8]) -> u16 {
    data.chunks(2).fold(0u16, |acc, pair| {
        let word = match *pair {
            [hi, lo] => u16::from_be_bytes([hi, lo]),
            [hi] => u16::from(hi) << 8,
            _ => 0,
        };
        acc ^ word
    })
}

/// Parses `+QFUPL: <size>,<checksum>`; the checksum is hex.
fn upload_result(line: &str) -> Result<(usize, u16)> {
    let fields = split_fields(line);
    let size = field(&fields, 0, "QFUPL")?;
    let checksum = fields
        .get(1)
        .and_then(|c| u16::from_str_radix(c, 16).ok())
        .ok_or(Error::Parse { what: "QFUPL" })?;
    Ok((size, checksum))
}

impl<'a, S, D, W, K, T, R> Bg95<'a, S, D, W, K, T, R>
where
    S: Read + Write + ReadReady,
    D: DelayNs,
    W: Watchdog,
    K: OutputPin,
    T: InputPin,
    R: RngCore,
{
    /// Lists files matching `pattern` (`"*"` for all).
    pub fn list_files(&mut self, pattern: &str) -> Result<Vec<FileEntry, MAX_LISTED_FILES>> {
        let cmd = command(format_args!("AT+QFLST=\"{pattern}\""))?;
        let response = self.query(&cmd, "QFLST")?;
        let mut files = Vec::new();
        for fields in parse_fields(response.data(), Pattern::Prefix("+QFLST: ")) {
            let entry = FileEntry {
                name: text_field(&fields, 0, "QFLST")?,
                size: field(&fields, 1, "QFLST")?,
            };
            if files.push(entry).is_err() {
                warn!("[file] More than {MAX_LISTED_FILES} files, listing truncated");
                break;
            }
        }
        Ok(files)
    }

    pub fn delete_file(&mut self, name: &str) -> Result<()> {
        let cmd = command(format_args!("AT+QFDEL=\"{name}\""))?;
        self.run(&cmd, "QFDEL")
    }

    /// Uploads `content` as `name`.
    ///
    /// The modem answers `CONNECT` before accepting raw bytes, then `+QFUPL:`
    /// with the stored size and checksum, then `OK`. Both are checked against
    /// what was sent.
    ///
    /// # Returns
    ///
    /// The number of bytes the modem stored.
    pub fn upload_file(&mut self, name: &str, content: &[u8]) -> Result<usize> {
        let cmd = command(format_args!(
            "AT+QFUPL=\"{name}\",{},{}",
            content.len(),
            self.config.upload_timeout_secs
        ))?;
        self.client.send(&cmd)?;

        info!("[file] Waiting for CONNECT");
        match self.client.await_terminal(self.config.command_timeout)? {
            Response::Ok { line, .. } if line == CONNECT => {}
            Response::Ok { line, .. } | Response::Error { line } | Response::Unknown { line } => {
                error!("[file] Upload of {name} refused: {line}");
                return Err(Error::Modem(line));
            }
            Response::Timeout => return Err(Error::Timeout { waiting_for: "CONNECT" }),
        }

        self.client.write_raw(content)?;

        info!("[file] Waiting for read confirmation");
        match self.client.await_terminal(self.config.command_timeout)? {
            Response::Ok { .. } => {}
            Response::Error { line } | Response::Unknown { line } => {
                return Err(Error::Modem(line))
            }
            Response::Timeout => return Err(Error::Timeout { waiting_for: "QFUPL" }),
        }
        let stored = self
            .client
            .await_urc(self.config.command_timeout, |urc| match urc {
                Urc::FileUpload { .. } => UrcMatch::Primary,
                _ => UrcMatch::Ignore,
            })?;
        let (size, checksum) = match stored {
            Awaited::Primary(Urc::FileUpload { args }) => upload_result(&args)?,
            _ => {
                warn!("[file] OK without +QFUPL:");
                return Err(Error::ProtocolMismatch { expected: "+QFUPL:" });
            }
        };

        if size != content.len() {
            return Err(Error::UploadMismatch {
                expected: content.len(),
                reported: size,
            });
        }
        let expected = upload_checksum(content);
        if checksum != expected {
            return Err(Error::ChecksumMismatch {
                expected,
                reported: checksum,
            });
        }
        info!("[file] Uploaded {name} ({size} bytes, checksum {checksum:04x})");
        Ok(size)
    }
}
