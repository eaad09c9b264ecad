//! Response classification.
//!
//! Framing is done by atat's [`AtDigester`]: it reassembles lines across
//! reads, hands `+QMT...:`-style lines to the [`Urc`] parser and stores the
//! body of the final result in the response slot. The custom parsers below
//! teach it the two finals the BG95 uses besides `OK`: the `CONNECT` prompt
//! of `AT+QFUPL`, and error lines, whose exact text is kept.

use crate::cfg::modem_cfg::{MAX_LINE_LEN, MAX_RESPONSE_LINES};
use crate::modem::error::{Error, Result};
use crate::modem::urc::{claim_line, Urc};
use atat::digest::ParseError;
use atat::{AtDigester, InternalError};
use core::fmt::Write as _;
use heapless::{String, Vec};
use log::{trace, warn};

pub type Line = String<MAX_LINE_LEN>;
pub type Lines = Vec<Line, MAX_RESPONSE_LINES>;

pub const OK: &str = "OK";
pub const CONNECT: &str = "CONNECT";
const ERRORS: [&str; 3] = ["ERROR", "+CME ERROR:", "+CMS ERROR:"];

/// A matcher for the information lines of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern<'a> {
    /// The whole line, e.g. `OK` or `CONNECT`.
    Exact(&'a str),
    /// A line starting with the text, e.g. `+CREG: `.
    Prefix(&'a str),
    /// The text anywhere in the line.
    Contains(&'a str),
}

impl Pattern<'_> {
    pub fn matches(&self, line: &str) -> bool {
        match *self {
            Pattern::Exact(text) => line == text,
            Pattern::Prefix(text) => line.starts_with(text),
            Pattern::Contains(text) => line.contains(text),
        }
    }

    /// The payload of a matched line: what follows a prefix, or the whole line.
    pub fn capture<'l>(&self, line: &'l str) -> Option<&'l str> {
        match *self {
            Pattern::Prefix(text) => line.strip_prefix(text),
            _ if self.matches(line) => Some(line),
            _ => None,
        }
    }
}

/// Outcome of one wait on the modem. Produced per call, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK` or `CONNECT` arrived; `data` holds the lines before it.
    Ok { data: Lines, line: Line },
    /// An error line arrived.
    Error { line: Line },
    /// Nothing decisive arrived within the budget.
    Timeout,
    /// A final result the driver does not classify, e.g. `NO CARRIER`.
    Unknown { line: Line },
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }

    pub fn data(&self) -> &[Line] {
        match self {
            Response::Ok { data, .. } => data,
            _ => &[],
        }
    }

    /// The line that ended the wait, if any.
    pub fn line(&self) -> Option<&str> {
        match self {
            Response::Ok { line, .. } | Response::Error { line } | Response::Unknown { line } => {
                Some(line)
            }
            Response::Timeout => None,
        }
    }

    /// Classifies what the digester stored in the response slot.
    pub(crate) fn from_digest(result: Result<&[u8], InternalError<'_>>) -> Result<Self> {
        Ok(match result {
            Ok(body) if body == CONNECT.as_bytes() => Response::Ok {
                data: Lines::new(),
                line: to_line(body),
            },
            Ok(body) => Response::Ok {
                data: split_lines(body)?,
                line: to_line(OK.as_bytes()),
            },
            Err(InternalError::Custom(line)) => Response::Error {
                line: to_line(line),
            },
            Err(other) => {
                let mut line = Line::new();
                // Truncation only shortens the report.
                let _ = write!(line, "{other:?}");
                Response::Unknown { line }
            }
        })
    }
}

/// Bounded, lossy conversion; invalid UTF-8 is skipped.
fn to_line(bytes: &[u8]) -> Line {
    let mut line = Line::new();
    'fill: for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            if line.push(c).is_err() {
                break 'fill;
            }
        }
    }
    trace!("[at] <- {line}");
    line
}

/// Cuts a response body into its non-empty lines.
///
/// A line longer than [`MAX_LINE_LEN`] fails the whole response.
pub(crate) fn split_lines(body: &[u8]) -> Result<Lines> {
    let mut lines = Lines::new();
    for raw in body.split(|&b| b == b'\n') {
        let raw = raw.trim_ascii();
        if raw.is_empty() {
            continue;
        }
        if raw.len() > MAX_LINE_LEN {
            warn!("[at] Response line longer than {MAX_LINE_LEN} bytes");
            return Err(Error::ResponseOverflow);
        }
        if lines.push(to_line(raw)).is_err() {
            warn!("[at] Response longer than {MAX_RESPONSE_LINES} lines, truncating");
            break;
        }
    }
    Ok(lines)
}

/// `CONNECT`: the upload prompt, final for the command that asked for it.
fn connect_prompt(buf: &[u8]) -> Result<(&[u8], usize), ParseError> {
    claim_line(buf, [CONNECT].into_iter())
}

/// `ERROR`, `+CME ERROR: <n>` or `+CMS ERROR: <n>`, reported verbatim.
fn modem_error(buf: &[u8]) -> Result<(&[u8], usize), ParseError> {
    claim_line(buf, ERRORS.into_iter())
}

/// The digester for the BG95's main UART.
pub fn digester() -> AtDigester<Urc> {
    AtDigester::<Urc>::new()
        .with_custom_success(connect_prompt)
        .with_custom_error(modem_error)
}
