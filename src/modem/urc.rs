//! Unsolicited result codes.
//!
//! The BG95 reports MQTT and file transfer outcomes as `+QMT...:` and
//! `+QFUPL:` lines tagged with the client id. The information lines of the
//! matching `?` queries and of `AT+QMTRECV` start with the same prefixes, so
//! the digester classifies those as URCs too and they are read back from the
//! subscription rather than from the response body.

use crate::cfg::modem_cfg::MAX_URC_ARGS_LEN;
use atat::digest::{ParseError, Parser};
use atat::AtatUrc;
use heapless::String;
use log::warn;

pub type UrcArgs = String<MAX_URC_ARGS_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttEvent {
    Open,
    Connect,
    Status,
    Publish,
    Subscribe,
    Unsubscribe,
    Close,
    Disconnect,
    Receive,
}

impl MqttEvent {
    const ALL: [MqttEvent; 9] = [
        MqttEvent::Open,
        MqttEvent::Connect,
        MqttEvent::Status,
        MqttEvent::Publish,
        MqttEvent::Subscribe,
        MqttEvent::Unsubscribe,
        MqttEvent::Close,
        MqttEvent::Disconnect,
        MqttEvent::Receive,
    ];

    pub const fn prefix(self) -> &'static str {
        match self {
            MqttEvent::Open => "+QMTOPEN:",
            MqttEvent::Connect => "+QMTCONN:",
            MqttEvent::Status => "+QMTSTAT:",
            MqttEvent::Publish => "+QMTPUB:",
            MqttEvent::Subscribe => "+QMTSUB:",
            MqttEvent::Unsubscribe => "+QMTUNS:",
            MqttEvent::Close => "+QMTCLOSE:",
            MqttEvent::Disconnect => "+QMTDISC:",
            MqttEvent::Receive => "+QMTRECV:",
        }
    }
}

const FILE_UPLOAD: &str = "+QFUPL:";
const POWERED_DOWN: &str = "POWERED DOWN";

fn prefixes() -> impl Iterator<Item = &'static str> + Clone {
    MqttEvent::ALL
        .into_iter()
        .map(MqttEvent::prefix)
        .chain([FILE_UPLOAD, POWERED_DOWN])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Urc {
    /// `+QMT<event>: <client>,<args>`
    Mqtt {
        event: MqttEvent,
        client: u8,
        args: UrcArgs,
    },
    /// A `+QMT...:` line whose arguments do not fit [`UrcArgs`].
    Oversized { event: MqttEvent, client: u8 },
    /// `+QFUPL: <size>,<checksum>`
    FileUpload { args: String<32> },
    PoweredDown,
}

impl Urc {
    /// Whether this line is `event` for client `client`, oversized or not.
    pub fn is(&self, event: MqttEvent, client: u8) -> bool {
        match *self {
            Urc::Mqtt {
                event: e,
                client: c,
                ..
            }
            | Urc::Oversized {
                event: e,
                client: c,
            } => e == event && c == client,
            _ => false,
        }
    }

    /// The client id of an `event` line.
    pub fn client_of(&self, event: MqttEvent) -> Option<u8> {
        match *self {
            Urc::Mqtt {
                event: e, client, ..
            }
            | Urc::Oversized { event: e, client } if e == event => Some(client),
            _ => None,
        }
    }

    /// What follows the client id, if it was kept.
    pub fn args(&self) -> Option<&str> {
        match self {
            Urc::Mqtt { args, .. } => Some(args),
            _ => None,
        }
    }

    fn from_line(line: &str) -> Option<Self> {
        if line.starts_with(POWERED_DOWN) {
            return Some(Urc::PoweredDown);
        }
        if let Some(args) = line.strip_prefix(FILE_UPLOAD) {
            return String::try_from(args.trim())
                .ok()
                .map(|args| Urc::FileUpload { args });
        }

        let (event, rest) = MqttEvent::ALL
            .into_iter()
            .find_map(|event| line.strip_prefix(event.prefix()).map(|rest| (event, rest)))?;
        let (client, args) = rest.trim_start().split_once(',').unwrap_or((rest.trim(), ""));
        let client = client.trim().parse().ok()?;
        Some(match UrcArgs::try_from(args) {
            Ok(args) => Urc::Mqtt {
                event,
                client,
                args,
            },
            Err(_) => {
                warn!(
                    "[at] {} for client {client} longer than {MAX_URC_ARGS_LEN} bytes",
                    event.prefix()
                );
                Urc::Oversized { event, client }
            }
        })
    }
}

fn skip_whitespace(buf: &[u8]) -> &[u8] {
    let start = buf
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(buf.len());
    &buf[start..]
}

/// Locates the first complete line in `buf`, skipping leading whitespace.
///
/// Returns the line without its terminator and the number of bytes it
/// spans, terminator included.
pub(crate) fn complete_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let start = buf.len() - skip_whitespace(buf).len();
    let end = start + buf[start..].iter().position(|&b| b == b'\n')?;
    let mut line = &buf[start..end];
    while let [rest @ .., b'\r' | b' '] = line {
        line = rest;
    }
    Some((line, end + 1))
}

/// Claims a line starting with one of `texts`. A buffer that could still
/// grow into such a line is incomplete.
pub(crate) fn claim_line<I>(buf: &[u8], texts: I) -> Result<(&[u8], usize), ParseError>
where
    I: Iterator<Item = &'static str> + Clone,
{
    let head = skip_whitespace(buf);
    if texts.clone().any(|text| head.starts_with(text.as_bytes())) {
        return complete_line(buf).ok_or(ParseError::Incomplete);
    }
    if head.is_empty() || texts.into_iter().any(|text| text.as_bytes().starts_with(head)) {
        Err(ParseError::Incomplete)
    } else {
        Err(ParseError::NoMatch)
    }
}

impl Parser for Urc {
    fn parse(buf: &[u8]) -> Result<(&[u8], usize), ParseError> {
        claim_line(buf, prefixes())
    }
}

impl AtatUrc for Urc {
    type Response = Urc;

    fn parse(resp: &[u8]) -> Option<Self::Response> {
        match core::str::from_utf8(resp) {
            Ok(line) => Urc::from_line(line.trim()),
            Err(_) => {
                warn!("[at] Dropping non-UTF-8 URC");
                None
            }
        }
    }
}
