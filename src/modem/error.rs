use crate::modem::response::Line;
use heapless::String;

/// Error types for BG95 modem operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The UART failed underneath the driver.
    #[error("serial transport error: {0:?}")]
    Transport(embedded_io::ErrorKind),
    /// Driving the power key or sampling the STATUS line failed.
    #[error("power pin error: {0:?}")]
    Pin(embedded_hal::digital::ErrorKind),
    /// Nothing terminal or expected arrived within the budget. Retryable.
    #[error("timed out waiting for {waiting_for}")]
    Timeout { waiting_for: &'static str },
    /// The modem answered with `ERROR`, `+CME ERROR:` or `+CMS ERROR:`.
    #[error("modem reported `{0}`")]
    Modem(Line),
    /// The command was accepted but its unsolicited confirmation never came.
    #[error("command accepted but no `{expected}` confirmation followed")]
    ProtocolMismatch { expected: &'static str },
    /// A line from the modem did not fit the receive buffers and was discarded.
    #[error("modem response exceeds the receive buffer")]
    ResponseOverflow,
    /// All six MQTT client slots are in use on the modem.
    #[error("no free MQTT socket id")]
    CapacityExhausted,
    /// A precondition of the operation does not hold.
    #[error("not ready: {0}")]
    NotReady(&'static str),
    #[error("malformed {what} response")]
    Parse { what: &'static str },
    #[error("command exceeds the command buffer")]
    CommandTooLong,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The modem carried the operation out and reported a failure code.
    #[error("{operation} rejected with result code {code}")]
    Rejected { operation: &'static str, code: i8 },
    #[error("failed to set SSL parameter {name} to {value}")]
    TlsParameter {
        name: &'static str,
        value: String<32>,
    },
    #[error("upload size mismatch: sent {expected} bytes, modem stored {reported}")]
    UploadMismatch { expected: usize, reported: usize },
    #[error("upload checksum mismatch: computed {expected:04x}, modem reported {reported:04x}")]
    ChecksumMismatch { expected: u16, reported: u16 },
    #[error("local certificate for {file} could not be read")]
    CertificateUnavailable { file: &'static str },
    #[error("modem still unresponsive after {restarts} forced restarts")]
    RestartsExhausted { restarts: u8 },
}

impl Error {
    pub(crate) fn transport<E: embedded_io::Error>(e: E) -> Self {
        Error::Transport(e.kind())
    }

    pub(crate) fn pin<E: embedded_hal::digital::Error>(e: E) -> Self {
        Error::Pin(e.kind())
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
