use core::time::Duration;

// Modem-resident certificate file names
pub const CA_CERT_FILE: &str = "cacert.pem";
pub const DEVICE_CERT_FILE: &str = "device_cert.pem";
pub const DEVICE_KEY_FILE: &str = "device_private_key.pem";

// MQTT configuration constants
pub const MQTT_DEFAULT_PORT: u16 = 8883;
pub const DEFAULT_TLS_CONTEXT_ID: u8 = 2;
/// The BG95 hosts at most six MQTT clients, indexed 0..=5.
pub const MAX_SOCKETS: u8 = 6;
/// `AT+QMTCFG="version"` value for MQTT 3.1.1.
pub const MQTT_PROTOCOL_VERSION: u8 = 4;

// Buffer capacities
pub const MAX_LINE_LEN: usize = 256;
pub const MAX_RESPONSE_LINES: usize = 16;
pub const MAX_COMMAND_LEN: usize = 1280;
pub const MAX_FIELDS: usize = 16;
pub const MAX_CERT_LEN: usize = 4096;
pub const MAX_TOPIC_LEN: usize = 128;
pub const MAX_PAYLOAD_LEN: usize = 1024;
pub const MAX_HOSTNAME_LEN: usize = 64;
pub const MAX_CLIENT_ID_LEN: usize = 64;
/// Arguments of the longest URC, a `+QMTRECV:` line carrying a full payload.
pub const MAX_URC_ARGS_LEN: usize = MAX_PAYLOAD_LEN + MAX_TOPIC_LEN + 32;

// AT ingress
pub const INGRESS_BUF_LEN: usize = 2048;
pub const URC_CAPACITY: usize = 8;
pub const URC_SUBSCRIBERS: usize = 1;
/// URCs held back for a later wait once drained from the channel.
pub const MAX_PENDING_URCS: usize = 8;

/// Timeouts and retry budgets for every wait the driver performs.
///
/// All waits are polling loops: the budget is spent in `poll_interval`
/// steps and the watchdog is fed on every step.
#[derive(Debug, Clone)]
pub struct ModemConfig {
    pub poll_interval: Duration,
    pub command_timeout: Duration,
    /// Pause between writing a command and starting to read its response.
    pub settle_delay: Duration,
    pub comm_check_attempts: u8,
    pub comm_check_interval: Duration,
    /// Forced restart cycles allowed while booting before giving up.
    pub max_restarts: u8,
    /// Query-and-close passes spent reclaiming sockets left open by a previous boot.
    pub reclaim_passes: u8,
    pub power_down_timeout: Duration,
    pub ssl_close_timeout: Duration,
    pub open_timeout: Duration,
    pub connect_accept_timeout: Duration,
    pub connect_result_timeout: Duration,
    pub connect_retries: u8,
    pub connect_backoff: Duration,
    pub publish_timeout: Duration,
    pub subscribe_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub disconnect_status_timeout: Duration,
    pub close_timeout: Duration,
    /// Seconds the modem waits for raw bytes after `CONNECT` during `AT+QFUPL`.
    pub upload_timeout_secs: u16,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            command_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(100),
            comm_check_attempts: 3,
            comm_check_interval: Duration::from_secs(1),
            max_restarts: 5,
            reclaim_passes: 3,
            power_down_timeout: Duration::from_secs(120),
            ssl_close_timeout: Duration::from_secs(5),
            open_timeout: Duration::from_secs(60),
            connect_accept_timeout: Duration::from_secs(30),
            connect_result_timeout: Duration::from_secs(120),
            connect_retries: 3,
            connect_backoff: Duration::from_secs(3),
            publish_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(10),
            disconnect_status_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(30),
            upload_timeout_secs: 5,
        }
    }
}

/// SSL parameters pushed with `AT+QSSLCFG` for one modem SSL context.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub context_id: u8,
    /// 0 SSL3.0, 1 TLS1.0, 2 TLS1.1, 3 TLS1.2, 4 all
    pub ssl_version: u8,
    pub cipher_suite: &'static str,
    /// 0 none, 1 server auth, 2 server and client auth
    pub security_level: u8,
    pub session_reuse: bool,
    pub sni: bool,
    pub check_host: bool,
    pub ignore_local_time: bool,
    pub renegotiation: bool,
    /// DTLS version to enable, `None` keeps DTLS off.
    pub dtls_version: Option<u8>,
    pub ca_cert_file: &'static str,
    pub client_cert_file: &'static str,
    pub client_key_file: &'static str,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            context_id: DEFAULT_TLS_CONTEXT_ID,
            ssl_version: 4,
            cipher_suite: "0XFFFF",
            security_level: 2,
            session_reuse: false,
            sni: true,
            check_host: false,
            ignore_local_time: true,
            renegotiation: false,
            dtls_version: None,
            ca_cert_file: CA_CERT_FILE,
            client_cert_file: DEVICE_CERT_FILE,
            client_key_file: DEVICE_KEY_FILE,
        }
    }
}

/// Local paths the certificates are provisioned from.
#[derive(Debug, Clone, Copy)]
pub struct CertificatePaths<'a> {
    pub ca_cert: &'a str,
    pub device_cert: &'a str,
    pub device_key: &'a str,
}

pub(crate) fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
