#![cfg_attr(not(test), no_std)]
//! Cellular uplink for the buoy logger: a blocking AT-command driver for the
//! Quectel BG95-M3 and the modem-hosted MQTT-over-TLS client it exposes.
//!
//! The driver is board agnostic. The UART is any `embedded-io` byte stream,
//! the power key and STATUS line are `embedded-hal` pins, and sleeps go
//! through `DelayNs`, so the whole stack runs against scripted stubs on the
//! host.

pub mod cfg;
pub mod mem;
pub mod modem;
pub mod telemetry;

pub use cfg::modem_cfg::{CertificatePaths, ModemConfig, TlsConfig};
pub use mem::certs::{CertificateSource, StaticCertificates};
pub use modem::command::AtResources;
pub use modem::error::{Error, Result};
pub use modem::mqtt::{
    ConnectOutcome, DisconnectOutcome, Endpoint, MqttSocket, OutboundMessage, PublishOutcome,
    PublishReport, ReceivedMessage, SocketState, SubscribeOutcome, SubscribeReport,
};
pub use modem::response::{Pattern, Response};
pub use modem::urc::{MqttEvent, Urc};
pub use modem::{Bg95, Lifecycle, ModemStatus, NoWatchdog, Watchdog};
pub use telemetry::{encode_reading, Reading};
