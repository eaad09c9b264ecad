//! Payloads and topics for sensor readings.

use crate::cfg::modem_cfg::{MAX_PAYLOAD_LEN, MAX_TOPIC_LEN};
use crate::modem::error::{Error, Result};
use core::fmt::Write as _;
use heapless::String;
use log::error;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading<'a> {
    pub value: f32,
    pub unit: &'a str,
    pub description: &'a str,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

/// Serialises a reading to JSON with `'` in place of `"`, so the payload can
/// sit inside the quoted argument of `AT+QMTPUBEX`.
pub fn encode_reading(reading: &Reading<'_>) -> Result<String<MAX_PAYLOAD_LEN>> {
    let mut buf = [0u8; MAX_PAYLOAD_LEN];
    let len = serde_json_core::to_slice(reading, &mut buf).map_err(|e| {
        error!("[mqtt] Failed to serialise reading: {e:?}");
        Error::InvalidArgument("reading does not fit the payload buffer")
    })?;
    for byte in &mut buf[..len] {
        if *byte == b'"' {
            *byte = b'\'';
        }
    }
    let json = core::str::from_utf8(&buf[..len]).map_err(|_| Error::InvalidArgument("reading"))?;
    String::try_from(json).map_err(|_| Error::InvalidArgument("reading"))
}

/// `<namespace>/<device_id>/readings/<sensor_topic>`
pub fn readings_topic(
    namespace: &str,
    device_id: &str,
    sensor_topic: &str,
) -> Result<String<MAX_TOPIC_LEN>> {
    let mut topic = String::new();
    write!(topic, "{namespace}/{device_id}/readings/{sensor_topic}")
        .map_err(|_| Error::InvalidArgument("topic too long"))?;
    Ok(topic)
}

/// `<namespace>/<device_id>/device`
pub fn device_topic(namespace: &str, device_id: &str) -> Result<String<MAX_TOPIC_LEN>> {
    let mut topic = String::new();
    write!(topic, "{namespace}/{device_id}/device")
        .map_err(|_| Error::InvalidArgument("topic too long"))?;
    Ok(topic)
}
