//! Registration, packet data, identity and GNSS queries.
//!
//! Each record type parses itself from the field list of its response line,
//! so the parsing is testable without a serial port.

use crate::modem::command::{command, field, first_fields, parse_fields, text_field, Fields};
use crate::modem::error::{Error, Result};
use crate::modem::response::{Line, Pattern, Response};
use crate::modem::{Bg95, Watchdog};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use heapless::{String, Vec};
use log::{info, warn};
use rand_core::RngCore;

// Network registration status
pub const REGISTERED_HOME: u8 = 1;
pub const REGISTERED_ROAMING: u8 = 5;

pub const MAX_PDP_CONTEXTS: usize = 8;
const NO_FIX: &str = "+CME ERROR: 516";

pub type Identity = String<24>;

/// `+CREG: <n>,<stat>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub mode: u8,
    pub stat: u8,
}

impl RegistrationStatus {
    pub fn parse(fields: &[&str]) -> Result<Self> {
        Ok(Self {
            mode: field(fields, 0, "CREG")?,
            stat: field(fields, 1, "CREG")?,
        })
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.stat, REGISTERED_HOME | REGISTERED_ROAMING)
    }
}

/// One `+CGDCONT:` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdpContext {
    pub cid: u8,
    pub pdp_type: String<16>,
    pub apn: String<64>,
    pub address: String<64>,
}

impl PdpContext {
    pub fn parse(fields: &[&str]) -> Result<Self> {
        Ok(Self {
            cid: field(fields, 0, "CGDCONT")?,
            pdp_type: text_field(fields, 1, "CGDCONT")?,
            apn: text_field(fields, 2, "CGDCONT")?,
            address: text_field(fields, 3, "CGDCONT").unwrap_or_default(),
        })
    }
}

/// One `+CGACT:` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdpContextState {
    pub cid: u8,
    pub active: bool,
}

impl PdpContextState {
    pub fn parse(fields: &[&str]) -> Result<Self> {
        Ok(Self {
            cid: field(fields, 0, "CGACT")?,
            active: field::<u8>(fields, 1, "CGACT")? == 1,
        })
    }
}

/// `+CSQ: <rssi>,<ber>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    pub rssi: u8,
    pub ber: u8,
}

impl SignalQuality {
    pub fn parse(fields: &[&str]) -> Result<Self> {
        Ok(Self {
            rssi: field(fields, 0, "CSQ")?,
            ber: field(fields, 1, "CSQ")?,
        })
    }

    /// Received signal strength in dBm, `None` when the modem reports 99
    /// (not known or not detectable).
    pub fn rssi_dbm(&self) -> Option<i16> {
        match self.rssi {
            0..=31 => Some(-113 + 2 * i16::from(self.rssi)),
            _ => None,
        }
    }
}

/// `+QNWINFO: <act>,<oper>,<band>,<channel>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub access_technology: String<16>,
    pub operator: String<16>,
    pub band: String<32>,
    pub channel: u32,
}

impl NetworkInfo {
    pub fn parse(fields: &[&str]) -> Result<Self> {
        Ok(Self {
            access_technology: text_field(fields, 0, "QNWINFO")?,
            operator: text_field(fields, 1, "QNWINFO")?,
            band: text_field(fields, 2, "QNWINFO")?,
            channel: field(fields, 3, "QNWINFO")?,
        })
    }
}

/// `+COPS: <mode>[,<format>,<oper>,<act>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorStatus {
    pub mode: u8,
    pub format: Option<u8>,
    pub operator: Option<String<32>>,
    pub access_technology: Option<u8>,
}

impl OperatorStatus {
    pub fn parse(fields: &[&str]) -> Result<Self> {
        let mode = field(fields, 0, "COPS")?;
        if fields.len() < 4 {
            return Ok(Self {
                mode,
                format: None,
                operator: None,
                access_technology: None,
            });
        }
        Ok(Self {
            mode,
            format: Some(field(fields, 1, "COPS")?),
            operator: Some(text_field(fields, 2, "COPS")?),
            access_technology: Some(field(fields, 3, "COPS")?),
        })
    }
}

/// `+CGPADDR: <cid>,<address>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdpAddress {
    pub cid: u8,
    pub address: String<64>,
}

impl PdpAddress {
    pub fn parse(fields: &[&str]) -> Result<Self> {
        Ok(Self {
            cid: field(fields, 0, "CGPADDR")?,
            address: text_field(fields, 1, "CGPADDR")?,
        })
    }
}

/// A position fix from `+QGPSLOC:`. Coordinates are kept in the modem's
/// `ddmm.mmmmN` / `dddmm.mmmmE` notation.
#[derive(Debug, Clone, PartialEq)]
pub struct GnssFix {
    pub utc: String<16>,
    pub latitude: String<16>,
    pub longitude: String<16>,
    pub hdop: f32,
    pub altitude: f32,
    /// 2 = 2D, 3 = 3D
    pub fix: u8,
    pub course: String<16>,
    pub speed_kmh: f32,
    pub speed_knots: f32,
    /// `ddmmyy`
    pub date: String<8>,
    pub satellites: u8,
}

impl GnssFix {
    pub fn parse(fields: &[&str]) -> Result<Self> {
        Ok(Self {
            utc: text_field(fields, 0, "QGPSLOC")?,
            latitude: text_field(fields, 1, "QGPSLOC")?,
            longitude: text_field(fields, 2, "QGPSLOC")?,
            hdop: field(fields, 3, "QGPSLOC")?,
            altitude: field(fields, 4, "QGPSLOC")?,
            fix: field(fields, 5, "QGPSLOC")?,
            course: text_field(fields, 6, "QGPSLOC")?,
            speed_kmh: field(fields, 7, "QGPSLOC")?,
            speed_knots: field(fields, 8, "QGPSLOC")?,
            date: text_field(fields, 9, "QGPSLOC")?,
            satellites: field(fields, 10, "QGPSLOC")?,
        })
    }
}

fn single<'a>(lines: &'a [Line], prefix: &'a str, what: &'static str) -> Result<Fields<'a>> {
    first_fields(lines, Pattern::Prefix(prefix)).ok_or(Error::Parse { what })
}

/// First data line without a `+` prefix, as returned by `AT+GSN` and `AT+CIMI`.
fn bare_value(lines: &[Line], what: &'static str) -> Result<Identity> {
    lines
        .iter()
        .map(|line| line.trim())
        .find(|line| !line.is_empty() && !line.starts_with('+') && !line.starts_with("AT"))
        .and_then(|line| Identity::try_from(line).ok())
        .ok_or(Error::Parse { what })
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
    /// Turns command echo on or off (`ATE1` / `ATE0`).
    pub fn set_echo(&mut self, enabled: bool) -> Result<()> {
        self.run(if enabled { "ATE1" } else { "ATE0" }, "ATE")
    }

    /// Configures URC reporting, e.g. `set_urc_indication("all", false, true)`.
    pub fn set_urc_indication(&mut self, urc_type: &str, enable: bool, save: bool) -> Result<()> {
        let cmd = command(format_args!(
            "AT+QINDCFG=\"{urc_type}\",{},{}",
            u8::from(enable),
            u8::from(save)
        ))?;
        self.run(&cmd, "QINDCFG")
    }

    pub fn imei(&mut self) -> Result<Identity> {
        let response = self.query("AT+GSN", "GSN")?;
        bare_value(response.data(), "GSN")
    }

    pub fn imsi(&mut self) -> Result<Identity> {
        let response = self.query("AT+CIMI", "CIMI")?;
        bare_value(response.data(), "CIMI")
    }

    pub fn iccid(&mut self) -> Result<Identity> {
        let response = self.query("AT+QCCID", "QCCID")?;
        let fields = single(response.data(), "+QCCID: ", "QCCID")?;
        text_field(&fields, 0, "QCCID")
    }

    pub fn registration_status(&mut self) -> Result<RegistrationStatus> {
        let response = self.query("AT+CREG?", "CREG")?;
        let fields = single(response.data(), "+CREG: ", "CREG")?;
        let status = RegistrationStatus::parse(&fields)?;
        Ok(status)
    }

    pub fn operator_status(&mut self) -> Result<OperatorStatus> {
        let response = self.query("AT+COPS?", "COPS")?;
        let fields = single(response.data(), "+COPS: ", "COPS")?;
        let status = OperatorStatus::parse(&fields)?;
        Ok(status)
    }

    pub fn signal_quality(&mut self) -> Result<SignalQuality> {
        let response = self.query("AT+CSQ", "CSQ")?;
        let fields = single(response.data(), "+CSQ: ", "CSQ")?;
        let quality = SignalQuality::parse(&fields)?;
        Ok(quality)
    }

    pub fn network_info(&mut self) -> Result<NetworkInfo> {
        let response = self.query("AT+QNWINFO", "QNWINFO")?;
        let fields = single(response.data(), "+QNWINFO: ", "QNWINFO")?;
        let info = NetworkInfo::parse(&fields)?;
        Ok(info)
    }

    /// Network time as reported, e.g. `2024/03/01,12:00:00+04,0`.
    ///
    /// The value holds commas inside its quotes, so it is returned unsplit.
    pub fn network_time(&mut self) -> Result<String<40>> {
        let response = self.query("AT+QLTS", "QLTS")?;
        response
            .data()
            .iter()
            .find_map(|line| Pattern::Prefix("+QLTS: ").capture(line))
            .and_then(|time| String::try_from(time.trim().trim_matches('"')).ok())
            .ok_or(Error::Parse { what: "QLTS" })
    }

    pub fn packet_service_attached(&mut self) -> Result<bool> {
        let response = self.query("AT+CGATT?", "CGATT")?;
        let fields = single(response.data(), "+CGATT: ", "CGATT")?;
        Ok(field::<u8>(&fields, 0, "CGATT")? == 1)
    }

    pub fn set_packet_service(&mut self, attached: bool) -> Result<()> {
        let cmd = command(format_args!("AT+CGATT={}", u8::from(attached)))?;
        self.run(&cmd, "CGATT")
    }

    pub fn pdp_contexts(&mut self) -> Result<Vec<PdpContext, MAX_PDP_CONTEXTS>> {
        let response = self.query("AT+CGDCONT?", "CGDCONT")?;
        let mut contexts = Vec::new();
        for fields in parse_fields(response.data(), Pattern::Prefix("+CGDCONT: ")) {
            if contexts.push(PdpContext::parse(&fields)?).is_err() {
                break;
            }
        }
        Ok(contexts)
    }

    /// Defines PDP context `cid`, e.g. `set_pdp_context(1, "IPV4V6", "super")`.
    pub fn set_pdp_context(&mut self, cid: u8, pdp_type: &str, apn: &str) -> Result<()> {
        let cmd = command(format_args!("AT+CGDCONT={cid},\"{pdp_type}\",\"{apn}\""))?;
        self.run(&cmd, "CGDCONT")
    }

    pub fn pdp_status(&mut self) -> Result<Vec<PdpContextState, MAX_PDP_CONTEXTS>> {
        let response = self.query("AT+CGACT?", "CGACT")?;
        let mut states = Vec::new();
        for fields in parse_fields(response.data(), Pattern::Prefix("+CGACT: ")) {
            if states.push(PdpContextState::parse(&fields)?).is_err() {
                break;
            }
        }
        Ok(states)
    }

    pub fn set_pdp_status(&mut self, cid: u8, active: bool) -> Result<()> {
        let cmd = command(format_args!("AT+CGACT={},{cid}", u8::from(active)))?;
        self.run(&cmd, "CGACT")
    }

    pub fn pdp_address(&mut self, cid: u8) -> Result<PdpAddress> {
        let cmd = command(format_args!("AT+CGPADDR={cid}"))?;
        let response = self.query(&cmd, "CGPADDR")?;
        let fields = single(response.data(), "+CGPADDR: ", "CGPADDR")?;
        let address = PdpAddress::parse(&fields)?;
        Ok(address)
    }

    pub fn gnss_enabled(&mut self) -> Result<bool> {
        let response = self.query("AT+QGPS?", "QGPS")?;
        let fields = single(response.data(), "+QGPS: ", "QGPS")?;
        Ok(field::<u8>(&fields, 0, "QGPS")? != 0)
    }

    pub fn set_gnss(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.run("AT+QGPS=1", "QGPS")
        } else {
            self.run("AT+QGPSEND", "QGPSEND")
        }
    }

    /// Current GNSS fix, `None` while the receiver has no fix yet.
    pub fn position(&mut self) -> Result<Option<GnssFix>> {
        match self
            .client
            .send_and_await("AT+QGPSLOC?", self.config.command_timeout)?
        {
            Response::Ok { data, .. } => {
                let fields = single(&data, "+QGPSLOC: ", "QGPSLOC")?;
                let fix = GnssFix::parse(&fields)?;
                Ok(Some(fix))
            }
            Response::Error { line } if line == NO_FIX => {
                info!("[modem] No GNSS fix yet");
                Ok(None)
            }
            Response::Error { line } | Response::Unknown { line } => Err(Error::Modem(line)),
            Response::Timeout => Err(Error::Timeout {
                waiting_for: "QGPSLOC",
            }),
        }
    }

    pub fn is_registered_to_network(&mut self) -> bool {
        match self.registration_status() {
            Ok(status) => status.is_registered(),
            Err(e) => {
                warn!("[modem] Registration query failed: {e}");
                false
            }
        }
    }

    /// Packet domain service attached.
    pub fn is_pds_connected(&mut self) -> bool {
        self.packet_service_attached().unwrap_or_else(|e| {
            warn!("[modem] Packet service query failed: {e}");
            false
        })
    }

    /// At least one PDP context active.
    pub fn is_pdp_connected(&mut self) -> bool {
        match self.pdp_status() {
            Ok(states) => states.iter().any(|s| s.active),
            Err(e) => {
                warn!("[modem] PDP status query failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::command::split_fields;

    #[test]
    fn registration_accepts_home_and_roaming() {
        assert!(RegistrationStatus::parse(&split_fields("0,1")).unwrap().is_registered());
        assert!(RegistrationStatus::parse(&split_fields("0,5")).unwrap().is_registered());
        assert!(!RegistrationStatus::parse(&split_fields("0,2")).unwrap().is_registered());
        assert_eq!(
            RegistrationStatus::parse(&split_fields("0")),
            Err(Error::Parse { what: "CREG" })
        );
    }

    #[test]
    fn signal_quality_in_dbm() {
        let csq = SignalQuality::parse(&split_fields("20,99")).unwrap();
        assert_eq!(csq.rssi_dbm(), Some(-73));
        let unknown = SignalQuality::parse(&split_fields("99,99")).unwrap();
        assert_eq!(unknown.rssi_dbm(), None);
    }

    #[test]
    fn pdp_context_fields() {
        let ctx = PdpContext::parse(&split_fields("1,\"IP\",\"super\",\"0.0.0.0\",0,0,0")).unwrap();
        assert_eq!(ctx.cid, 1);
        assert_eq!(ctx.pdp_type, "IP");
        assert_eq!(ctx.apn, "super");
        assert_eq!(ctx.address, "0.0.0.0");
    }

    #[test]
    fn operator_status_with_and_without_operator() {
        let full = OperatorStatus::parse(&split_fields("0,0,\"AT&T\",8")).unwrap();
        assert_eq!(full.operator.as_deref(), Some("AT&T"));
        assert_eq!(full.access_technology, Some(8));

        let bare = OperatorStatus::parse(&split_fields("2")).unwrap();
        assert_eq!(bare.mode, 2);
        assert_eq!(bare.operator, None);
    }

    #[test]
    fn gnss_fix_fields() {
        let fix = GnssFix::parse(&split_fields(
            "061951.000,3150.7223N,11711.9293E,0.7,62.2,2,0.00,0.0,0.0,110513,09",
        ))
        .unwrap();
        assert_eq!(fix.latitude, "3150.7223N");
        assert_eq!(fix.fix, 2);
        assert_eq!(fix.date, "110513");
        assert_eq!(fix.satellites, 9);
    }

    #[test]
    fn network_info_fields() {
        let info = NetworkInfo::parse(&split_fields("\"eMTC\",\"310410\",\"LTE BAND 12\",5110")).unwrap();
        assert_eq!(info.band, "LTE BAND 12");
        assert_eq!(info.channel, 5110);
    }

    #[test]
    fn bare_identity_lines() {
        let lines: heapless::Vec<Line, 2> = ["", "866349041234567"]
            .iter()
            .map(|l| Line::try_from(*l).unwrap())
            .collect();
        assert_eq!(bare_value(&lines, "GSN").unwrap(), "866349041234567");
    }
}
