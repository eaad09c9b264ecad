//! Scripted BG95 stand-in for host tests.
//!
//! The serial stub holds a queue of expected commands. When a complete
//! command (terminated by `\r`) is written it must equal the next expected
//! one, and that step's reply lines are queued for reading. Raw uploads are
//! matched by length. The power key and STATUS stubs share the same state,
//! so pressing the key flips what STATUS reports.
//!
//! Reads can be capped to a chunk size, and replies can be held back until
//! the driver has slept for a given time.
#![allow(dead_code)]

use buoy_cellular::{AtResources, Bg95, ModemConfig, Watchdog};
use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType as PinErrorType, InputPin, OutputPin};
use embedded_io::{ErrorType, Read, ReadReady, Write};
use rand::rngs::mock::StepRng;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub type TestModem = Bg95<'static, MockSerial, MockDelay, CountingWatchdog, PowerKey, StatusPin, StepRng>;

pub const CLIENT_ID: &str = "buoy-07";
pub const BROKER: &str = "broker.example.com";

enum Step {
    Command {
        command: String,
        reply: Vec<u8>,
        powers_off: bool,
        later: Option<(u32, Vec<u8>)>,
    },
    Raw {
        len: usize,
        reply: Vec<u8>,
    },
}

#[derive(Default)]
pub struct ModemState {
    script: VecDeque<Step>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    chunk: Option<usize>,
    /// Replies waiting for the delay clock: milliseconds left and bytes.
    scheduled: Vec<(u32, Vec<u8>)>,
    pub commands: Vec<String>,
    pub uploads: Vec<Vec<u8>>,
    pub powered: bool,
    key_high: bool,
    pub key_presses: usize,
    pub delays_ms: Vec<u32>,
    pub feeds: usize,
}

impl ModemState {
    fn process_writes(&mut self) {
        loop {
            if let Some(Step::Raw { len, .. }) = self.script.front() {
                let len = *len;
                if self.pending.len() < len {
                    return;
                }
                let data: Vec<u8> = self.pending.drain(..len).collect();
                self.uploads.push(data);
                if let Some(Step::Raw { reply, .. }) = self.script.pop_front() {
                    self.rx.extend(reply);
                }
                continue;
            }

            let Some(end) = self.pending.iter().position(|b| *b == b'\r') else {
                return;
            };
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let command = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            self.commands.push(command.clone());

            match self.script.pop_front() {
                Some(Step::Command {
                    command: expected,
                    reply,
                    powers_off,
                    later,
                }) => {
                    assert_eq!(command, expected, "modem received an unexpected command");
                    self.rx.extend(reply);
                    self.scheduled.extend(later);
                    if powers_off {
                        self.powered = false;
                    }
                }
                Some(Step::Raw { len, .. }) => {
                    panic!("expected {len} raw bytes, got command `{command}`")
                }
                None => panic!("unscripted command `{command}`"),
            }
        }
    }

    fn advance_clock(&mut self, ms: u32) {
        let mut due = Vec::new();
        self.scheduled.retain_mut(|(left, reply)| {
            *left = left.saturating_sub(ms);
            if *left == 0 {
                due.push(std::mem::take(reply));
                false
            } else {
                true
            }
        });
        for reply in due {
            self.rx.extend(reply);
        }
    }
}

fn frame(lines: &[&str]) -> Vec<u8> {
    lines
        .iter()
        .flat_map(|line| format!("\r\n{line}\r\n").into_bytes())
        .collect()
}

/// Shared handle to the simulated modem.
#[derive(Clone, Default)]
pub struct Modem(Rc<RefCell<ModemState>>);

impl Modem {
    pub fn new(powered: bool) -> Self {
        let modem = Self::default();
        modem.0.borrow_mut().powered = powered;
        modem
    }

    /// Expects `command`; replies with `lines`, each framed in `\r\n`.
    pub fn expect(&self, command: &str, lines: &[&str]) -> &Self {
        self.0.borrow_mut().script.push_back(Step::Command {
            command: command.to_owned(),
            reply: frame(lines),
            powers_off: false,
            later: None,
        });
        self
    }

    /// Like [`expect`](Self::expect), with `later` sent once the driver has
    /// slept `after_ms` more.
    pub fn expect_later(
        &self,
        command: &str,
        lines: &[&str],
        after_ms: u32,
        later: &[&str],
    ) -> &Self {
        self.0.borrow_mut().script.push_back(Step::Command {
            command: command.to_owned(),
            reply: frame(lines),
            powers_off: false,
            later: Some((after_ms.max(1), frame(later))),
        });
        self
    }

    /// Like [`expect`](Self::expect), and the modem powers down afterwards.
    pub fn expect_power_down(&self, command: &str, lines: &[&str]) -> &Self {
        self.0.borrow_mut().script.push_back(Step::Command {
            command: command.to_owned(),
            reply: frame(lines),
            powers_off: true,
            later: None,
        });
        self
    }

    /// Expects `len` raw bytes after a `CONNECT` prompt.
    pub fn expect_raw(&self, len: usize, lines: &[&str]) -> &Self {
        self.0.borrow_mut().script.push_back(Step::Raw {
            len,
            reply: frame(lines),
        });
        self
    }

    /// Caps every read at `chunk` bytes.
    pub fn with_chunk(self, chunk: usize) -> Self {
        self.0.borrow_mut().chunk = Some(chunk);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.0.borrow().commands.clone()
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.0.borrow().uploads.clone()
    }

    pub fn unplayed_steps(&self) -> usize {
        self.0.borrow().script.len()
    }

    pub fn key_presses(&self) -> usize {
        self.0.borrow().key_presses
    }

    pub fn is_powered(&self) -> bool {
        self.0.borrow().powered
    }

    pub fn delays_of(&self, ms: u32) -> usize {
        self.0.borrow().delays_ms.iter().filter(|d| **d == ms).count()
    }

    pub fn feeds(&self) -> usize {
        self.0.borrow().feeds
    }

    pub fn position_of(&self, command: &str) -> Option<usize> {
        self.0.borrow().commands.iter().position(|c| c == command)
    }

    pub fn driver(&self, config: ModemConfig) -> TestModem {
        Bg95::new(
            Box::leak(Box::new(AtResources::new())),
            MockSerial(self.clone()),
            MockDelay(self.clone()),
            CountingWatchdog(self.clone()),
            PowerKey(self.clone()),
            StatusPin(self.clone()),
            StepRng::new(0, 1),
            config,
        )
        .expect("driver")
    }
}

pub struct MockSerial(Modem);

impl ErrorType for MockSerial {
    type Error = Infallible;
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.0 .0.borrow_mut();
        let n = buf
            .len()
            .min(state.rx.len())
            .min(state.chunk.unwrap_or(usize::MAX));
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0 .0.borrow().rx.is_empty())
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.0 .0.borrow_mut();
        state.pending.extend_from_slice(buf);
        state.process_writes();
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub struct MockDelay(Modem);

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        let mut state = self.0 .0.borrow_mut();
        state.delays_ms.push(ns / 1_000_000);
        state.advance_clock(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        let mut state = self.0 .0.borrow_mut();
        state.delays_ms.push(ms);
        state.advance_clock(ms);
    }
}

pub struct CountingWatchdog(Modem);

impl Watchdog for CountingWatchdog {
    fn feed(&mut self) {
        self.0 .0.borrow_mut().feeds += 1;
    }
}

/// PWRKEY: a high pulse followed by release toggles the modem.
pub struct PowerKey(Modem);

impl PinErrorType for PowerKey {
    type Error = Infallible;
}

impl OutputPin for PowerKey {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut state = self.0 .0.borrow_mut();
        if state.key_high {
            state.powered = !state.powered;
            state.key_presses += 1;
        }
        state.key_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0 .0.borrow_mut().key_high = true;
        Ok(())
    }
}

/// STATUS: low while powered.
pub struct StatusPin(Modem);

impl PinErrorType for StatusPin {
    type Error = Infallible;
}

impl InputPin for StatusPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0 .0.borrow().powered)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0 .0.borrow().powered)
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Boot of a powered modem that answers at once. `inherited` are the
/// socket ids it still holds from a previous run.
pub fn script_boot(modem: &Modem, inherited: &[u8]) {
    modem.expect("AT", &["OK"]);
    let open: Vec<String> = inherited
        .iter()
        .map(|id| format!("+QMTOPEN: {id},\"{BROKER}\",8883"))
        .collect();
    let mut lines: Vec<&str> = open.iter().map(String::as_str).collect();
    lines.push("OK");
    modem.expect("AT+QMTOPEN?", &lines);
    if !inherited.is_empty() {
        for id in inherited {
            let close = format!("AT+QMTCLOSE={id}");
            let done = format!("+QMTCLOSE: {id},0");
            modem.expect(&close, &["OK", done.as_str()]);
        }
        modem.expect("AT+QMTOPEN?", &["OK"]);
    }
    for ctx in 0..6 {
        modem.expect(&format!("AT+QSSLCLOSE={ctx}"), &["ERROR"]);
    }
    modem.expect("ATE0", &["OK"]);
    modem.expect("AT+QCCID", &["+QCCID: 89014103211118510720", "OK"]);
}

/// Responsive, registered, attached and with PDP context 1 active.
pub fn script_comms_ready(modem: &Modem) {
    modem
        .expect("AT", &["OK"])
        .expect("AT+CREG?", &["+CREG: 0,1", "OK"])
        .expect("AT+CGATT?", &["+CGATT: 1", "OK"])
        .expect("AT+CGACT?", &["+CGACT: 1,1", "OK"]);
}

/// `AT+QSSLCFG` for the default context, every parameter accepted.
pub fn script_tls_context(modem: &Modem) {
    for command in [
        "AT+QSSLCFG=\"sslversion\",2,4",
        "AT+QSSLCFG=\"ciphersuite\",2,0XFFFF",
        "AT+QSSLCFG=\"cacert\",2,\"cacert.pem\"",
        "AT+QSSLCFG=\"clientcert\",2,\"device_cert.pem\"",
        "AT+QSSLCFG=\"clientkey\",2,\"device_private_key.pem\"",
        "AT+QSSLCFG=\"seclevel\",2,2",
        "AT+QSSLCFG=\"session\",2,0",
        "AT+QSSLCFG=\"sni\",2,1",
        "AT+QSSLCFG=\"checkhost\",2,0",
        "AT+QSSLCFG=\"ignorelocaltime\",2,1",
        "AT+QSSLCFG=\"renegotiation\",2,0",
    ] {
        modem.expect(command, &["OK"]);
    }
}

/// Socket creation on a modem with no other open socket; gets id 0.
pub fn script_create_socket(modem: &Modem) {
    modem.expect("AT+QMTOPEN?", &["OK"]);
    script_tls_context(modem);
    modem
        .expect("AT+QMTCFG=\"ssl\",0,1,2", &["OK"])
        .expect("AT+QMTCFG=\"version\",0,4", &["OK"])
        .expect("AT+QMTCFG=\"recv/mode\",0,0,1", &["OK"]);
}

pub fn script_open(modem: &Modem) {
    script_comms_ready(modem);
    modem.expect(
        &format!("AT+QMTOPEN=0,\"{BROKER}\",8883"),
        &["OK", "+QMTOPEN: 0,0"],
    );
}

pub fn open_line() -> String {
    format!("+QMTOPEN: 0,\"{BROKER}\",8883")
}

pub fn script_connect(modem: &Modem) {
    modem
        .expect("AT+QMTOPEN?", &[open_line().as_str(), "OK"])
        .expect(
            &format!("AT+QMTCONN=0,\"{CLIENT_ID}\""),
            &["OK", "+QMTCONN: 0,0,0"],
        );
}

/// A driver that has completed `init` against a clean modem.
pub fn booted(modem: &Modem) -> TestModem {
    init_logger();
    script_boot(modem, &[]);
    let mut driver = modem.driver(ModemConfig::default());
    driver.init().expect("boot");
    driver
}
