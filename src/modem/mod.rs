//! Quectel BG95-M3 driver.
//!
//! [`Bg95`] owns the UART, the power key and the STATUS line. Every public
//! operation is blocking and issues at most one AT command at a time. The
//! modem is the source of truth: status checks always re-query it, because
//! it keeps MQTT sockets and files alive across resets of this firmware.

pub mod command;
pub mod error;
pub mod file;
pub mod mqtt;
pub mod network;
pub mod power;
pub mod response;
pub mod tls;
pub mod transport;
pub mod urc;

use crate::cfg::modem_cfg::ModemConfig;
use command::{AtClient, AtResources};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use error::{Error, Result};
use log::{info, warn};
use power::PowerControl;
use rand_core::RngCore;
use response::Response;

/// Hardware watchdog fed on every poll of every wait.
pub trait Watchdog {
    fn feed(&mut self);
}

impl<W: Watchdog + ?Sized> Watchdog for &mut W {
    fn feed(&mut self) {
        (**self).feed()
    }
}

/// For boards that run without a watchdog.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&mut self) {}
}

/// Boot progress of the modem as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Off,
    PoweringUp,
    /// Responsive, inherited sockets reclaimed, echo off.
    Ready,
}

/// Connectivity snapshot. Derived on demand from live queries, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModemStatus {
    pub responsive: bool,
    pub registered: bool,
    pub pds_connected: bool,
    pub pdp_connected: bool,
}

impl ModemStatus {
    pub fn is_ready(&self) -> bool {
        self.responsive && self.registered && self.pds_connected && self.pdp_connected
    }
}

/// Driver for one BG95-M3.
pub struct Bg95<'a, S, D, W, K, T, R> {
    pub(crate) client: AtClient<'a, S, D, W>,
    pub(crate) power: PowerControl<K, T>,
    pub(crate) rng: R,
    pub(crate) config: ModemConfig,
    pub(crate) lifecycle: Lifecycle,
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
    /// Wraps the peripherals. Nothing is sent until [`init`](Self::init).
    ///
    /// # Arguments
    ///
    /// * `resources` - Ingress buffer, response slot and URC channel.
    /// * `serial` - UART connected to the modem's main port.
    /// * `delay` - Delay provider for polling and power key timing.
    /// * `watchdog` - Fed on every poll so a hung modem surfaces as a timeout.
    /// * `power_key` - PWRKEY output; a one second high pulse toggles power.
    /// * `status` - STATUS input, low while the modem is powered.
    /// * `rng` - Source of MQTT message ids.
    /// * `config` - Timeouts and retry budgets.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resources: &'a mut AtResources,
        serial: S,
        delay: D,
        watchdog: W,
        power_key: K,
        status: T,
        rng: R,
        config: ModemConfig,
    ) -> Result<Self> {
        Ok(Self {
            client: AtClient::new(
                resources,
                serial,
                delay,
                watchdog,
                config.poll_interval,
                config.settle_delay,
            )?,
            power: PowerControl::new(power_key, status),
            rng,
            config,
            lifecycle: Lifecycle::Off,
        })
    }

    /// Powers the modem up and brings it to a known state.
    ///
    /// Waits for the modem to answer `AT`, force-restarting it when the
    /// check budget runs out, then closes MQTT sockets and SSL contexts left
    /// over from a previous boot and turns command echo off. Socket creation
    /// is refused until this has succeeded.
    pub fn init(&mut self) -> Result<()> {
        info!("[modem] Starting modem initialization");
        self.lifecycle = Lifecycle::PoweringUp;
        self.power_on()?;
        self.wait_until_responsive()?;

        info!("[modem] Finding inherited sockets");
        self.reclaim_inherited_sockets()?;

        info!("[modem] Clearing existing SSL contexts");
        self.close_ssl_contexts()?;

        info!("[modem] Disable Echo Mode");
        self.set_echo(false)?;

        match self.iccid() {
            Ok(iccid) => info!("[modem] Device ICCID: {iccid}"),
            Err(e) => warn!("[modem] Could not read ICCID: {e}"),
        }
        self.lifecycle = Lifecycle::Ready;
        info!("[modem] Device is ready");
        Ok(())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Queries every connectivity check, stopping at the first that fails.
    pub fn status(&mut self) -> ModemStatus {
        let mut status = ModemStatus {
            responsive: self.is_responsive(),
            ..ModemStatus::default()
        };
        status.registered = status.responsive && self.is_registered_to_network();
        status.pds_connected = status.registered && self.is_pds_connected();
        status.pdp_connected = status.pds_connected && self.is_pdp_connected();
        status
    }

    /// Responsive, registered (home or roaming), packet service attached and
    /// at least one PDP context active.
    pub fn is_comms_ready(&mut self) -> bool {
        self.status().is_ready()
    }

    /// Runs a command with the default timeout; anything but `OK` is an error.
    pub(crate) fn query(&mut self, command: &str, what: &'static str) -> Result<Response> {
        self.client
            .execute(command, self.config.command_timeout, what)
    }

    pub(crate) fn run(&mut self, command: &str, what: &'static str) -> Result<()> {
        self.query(command, what).map(|_| ())
    }

    pub(crate) fn require_ready(&self) -> Result<()> {
        if self.lifecycle == Lifecycle::Ready {
            Ok(())
        } else {
            Err(Error::NotReady("modem has not completed initialization"))
        }
    }

    /// Access to the UART, e.g. to hand it back to a bootloader.
    pub fn serial_mut(&mut self) -> &mut S {
        self.client.serial_mut()
    }
}
