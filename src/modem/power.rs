use crate::modem::command::{Awaited, UrcMatch};
use crate::modem::error::{Error, Result};
use crate::modem::response::Response;
use crate::modem::urc::Urc;
use crate::modem::{Bg95, Lifecycle, Watchdog};
use core::time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use log::{info, warn};
use rand_core::RngCore;

const KEY_PRESS_MS: u32 = 1000;
const KEY_RELEASE_MS: u32 = 500;
const RESTART_GAP: Duration = Duration::from_secs(1);

/// PWRKEY output and STATUS input of the modem.
pub struct PowerControl<K, T> {
    key: K,
    status: T,
}

impl<K: OutputPin, T: InputPin> PowerControl<K, T> {
    pub fn new(key: K, status: T) -> Self {
        Self { key, status }
    }

    /// STATUS is pulled low while the modem is powered.
    pub fn is_on(&mut self) -> Result<bool> {
        self.status.is_low().map_err(Error::pin)
    }

    /// One press of the power key. Toggles the modem on or off.
    pub fn press<D: DelayNs>(&mut self, delay: &mut D) -> Result<()> {
        self.key.set_high().map_err(Error::pin)?;
        delay.delay_ms(KEY_PRESS_MS);
        self.key.set_low().map_err(Error::pin)?;
        delay.delay_ms(KEY_RELEASE_MS);
        Ok(())
    }
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
    /// Checks the current state of the modem (on/off).
    pub fn power_status(&mut self) -> Result<bool> {
        self.power.is_on()
    }

    pub fn toggle_power(&mut self) -> Result<()> {
        info!("[power] Toggling power key");
        self.power.press(self.client.delay_mut())
    }

    pub fn power_on(&mut self) -> Result<()> {
        if self.power_status()? {
            info!("[power] Device is already on");
            return Ok(());
        }
        self.toggle_power()
    }

    /// Turns the modem off.
    ///
    /// Graceful shutdown sends `AT+QPOWD` and waits for `POWERED DOWN`; the
    /// power key is pressed afterwards only if STATUS still reports the
    /// modem on. Ungraceful shutdown presses the key straight away.
    pub fn power_off(&mut self, graceful: bool) -> Result<()> {
        if !self.power_status()? {
            info!("[power] Device is already off");
            self.lifecycle = Lifecycle::Off;
            return Ok(());
        }

        if graceful {
            match self
                .client
                .send_and_await("AT+QPOWD", self.config.command_timeout)?
            {
                Response::Ok { .. } => {
                    info!("[power] Waiting for POWERED DOWN");
                    match self.client.await_urc(self.config.power_down_timeout, |urc| {
                        if *urc == Urc::PoweredDown {
                            UrcMatch::Primary
                        } else {
                            UrcMatch::Ignore
                        }
                    })? {
                        Awaited::Primary(_) => info!("[power] Got good power down response from modem"),
                        other => warn!("[power] No power down confirmation: {other:?}"),
                    }
                }
                other => warn!("[power] AT+QPOWD not accepted: {other:?}"),
            }
            if !self.power_status()? {
                self.lifecycle = Lifecycle::Off;
                return Ok(());
            }
        }

        self.toggle_power()?;
        self.lifecycle = Lifecycle::Off;
        Ok(())
    }

    pub fn restart(&mut self, graceful: bool) -> Result<()> {
        info!("[power] Restarting modem (graceful: {graceful})");
        self.power_off(graceful)?;
        self.client.pause(RESTART_GAP);
        self.power_on()
    }

    /// Sends `AT`. Only transport failures are errors; silence is `false`.
    pub fn check_communication(&mut self) -> Result<bool> {
        let response = self
            .client
            .send_and_await("AT", self.config.command_timeout)?;
        Ok(response.is_ok())
    }

    pub fn is_responsive(&mut self) -> bool {
        self.check_communication().unwrap_or_else(|e| {
            warn!("[power] Communication check failed: {e}");
            false
        })
    }

    /// Polls `AT` until it is answered, force-restarting the modem each
    /// time `comm_check_attempts` checks in a row go unanswered.
    pub(crate) fn wait_until_responsive(&mut self) -> Result<()> {
        let attempts_per_cycle = self.config.comm_check_attempts.max(1);
        let mut attempts = 0u8;
        let mut restarts = 0u8;

        while !self.check_communication()? {
            attempts += 1;
            info!("[power] Waiting for device to initialize ({attempts}/{attempts_per_cycle})");
            if attempts >= attempts_per_cycle {
                if restarts >= self.config.max_restarts {
                    self.lifecycle = Lifecycle::Off;
                    return Err(Error::RestartsExhausted { restarts });
                }
                restarts += 1;
                warn!(
                    "[power] Communication failed. Restarting modem ({restarts}/{})",
                    self.config.max_restarts
                );
                self.restart(false)?;
                attempts = 0;
            }
            self.client.pause(self.config.comm_check_interval);
        }
        Ok(())
    }
}
