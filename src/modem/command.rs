//! The AT command engine: one command in flight, a polling wait for its
//! outcome, and generic comma-separated field extraction.
//!
//! Bytes read from the UART go into an atat [`Ingress`]. Final results land
//! in the response slot; URCs are published on the channel and drained into
//! a pending queue after every read, where later waits can still find them.

use crate::cfg::modem_cfg::{
    millis, INGRESS_BUF_LEN, MAX_COMMAND_LEN, MAX_FIELDS, MAX_PENDING_URCS, URC_CAPACITY,
    URC_SUBSCRIBERS,
};
use crate::modem::error::{Error, Result};
use crate::modem::response::{digester, Line, Pattern, Response};
use crate::modem::transport::{SerialTransport, READ_CHUNK};
use crate::modem::urc::Urc;
use crate::modem::Watchdog;
use atat::{AtDigester, AtatIngress, Ingress, ResponseSlot, UrcChannel, UrcSubscription};
use core::fmt::Write as _;
use core::str::FromStr;
use core::time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};
use heapless::{String, Vec};
use log::{debug, warn};

pub type Command = String<MAX_COMMAND_LEN>;
pub type Fields<'a> = Vec<&'a str, MAX_FIELDS>;

/// Renders a command into a bounded buffer.
pub fn command(args: core::fmt::Arguments<'_>) -> Result<Command> {
    let mut text = Command::new();
    text.write_fmt(args).map_err(|_| Error::CommandTooLong)?;
    Ok(text)
}

/// Splits a field list on `,` and strips surrounding quotes from each field.
pub fn split_fields(text: &str) -> Fields<'_> {
    let mut fields = Fields::new();
    for raw in text.split(',') {
        if fields.push(raw.trim().trim_matches('"')).is_err() {
            warn!("[at] More than {MAX_FIELDS} fields in `{text}`, ignoring the rest");
            break;
        }
    }
    fields
}

/// Field lists of every line matching `pattern`, in order.
pub fn parse_fields<'a>(
    lines: &'a [Line],
    pattern: Pattern<'a>,
) -> impl Iterator<Item = Fields<'a>> + 'a {
    lines
        .iter()
        .filter_map(move |line| pattern.capture(line))
        .map(split_fields)
}

pub fn first_fields<'a>(lines: &'a [Line], pattern: Pattern<'a>) -> Option<Fields<'a>> {
    parse_fields(lines, pattern).next()
}

/// Parses field `index`, naming `what` in the error.
pub fn field<T: FromStr>(fields: &[&str], index: usize, what: &'static str) -> Result<T> {
    fields
        .get(index)
        .and_then(|f| f.parse().ok())
        .ok_or(Error::Parse { what })
}

pub fn text_field<const N: usize>(
    fields: &[&str],
    index: usize,
    what: &'static str,
) -> Result<String<N>> {
    fields
        .get(index)
        .and_then(|f| String::from_str(f).ok())
        .ok_or(Error::Parse { what })
}

type AtIngress<'a> =
    Ingress<'a, AtDigester<Urc>, Urc, INGRESS_BUF_LEN, URC_CAPACITY, URC_SUBSCRIBERS>;

/// Buffers shared by the ingress and the client. Must outlive the driver,
/// e.g. in a `static` or a `StaticCell`.
pub struct AtResources {
    ingress_buf: [u8; INGRESS_BUF_LEN],
    res_slot: ResponseSlot<INGRESS_BUF_LEN>,
    urc_channel: UrcChannel<Urc, URC_CAPACITY, URC_SUBSCRIBERS>,
}

impl AtResources {
    pub const fn new() -> Self {
        Self {
            ingress_buf: [0; INGRESS_BUF_LEN],
            res_slot: ResponseSlot::new(),
            urc_channel: UrcChannel::new(),
        }
    }
}

impl Default for AtResources {
    fn default() -> Self {
        Self::new()
    }
}

/// How a URC wait treats one pending URC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrcMatch {
    Primary,
    Secondary,
    Ignore,
}

/// Outcome of a URC wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Awaited {
    Primary(Urc),
    /// Only a URC classified as secondary arrived first.
    Secondary(Urc),
    Timeout,
}

/// Serialises access to the UART. Owns the ingress, the delay and the
/// watchdog, so every wait feeds the watchdog on each poll.
pub struct AtClient<'a, S, D, W> {
    transport: SerialTransport<S>,
    ingress: AtIngress<'a>,
    res_slot: &'a ResponseSlot<INGRESS_BUF_LEN>,
    urcs: UrcSubscription<'a, Urc, URC_CAPACITY, URC_SUBSCRIBERS>,
    pending: Vec<Urc, MAX_PENDING_URCS>,
    delay: D,
    watchdog: W,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl<'a, S, D, W> AtClient<'a, S, D, W>
where
    S: Read + Write + ReadReady,
    D: DelayNs,
    W: Watchdog,
{
    pub fn new(
        resources: &'a mut AtResources,
        serial: S,
        delay: D,
        watchdog: W,
        poll_interval: Duration,
        settle_delay: Duration,
    ) -> Result<Self> {
        let AtResources {
            ingress_buf,
            res_slot,
            urc_channel,
        } = resources;
        let res_slot: &'a ResponseSlot<INGRESS_BUF_LEN> = res_slot;
        let urc_channel: &'a UrcChannel<Urc, URC_CAPACITY, URC_SUBSCRIBERS> = urc_channel;
        let urcs = urc_channel
            .subscribe()
            .map_err(|_| Error::NotReady("URC channel has no free subscriber"))?;

        Ok(Self {
            transport: SerialTransport::new(serial),
            ingress: Ingress::new(digester(), ingress_buf, res_slot, urc_channel),
            res_slot,
            urcs,
            pending: Vec::new(),
            delay,
            watchdog,
            poll_interval,
            settle_delay,
        })
    }

    /// Writes a command without waiting for its outcome.
    ///
    /// Stale input is discarded first: unread UART bytes, a partial line in
    /// the ingress, an unclaimed result and every pending URC.
    pub fn send(&mut self, command: &str) -> Result<()> {
        self.transport.reset_input()?;
        self.ingress.clear();
        self.res_slot.reset();
        while self.urcs.try_next_message_pure().is_some() {}
        if !self.pending.is_empty() {
            debug!("[at] Dropping {} unclaimed URCs", self.pending.len());
            self.pending.clear();
        }
        self.transport.send_command(command)?;
        self.pause(self.settle_delay);
        Ok(())
    }

    /// Sends `command` and waits for its final result.
    pub fn send_and_await(&mut self, command: &str, timeout: Duration) -> Result<Response> {
        self.send(command)?;
        self.await_terminal(timeout)
    }

    /// Like [`send_and_await`](Self::send_and_await) but folds the outcome
    /// into a `Result`, keeping the lines of an `OK` response.
    pub fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        waiting_for: &'static str,
    ) -> Result<Response> {
        match self.send_and_await(command, timeout)? {
            Response::Error { line } | Response::Unknown { line } => Err(Error::Modem(line)),
            Response::Timeout => Err(Error::Timeout { waiting_for }),
            ok => Ok(ok),
        }
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.write_raw(bytes)
    }

    /// Waits for `OK`, `CONNECT` or an error line.
    pub fn await_terminal(&mut self, timeout: Duration) -> Result<Response> {
        match self.poll(timeout, Self::take_response)? {
            Some(response) => response,
            None => Ok(Response::Timeout),
        }
    }

    /// Waits for a URC that `classify` marks as primary or secondary.
    ///
    /// URCs it ignores stay pending for later waits. Used for completions
    /// the modem reports after the `OK` of their command.
    pub fn await_urc<F>(&mut self, timeout: Duration, mut classify: F) -> Result<Awaited>
    where
        F: FnMut(&Urc) -> UrcMatch,
    {
        Ok(self
            .poll(timeout, |client| client.take_urc(&mut classify))?
            .unwrap_or(Awaited::Timeout))
    }

    /// Removes and returns the pending URCs `wanted` selects, in arrival order.
    ///
    /// For the information lines of queries such as `AT+QMTOPEN?`, which
    /// are digested as URCs and are all pending once the `OK` is in.
    pub fn take_urcs<F>(&mut self, mut wanted: F) -> Vec<Urc, MAX_PENDING_URCS>
    where
        F: FnMut(&Urc) -> bool,
    {
        let mut taken = Vec::new();
        self.pending.retain(|urc| {
            if wanted(urc) {
                // Same capacity as the pending queue.
                let _ = taken.push(urc.clone());
                false
            } else {
                true
            }
        });
        taken
    }

    fn take_response(&mut self) -> Option<Result<Response>> {
        let guard = self.res_slot.try_get()?;
        let response = Response::from_digest((&*guard.borrow()).into());
        drop(guard);
        self.res_slot.reset();
        Some(response)
    }

    fn take_urc<F>(&mut self, classify: &mut F) -> Option<Awaited>
    where
        F: FnMut(&Urc) -> UrcMatch,
    {
        let (index, matched) = self
            .pending
            .iter()
            .enumerate()
            .find_map(|(i, urc)| match classify(urc) {
                UrcMatch::Ignore => None,
                matched => Some((i, matched)),
            })?;
        let urc = self.pending.remove(index);
        Some(match matched {
            UrcMatch::Primary => Awaited::Primary(urc),
            _ => Awaited::Secondary(urc),
        })
    }

    /// Moves everything the UART has ready through the ingress.
    ///
    /// A line that would overflow the ingress buffer is discarded and
    /// reported as [`Error::ResponseOverflow`].
    fn pump(&mut self) -> Result<()> {
        loop {
            let buf = self.ingress.write_buf();
            if buf.is_empty() {
                warn!("[at] Ingress buffer full, discarding {INGRESS_BUF_LEN} bytes");
                self.ingress.clear();
                return Err(Error::ResponseOverflow);
            }
            let len = buf.len().min(READ_CHUNK);
            let n = self.transport.read_available(&mut buf[..len])?;
            if n == 0 {
                return Ok(());
            }
            if let Err(e) = self.ingress.try_advance(n) {
                warn!("[at] Ingress rejected input: {e:?}");
            }
            self.collect_urcs();
        }
    }

    fn collect_urcs(&mut self) {
        while let Some(urc) = self.urcs.try_next_message_pure() {
            debug!("[at] URC {urc:?}");
            if self.pending.is_full() {
                let dropped = self.pending.remove(0);
                warn!("[at] URC queue full, dropping {dropped:?}");
            }
            // Room was made above.
            let _ = self.pending.push(urc);
        }
    }

    fn poll<T, F>(&mut self, timeout: Duration, mut scan: F) -> Result<Option<T>>
    where
        F: FnMut(&mut Self) -> Option<T>,
    {
        let budget = millis(timeout);
        let step = millis(self.poll_interval).max(1);
        let mut elapsed = 0u32;
        loop {
            self.watchdog.feed();
            self.pump()?;
            if let Some(found) = scan(self) {
                return Ok(Some(found));
            }
            if elapsed >= budget {
                return Ok(None);
            }
            self.delay.delay_ms(step);
            elapsed = elapsed.saturating_add(step);
        }
    }

    /// Sleeps, feeding the watchdog first.
    pub fn pause(&mut self, duration: Duration) {
        self.watchdog.feed();
        self.delay.delay_ms(millis(duration));
    }

    pub fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }

    pub fn serial_mut(&mut self) -> &mut S {
        self.transport.inner_mut()
    }
}
