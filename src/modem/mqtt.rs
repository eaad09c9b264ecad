//! MQTT client sessions hosted by the modem.
//!
//! The BG95 runs up to six MQTT clients itself; the driver only drives them
//! with `AT+QMT*` commands. Most of those commands answer `OK` as soon as
//! they are accepted and report the real outcome later in a `+QMT...:` line
//! tagged with the socket id, so every operation here is accept-then-confirm.
//!
//! [`MqttSocket::state`] is the driver's last view of the session. The
//! `is_open`/`is_connected` queries ask the modem and are what the
//! operations check their preconditions against.

use crate::cfg::modem_cfg::{
    TlsConfig, MAX_CLIENT_ID_LEN, MAX_HOSTNAME_LEN, MAX_PAYLOAD_LEN, MAX_SOCKETS, MAX_TOPIC_LEN,
    MQTT_PROTOCOL_VERSION,
};
use crate::modem::command::{command, field, split_fields, Awaited, UrcMatch};
use crate::modem::error::{Error, Result};
use crate::modem::response::Response;
use crate::modem::urc::{MqttEvent, Urc, UrcArgs};
use crate::modem::{Bg95, Watchdog};
use core::time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use heapless::{String, Vec};
use log::{error, info, warn};
use rand_core::RngCore;

pub const MAX_RECEIVED_MESSAGES: usize = 4;

/// `AT+QMTCONN?` state of a connected client.
const CONNECTION_STATE_CONNECTED: u8 = 3;
/// `+QMTSTAT:` code for a disconnect initiated by the client.
const STAT_CLIENT_DISCONNECTED: u8 = 5;
const CLOSE_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unopened,
    Opening,
    Open,
    Connecting,
    Connected,
    Disconnecting,
    Closing,
    Closed,
}

/// Handle to one modem-side MQTT client, created by [`Bg95::create_socket`].
#[derive(Debug, Clone)]
pub struct MqttSocket {
    id: u8,
    client_id: String<MAX_CLIENT_ID_LEN>,
    hostname: String<MAX_HOSTNAME_LEN>,
    port: u16,
    tls_context_id: u8,
    state: SocketState,
}

impl MqttSocket {
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tls_context_id(&self) -> u8 {
        self.tls_context_id
    }

    pub fn state(&self) -> SocketState {
        self.state
    }
}

/// Lowest socket id in 0..=5 not in `open`.
pub fn allocate_socket_id(open: &[u8]) -> Result<u8> {
    (0..MAX_SOCKETS)
        .find(|id| !open.contains(id))
        .ok_or(Error::CapacityExhausted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// `+QMTCONN:` arrived with a failure result or a non-zero CONNACK code.
    Refused { result: u8, return_code: Option<u8> },
    /// No attempt got through.
    RetriesExhausted { attempts: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// `+QMTSTAT: <id>,5`. The network side of the socket may still be open.
    Clean,
    /// The disconnect was not confirmed and the socket was closed instead.
    ForcedClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// QoS 0: accepted by the modem, nothing more is reported.
    Sent,
    Acknowledged,
    /// The packet is being retransmitted.
    Retransmitting { retries: u8 },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub message_id: u16,
    pub outcome: PublishOutcome,
}

impl PublishReport {
    pub fn is_delivered(&self) -> bool {
        matches!(
            self.outcome,
            PublishOutcome::Sent | PublishOutcome::Acknowledged
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Granted { qos: u8 },
    Retransmitting { retries: u8 },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeReport {
    pub message_id: u16,
    pub outcome: SubscribeOutcome,
}

/// A message buffered by the modem, read with `AT+QMTRECV`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub socket_id: u8,
    pub message_id: u16,
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload_len: usize,
    pub payload: String<MAX_PAYLOAD_LEN>,
}

impl ReceivedMessage {
    /// Parses what follows the socket id in `+QMTRECV:`,
    /// `<msgid>,"<topic>",<len>,"<payload>"`. The payload may itself contain
    /// commas.
    pub fn parse(socket_id: u8, text: &str) -> Result<Self> {
        let mut parts = text.splitn(4, ',');
        let mut next = |what: &'static str| {
            parts
                .next()
                .map(|p| p.trim().trim_matches('"'))
                .ok_or(Error::Parse { what })
        };
        let message_id = next("QMTRECV")?;
        let topic = next("QMTRECV")?;
        let payload_len = next("QMTRECV")?;
        let payload = next("QMTRECV")?;
        Ok(Self {
            socket_id,
            message_id: message_id.parse().map_err(|_| Error::Parse { what: "QMTRECV" })?,
            topic: String::try_from(topic).map_err(|_| Error::Parse { what: "QMTRECV" })?,
            payload_len: payload_len.parse().map_err(|_| Error::Parse { what: "QMTRECV" })?,
            payload: String::try_from(payload).map_err(|_| Error::Parse { what: "QMTRECV" })?,
        })
    }
}

/// Broker a batch is published to.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'a> {
    pub client_id: &'a str,
    pub hostname: &'a str,
    pub port: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct OutboundMessage<'a> {
    pub topic: &'a str,
    pub payload: &'a str,
    pub qos: u8,
    pub retain: bool,
}

/// Picks `event` URCs of socket `id`.
fn socket_urc(event: MqttEvent, id: u8) -> impl FnMut(&Urc) -> UrcMatch {
    move |urc: &Urc| {
        if urc.is(event, id) {
            UrcMatch::Primary
        } else {
            UrcMatch::Ignore
        }
    }
}

/// First field of a URC's arguments, e.g. the message id of `+QMTPUB:`.
fn leading_field<T: core::str::FromStr>(urc: &Urc) -> Option<T> {
    urc.args()
        .and_then(|args| split_fields(args).first().and_then(|f| f.parse().ok()))
}

/// Arguments of a confirming URC; anything else is a protocol mismatch.
fn confirmation(awaited: Awaited, event: MqttEvent, id: u8) -> Result<UrcArgs> {
    match awaited {
        Awaited::Primary(Urc::Mqtt { args, .. }) => Ok(args),
        Awaited::Primary(_) => Err(Error::ResponseOverflow),
        _ => {
            error!("[mqtt] No {} for socket {id}", event.prefix());
            Err(Error::ProtocolMismatch {
                expected: event.prefix(),
            })
        }
    }
}

/// Arguments end up inside a quoted AT parameter.
fn check_quotable(value: &str, what: &'static str) -> Result<()> {
    if value.contains(['"', '\r', '\n']) {
        return Err(Error::InvalidArgument(what));
    }
    Ok(())
}

fn bounded<const N: usize>(value: &str, what: &'static str) -> Result<String<N>> {
    check_quotable(value, what)?;
    String::try_from(value).map_err(|_| Error::InvalidArgument(what))
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
    /// Ids of the sockets the modem reports as open (`AT+QMTOPEN?`).
    pub fn open_socket_ids(&mut self) -> Result<Vec<u8, { MAX_SOCKETS as usize }>> {
        self.run("AT+QMTOPEN?", "QMTOPEN")?;
        let mut ids = Vec::new();
        for urc in self.client.take_urcs(|urc| urc.client_of(MqttEvent::Open).is_some()) {
            match urc.client_of(MqttEvent::Open) {
                Some(id) if id < MAX_SOCKETS && !ids.contains(&id) => {
                    let _ = ids.push(id);
                }
                _ => warn!("[mqtt] Skipping socket line: {urc:?}"),
            }
        }
        Ok(ids)
    }

    pub fn is_open(&mut self, socket: &MqttSocket) -> Result<bool> {
        Ok(self.open_socket_ids()?.contains(&socket.id))
    }

    /// `AT+QMTCONN?` state of the socket: 1 initializing, 2 connecting,
    /// 3 connected, 4 disconnecting. `None` when the modem does not list it.
    pub fn connection_state(&mut self, socket: &MqttSocket) -> Result<Option<u8>> {
        self.run("AT+QMTCONN?", "QMTCONN")?;
        let states = self
            .client
            .take_urcs(|urc| urc.client_of(MqttEvent::Connect).is_some());
        let Some(urc) = states.iter().find(|urc| urc.is(MqttEvent::Connect, socket.id)) else {
            return Ok(None);
        };
        leading_field(urc)
            .map(Some)
            .ok_or(Error::Parse { what: "QMTCONN" })
    }

    pub fn is_connected(&mut self, socket: &MqttSocket) -> Result<bool> {
        Ok(self.connection_state(socket)? == Some(CONNECTION_STATE_CONNECTED))
    }

    /// Closes sockets left open by a previous boot. The modem keeps MQTT
    /// sockets across resets of the host, and an occupied id cannot be
    /// reopened.
    pub(crate) fn reclaim_inherited_sockets(&mut self) -> Result<()> {
        for pass in 1..=self.config.reclaim_passes {
            let inherited = self.open_socket_ids()?;
            if inherited.is_empty() {
                return Ok(());
            }
            for id in inherited {
                info!("[mqtt] Inherited socket {id} (pass {pass})");
                if let Err(e) = self.close_socket_id(id) {
                    warn!("[mqtt] Failed to close inherited socket {id}: {e}");
                }
            }
        }
        let remaining = self.open_socket_ids()?;
        if !remaining.is_empty() {
            warn!("[mqtt] Sockets {remaining:?} still open after reclaiming, leaving them");
        }
        Ok(())
    }

    /// Sends `AT+QMTCLOSE` and waits for `+QMTCLOSE: <id>,0`.
    fn close_socket_id(&mut self, id: u8) -> Result<()> {
        let cmd = command(format_args!("AT+QMTCLOSE={id}"))?;
        self.client
            .execute(&cmd, self.config.close_timeout, "QMTCLOSE")?;
        info!("[mqtt] Waiting for socket {id} to close");
        let rest = self.await_socket_urc(MqttEvent::Close, id, self.config.close_timeout)?;
        let result: i8 = field(&split_fields(&rest), 0, "QMTCLOSE")?;
        if result == 0 {
            info!("[mqtt] Closed socket {id}");
            Ok(())
        } else {
            warn!("[mqtt] Failed to close socket {id}: {result}");
            Err(Error::Rejected {
                operation: "close",
                code: result,
            })
        }
    }

    /// Waits for the `event` URC of socket `id` and returns what follows the id.
    fn await_socket_urc(&mut self, event: MqttEvent, id: u8, timeout: Duration) -> Result<UrcArgs> {
        let awaited = self.client.await_urc(timeout, socket_urc(event, id))?;
        confirmation(awaited, event, id)
    }

    /// Message id for QoS 1 and 2 packets, in 1..=65535.
    fn next_message_id(&mut self) -> u16 {
        (self.rng.next_u32() % u32::from(u16::MAX)) as u16 + 1
    }

    /// Allocates a socket id and configures it for TLS.
    ///
    /// Refused until [`init`](Self::init) has reclaimed inherited sockets.
    /// The certificate files `tls` names must already be on the modem, see
    /// [`sync_certificates`](Self::sync_certificates).
    ///
    /// # Arguments
    ///
    /// * `client_id` - MQTT client identifier presented to the broker.
    /// * `hostname` - Broker host name.
    /// * `port` - Broker port, normally 8883.
    /// * `tls` - SSL context the socket is bound to; pushed to the modem here.
    pub fn create_socket(
        &mut self,
        client_id: &str,
        hostname: &str,
        port: u16,
        tls: &TlsConfig,
    ) -> Result<MqttSocket> {
        self.require_ready()?;
        let client_id = bounded(client_id, "client id")?;
        let hostname = bounded(hostname, "hostname")?;

        let used = self.open_socket_ids()?;
        info!("[mqtt] Used IDs: {used:?}");
        let id = allocate_socket_id(&used).inspect_err(|_| {
            warn!("[mqtt] Failed to create new MQTT socket, no available sockets");
        })?;
        info!("[mqtt] Smallest available ID: {id}");

        self.set_tls_context(tls)?;
        info!("[mqtt] Setting SSL Context");
        let ctx = tls.context_id;
        self.run(
            &command(format_args!("AT+QMTCFG=\"ssl\",{id},1,{ctx}"))?,
            "QMTCFG",
        )?;
        self.run(
            &command(format_args!(
                "AT+QMTCFG=\"version\",{id},{MQTT_PROTOCOL_VERSION}"
            ))?,
            "QMTCFG",
        )?;
        self.run(
            &command(format_args!("AT+QMTCFG=\"recv/mode\",{id},0,1"))?,
            "QMTCFG",
        )?;

        Ok(MqttSocket {
            id,
            client_id,
            hostname,
            port,
            tls_context_id: ctx,
            state: SocketState::Unopened,
        })
    }

    /// Opens the network connection of the socket.
    ///
    /// The socket is open only once `+QMTOPEN: <id>,0` has been seen; `OK`
    /// alone means the command was accepted.
    pub fn open(&mut self, socket: &mut MqttSocket) -> Result<()> {
        info!("[mqtt] Opening socket {}", socket.id);
        if !self.is_comms_ready() {
            warn!("[mqtt] Failed to open the socket: modem isn't comms ready");
            return Err(Error::NotReady("modem is not comms ready"));
        }

        let cmd = command(format_args!(
            "AT+QMTOPEN={},\"{}\",{}",
            socket.id, socket.hostname, socket.port
        ))?;
        info!("[mqtt] Open Command: {cmd}");
        socket.state = SocketState::Opening;
        let confirmed = self
            .client
            .execute(&cmd, self.config.open_timeout, "QMTOPEN")
            .and_then(|_| {
                info!("[mqtt] Waiting for socket to open...");
                self.await_socket_urc(MqttEvent::Open, socket.id, self.config.open_timeout)
            });
        let rest = match confirmed {
            Ok(rest) => rest,
            Err(e) => {
                socket.state = SocketState::Unopened;
                return Err(e);
            }
        };

        let result: i8 = field(&split_fields(&rest), 0, "QMTOPEN")?;
        if result == 0 {
            info!("[mqtt] Successfully opened socket {}", socket.id);
            socket.state = SocketState::Open;
            Ok(())
        } else {
            error!("[mqtt] Socket {} failed to open: {result}", socket.id);
            socket.state = SocketState::Unopened;
            Err(Error::Rejected {
                operation: "open",
                code: result,
            })
        }
    }

    /// Connects the MQTT session, retrying up to `connect_retries` times with
    /// `connect_backoff` after each failed attempt.
    ///
    /// An attempt fails when the command is not accepted or when the modem
    /// reports `+QMTSTAT:` instead of `+QMTCONN:`. A `+QMTCONN:` with a
    /// failure result ends the loop with [`ConnectOutcome::Refused`].
    pub fn connect(&mut self, socket: &mut MqttSocket) -> Result<ConnectOutcome> {
        if !self.is_open(socket)? {
            warn!("[mqtt] Socket {} isn't open", socket.id);
            return Err(Error::NotReady("socket is not open"));
        }

        let cmd = command(format_args!(
            "AT+QMTCONN={},\"{}\"",
            socket.id, socket.client_id
        ))?;
        let id = socket.id;
        let attempts = self.config.connect_retries;
        socket.state = SocketState::Connecting;

        for attempt in 1..=attempts {
            info!("[mqtt] Connecting to MQTT Broker (attempt {attempt}/{attempts})");
            info!("[mqtt] Connecting with command: {cmd}");
            match self
                .client
                .send_and_await(&cmd, self.config.connect_accept_timeout)?
            {
                Response::Ok { .. } => {
                    info!("[mqtt] Waiting to establish connection to broker...");
                    let awaited =
                        self.client
                            .await_urc(self.config.connect_result_timeout, |urc| {
                                if urc.is(MqttEvent::Connect, id) {
                                    UrcMatch::Primary
                                } else if urc.is(MqttEvent::Status, id) {
                                    UrcMatch::Secondary
                                } else {
                                    UrcMatch::Ignore
                                }
                            })?;
                    match awaited {
                        Awaited::Primary(urc) => {
                            let fields = split_fields(urc.args().unwrap_or_default());
                            let result: u8 = field(&fields, 0, "QMTCONN")?;
                            let return_code = fields.get(1).and_then(|c| c.parse().ok());
                            if result == 0 && return_code == Some(0) {
                                info!("[mqtt] Connected!");
                                socket.state = SocketState::Connected;
                                return Ok(ConnectOutcome::Connected);
                            }
                            warn!("[mqtt] Broker refused connection: {result},{return_code:?}");
                            socket.state = SocketState::Open;
                            return Ok(ConnectOutcome::Refused {
                                result,
                                return_code,
                            });
                        }
                        Awaited::Secondary(urc) => {
                            warn!("[mqtt] Connection status instead of result: {urc:?}");
                        }
                        Awaited::Timeout => {
                            socket.state = SocketState::Open;
                            return Err(Error::ProtocolMismatch {
                                expected: "+QMTCONN:",
                            });
                        }
                    }
                }
                other => warn!("[mqtt] Error connecting: {other:?}"),
            }
            info!("[mqtt] Retrying in {:?}", self.config.connect_backoff);
            self.client.pause(self.config.connect_backoff);
        }

        error!("[mqtt] Failed to connect after {attempts} attempts");
        socket.state = SocketState::Open;
        Ok(ConnectOutcome::RetriesExhausted { attempts })
    }

    /// Publishes with `AT+QMTPUBEX`. QoS 0 uses message id 0 and is
    /// reported as [`PublishOutcome::Sent`] once accepted; QoS 1 and 2 wait
    /// for `+QMTPUB:`.
    pub fn publish(
        &mut self,
        socket: &MqttSocket,
        topic: &str,
        payload: &str,
        qos: u8,
        retain: bool,
    ) -> Result<PublishReport> {
        if qos > 2 {
            return Err(Error::InvalidArgument("qos"));
        }
        check_quotable(topic, "topic")?;
        check_quotable(payload, "payload")?;
        if !self.is_connected(socket)? {
            return Err(Error::NotReady("MQTT isn't connected"));
        }

        let message_id = if qos == 0 { 0 } else { self.next_message_id() };
        info!("[mqtt] Publishing {} bytes to {topic} with a QoS of {qos}", payload.len());
        let cmd = command(format_args!(
            "AT+QMTPUBEX={},{message_id},{qos},{},\"{topic}\",\"{payload}\"",
            socket.id,
            u8::from(retain)
        ))?;
        self.client
            .execute(&cmd, self.config.publish_timeout, "QMTPUBEX")?;

        if qos == 0 {
            return Ok(PublishReport {
                message_id,
                outcome: PublishOutcome::Sent,
            });
        }

        info!("[mqtt] Waiting to confirm publish with broker...");
        let id = socket.id;
        let awaited = self
            .client
            .await_urc(self.config.publish_timeout, |urc| {
                if !urc.is(MqttEvent::Publish, id) {
                    UrcMatch::Ignore
                } else if urc.args().is_some() && leading_field(urc) != Some(message_id) {
                    // A late confirmation of an earlier message.
                    UrcMatch::Ignore
                } else {
                    UrcMatch::Primary
                }
            })?;
        let rest = confirmation(awaited, MqttEvent::Publish, id)?;
        let fields = split_fields(&rest);
        let outcome = match field::<u8>(&fields, 1, "QMTPUB")? {
            0 => PublishOutcome::Acknowledged,
            1 => PublishOutcome::Retransmitting {
                retries: field(&fields, 2, "QMTPUB").unwrap_or(0),
            },
            _ => PublishOutcome::Failed,
        };
        Ok(PublishReport {
            message_id,
            outcome,
        })
    }

    pub fn subscribe(
        &mut self,
        socket: &MqttSocket,
        topic: &str,
        qos: u8,
    ) -> Result<SubscribeReport> {
        if qos > 2 {
            return Err(Error::InvalidArgument("qos"));
        }
        check_quotable(topic, "topic")?;
        if !self.is_connected(socket)? {
            return Err(Error::NotReady("MQTT isn't connected"));
        }

        let message_id = self.next_message_id();
        let cmd = command(format_args!(
            "AT+QMTSUB={},{message_id},\"{topic}\",{qos}",
            socket.id
        ))?;
        self.client
            .execute(&cmd, self.config.subscribe_timeout, "QMTSUB")?;
        info!("[mqtt] Waiting to confirm subscription with broker...");
        let rest = self.await_socket_urc(MqttEvent::Subscribe, socket.id, self.config.subscribe_timeout)?;
        let fields = split_fields(&rest);
        let outcome = match field::<u8>(&fields, 1, "QMTSUB")? {
            0 => SubscribeOutcome::Granted {
                qos: field(&fields, 2, "QMTSUB")?,
            },
            1 => SubscribeOutcome::Retransmitting {
                retries: field(&fields, 2, "QMTSUB").unwrap_or(0),
            },
            _ => SubscribeOutcome::Failed,
        };
        Ok(SubscribeReport {
            message_id,
            outcome,
        })
    }

    pub fn unsubscribe(&mut self, socket: &MqttSocket, topic: &str) -> Result<()> {
        check_quotable(topic, "topic")?;
        if !self.is_connected(socket)? {
            return Err(Error::NotReady("MQTT isn't connected"));
        }

        let message_id = self.next_message_id();
        let cmd = command(format_args!(
            "AT+QMTUNS={},{message_id},\"{topic}\"",
            socket.id
        ))?;
        self.client
            .execute(&cmd, self.config.subscribe_timeout, "QMTUNS")?;
        info!("[mqtt] Waiting to confirm unsubscription with broker...");
        let rest = self.await_socket_urc(MqttEvent::Unsubscribe, socket.id, self.config.subscribe_timeout)?;
        let result: i8 = field(&split_fields(&rest), 1, "QMTUNS")?;
        if result == 0 {
            Ok(())
        } else {
            Err(Error::Rejected {
                operation: "unsubscribe",
                code: result,
            })
        }
    }

    /// Reads the messages the modem has buffered for the socket.
    pub fn read_messages(
        &mut self,
        socket: &MqttSocket,
    ) -> Result<Vec<ReceivedMessage, MAX_RECEIVED_MESSAGES>> {
        if !self.is_connected(socket)? {
            return Err(Error::NotReady("MQTT isn't connected"));
        }
        let cmd = command(format_args!("AT+QMTRECV={}", socket.id))?;
        self.run(&cmd, "QMTRECV")?;
        let id = socket.id;
        let mut messages = Vec::new();
        for urc in self.client.take_urcs(|urc| urc.is(MqttEvent::Receive, id)) {
            let Some(args) = urc.args() else {
                error!("[mqtt] Message on socket {id} does not fit the receive buffer");
                return Err(Error::ResponseOverflow);
            };
            if messages.push(ReceivedMessage::parse(id, args)?).is_err() {
                warn!("[mqtt] More than {MAX_RECEIVED_MESSAGES} messages buffered, reading the rest later");
                break;
            }
        }
        Ok(messages)
    }

    /// Disconnects from the broker.
    ///
    /// A clean disconnect ends with `+QMTSTAT: <id>,5`. A refused
    /// `AT+QMTDISC`, any other status, or none closes the socket instead.
    pub fn disconnect(&mut self, socket: &mut MqttSocket) -> Result<DisconnectOutcome> {
        let cmd = command(format_args!("AT+QMTDISC={}", socket.id))?;
        socket.state = SocketState::Disconnecting;
        let accepted = self
            .client
            .execute(&cmd, self.config.disconnect_timeout, "QMTDISC")
            .and_then(|_| {
                info!("[mqtt] Waiting to confirm disconnection with broker...");
                self.await_socket_urc(MqttEvent::Disconnect, socket.id, self.config.disconnect_timeout)
            });
        let accepted = match accepted {
            Ok(rest) => field::<i8>(&split_fields(&rest), 0, "QMTDISC").ok() == Some(0),
            Err(e) => {
                warn!("[mqtt] Disconnect failed: {e}");
                false
            }
        };

        if accepted {
            info!("[mqtt] Waiting for QMTSTAT: {},{STAT_CLIENT_DISCONNECTED}", socket.id);
            let status = self
                .await_socket_urc(
                    MqttEvent::Status,
                    socket.id,
                    self.config.disconnect_status_timeout,
                )
                .ok()
                .and_then(|rest| field::<u8>(&split_fields(&rest), 0, "QMTSTAT").ok());
            if status == Some(STAT_CLIENT_DISCONNECTED) {
                info!("[mqtt] Disconnected socket {}", socket.id);
                socket.state = SocketState::Open;
                return Ok(DisconnectOutcome::Clean);
            }
            warn!("[mqtt] Unexpected disconnect status {status:?}");
        }

        info!("[mqtt] Have to force close...");
        socket.state = SocketState::Closing;
        self.close_socket_id(socket.id)?;
        socket.state = SocketState::Closed;
        Ok(DisconnectOutcome::ForcedClose)
    }

    /// Closes the socket, disconnecting first if the session is still up.
    /// Closing a socket the modem no longer lists succeeds immediately.
    pub fn close(&mut self, socket: &mut MqttSocket) -> Result<()> {
        info!("[mqtt] Closing socket {}", socket.id);
        if self.is_connected(socket)? {
            warn!("[mqtt] Socket is still connected, attempting to disconnect");
            if self.disconnect(socket)? == DisconnectOutcome::ForcedClose {
                return Ok(());
            }
        }

        self.client.pause(CLOSE_SETTLE);

        if !self.is_open(socket)? {
            warn!("[mqtt] Socket {} is already closed", socket.id);
            socket.state = SocketState::Closed;
            return Ok(());
        }

        socket.state = SocketState::Closing;
        self.close_socket_id(socket.id)?;
        socket.state = SocketState::Closed;
        Ok(())
    }

    /// Opens a session, publishes `messages` in order and closes it again.
    ///
    /// # Returns
    ///
    /// How many leading messages were delivered. Publishing stops at the
    /// first message that is not, so the caller can drop exactly those
    /// readings from local storage.
    pub fn publish_batch(
        &mut self,
        endpoint: &Endpoint<'_>,
        tls: &TlsConfig,
        messages: &[OutboundMessage<'_>],
    ) -> Result<usize> {
        if !self.is_comms_ready() {
            return Err(Error::NotReady("modem is not comms ready"));
        }
        let mut socket =
            self.create_socket(endpoint.client_id, endpoint.hostname, endpoint.port, tls)?;

        let delivered = self.publish_session(&mut socket, messages);
        if let Err(e) = self.close(&mut socket) {
            warn!("[mqtt] Failed to close socket {}: {e}", socket.id);
        }
        delivered
    }

    fn publish_session(
        &mut self,
        socket: &mut MqttSocket,
        messages: &[OutboundMessage<'_>],
    ) -> Result<usize> {
        self.open(socket)?;
        match self.connect(socket)? {
            ConnectOutcome::Connected => {}
            outcome => {
                warn!("[mqtt] Not publishing: {outcome:?}");
                return Ok(0);
            }
        }

        let mut delivered = 0;
        for message in messages {
            let report = match self.publish(
                socket,
                message.topic,
                message.payload,
                message.qos,
                message.retain,
            ) {
                Ok(report) => report,
                Err(e) => {
                    warn!("[mqtt] Publishing to {} failed: {e}", message.topic);
                    break;
                }
            };
            if !report.is_delivered() {
                warn!(
                    "[mqtt] Message {} to {} not delivered: {:?}",
                    report.message_id, message.topic, report.outcome
                );
                break;
            }
            delivered += 1;
        }
        info!("[mqtt] Delivered {delivered}/{} messages", messages.len());
        Ok(delivered)
    }
}
