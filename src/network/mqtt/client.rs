//! An MQTT client implementation based on the MQTT 3.1.1 specification.
//!
//! The client owns its [`Connection`] and never blocks in [`Client::poll`] or
//! [`Client::publish`]: a write the transport cannot take at once fails with
//! [`MqttError::Busy`]. Only the handshakes ([`Client::connect`],
//! [`Client::subscribe`], [`Client::unsubscribe`]) wait for a reply, and they
//! give up once [`Options::connect_timeout`] has elapsed on the supplied
//! [`Clock`].

use super::MqttError;
use super::packet::{
    self, ConnectReturnCode, Frame, FrameReader, MAX_PACKET_LEN, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN,
    Packet, QoS,
};
use crate::network::Connection;
use crate::network::error::Error as NetError;
use crate::time::{Clock, Instant};
use core::time::Duration;
use heapless::{Deque, String, Vec};
use log::{debug, trace, warn};

/// Inbound items held between polls.
const BACKLOG: usize = 8;

/// An incoming MQTT publish message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublishPacket {
    /// The topic on which the message was published.
    pub topic: String<MAX_TOPIC_LEN>,
    /// The message payload data.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

/// Something the broker sent that the application may care about.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Incoming {
    /// A message on a subscribed topic.
    Message(PublishPacket),
    /// The broker acknowledged a QoS 1 publish.
    Delivered(u16),
}

/// Configuration options for MQTT client connection.
#[derive(Debug, Clone, Copy)]
pub struct Options<'a> {
    /// Unique identifier for this client, sent in CONNECT.
    pub client_id: &'a str,
    /// Keep-alive interval in seconds; zero disables pings.
    pub keep_alive_seconds: u16,
    /// Ask the broker to discard any previous session state.
    pub clean_session: bool,
    /// QoS for outbound publishes and subscriptions. Exactly-once is not
    /// supported and is downgraded to at-least-once.
    pub qos: QoS,
    /// Upper bound on every handshake wait.
    pub connect_timeout: Duration,
}

impl Default for Options<'_> {
    fn default() -> Self {
        Self {
            client_id: "gpslink",
            keep_alive_seconds: 60,
            clean_session: true,
            qos: QoS::AtLeastOnce,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Acknowledgements a handshake may be waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    ConnAck(ConnectReturnCode),
    SubAck { packet_id: u16, granted: Option<QoS> },
    UnsubAck(u16),
}

/// An MQTT client.
#[derive(Debug)]
pub struct Client<C: Connection> {
    connection: C,
    reader: FrameReader<MAX_PACKET_LEN>,
    backlog: Deque<Incoming, BACKLOG>,
    next_packet_id: u16,
    qos: QoS,
    keep_alive: Duration,
    connect_timeout: Duration,
    last_sent: Instant,
    ping_sent: Option<Instant>,
}

impl<C: Connection> Client<C> {
    /// Send CONNECT over `connection` and wait for the CONNACK.
    ///
    /// A non-zero return code yields [`MqttError::Refused`]; the connection
    /// is dropped in every error case.
    pub fn connect<K: Clock>(
        connection: C,
        options: Options<'_>,
        clock: &K,
    ) -> Result<Self, MqttError> {
        let mut client = Self {
            connection,
            reader: FrameReader::new(),
            backlog: Deque::new(),
            next_packet_id: 1,
            qos: options.qos.min(QoS::AtLeastOnce),
            keep_alive: Duration::from_secs(u64::from(options.keep_alive_seconds)),
            connect_timeout: options.connect_timeout,
            last_sent: clock.now(),
            ping_sent: None,
        };

        let connect = packet::encode_connect(
            options.client_id,
            options.keep_alive_seconds,
            options.clean_session,
        )?;
        client.send(&connect, clock.now())?;
        debug!("CONNECT sent as {}", options.client_id);

        let code = client.await_reply(clock, "CONNACK", |reply| match reply {
            Reply::ConnAck(code) => Some(code),
            _ => None,
        })?;
        if code != ConnectReturnCode::Accepted {
            return Err(MqttError::Refused(code));
        }
        Ok(client)
    }

    /// Subscribe to `filter` and wait for the SUBACK. Returns the granted QoS.
    pub fn subscribe<K: Clock>(&mut self, filter: &str, clock: &K) -> Result<QoS, MqttError> {
        let id = self.packet_id();
        let subscribe = packet::encode_subscribe(id, filter, self.qos)?;
        self.send(&subscribe, clock.now())?;
        debug!("SUBSCRIBE {filter} (id {id})");

        let granted = self.await_reply(clock, "SUBACK", |reply| match reply {
            Reply::SubAck { packet_id, granted } if packet_id == id => Some(granted),
            _ => None,
        })?;
        granted.ok_or(MqttError::SubscriptionRejected)
    }

    /// Unsubscribe from `filter` and wait for the UNSUBACK.
    pub fn unsubscribe<K: Clock>(&mut self, filter: &str, clock: &K) -> Result<(), MqttError> {
        let id = self.packet_id();
        let unsubscribe = packet::encode_unsubscribe(id, filter)?;
        self.send(&unsubscribe, clock.now())?;
        debug!("UNSUBSCRIBE {filter} (id {id})");

        self.await_reply(clock, "UNSUBACK", |reply| match reply {
            Reply::UnsubAck(packet_id) if packet_id == id => Some(()),
            _ => None,
        })
    }

    /// Publish `payload` on `topic` at the configured QoS.
    ///
    /// Returns the packet identifier for QoS 1; its PUBACK surfaces later as
    /// [`Incoming::Delivered`]. Messages are not retransmitted.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: Instant,
    ) -> Result<Option<u16>, MqttError> {
        let packet_id = match self.qos {
            QoS::AtMostOnce => None,
            _ => Some(self.packet_id()),
        };
        let publish = packet::encode_publish(topic, payload, self.qos, packet_id, false)?;
        self.send(&publish, now)?;
        trace!("PUBLISH {topic} ({} bytes, id {packet_id:?})", payload.len());
        Ok(packet_id)
    }

    /// Process whatever the broker has sent and return the next inbound item.
    ///
    /// Never waits. Also drives keep-alive: a PINGREQ goes out after a full
    /// interval without traffic, and a missing PINGRESP one interval later
    /// fails with [`MqttError::KeepAliveExpired`].
    pub fn poll<K: Clock>(&mut self, clock: &K) -> Result<Option<Incoming>, MqttError> {
        loop {
            while !self.backlog.is_full() {
                let Some(frame) = self.reader.next_frame()? else {
                    break;
                };
                if let Some(reply) = self.handle_frame(&frame, clock.now())? {
                    debug!("ignoring unsolicited {reply:?}");
                }
            }
            if !self.backlog.is_empty() || self.reader.fill(&mut self.connection)? == 0 {
                break;
            }
        }

        self.check_keep_alive(clock.now())?;
        Ok(self.backlog.pop_front())
    }

    /// Send DISCONNECT and close the transport.
    pub fn disconnect(mut self) -> Result<(), MqttError> {
        let disconnect = packet::encode_disconnect()?;
        let sent = self.send(&disconnect, self.last_sent);
        let closed = self
            .connection
            .close()
            .map_err(|err| MqttError::Transport(err.into()));
        sent.and(closed)
    }

    /// Drop the transport without telling the broker.
    pub fn abort(self) {
        if let Err(err) = self.connection.close() {
            let err: NetError = err.into();
            debug!("close after failure: {err}");
        }
    }

    fn packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    fn send(&mut self, packet: &[u8], now: Instant) -> Result<(), MqttError> {
        let mut written = 0;
        while written < packet.len() {
            let result: Result<usize, NetError> =
                self.connection.write(&packet[written..]).map_err(Into::into);
            match result {
                Ok(0) => return Err(MqttError::Transport(NetError::WriteError)),
                Ok(n) => written += n,
                // Nothing went out, so the stream is still in sync.
                Err(NetError::WouldBlock) if written == 0 => return Err(MqttError::Busy),
                Err(NetError::WouldBlock) => {
                    return Err(MqttError::Transport(NetError::WriteError));
                }
                Err(err) => return Err(MqttError::Transport(err)),
            }
        }
        self.connection
            .flush()
            .map_err(|err| MqttError::Transport(err.into()))?;
        self.last_sent = now;
        Ok(())
    }

    fn check_keep_alive(&mut self, now: Instant) -> Result<(), MqttError> {
        if self.keep_alive.is_zero() {
            return Ok(());
        }
        match self.ping_sent {
            Some(sent) if now.saturating_duration_since(sent) >= self.keep_alive => {
                warn!("no PINGRESP within {:?}", self.keep_alive);
                Err(MqttError::KeepAliveExpired)
            }
            Some(_) => Ok(()),
            None if now.saturating_duration_since(self.last_sent) >= self.keep_alive => {
                let ping = packet::encode_pingreq()?;
                self.send(&ping, now)?;
                self.ping_sent = Some(now);
                trace!("PINGREQ");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Handle one inbound frame. Acknowledgements are handed back to the
    /// caller; everything else is absorbed here.
    fn handle_frame(
        &mut self,
        frame: &Frame<MAX_PACKET_LEN>,
        now: Instant,
    ) -> Result<Option<Reply>, MqttError> {
        if let Some(declared) = frame.oversized {
            self.drop_oversized(frame, declared, now)?;
            return Ok(None);
        }
        match frame.packet()? {
            Packet::ConnAck { code, .. } => Ok(Some(Reply::ConnAck(code))),
            Packet::SubAck { packet_id, granted } => Ok(Some(Reply::SubAck { packet_id, granted })),
            Packet::UnsubAck { packet_id } => Ok(Some(Reply::UnsubAck(packet_id))),
            Packet::PingResp => {
                trace!("PINGRESP");
                self.ping_sent = None;
                Ok(None)
            }
            Packet::PubAck { packet_id } => {
                self.enqueue(Incoming::Delivered(packet_id));
                Ok(None)
            }
            Packet::Publish {
                topic,
                payload,
                qos,
                packet_id,
                ..
            } => {
                let message = match (String::try_from(topic), Vec::from_slice(payload)) {
                    (Ok(topic), Ok(payload)) => Some(PublishPacket { topic, payload }),
                    _ => {
                        warn!(
                            "dropping oversized message on {topic} ({} bytes)",
                            payload.len()
                        );
                        None
                    }
                };
                if let Some(message) = message {
                    self.enqueue(Incoming::Message(message));
                }
                self.acknowledge(qos, packet_id, now)?;
                Ok(None)
            }
            Packet::Other(kind) => Err(MqttError::UnexpectedPacket(kind)),
        }
    }

    /// Discard a frame too large for the reader. A QoS 1 PUBLISH is still
    /// acknowledged so the broker does not redeliver it.
    fn drop_oversized(
        &mut self,
        frame: &Frame<MAX_PACKET_LEN>,
        declared: usize,
        now: Instant,
    ) -> Result<(), MqttError> {
        match frame.publish_head() {
            Some((topic, qos, packet_id)) => {
                warn!("dropping oversized message on {topic} ({declared} bytes)");
                self.acknowledge(qos, packet_id, now)
            }
            None => {
                warn!(
                    "dropping oversized packet of type {} ({declared} bytes)",
                    frame.header >> 4
                );
                Ok(())
            }
        }
    }

    fn acknowledge(
        &mut self,
        qos: QoS,
        packet_id: Option<u16>,
        now: Instant,
    ) -> Result<(), MqttError> {
        match (qos, packet_id) {
            (QoS::AtMostOnce, _) => Ok(()),
            (QoS::AtLeastOnce, Some(id)) => {
                let ack = packet::encode_puback(id)?;
                self.send(&ack, now)
            }
            (_, _) => {
                warn!("QoS 2 delivery is not supported; message not acknowledged");
                Ok(())
            }
        }
    }

    fn enqueue(&mut self, item: Incoming) {
        if let Err(item) = self.backlog.push_back(item) {
            warn!("inbound backlog full, dropping {item:?}");
        }
    }

    fn await_reply<K: Clock, R>(
        &mut self,
        clock: &K,
        expected: &'static str,
        mut accept: impl FnMut(Reply) -> Option<R>,
    ) -> Result<R, MqttError> {
        let deadline = clock.now() + self.connect_timeout;
        loop {
            while let Some(frame) = self.reader.next_frame()? {
                if let Some(reply) = self.handle_frame(&frame, clock.now())? {
                    match accept(reply) {
                        Some(result) => return Ok(result),
                        None if matches!(reply, Reply::ConnAck(_)) => {
                            return Err(MqttError::UnexpectedPacket(2));
                        }
                        None => debug!("ignoring {reply:?} while waiting for {expected}"),
                    }
                }
            }

            if self.reader.fill(&mut self.connection)? > 0 {
                continue;
            }
            let now = clock.now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                return Err(MqttError::Timeout(expected));
            };
            let readable = self
                .connection
                .wait_readable(remaining)
                .map_err(|err| MqttError::Transport(err.into()))?;
            if !readable {
                return Err(MqttError::Timeout(expected));
            }
        }
    }
}
