//! The Session Manager: one MQTT connection, its subscription, and what
//! happens when it breaks.
//!
//! State moves `Disconnected -> Connecting -> Connected -> Disconnected`.
//! `Connected` is only reached after an accepted CONNACK and a granted
//! SUBACK for the inbound topic. Any transport failure observed while
//! publishing or polling drops the session and queues a
//! [`InboundEvent::Disconnected`].
//!
//! [`SessionManager::poll`] and [`SessionManager::publish`] never wait on
//! the network. Dialling does: name resolution, the TCP connect and the
//! CONNACK/SUBACK waits are each bounded by the connect timeout. So with
//! [`ReconnectPolicy::Backoff`] the session only marks itself
//! [`reconnect_due`](SessionManager::reconnect_due) and leaves the call to
//! [`reconnect`](SessionManager::reconnect) to its owner, which
//! [`Scheduler::run`](super::Scheduler::run) makes between ticks.

use super::{InboundEvent, POLL_BATCH, Session};
use crate::config::{LinkConfig, MAX_CLIENT_ID_LEN, MAX_HOST_LEN};
use crate::network::Connect;
use crate::network::error::Error as NetError;
use crate::network::mqtt::{
    Client, ConnectReturnCode, Incoming, MAX_TOPIC_LEN, MqttError, Options, QoS,
};
use crate::time::{Clock, Instant};
use core::fmt::Write as _;
use core::time::Duration;
use heapless::{Deque, String, Vec};
use log::{debug, error, info, warn};

/// `host:port` with room for the longest host name.
const ENDPOINT_LEN: usize = MAX_HOST_LEN + 6;

/// Why [`SessionManager::connect`] failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectError {
    /// The broker could not be reached, or the transport failed during the
    /// handshake.
    #[error("broker unreachable: {0}")]
    Unreachable(NetError),
    /// The broker refused the connection.
    #[error("broker rejected connection: {0:?}")]
    ProtocolRejected(ConnectReturnCode),
    /// The broker answered with something that is not a valid handshake.
    #[error("handshake failed: {0}")]
    Handshake(MqttError),
    /// The host and port do not form a usable endpoint.
    #[error("invalid broker endpoint")]
    InvalidEndpoint,
}

impl From<MqttError> for ConnectError {
    fn from(err: MqttError) -> Self {
        match err {
            MqttError::Refused(code) => ConnectError::ProtocolRejected(code),
            MqttError::Transport(err) => ConnectError::Unreachable(err),
            MqttError::Timeout(_) | MqttError::KeepAliveExpired => {
                ConnectError::Unreachable(NetError::Timeout)
            }
            other => ConnectError::Handshake(other),
        }
    }
}

/// Why [`SessionManager::publish`] failed. The payload is dropped either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError {
    /// No session is established.
    #[error("not connected")]
    NotConnected,
    /// The client could not send the message.
    #[error("publish failed: {0}")]
    TransportFailure(MqttError),
}

/// What the session does after an unexpected disconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Stay disconnected until [`SessionManager::connect`] is called.
    #[default]
    Manual,
    /// Make the last endpoint due for redialling this long after a loss, and
    /// again after each failed attempt.
    Backoff(Duration),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// No connection.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected and subscribed.
    Connected,
}

/// Owns the broker connection. See the [module documentation](self).
pub struct SessionManager<K: Connect, C: Clock> {
    connector: K,
    clock: C,
    client: Option<Client<K::Connection>>,
    state: SessionState,
    endpoint: Option<String<ENDPOINT_LEN>>,
    client_id: String<MAX_CLIENT_ID_LEN>,
    inbound_topic: String<MAX_TOPIC_LEN>,
    keep_alive_seconds: u16,
    connect_timeout: Duration,
    qos: QoS,
    reconnect: ReconnectPolicy,
    retry_at: Option<Instant>,
    events: Deque<InboundEvent, 4>,
    closed: bool,
}

impl<K: Connect, C: Clock> SessionManager<K, C> {
    /// A disconnected session that will subscribe to
    /// `config.topics.subscribe` once connected.
    pub fn new(connector: K, clock: C, config: &LinkConfig) -> Self {
        Self {
            connector,
            clock,
            client: None,
            state: SessionState::Disconnected,
            endpoint: None,
            client_id: config.client_id.clone(),
            inbound_topic: config.topics.subscribe.clone(),
            keep_alive_seconds: config.keep_alive_seconds,
            connect_timeout: config.connect_timeout,
            qos: config.qos,
            reconnect: config.reconnect,
            retry_at: None,
            events: Deque::new(),
            closed: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is connected and subscribed.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The last endpoint passed to [`connect`](Self::connect), as
    /// `host:port`.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Connect to `host:port`, then subscribe to the inbound topic.
    ///
    /// Returns once the subscription is granted. Calling it while connected
    /// does nothing. A failed attempt leaves the session disconnected; under
    /// [`ReconnectPolicy::Backoff`] it becomes
    /// [`reconnect_due`](Self::reconnect_due) after the delay.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), ConnectError> {
        if self.is_connected() {
            debug!("connect() while connected; ignoring");
            return Ok(());
        }
        if host.is_empty() {
            return Err(ConnectError::InvalidEndpoint);
        }
        let mut endpoint = String::new();
        write!(endpoint, "{host}:{port}").map_err(|_| ConnectError::InvalidEndpoint)?;
        self.endpoint = Some(endpoint);
        self.closed = false;
        self.attempt()
    }

    /// Publish `payload` on `topic`.
    ///
    /// Fails immediately when not connected. A transport failure drops the
    /// session; an oversized topic or payload does not.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let Some(client) = self.client.as_mut().filter(|_| self.state == SessionState::Connected)
        else {
            return Err(PublishError::NotConnected);
        };
        match client.publish(topic, payload, self.clock.now()) {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.is_fatal() {
                    self.drop_session(err);
                }
                Err(PublishError::TransportFailure(err))
            }
        }
    }

    /// Collect state transitions and inbound traffic without blocking.
    ///
    /// Queued transitions come first, then at most [`POLL_BATCH`] items in
    /// total. Also drives keep-alive. Never dials; see
    /// [`reconnect`](Self::reconnect).
    pub fn poll(&mut self) -> Vec<InboundEvent, POLL_BATCH> {
        let mut out = Vec::new();
        self.drain_events(&mut out);

        while !out.is_full() {
            let Some(client) = self.client.as_mut() else {
                break;
            };
            match client.poll(&self.clock) {
                Ok(Some(Incoming::Message(message))) => {
                    let _ = out.push(InboundEvent::Message {
                        topic: message.topic,
                        payload: message.payload,
                    });
                }
                Ok(Some(Incoming::Delivered(packet_id))) => {
                    let _ = out.push(InboundEvent::Delivered(packet_id));
                }
                Ok(None) => break,
                Err(err) if !err.is_fatal() => {
                    debug!("poll deferred: {err}");
                    break;
                }
                Err(err) => {
                    self.drop_session(err);
                    self.drain_events(&mut out);
                    break;
                }
            }
        }
        out
    }

    /// Whether the backoff delay after a loss has run out and
    /// [`reconnect`](Self::reconnect) should be called.
    pub fn reconnect_due(&self) -> bool {
        self.state == SessionState::Disconnected && self.retry_due()
    }

    /// Dial the last endpoint again and resubscribe.
    ///
    /// Blocks for the handshake like [`connect`](Self::connect). Does nothing
    /// while connected.
    pub fn reconnect(&mut self) -> Result<(), ConnectError> {
        if self.is_connected() {
            return Ok(());
        }
        self.closed = false;
        self.attempt()
    }

    /// Unsubscribe, send DISCONNECT and close the transport.
    ///
    /// Idempotent. Disables automatic reconnects until the next
    /// [`connect`](Self::connect). Failures along the way are logged.
    pub fn disconnect(&mut self) {
        self.closed = true;
        self.retry_at = None;
        let Some(mut client) = self.client.take() else {
            self.state = SessionState::Disconnected;
            return;
        };

        if let Err(err) = client.unsubscribe(&self.inbound_topic, &self.clock) {
            warn!("unsubscribe from {} failed: {err}", self.inbound_topic);
        }
        match client.disconnect() {
            Ok(()) => info!("disconnected from broker"),
            Err(err) => warn!("disconnect was not clean: {err}"),
        }
        self.set_disconnected();
    }

    fn attempt(&mut self) -> Result<(), ConnectError> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Err(ConnectError::InvalidEndpoint);
        };
        self.state = SessionState::Connecting;
        self.retry_at = None;
        info!("connecting to {endpoint}");

        match self.handshake(&endpoint) {
            Ok(client) => {
                info!("connected to {endpoint}, subscribed to {}", self.inbound_topic);
                self.client = Some(client);
                self.state = SessionState::Connected;
                self.queue(InboundEvent::Connected);
                Ok(())
            }
            Err(err) => {
                error!("connection to {endpoint} failed: {err}");
                self.state = SessionState::Disconnected;
                self.schedule_retry();
                Err(err)
            }
        }
    }

    fn handshake(&mut self, endpoint: &str) -> Result<Client<K::Connection>, ConnectError> {
        let connection = self
            .connector
            .connect(endpoint)
            .map_err(|err| ConnectError::Unreachable(err.into()))?;

        let options = Options {
            client_id: &self.client_id,
            keep_alive_seconds: self.keep_alive_seconds,
            clean_session: true,
            qos: self.qos,
            connect_timeout: self.connect_timeout,
        };
        let mut client = Client::connect(connection, options, &self.clock)?;

        match client.subscribe(&self.inbound_topic, &self.clock) {
            Ok(granted) => {
                debug!("subscription granted at {granted:?}");
                Ok(client)
            }
            Err(err) => {
                client.abort();
                Err(err.into())
            }
        }
    }

    fn drop_session(&mut self, err: MqttError) {
        warn!("session lost: {err}");
        if let Some(client) = self.client.take() {
            client.abort();
        }
        self.set_disconnected();
        self.schedule_retry();
    }

    fn set_disconnected(&mut self) {
        if self.state != SessionState::Disconnected {
            self.state = SessionState::Disconnected;
            self.queue(InboundEvent::Disconnected);
        }
    }

    fn schedule_retry(&mut self) {
        if let (ReconnectPolicy::Backoff(delay), false) = (self.reconnect, self.closed) {
            self.retry_at = Some(self.clock.now() + delay);
        }
    }

    fn retry_due(&self) -> bool {
        matches!(self.retry_at, Some(at) if self.clock.now() >= at)
    }

    fn queue(&mut self, event: InboundEvent) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    fn drain_events(&mut self, out: &mut Vec<InboundEvent, POLL_BATCH>) {
        while !out.is_full() {
            let Some(event) = self.events.pop_front() else {
                break;
            };
            let _ = out.push(event);
        }
    }
}

impl<K: Connect, C: Clock> core::fmt::Debug for SessionManager<K, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state)
            .field("endpoint", &self.endpoint)
            .field("inbound_topic", &self.inbound_topic)
            .field("reconnect", &self.reconnect)
            .field("retry_at", &self.retry_at)
            .finish_non_exhaustive()
    }
}

impl<K: Connect, C: Clock> Session for SessionManager<K, C> {
    fn poll(&mut self) -> Vec<InboundEvent, POLL_BATCH> {
        SessionManager::poll(self)
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        SessionManager::publish(self, topic, payload)
    }

    fn is_connected(&self) -> bool {
        SessionManager::is_connected(self)
    }

    fn disconnect(&mut self) {
        SessionManager::disconnect(self)
    }

    fn reconnect_due(&self) -> bool {
        SessionManager::reconnect_due(self)
    }

    fn reconnect(&mut self) -> Result<(), ConnectError> {
        SessionManager::reconnect(self)
    }
}
