//! The telemetry link: a broker session and the loop that feeds it.
//!
//! [`SessionManager`] owns the MQTT connection. [`Scheduler`] ticks at a
//! fixed period, publishing one encoded sample per due tick and decoding
//! whatever arrives on the inbound topic. Both run on one thread and
//! nothing on the tick path blocks; redialling a lost broker happens
//! between ticks.

use crate::network::mqtt::{MAX_PAYLOAD_LEN, MAX_TOPIC_LEN};
use heapless::{String, Vec};

/// Publish Scheduler
pub mod scheduler;

/// Session Manager
pub mod session;

/// Shutdown signalling
pub mod shutdown;

pub use scheduler::{LinkStats, SampleHandler, Scheduler, TickOutcome};
pub use session::{ConnectError, PublishError, ReconnectPolicy, SessionManager, SessionState};
pub use shutdown::CancellationToken;

/// Most events returned by one [`Session::poll`].
pub const POLL_BATCH: usize = 8;

/// Something the session observed since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// The session became connected and subscribed.
    Connected,
    /// The session was lost or closed.
    Disconnected,
    /// A message arrived on a subscribed topic.
    Message {
        /// Topic the message was published on.
        topic: String<MAX_TOPIC_LEN>,
        /// Raw payload.
        payload: Vec<u8, MAX_PAYLOAD_LEN>,
    },
    /// The broker acknowledged the QoS 1 publish with this packet id.
    Delivered(u16),
}

/// The operations the scheduler needs from a broker session.
pub trait Session {
    /// Non-blocking collection of state changes and inbound messages.
    fn poll(&mut self) -> Vec<InboundEvent, POLL_BATCH>;

    /// Publish `payload` on `topic`.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// Whether publishing can succeed right now.
    fn is_connected(&self) -> bool;

    /// Release the subscription and the connection.
    fn disconnect(&mut self);

    /// Whether a lost session is waiting to be redialled.
    fn reconnect_due(&self) -> bool {
        false
    }

    /// Redial the last endpoint. May block for the handshake, so callers
    /// keep it off the tick path.
    fn reconnect(&mut self) -> Result<(), ConnectError> {
        Ok(())
    }
}
