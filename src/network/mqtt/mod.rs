//! MQTT 3.1.1 protocol implementation for embedded systems.
//!
//! A small client for `no_std` environments that speaks just enough of MQTT
//! 3.1.1 to carry telemetry: CONNECT/CONNACK, PUBLISH at QoS 0 and 1,
//! SUBSCRIBE/UNSUBSCRIBE, keep-alive pings and DISCONNECT.
//!
//! # Protocol Overview
//!
//! MQTT uses a publish-subscribe pattern where:
//! - **Publishers** send messages to topics
//! - **Subscribers** receive messages from topics they're interested in
//! - **Brokers** route messages between publishers and subscribers
//!
//! The [`Client`] runs over any [`Connection`](crate::network::Connection).
//! Packet encoding and stream framing live in [`packet`].
//!
//! ```rust
//! use gpslink::network::mqtt::{Options, QoS};
//! use core::time::Duration;
//!
//! let options = Options {
//!     client_id: "gps-desktop",
//!     keep_alive_seconds: 60,
//!     clean_session: true,
//!     qos: QoS::AtLeastOnce,
//!     connect_timeout: Duration::from_secs(5),
//! };
//! assert_eq!(options.keep_alive_seconds, 60);
//! ```

use crate::network::error::Error as NetError;

/// MQTT client
pub mod client;

/// Control packet encoding and stream framing
pub mod packet;

pub use client::{Client, Incoming, Options, PublishPacket};
pub use packet::{ConnectReturnCode, QoS, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN};

/// Errors raised by the MQTT client.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError {
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] NetError),
    /// The broker answered CONNECT with a non-zero return code.
    #[error("connection refused by broker: {0:?}")]
    Refused(ConnectReturnCode),
    /// The broker refused a subscription.
    #[error("subscription rejected by broker")]
    SubscriptionRejected,
    /// A packet did not follow the MQTT wire format.
    #[error("malformed packet")]
    Malformed,
    /// A packet of a type that makes no sense at this point.
    #[error("unexpected packet type {0}")]
    UnexpectedPacket(u8),
    /// A topic, payload or packet exceeds the fixed buffers.
    #[error("packet too large")]
    TooLarge,
    /// Empty topic, or a wildcard in a topic name.
    #[error("invalid topic")]
    InvalidTopic,
    /// No reply arrived in time; names the packet that was awaited.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// The transport could not take the packet without blocking. Nothing
    /// was written.
    #[error("transport busy, packet not sent")]
    Busy,
    /// The broker stopped answering keep-alive pings.
    #[error("keep-alive expired")]
    KeepAliveExpired,
}

impl MqttError {
    /// Whether the connection is unusable after this error.
    ///
    /// Oversized or invalid publishes are rejected locally and a busy
    /// transport wrote nothing, so those leave the connection intact;
    /// everything else means the stream is out of sync or gone.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MqttError::TooLarge | MqttError::InvalidTopic | MqttError::Busy
        )
    }
}
