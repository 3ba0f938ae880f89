//! Link configuration.
//!
//! [`LinkConfig`] gathers everything the session and scheduler need. The
//! defaults describe the desktop test client talking to a broker on
//! `localhost:1883`; [`LinkConfig::validate`] rejects values the link cannot
//! run with.

use crate::link::ReconnectPolicy;
use crate::network::mqtt::{MAX_TOPIC_LEN, QoS};
use crate::telemetry::CodecKind;
use core::time::Duration;
use heapless::String;

/// Broker host used when none is configured.
pub const DEFAULT_HOST: &str = "localhost";
/// Standard unencrypted MQTT port.
pub const DEFAULT_PORT: u16 = 1883;
/// Publish period used when none is configured.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Longest host name accepted (RFC 1035).
pub const MAX_HOST_LEN: usize = 253;
/// Longest client identifier accepted.
pub const MAX_CLIENT_ID_LEN: usize = 64;

/// Topic the device publishes on and the desktop listens to.
pub const DEVICE_TO_DESKTOP: &str = "esp32/gps/publish";
/// Topic the desktop publishes on and the device listens to.
pub const DESKTOP_TO_DEVICE: &str = "esp32/gps/subscribe";

/// Which end of the link this process is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Role {
    /// The desktop test client.
    #[default]
    Desktop,
    /// The GPS device.
    Device,
}

/// Configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The broker host is empty.
    #[error("broker host is empty")]
    EmptyHost,
    /// Port zero cannot be connected to.
    #[error("broker port is zero")]
    ZeroPort,
    /// The publish period is zero.
    #[error("publish period is zero")]
    ZeroPeriod,
    /// Deadlines are kept in milliseconds, so the period must be a whole
    /// number of them.
    #[error("publish period is not a whole number of milliseconds")]
    FractionalPeriod,
    /// The client identifier is empty.
    #[error("client id is empty")]
    EmptyClientId,
    /// A topic is empty, or the publish topic contains a wildcard.
    #[error("invalid {0} topic")]
    InvalidTopic(&'static str),
    /// A string does not fit its buffer; names the setting.
    #[error("{0} is too long")]
    TooLong(&'static str),
    /// Exactly-once delivery is not supported.
    #[error("QoS 2 is not supported")]
    UnsupportedQos,
    /// Publish and subscribe topics are the same, so the link would hear
    /// its own samples.
    #[error("publish and subscribe topics are identical")]
    LoopbackTopics,
}

/// The pair of topics one end of the link uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Outbound samples are published here.
    pub publish: String<MAX_TOPIC_LEN>,
    /// Inbound samples are expected here.
    pub subscribe: String<MAX_TOPIC_LEN>,
}

impl Topics {
    /// Build a topic pair, checking lengths.
    pub fn new(publish: &str, subscribe: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            publish: String::try_from(publish).map_err(|_| ConfigError::TooLong("publish topic"))?,
            subscribe: String::try_from(subscribe)
                .map_err(|_| ConfigError::TooLong("subscribe topic"))?,
        })
    }

    /// The fixed topics of `role`.
    pub fn for_role(role: Role) -> Self {
        let (publish, subscribe) = match role {
            Role::Desktop => (DESKTOP_TO_DEVICE, DEVICE_TO_DESKTOP),
            Role::Device => (DEVICE_TO_DESKTOP, DESKTOP_TO_DEVICE),
        };
        let mut topics = Self {
            publish: String::new(),
            subscribe: String::new(),
        };
        // Both constants are far below MAX_TOPIC_LEN.
        let _ = topics.publish.push_str(publish);
        let _ = topics.subscribe.push_str(subscribe);
        topics
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.publish.is_empty() || self.publish.contains(['+', '#']) {
            return Err(ConfigError::InvalidTopic("publish"));
        }
        if self.subscribe.is_empty() {
            return Err(ConfigError::InvalidTopic("subscribe"));
        }
        if self.publish == self.subscribe {
            return Err(ConfigError::LoopbackTopics);
        }
        Ok(())
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::for_role(Role::Desktop)
    }
}

/// Everything needed to run one end of the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Broker host name or address.
    pub host: String<MAX_HOST_LEN>,
    /// Broker port.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: String<MAX_CLIENT_ID_LEN>,
    /// Publish and subscribe topics.
    pub topics: Topics,
    /// Publish period.
    pub period: Duration,
    /// MQTT keep-alive in seconds; zero disables pings.
    pub keep_alive_seconds: u16,
    /// Bound on each handshake wait.
    pub connect_timeout: Duration,
    /// Delivery level of outbound samples.
    pub qos: QoS,
    /// Payload encoding.
    pub codec: CodecKind,
    /// What the session does after losing the broker.
    pub reconnect: ReconnectPolicy,
    /// Identifier stamped on generated samples.
    pub device: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let mut host = String::new();
        let _ = host.push_str(DEFAULT_HOST);
        let mut client_id = String::new();
        let _ = client_id.push_str("gpslink");
        Self {
            host,
            port: DEFAULT_PORT,
            client_id,
            topics: Topics::default(),
            period: DEFAULT_PERIOD,
            keep_alive_seconds: 60,
            connect_timeout: Duration::from_secs(5),
            qos: QoS::AtLeastOnce,
            codec: CodecKind::Frame,
            reconnect: ReconnectPolicy::Manual,
            device: 0x0000_0000_6770_736c,
        }
    }
}

impl LinkConfig {
    /// Defaults for `role`: its topics and a matching client id.
    pub fn for_role(role: Role) -> Self {
        let mut config = Self {
            topics: Topics::for_role(role),
            ..Self::default()
        };
        config.client_id.clear();
        let _ = config.client_id.push_str(match role {
            Role::Desktop => "gpslink-desktop",
            Role::Device => "gpslink-device",
        });
        config
    }

    /// Replace the broker host.
    pub fn set_host(&mut self, host: &str) -> Result<(), ConfigError> {
        self.host = String::try_from(host).map_err(|_| ConfigError::TooLong("host"))?;
        Ok(())
    }

    /// Replace the client identifier.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<(), ConfigError> {
        self.client_id =
            String::try_from(client_id).map_err(|_| ConfigError::TooLong("client id"))?;
        Ok(())
    }

    /// Check that the link can run with this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.period.subsec_nanos() % 1_000_000 != 0 {
            return Err(ConfigError::FractionalPeriod);
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        if self.qos == QoS::ExactlyOnce {
            return Err(ConfigError::UnsupportedQos);
        }
        self.topics.validate()
    }
}
