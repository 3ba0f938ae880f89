//! Desktop end of the GPS telemetry link.
//!
//! Publishes a random fix every period and logs every fix received from the
//! device. Settings come from flags, the environment or a `.env` file.

use clap::Parser;
use gpslink::config::{LinkConfig, Role};
use gpslink::link::{CancellationToken, ConnectError, ReconnectPolicy, Scheduler, SessionManager};
use gpslink::network::mqtt::QoS;
use gpslink::network::tcp::TcpConnector;
use gpslink::telemetry::source::RandomSource;
use gpslink::telemetry::{AnyCodec, CodecKind};
use gpslink::time::{StdClock, StdDelay, SystemWallClock};
use gpslink::TelemetrySample;
use log::{error, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "gpslink")]
#[command(about = "Periodic GPS telemetry over MQTT", version)]
struct Cli {
    /// Broker host name or address
    #[arg(long, env = "GPSLINK_HOST", default_value = gpslink::config::DEFAULT_HOST)]
    host: String,

    /// Broker port
    #[arg(long, env = "GPSLINK_PORT", default_value_t = gpslink::config::DEFAULT_PORT)]
    port: u16,

    /// Which end of the link to play
    #[arg(long, env = "GPSLINK_ROLE", value_enum, default_value_t = Role::Desktop)]
    role: Role,

    /// Payload encoding
    #[arg(long, env = "GPSLINK_CODEC", value_enum, default_value_t = CodecKind::Frame)]
    codec: CodecKind,

    /// Publish period in milliseconds
    #[arg(long, env = "GPSLINK_PERIOD_MS", default_value_t = 1000)]
    period_ms: u64,

    /// QoS of outbound samples
    #[arg(
        long,
        env = "GPSLINK_QOS",
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(0..=1)
    )]
    qos: u8,

    /// MQTT client id; defaults to one derived from the role
    #[arg(long, env = "GPSLINK_CLIENT_ID")]
    client_id: Option<String>,

    /// MQTT keep-alive in seconds, 0 to disable
    #[arg(long, env = "GPSLINK_KEEP_ALIVE", default_value_t = 60)]
    keep_alive: u16,

    /// Delay before redialling a lost broker in milliseconds, 0 to never redial
    #[arg(long, env = "GPSLINK_RECONNECT_MS", default_value_t = 2000)]
    reconnect_ms: u64,

    /// Device identifier stamped on generated samples
    #[arg(long, env = "GPSLINK_DEVICE", default_value_t = 0x6770_736c)]
    device: u64,
}

impl Cli {
    fn link_config(&self) -> Result<LinkConfig, gpslink::config::ConfigError> {
        let mut config = LinkConfig::for_role(self.role);
        config.set_host(&self.host)?;
        if let Some(client_id) = &self.client_id {
            config.set_client_id(client_id)?;
        }
        config.port = self.port;
        config.period = Duration::from_millis(self.period_ms);
        config.qos = QoS::from_bits(self.qos).unwrap_or(QoS::AtLeastOnce);
        config.codec = self.codec;
        config.keep_alive_seconds = self.keep_alive;
        config.device = self.device;
        config.reconnect = match self.reconnect_ms {
            0 => ReconnectPolicy::Manual,
            ms => ReconnectPolicy::Backoff(Duration::from_millis(ms)),
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match cli.link_config() {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let token = Arc::new(CancellationToken::new());
    let handler_token = token.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("cannot install Ctrl-C handler: {err}");
    }

    let clock = StdClock::new();
    let connector = TcpConnector::new(config.connect_timeout);
    let mut session = SessionManager::new(connector, clock, &config);

    info!(
        "{:?} link to {}:{}, publishing on {} every {:?}",
        cli.role,
        config.host,
        config.port,
        config.topics.publish,
        config.period
    );
    match session.connect(&config.host, config.port) {
        Ok(()) => {}
        Err(err @ ConnectError::ProtocolRejected(_)) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
        Err(err) => warn!("{err}; will keep retrying"),
    }

    let source = RandomSource::new(config.device, StdRng::from_entropy(), SystemWallClock);
    let mut scheduler = Scheduler::new(
        source,
        AnyCodec::new(config.codec),
        clock,
        &config.topics,
        config.period,
    );
    let mut on_sample = |topic: &str, sample: &TelemetrySample| {
        println!("{topic}: {sample}");
    };

    let stats = scheduler.run(&mut session, &mut on_sample, &mut StdDelay, &token);
    info!("published {} samples, received {}", stats.published, stats.received);
    ExitCode::SUCCESS
}
