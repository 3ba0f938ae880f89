//! # gpslink - GPS telemetry over MQTT
//!
//! Periodically publishes GPS fixes to an MQTT broker and decodes the fixes
//! published by the other end of the link. The same crate runs on a desktop
//! test client and, without `std`, on a microcontroller next to the GPS
//! receiver.
//!
//! ## Components
//!
//! - **Session Manager** ([`link::SessionManager`]): one MQTT 3.1.1
//!   connection, its subscription, keep-alive and reconnects
//! - **Codec Adapter** ([`telemetry::codec`]): [`TelemetrySample`] to bytes
//!   and back, as a fixed binary frame, protobuf or JSON
//! - **Publish Scheduler** ([`link::Scheduler`]): fixed-period, drift-free
//!   publishing plus decoding of inbound samples
//!
//! Transports plug in through the traits in [`network`]; hosted builds get a
//! TCP connector in `network::tcp`.
//!
//! ## Example
//!
//! ```rust
//! use gpslink::telemetry::codec::{Codec, FrameCodec};
//! use gpslink::TelemetrySample;
//!
//! let sample = TelemetrySample {
//!     device: 1,
//!     latitude_e7: 515_074_000,
//!     longitude_e7: -1_278_000,
//!     altitude_mm: 35_000,
//!     radius_mm: 4_500,
//!     speed_mm_s: 0,
//!     satellites: 4,
//!     time_utc: 1_700_000_000,
//! };
//! let payload = FrameCodec.encode(&sample).unwrap();
//! assert_eq!(payload.len(), 39);
//! assert_eq!(FrameCodec.decode(&payload), Ok(sample));
//! ```
//!
//! ## Optional Features
//!
//! - `std`: TCP transport, system clocks and entropy-seeded randomness
//! - `cli`: the `gpslink` desktop binary (implies `std`)
//! - `defmt`: `defmt::Format` for error and state types

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

/// Broker configuration: endpoint, topics, timing.
pub mod config;

/// The telemetry link: session management and the publish loop.
pub mod link;

/// Transport traits, TCP and the MQTT client.
pub mod network;

/// Telemetry samples, codecs and sample sources.
pub mod telemetry;

/// Monotonic time and delays.
pub mod time;

pub use config::{LinkConfig, Role, Topics};
pub use telemetry::TelemetrySample;
