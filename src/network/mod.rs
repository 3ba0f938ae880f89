//! A network abstraction layer for embedded systems
//!
//! The traits here let the MQTT client run over any byte stream: a
//! `std::net::TcpStream` on the desktop, a smoltcp/embassy socket on a
//! microcontroller, or an in-memory mock in tests.
//!
//! Reads are non-blocking: when nothing is pending a transport reports
//! [`Error::WouldBlock`](error::Error::WouldBlock) and `Ok(0)` means the peer
//! closed the stream.

#![deny(unsafe_code)]

use core::time::Duration;

/// Common error types for network operations
pub mod error;

/// MQTT 3.1.1 client
pub mod mqtt;

/// TCP transport backed by `std::net`
#[cfg(feature = "std")]
pub mod tcp;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, Read, Write};
}

/// Non-blocking read half of a connection.
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug + Into<error::Error>;

    /// Read whatever data is pending without waiting for more.
    ///
    /// Returns `Ok(0)` once the peer has closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Wait up to `timeout` for data to become readable.
    ///
    /// Returns `Ok(true)` if a following [`read`](Read::read) may make
    /// progress and `Ok(false)` once `timeout` passed with nothing to read.
    /// Transports without a readiness primitive keep the default, which
    /// returns immediately and leaves the caller polling `read`.
    fn wait_readable(&mut self, _timeout: Duration) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Write half of a connection.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug + Into<error::Error>;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Releases a connection.
pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug + Into<error::Error>;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug + Into<error::Error>;
    /// Open a connection to `remote`, given as `host:port`
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}
