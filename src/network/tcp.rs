//! TCP transport for hosted targets.
//!
//! [`TcpConnector`] resolves `host:port` with the system resolver, logs every
//! address it got back and connects to the first one that accepts. Both steps
//! block, the connect for at most the configured timeout per address. The
//! resulting [`TcpConnection`] is non-blocking in both directions; only
//! [`Read::wait_readable`] waits, and only as long as it is told to.

use super::error::Error;
use super::{Close, Connect, Connection, Read, Write};
use core::time::Duration;
use log::{debug, info, warn};
use std::io::{Read as StdRead, Write as StdWrite};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

/// Opens TCP connections to a broker.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector with the given per-address connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn resolve(remote: &str) -> Result<Vec<SocketAddr>, Error> {
        let addrs: Vec<SocketAddr> = remote
            .to_socket_addrs()
            .map_err(|err| {
                warn!("resolution of {remote} failed: {err}");
                Error::InvalidAddress
            })?
            .collect();

        if addrs.is_empty() {
            warn!("{remote} resolved to no addresses");
            return Err(Error::InvalidAddress);
        }
        for (i, addr) in addrs.iter().enumerate() {
            debug!("{remote} address #{}: {addr}", i + 1);
        }
        Ok(addrs)
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Connect for TcpConnector {
    type Connection = TcpConnection;
    type Error = Error;

    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error> {
        let mut last_err = Error::ConnectionRefused;

        for addr in Self::resolve(remote)? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_nonblocking(true)?;
                    info!("connected to {remote} via {addr}");
                    return Ok(TcpConnection { stream });
                }
                Err(err) => {
                    debug!("connect to {addr} failed: {err}");
                    last_err = err.into();
                }
            }
        }

        Err(last_err)
    }
}

/// A connected, non-blocking TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl Read for TcpConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(self.stream.read(buf)?)
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, Self::Error> {
        if timeout.is_zero() {
            return Ok(false);
        }
        self.stream.set_nonblocking(false)?;
        self.stream.set_read_timeout(Some(timeout))?;
        let mut probe = [0u8; 1];
        let readable = match self.stream.peek(&mut probe) {
            // Zero bytes is end of stream; the next read reports it.
            Ok(_) => Ok(true),
            Err(err) => match Error::from(err) {
                Error::WouldBlock | Error::Timeout => Ok(false),
                other => Err(other),
            },
        };
        self.stream.set_nonblocking(true)?;
        readable
    }
}

impl Write for TcpConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        // A full send buffer surfaces as `WouldBlock`.
        self.stream.write(buf).map_err(|err| match Error::from(err) {
            Error::ReadError => Error::WriteError,
            other => other,
        })
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush().map_err(|_| Error::WriteError)
    }
}

impl Close for TcpConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already torn down by the peer.
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Connection for TcpConnection {}
