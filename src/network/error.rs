//! Common error types for network operations

/// A common error type for network operations.
///
/// Transports map their native failures onto these variants so the MQTT
/// client can tell a closed stream from a stalled one.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// An operation was attempted on a connection that is not open.
    #[error("connection is not open")]
    NotOpen,
    /// An error occurred during a write operation.
    #[error("write failed")]
    WriteError,
    /// An error occurred during a read operation.
    #[error("read failed")]
    ReadError,
    /// A connection attempt was refused.
    #[error("connection refused")]
    ConnectionRefused,
    /// A timeout occurred.
    #[error("operation timed out")]
    Timeout,
    /// No data is pending on a non-blocking connection.
    #[error("operation would block")]
    WouldBlock,
    /// The connection was closed.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// The address could not be parsed or resolved.
    #[error("address could not be resolved")]
    InvalidAddress,
    /// A protocol-specific error occurred.
    #[error("protocol error")]
    ProtocolError,
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::WouldBlock => Error::WouldBlock,
            ErrorKind::TimedOut => Error::Timeout,
            ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            ErrorKind::NotConnected => Error::NotOpen,
            ErrorKind::InvalidInput | ErrorKind::AddrNotAvailable => Error::InvalidAddress,
            _ => Error::ReadError,
        }
    }
}
