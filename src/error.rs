//! Error types for the controller runtime.

use std::io;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// A single OpenFlow frame could not be decoded.
///
/// Outside the handshake these are logged and the frame is skipped; the
/// connection stays up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer bytes than an `OfpHeader` were supplied.
    #[error("truncated header")]
    TruncatedHeader,

    /// Body does not match the layout of its declared type.
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// Type code outside of the OpenFlow 1.0 range.
    #[error("unsupported message type {0}")]
    UnsupportedMessageType(u8),

    /// Header version is not 0x01.
    #[error("unsupported protocol version {0:#04x}")]
    BadVersion(u8),
}

/// Fatal to one switch connection, never to the process.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Header declared a length smaller than the header itself; framing is lost.
    #[error("invalid frame length {0}")]
    BadFrameLength(usize),

    #[error("connection closed")]
    Closed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ConnectionError {
    /// Map a read error during the handshake, turning socket timeouts into
    /// `HandshakeTimeout`.
    pub fn from_handshake_io(e: io::Error) -> ConnectionError {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ConnectionError::HandshakeTimeout,
            _ => ConnectionError::Io(e),
        }
    }
}

/// Translation table failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NatError {
    #[error("public port space {min_port}..={max_port} exhausted")]
    PortSpaceExhausted { min_port: u16, max_port: u16 },

    #[error("invalid port range {min_port}..={max_port}")]
    InvalidRange { min_port: u16, max_port: u16 },
}

/// A policy could not react to a packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error(transparent)]
    Nat(#[from] NatError),
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Nat(#[from] NatError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}
