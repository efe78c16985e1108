use thiserror::Error;

/// Coarse classification of everything that can go wrong in a poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ConnectTimeout,
    TransportDisconnected,
    ProtocolError,
    DecodeTruncated,
}

/// Failure to turn a notification into a [`crate::TelemetryRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet truncated: got {len} bytes, need at least {required}")]
    Truncated { len: usize, required: usize },
}

/// Errors raised by the device session and its transport
#[derive(Debug, Error)]
pub enum Error {
    #[error("device {0} not found")]
    NotFound(String),

    /// A session was asked to connect before any device was located
    #[error("no device has been located yet")]
    NotLocated,

    #[error("timed out connecting to device")]
    ConnectTimeout,

    #[error("transport disconnected: {0}")]
    TransportDisconnected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) | Error::NotLocated => ErrorKind::NotFound,
            Error::ConnectTimeout => ErrorKind::ConnectTimeout,
            Error::TransportDisconnected(_) => ErrorKind::TransportDisconnected,
            Error::Protocol(_) => ErrorKind::ProtocolError,
            Error::Decode(DecodeError::Truncated { .. }) => ErrorKind::DecodeTruncated,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
