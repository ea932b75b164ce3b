use std::path::PathBuf;

/// Errors that can occur in channel setup and transport I/O.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the channel.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The address string could not be parsed.
    #[error("invalid address '{address}': {reason}")]
    BadAddress { address: String, reason: &'static str },

    /// The nonce file next to an emulated local socket is malformed.
    #[error("invalid nonce file {path}: {reason}")]
    BadNonceFile { path: PathBuf, reason: &'static str },

    /// The connecting peer did not present the expected nonce.
    #[error("peer failed nonce authentication")]
    NonceMismatch,

    /// The child process could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// A descriptor was requested but none has been received.
    #[error("no pending file descriptors")]
    NoPendingDescriptor,

    /// The channel kind does not support the requested operation.
    #[error("{0} is not supported by this channel")]
    Unsupported(&'static str),
}

impl TransportError {
    /// The underlying OS error, if this error wraps one.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            Self::Bind { source, .. }
            | Self::Connect { source, .. }
            | Self::Spawn { source, .. }
            | Self::Accept(source)
            | Self::Io(source) => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
