use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;

/// An error raised by a [`PacketHandler`](crate::PacketHandler) while reading
/// or writing frames.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid frame header magic {0:02x?}")]
    InvalidMagic([u8; 2]),
    #[error("Payload of {0} bytes exceeds the maximum frame size")]
    PayloadTooLarge(usize),
    #[error("Connection closed by peer")]
    Closed,
    #[error("Connection closed with {0} bytes of a partial frame outstanding")]
    Truncated(usize),
    #[error("Writer unusable after an earlier send failure")]
    Poisoned,
}

impl CodecError {
    /// Does this error mean the byte stream itself can't be trusted?
    pub fn is_framing_error(&self) -> bool {
        matches!(self, Self::InvalidMagic(_) | Self::Truncated(_))
    }
}

/// An error that might occur on a single connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
    #[error("Connection closed locally")]
    LocalClose,
    #[error("Server shutting down")]
    Shutdown,
    #[error("I/O Error: {0}")]
    IoError(String),
    #[error("Framing error: {0}")]
    FramingError(String),
    #[error("Send queue full")]
    SendQueueFull,
    #[error("Connection is not active")]
    NotConnected,
    #[error("Internal error")]
    InternalError,
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<CodecError> for ConnectionError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Closed => Self::Closed,
            CodecError::Io(e) => e.into(),
            e if e.is_framing_error() => Self::FramingError(e.to_string()),
            e => Self::IoError(e.to_string()),
        }
    }
}

impl<T> From<TrySendError<T>> for ConnectionError {
    fn from(e: TrySendError<T>) -> Self {
        match e {
            TrySendError::Full(_) => Self::SendQueueFull,
            TrySendError::Closed(_) => Self::NotConnected,
        }
    }
}

/// An error that might occur when starting a listener.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("I/O Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Address {0} did not resolve")]
    InvalidAddress(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Admission gate closed")]
    AdmissionClosed,
}

/// An error that might occur when dialing a remote endpoint.
#[derive(Error, Debug)]
pub enum DialError {
    #[error("I/O Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Address {0} did not resolve")]
    InvalidAddress(String),
    #[error("Timed out connecting to {0}")]
    Timeout(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Errors that could happen when loading or validating a config.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error on {}: {0}", .1.display())]
    IoError(std::io::Error, PathBuf),
    #[error("JSON parse error in {}: {0}", .1.display())]
    JsonError(serde_json::Error, PathBuf),
    #[error("{0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn codec_errors_map_to_connection_errors() {
        assert_eq!(ConnectionError::from(CodecError::Closed), ConnectionError::Closed);
        assert!(matches!(
            ConnectionError::from(CodecError::InvalidMagic([0, 0])),
            ConnectionError::FramingError(_)
        ));
        assert!(matches!(
            ConnectionError::from(CodecError::Truncated(3)),
            ConnectionError::FramingError(_)
        ));
        assert!(matches!(
            ConnectionError::from(CodecError::Io(io::ErrorKind::BrokenPipe.into())),
            ConnectionError::IoError(_)
        ));
        assert!(matches!(
            ConnectionError::from(CodecError::PayloadTooLarge(70000)),
            ConnectionError::IoError(_)
        ));
    }

    #[test]
    fn queue_errors() {
        assert_eq!(
            ConnectionError::from(TrySendError::Full(())),
            ConnectionError::SendQueueFull
        );
        assert_eq!(
            ConnectionError::from(TrySendError::Closed(())),
            ConnectionError::NotConnected
        );
    }

    #[test]
    fn config_error_names_file() {
        let err = ConfigError::IoError(
            io::ErrorKind::NotFound.into(),
            std::path::PathBuf::from("/etc/rapidnet/server.json"),
        );
        assert!(err.to_string().starts_with("I/O error on /etc/rapidnet/server.json: "));
    }
}
