use std::{io, sync::Arc};
use thiserror::Error;

/// Errors surfaced by the client, the codecs and the handshake.
///
/// `Clone` because a single termination cause is handed to every call
/// that was still pending when the connection died.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("connection is shut down")]
    Shutdown,

    #[error("invalid codec type {0}")]
    InvalidCodec(String),

    #[error("number of options is more than 1")]
    TooManyOptions,

    #[error("invalid magic number {0:#x}")]
    InvalidMagicNumber(u32),

    #[error("unsupported network {0}")]
    UnsupportedNetwork(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("i/o error: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// Error string reported by the peer in the reply header.
    #[error("{0}")]
    Remote(String),

    #[error("reading body {0}")]
    ReadBody(String),
}

impl Error {
    /// True when the error means the client can no longer be used.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::Shutdown)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset => Error::ConnectionClosed,
            _ => Error::Io(Arc::new(e)),
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            Error::Decode(e.to_string())
        } else {
            Error::Encode(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_pipe_maps_to_connection_closed() {
        let e: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(e, Error::ConnectionClosed));

        let e: Error = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn remote_error_is_verbatim() {
        assert_eq!(Error::Remote("boom".into()).to_string(), "boom");
        assert_eq!(Error::Shutdown.to_string(), "connection is shut down");
    }
}
