use shared::{MapError, ProtocolError};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that stop the server from starting or running
///
/// Per-connection failures never surface here; they only remove or skip the
/// connection involved.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("invalid bind address {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_names_address() {
        let error = ServerError::Bind {
            addr: "127.0.0.1:9000".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(error.to_string(), "failed to bind 127.0.0.1:9000: in use");
    }

    #[test]
    fn test_map_error_converts() {
        let error: ServerError = MapError::Empty.into();
        assert!(matches!(error, ServerError::Map(MapError::Empty)));
        assert_eq!(error.to_string(), "map contains no rows");
    }
}
