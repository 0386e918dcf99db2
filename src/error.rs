//! Startup Error Taxonomy and Exit Codes

use thiserror::Error;

/// Process exit codes
///
/// A closed set: fatal startup failures each get a distinct code so that
/// supervisors can tell them apart. `ALLOCATION_FAILED` and
/// `CONNECTION_TERMINATED` are carried for completeness but are absorbed
/// internally; the server never exits with them.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const SOCKET_CREATE_FAILED: i32 = 1;
    pub const BIND_FAILED: i32 = 2;
    pub const LISTEN_FAILED: i32 = 3;
    pub const ALLOCATION_FAILED: i32 = 4;
    pub const CONNECTION_TERMINATED: i32 = 5;
}

/// Fatal errors raised while bringing the listener up.
///
/// Each stage of socket setup fails with its own variant; the partially
/// created socket is released by drop before the error propagates.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to create listening socket: {0}")]
    SocketCreateFailed(#[source] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    ListenFailed {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    /// Map the failure onto its process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::SocketCreateFailed(_) => exit_code::SOCKET_CREATE_FAILED,
            StartupError::BindFailed { .. } => exit_code::BIND_FAILED,
            StartupError::ListenFailed { .. } => exit_code::LISTEN_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn startup_errors_map_to_distinct_exit_codes() {
        let addr: std::net::SocketAddr = "0.0.0.0:7000".parse().unwrap();
        let socket = StartupError::SocketCreateFailed(io::Error::from(io::ErrorKind::Other));
        let bind = StartupError::BindFailed {
            addr,
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        let listen = StartupError::ListenFailed {
            addr,
            source: io::Error::from(io::ErrorKind::Other),
        };

        let codes = [socket.exit_code(), bind.exit_code(), listen.exit_code()];
        assert_eq!(codes, [1, 2, 3]);
        assert!(codes.iter().all(|c| *c != exit_code::OK));
    }

    #[test]
    fn bind_failure_reports_the_address() {
        let addr: std::net::SocketAddr = "0.0.0.0:7000".parse().unwrap();
        let err = StartupError::BindFailed {
            addr,
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("0.0.0.0:7000"));
    }
}
