//! Error types shared by the adapter and its collaborators.

use std::io;

use crate::server::ListenerState;

/// Startup failure. The only error that ever reaches the caller of
/// [`Adapter::start`](crate::server::Adapter::start).
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// The configured host and port do not form a socket address.
    #[error("invalid listen address '{addr}': {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
    /// The OS refused the socket, bind or listen call.
    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// `start` was called on an adapter that already left `Unbound`.
    #[error("adapter cannot start from state {0}")]
    AlreadyStarted(ListenerState),
}

impl BindError {
    /// The underlying OS error, if the failure came from the socket layer.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            BindError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A resolver declined to produce a response.
///
/// The triggering connection receives no bytes for that data event; the
/// connection and the listener keep running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    #[error("resolver rejected request: {0}")]
    Rejected(String),
    /// The resolver task ended without producing an outcome (it panicked).
    #[error("resolver task ended without a response")]
    Abandoned,
}

impl ResolverError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ResolverError::Rejected(reason.into())
    }
}
