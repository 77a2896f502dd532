//! Connection table and per-connection write state.
//!
//! Each accepted socket gets a [`ConnectionHandle`] from the listener's
//! [`ConnectionRegistry`] and keeps it until the socket closes. The write
//! half lives behind the connection's own async mutex together with its
//! [`ConnState`], so a response that finishes after the peer went away is
//! detected under that lock and dropped instead of written.

use chrono::{DateTime, Utc};
use slab::Slab;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Identity of one accepted connection, valid from accept to close.
///
/// The id is a slot in the connection table and may be reused once the
/// connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    id: usize,
    peer: SocketAddr,
}

impl ConnectionHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{} ({})", self.id, self.peer)
    }
}

/// Current state of a connection's write side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    /// Reading data events and writing responses.
    Open,
    /// Peer finished sending; queued responses are still written.
    Draining,
    /// Socket is gone. Writes are discarded.
    Closed,
}

/// Result of a response write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Written(usize),
    /// The connection was already closed, or closed during the write.
    Stale,
}

struct Outbound<W> {
    sink: W,
    state: ConnState,
}

/// Write side of one connection.
pub(crate) struct Connection<W> {
    handle: ConnectionHandle,
    outbound: tokio::sync::Mutex<Outbound<W>>,
}

impl<W: AsyncWrite + Unpin + Send> Connection<W> {
    pub fn new(handle: ConnectionHandle, sink: W) -> Self {
        Self {
            handle,
            outbound: tokio::sync::Mutex::new(Outbound {
                sink,
                state: ConnState::Open,
            }),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    #[cfg(test)]
    pub async fn state(&self) -> ConnState {
        self.outbound.lock().await.state
    }

    /// Write a response unless the connection has closed. A failed write
    /// closes the connection and is reported as stale.
    pub async fn write_response(&self, data: &[u8]) -> WriteOutcome {
        let mut out = self.outbound.lock().await;
        if out.state == ConnState::Closed {
            trace!(connection = %self.handle, bytes = data.len(), "Write to closed connection dropped");
            return WriteOutcome::Stale;
        }

        let written = match out.sink.write_all(data).await {
            Ok(()) => out.sink.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => WriteOutcome::Written(data.len()),
            Err(e) => {
                trace!(connection = %self.handle, error = %e, "Write failed, closing connection");
                out.state = ConnState::Closed;
                WriteOutcome::Stale
            }
        }
    }

    /// Peer sent EOF.
    pub async fn start_draining(&self) {
        let mut out = self.outbound.lock().await;
        if out.state == ConnState::Open {
            out.state = ConnState::Draining;
        }
    }

    /// Socket failed; every later write is discarded.
    pub async fn mark_closed(&self) {
        self.outbound.lock().await.state = ConnState::Closed;
    }

    /// All responses are written: shut down the write half if it is still
    /// usable and mark the connection closed.
    pub async fn finish(&self) {
        let mut out = self.outbound.lock().await;
        if out.state != ConnState::Closed {
            if let Err(e) = out.sink.shutdown().await {
                trace!(connection = %self.handle, error = %e, "Shutdown failed");
            }
            out.state = ConnState::Closed;
        }
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    peer: SocketAddr,
    accepted_at: DateTime<Utc>,
}

/// Registry of live connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    connections: Slab<ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle for a newly accepted connection.
    pub fn insert(&mut self, peer: SocketAddr) -> ConnectionHandle {
        let id = self.connections.insert(ConnectionEntry {
            peer,
            accepted_at: Utc::now(),
        });
        ConnectionHandle { id, peer }
    }

    /// Remove a connection. Returns how long it was open.
    pub fn remove(&mut self, handle: &ConnectionHandle) -> Option<chrono::Duration> {
        match self.connections.get(handle.id) {
            Some(entry) if entry.peer == handle.peer => {
                let entry = self.connections.remove(handle.id);
                Some(Utc::now() - entry.accepted_at)
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn contains(&self, handle: &ConnectionHandle) -> bool {
        self.connections
            .get(handle.id)
            .is_some_and(|entry| entry.peer == handle.peer)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Keeps a connection registered for as long as it is held.
pub(crate) struct ConnectionGuard {
    registry: Arc<Mutex<ConnectionRegistry>>,
    handle: ConnectionHandle,
}

impl ConnectionGuard {
    pub fn register(registry: &Arc<Mutex<ConnectionRegistry>>, peer: SocketAddr) -> Self {
        let handle = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer);
        Self {
            registry: Arc::clone(registry),
            handle,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let open_for = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.handle);
        if let Some(open_for) = open_for {
            trace!(
                connection = %self.handle,
                open_ms = open_for.num_milliseconds(),
                "Connection released"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new();

        let h1 = registry.insert(peer(1000));
        let h2 = registry.insert(peer(1001));
        assert_ne!(h1.id(), h2.id());
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&h1));

        assert!(registry.remove(&h1).is_some());
        assert!(!registry.contains(&h1));
        assert!(registry.remove(&h1).is_none());
        assert_eq!(registry.len(), 1);

        // Slab reuses the slot; the stale handle must not match the new entry
        let h3 = registry.insert(peer(1002));
        assert_eq!(h3.id(), h1.id());
        assert!(!registry.contains(&h1));
        assert!(registry.contains(&h3));
    }

    #[test]
    fn test_guard_unregisters_on_drop() {
        let registry = Arc::new(Mutex::new(ConnectionRegistry::new()));

        let guard = ConnectionGuard::register(&registry, peer(2000));
        assert_eq!(guard.handle().peer(), peer(2000));
        assert_eq!(registry.lock().unwrap().len(), 1);

        drop(guard);
        assert!(registry.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_after_close_is_stale() {
        let mut registry = ConnectionRegistry::new();
        let handle = registry.insert(peer(3000));

        let connection = Connection::new(handle, Vec::<u8>::new());
        assert_eq!(connection.write_response(b"one").await, WriteOutcome::Written(3));

        connection.mark_closed().await;
        assert_eq!(connection.state().await, ConnState::Closed);
        assert_eq!(connection.write_response(b"two").await, WriteOutcome::Stale);

        let out = connection.outbound.lock().await;
        assert_eq!(out.sink, b"one");
    }

    #[tokio::test]
    async fn test_draining_still_writes() {
        let mut registry = ConnectionRegistry::new();
        let connection = Connection::new(registry.insert(peer(3001)), Vec::<u8>::new());

        connection.start_draining().await;
        assert_eq!(connection.state().await, ConnState::Draining);
        assert_eq!(connection.write_response(b"late").await, WriteOutcome::Written(4));

        connection.finish().await;
        assert_eq!(connection.state().await, ConnState::Closed);
        connection.start_draining().await;
        assert_eq!(connection.state().await, ConnState::Closed);
    }

    #[tokio::test]
    async fn test_failed_write_closes() {
        let mut registry = ConnectionRegistry::new();
        let sink = tokio_test::io::Builder::new()
            .write_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .build();
        let connection = Connection::new(registry.insert(peer(3002)), sink);

        assert_eq!(connection.write_response(b"x").await, WriteOutcome::Stale);
        assert_eq!(connection.state().await, ConnState::Closed);
    }
}
