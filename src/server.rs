//! TCP listener that relays raw bytes to an async resolver.
//!
//! Every data chunk read from a connection becomes a [`RequestDescriptor`];
//! the resolver's [`ResponseDescriptor`] is written back to the same
//! connection. Resolvers run concurrently, but a connection's responses are
//! written in the order its chunks arrived.
//!
//! ```text
//! Unbound → Binding → Listening → Closing → Closed
//!              └──→ Failed
//! ```

use bytes::BytesMut;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::config::ListenerConfig;
use crate::descriptor::RequestDescriptor;
use crate::error::BindError;
use crate::resolver::Resolver;
use crate::runtime::{
    bind_listener, response_queue, Connection, ConnectionGuard, ConnectionHandle,
    ConnectionRegistry, PendingResponses, WriteOutcome,
};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Binding,
    Listening,
    Closing,
    Closed,
    /// Binding failed. Terminal.
    Failed,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerState::Unbound => "unbound",
            ListenerState::Binding => "binding",
            ListenerState::Listening => "listening",
            ListenerState::Closing => "closing",
            ListenerState::Closed => "closed",
            ListenerState::Failed => "failed",
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type StateCell = Arc<watch::Sender<ListenerState>>;

/// Move `state` from `from` to `to`. Returns false if it was not in `from`.
fn transition(state: &StateCell, from: ListenerState, to: ListenerState) -> bool {
    state.send_if_modified(|current| {
        if *current == from {
            *current = to;
            true
        } else {
            false
        }
    })
}

/// A listener that has not been started yet.
pub struct Adapter<R> {
    config: ListenerConfig,
    resolver: Arc<R>,
    metadata: BTreeMap<String, String>,
    state: StateCell,
}

impl<R: Resolver> Adapter<R> {
    pub fn new(config: ListenerConfig, resolver: R) -> Self {
        Self {
            config,
            resolver: Arc::new(resolver),
            metadata: BTreeMap::new(),
            state: Arc::new(watch::Sender::new(ListenerState::Unbound)),
        }
    }

    /// Attach an entry to the metadata reported by the [`ListenerHandle`].
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Bind the socket and start accepting connections.
    ///
    /// Completes once the socket is listening. On failure the adapter moves
    /// to [`ListenerState::Failed`] and no handle is produced.
    pub async fn start(&self) -> Result<ListenerHandle, BindError> {
        if !transition(&self.state, ListenerState::Unbound, ListenerState::Binding) {
            return Err(BindError::AlreadyStarted(self.state()));
        }

        let bound = bind_listener(&self.config).and_then(|listener| {
            let local_addr = listener.local_addr().map_err(|source| BindError::Io {
                addr: self.config.listen_address(),
                source,
            })?;
            Ok((listener, local_addr))
        });
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.state.send_replace(ListenerState::Failed);
                error!(error = %e, "Failed to start listener");
                return Err(e);
            }
        };

        transition(&self.state, ListenerState::Binding, ListenerState::Listening);
        info!(
            address = %local_addr,
            backlog = self.config.backlog,
            "Listener bound"
        );

        let connections = Arc::new(Mutex::new(ConnectionRegistry::new()));
        let span = info_span!("listener", port = local_addr.port());
        tokio::spawn(
            accept_loop(
                listener,
                Arc::clone(&self.resolver),
                Arc::clone(&connections),
                Arc::clone(&self.state),
                self.config.nodelay,
            )
            .instrument(span),
        );

        Ok(ListenerHandle {
            local_addr,
            metadata: self.metadata.clone(),
            state: Arc::clone(&self.state),
            connections,
        })
    }
}

/// Bind a listener for `config` and relay every data event to `resolver`.
pub async fn start<R: Resolver>(
    config: ListenerConfig,
    resolver: R,
) -> Result<ListenerHandle, BindError> {
    Adapter::new(config, resolver).start().await
}

/// Returned once a listener is up. Dropping it leaves the listener running.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    metadata: BTreeMap<String, String>,
    state: StateCell,
    connections: Arc<Mutex<ConnectionRegistry>>,
}

impl ListenerHandle {
    /// The port actually bound.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Number of connections that are currently open.
    pub fn active_connections(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop accepting new connections and release the port.
    ///
    /// Idempotent. Open connections are not severed: they keep being served
    /// and in-flight responses are still written.
    pub fn close(&self) {
        if transition(&self.state, ListenerState::Listening, ListenerState::Closing) {
            info!(port = self.port(), "Listener closing");
        }
    }

    /// Wait until the socket has been released after [`close`](Self::close).
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ListenerState::Closed).await;
    }

    /// [`close`](Self::close), then wait for [`closed`](Self::closed).
    pub async fn shutdown(&self) {
        self.close();
        self.closed().await;
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("local_addr", &self.local_addr)
            .field("metadata", &self.metadata)
            .field("state", &self.state())
            .finish()
    }
}

/// Resolves once the listener leaves `Listening`.
async fn stop_requested(state: &mut watch::Receiver<ListenerState>) {
    let _ = state.wait_for(|s| *s != ListenerState::Listening).await;
}

async fn accept_loop<R: Resolver>(
    listener: TcpListener,
    resolver: Arc<R>,
    connections: Arc<Mutex<ConnectionRegistry>>,
    state: StateCell,
    nodelay: bool,
) {
    let mut state_rx = state.subscribe();

    loop {
        tokio::select! {
            biased;

            _ = stop_requested(&mut state_rx) => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if nodelay {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                    }

                    let guard = ConnectionGuard::register(&connections, peer);
                    let handle = guard.handle();
                    debug!(connection = %handle, "New connection");

                    let resolver = Arc::clone(&resolver);
                    tokio::spawn(
                        async move {
                            serve_connection(stream, handle, resolver).await;
                            drop(guard);
                        }
                        .in_current_span(),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    state.send_replace(ListenerState::Closed);
    info!("Listener closed");
}

/// Serve one connection until the peer stops sending and every queued
/// response has been written (or dropped).
pub(crate) async fn serve_connection<S, R>(stream: S, handle: ConnectionHandle, resolver: Arc<R>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    R: Resolver,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let connection = Arc::new(Connection::new(handle, writer));
    let (reserver, pending) = response_queue();
    let writer_task = tokio::spawn(
        write_responses(Arc::clone(&connection), pending).in_current_span(),
    );

    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    loop {
        buffer.reserve(BUFFER_SIZE);
        match reader.read_buf(&mut buffer).await {
            Ok(0) => {
                trace!(connection = %handle, "Connection closed by client");
                connection.start_draining().await;
                break;
            }
            Ok(n) => {
                let request = RequestDescriptor::from_peer(&handle.peer(), buffer.split().freeze());
                if !request.is_valid_utf8() {
                    debug!(connection = %handle, bytes = n, "Payload is not valid UTF-8, passing through");
                }
                trace!(connection = %handle, bytes = n, "Data received");

                let Some(slot) = reserver.reserve() else {
                    break;
                };
                let resolver = Arc::clone(&resolver);
                tokio::spawn(
                    async move {
                        slot.fill(resolver.resolve(request).await);
                    }
                    .in_current_span(),
                );
            }
            Err(e) => {
                debug!(connection = %handle, error = %e, "Connection error");
                connection.mark_closed().await;
                break;
            }
        }
    }

    drop(reserver);
    if let Err(e) = writer_task.await {
        error!(connection = %handle, error = %e, "Response writer failed");
    }
}

async fn write_responses<W>(connection: Arc<Connection<W>>, mut pending: PendingResponses)
where
    W: AsyncWrite + Unpin + Send,
{
    let handle = connection.handle();
    while let Some(outcome) = pending.next().await {
        match outcome {
            Ok(response) => match connection.write_response(response.data()).await {
                WriteOutcome::Written(n) => {
                    trace!(connection = %handle, bytes = n, "Response written");
                }
                WriteOutcome::Stale => {
                    trace!(connection = %handle, "Connection gone, response discarded");
                }
            },
            Err(e) => {
                warn!(connection = %handle, error = %e, "Resolver failed, no response written");
            }
        }
    }
    connection.finish().await;
}
