//! Listening socket construction.

use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::config::ListenerConfig;
use crate::error::BindError;

/// Create, bind and listen on a socket per `config`, then hand it to tokio.
///
/// Must be called from within a tokio runtime.
pub(crate) fn bind_listener(config: &ListenerConfig) -> Result<TcpListener, BindError> {
    let listen = config.listen_address();
    let addr: SocketAddr = listen.parse().map_err(|e| BindError::InvalidAddress {
        addr: listen.clone(),
        source: e,
    })?;

    let io_err = |source| BindError::Io {
        addr: listen.clone(),
        source,
    };

    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(io_err)?;

    socket
        .set_reuse_address(config.reuse_address)
        .map_err(io_err)?;
    socket.set_nonblocking(true).map_err(io_err)?;
    socket.bind(&addr.into()).map_err(io_err)?;
    let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(io_err)?;

    TcpListener::from_std(socket.into()).map_err(io_err)
}
