//! byte-relay: a protocol-agnostic TCP adapter.
//!
//! Binds a socket, turns every data chunk a connection sends into a
//! [`RequestDescriptor`], hands it to an async [`Resolver`], and writes the
//! resolver's bytes back to the same connection in arrival order.
//!
//! ```no_run
//! use byte_relay::{start, ListenerConfig, RequestDescriptor, ResponseDescriptor, ResolverError};
//!
//! # async fn run() -> Result<(), byte_relay::BindError> {
//! let handle = start(ListenerConfig::default(), |_request: RequestDescriptor| async {
//!     Ok::<_, ResolverError>(ResponseDescriptor::from("pong"))
//! })
//! .await?;
//! println!("listening on {}", handle.port());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod protocols;
pub mod resolver;
pub mod runtime;
pub mod server;

pub use config::{Config, ListenerConfig};
pub use descriptor::{RequestDescriptor, ResponseDescriptor};
pub use error::{BindError, ResolverError};
pub use resolver::{ResolveFuture, Resolver};
pub use runtime::ConnectionHandle;
pub use server::{start, Adapter, ListenerHandle, ListenerState};
