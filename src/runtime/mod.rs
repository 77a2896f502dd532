//! Runtime pieces shared by the listener and its connection tasks.
//!
//! - `socket`: listening socket construction with binding options
//! - `connection`: connection table, per-connection write state
//! - `queue`: ordered response slots for a single connection

mod connection;
mod queue;
mod socket;

pub use connection::ConnectionHandle;
pub(crate) use connection::{Connection, ConnectionGuard, ConnectionRegistry, WriteOutcome};
pub(crate) use queue::{response_queue, PendingResponses};
pub(crate) use socket::bind_listener;
