//! HTTP and WebSocket transport for accepted connections.

mod handler;
pub(crate) mod server;
pub mod signal;
pub(crate) mod state;

pub use signal::shutdown_signal;
