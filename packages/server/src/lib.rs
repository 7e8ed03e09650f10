//! Embeddable inspector server.
//!
//! The server exposes debug targets supplied by a [`SocketServerDelegate`] over an
//! HTTP discovery endpoint and relays WebSocket sessions between debugger
//! frontends and the delegate. All server state lives on a single event loop
//! task; the cloneable [`SocketServer`] handle only enqueues work for it.

// layers
pub mod domain;
pub mod infrastructure;
pub mod server;
pub mod ui;

pub mod config;
pub mod error;

pub use config::ServerConfig;
pub use domain::{Admission, ServerState, SessionId, SessionInfo, SessionPhase, SocketServerDelegate};
pub use error::ServerError;
pub use server::{SocketServer, StopCallback};
