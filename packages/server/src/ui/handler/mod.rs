//! Request handlers.

mod http;
mod websocket;

pub use http::{list_targets, version};
pub use websocket::websocket_handler;
