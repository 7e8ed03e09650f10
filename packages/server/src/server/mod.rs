//! Socket server: the event loop, its state machine and the public handle.

mod closer;
mod connection;
pub(crate) mod event;
mod event_loop;
mod handle;
mod state_machine;

pub use closer::StopCallback;
pub use handle::SocketServer;
