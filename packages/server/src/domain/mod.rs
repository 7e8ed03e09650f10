//! Domain layer: session identity, server state and the delegate contract.

pub mod delegate;
pub mod session;
pub mod state;

pub use delegate::{Admission, SocketServerDelegate};
pub use session::{CloseMode, SessionId, SessionInfo, SessionPhase};
pub use state::ServerState;
