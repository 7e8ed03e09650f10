//! Server-wide lifecycle state.

/// Lifecycle of a [`SocketServer`](crate::SocketServer).
///
/// Transitions only move forward: `New` → `Running` → `Stopping` → `Stopped`.
/// A server stopped before it ever started goes `New` → `Stopping` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerState {
    New,
    Running,
    Stopping,
    Stopped,
}

impl ServerState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Running)
                | (Self::New, Self::Stopping)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    /// New connections and listeners are only admitted while running.
    pub fn accepts_connections(self) -> bool {
        self == Self::Running
    }
}
