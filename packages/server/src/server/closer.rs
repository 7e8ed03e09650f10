//! Shutdown coordination.

/// Callback passed to [`SocketServer::stop`](super::SocketServer::stop).
pub type StopCallback = Box<dyn FnOnce() + Send + 'static>;

/// Counts the listening sockets and connections still closing during a stop
/// and holds the callbacks to run once they are all gone.
///
/// Lives only while the server is `Stopping`.
pub(crate) struct ShutdownCoordinator {
    pending: usize,
    callbacks: Vec<StopCallback>,
}

impl ShutdownCoordinator {
    pub fn new(pending: usize) -> Self {
        Self {
            pending,
            callbacks: Vec::new(),
        }
    }

    pub fn add_callback(&mut self, callback: StopCallback) {
        self.callbacks.push(callback);
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// One tracked resource reported closed.
    pub fn on_resource_closed(&mut self) {
        match self.pending.checked_sub(1) {
            Some(pending) => self.pending = pending,
            None => tracing::warn!("Closure reported with no resources pending"),
        }
    }

    pub fn is_done(&self) -> bool {
        self.pending == 0
    }

    /// Run every callback, in registration order.
    pub fn complete(self) {
        for callback in self.callbacks {
            callback();
        }
    }
}
