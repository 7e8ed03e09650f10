//! Server-side record of one accepted connection.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    domain::{CloseMode, SessionId, SessionInfo, SessionPhase},
    error::ServerError,
};

use super::event::UpgradeDecision;

/// Tracks the phase of one connection and holds the channels used to steer its
/// transport task.
///
/// The transport task owns the socket. This record only signals it: a pending
/// upgrade decision, queued outbound text, and close requests.
pub(crate) struct SessionConnection {
    id: SessionId,
    peer: SocketAddr,
    phase: SessionPhase,
    target_id: Option<String>,
    opened_at: Option<DateTime<Utc>>,
    close_mode: Option<CloseMode>,
    signal: watch::Sender<Option<CloseMode>>,
    decision: Option<oneshot::Sender<UpgradeDecision>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl SessionConnection {
    /// Create the record for a freshly accepted connection. The returned
    /// receiver goes to the transport task.
    pub fn new(id: SessionId, peer: SocketAddr) -> (Self, watch::Receiver<Option<CloseMode>>) {
        let (signal, signal_rx) = watch::channel(None);
        let connection = Self {
            id,
            peer,
            phase: SessionPhase::AwaitingRequest,
            target_id: None,
            opened_at: None,
            close_mode: None,
            signal,
            decision: None,
            outbound: None,
        };
        (connection, signal_rx)
    }

    #[cfg(test)]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            peer: self.peer,
            phase: self.phase,
            target_id: self.target_id.clone(),
            opened_at: self.opened_at,
        }
    }

    /// Park an upgrade request for `target_id` until it is accepted or declined.
    ///
    /// Only valid while awaiting the request; otherwise the request is answered
    /// as unavailable.
    pub fn await_decision(
        &mut self,
        target_id: String,
        decision: oneshot::Sender<UpgradeDecision>,
    ) -> Result<(), ServerError> {
        if self.phase != SessionPhase::AwaitingRequest {
            let _ = decision.send(UpgradeDecision::Unavailable);
            return Err(ServerError::NotPending(self.id));
        }
        self.target_id = Some(target_id);
        self.decision = Some(decision);
        self.phase = SessionPhase::PendingUpgradeDecision;
        Ok(())
    }

    /// Complete a pending upgrade. Leaves the record untouched unless pending.
    pub fn open(&mut self) -> Result<(), ServerError> {
        let decision = self.take_pending_decision()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        if decision
            .send(UpgradeDecision::Accept {
                outbound: outbound_rx,
            })
            .is_err()
        {
            // The peer went away; its ConnectionClosed is already on the way.
            tracing::debug!("Session {} vanished before its upgrade completed", self.id);
        }
        self.outbound = Some(outbound_tx);
        self.opened_at = Some(Utc::now());
        self.phase = SessionPhase::Open;
        Ok(())
    }

    /// Reject a pending upgrade. Leaves the record untouched unless pending.
    pub fn decline(&mut self) -> Result<(), ServerError> {
        let decision = self.take_pending_decision()?;
        let _ = decision.send(UpgradeDecision::Decline);
        self.phase = SessionPhase::Closing;
        Ok(())
    }

    /// Queue one outbound text frame.
    pub fn send(&self, message: String) -> Result<(), ServerError> {
        match (&self.outbound, self.phase) {
            (Some(outbound), SessionPhase::Open) => outbound
                .send(message)
                .map_err(|_| ServerError::SessionNotOpen(self.id)),
            _ => Err(ServerError::SessionNotOpen(self.id)),
        }
    }

    /// Request the transport task to close.
    ///
    /// A connection is closed at most once; the only follow-up allowed is
    /// escalating a graceful close to a forced one. Returns whether a signal
    /// was sent.
    pub fn close(&mut self, mode: CloseMode) -> bool {
        if self.phase == SessionPhase::Closed {
            return false;
        }
        if self.phase.is_closing()
            && (mode == CloseMode::Graceful || self.close_mode == Some(CloseMode::Force))
        {
            return false;
        }
        if let Some(decision) = self.decision.take() {
            let _ = decision.send(UpgradeDecision::Unavailable);
        }
        self.phase = SessionPhase::Closing;
        self.close_mode = Some(mode);
        // No receivers left means the task already finished.
        let _ = self.signal.send(Some(mode));
        true
    }

    /// Record that the transport task has released the socket.
    pub fn finish(&mut self) -> SessionPhase {
        let previous = self.phase;
        self.phase = SessionPhase::Closed;
        self.decision = None;
        self.outbound = None;
        previous
    }

    fn take_pending_decision(&mut self) -> Result<oneshot::Sender<UpgradeDecision>, ServerError> {
        if self.phase != SessionPhase::PendingUpgradeDecision {
            return Err(ServerError::NotPending(self.id));
        }
        self.decision.take().ok_or(ServerError::NotPending(self.id))
    }
}
