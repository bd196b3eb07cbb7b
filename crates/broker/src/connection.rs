//! Socket-id → outbound-sender registry.
//!
//! `spec.md` §9 "arena-style ownership": a `Connection` carries only its
//! `socket_id` and `app_key`, never a reference back to the broker or
//! transport. Fan-out looks the live connection up by id here; a stale id
//! (already closed) is simply a miss, never an error.

use dashmap::DashMap;
use pushi_common::{AppId, OutboundFrame, SocketId};
use tokio::sync::mpsc;

/// A bounded outbound queue handle for one connection (`spec.md` §4.1
/// "each connection owns a bounded outbound queue"). The queue itself —
/// capacity, the writer task draining it — lives in `pushi-ws`; the broker
/// only ever holds the sending half.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub app_id: AppId,
    pub sender: mpsc::Sender<OutboundFrame>,
}

/// Outcome of one [`ConnectionRegistry::send`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the connection's outbound queue.
    Delivered,
    /// The queue was full (`spec.md` §4.1 "exceeding the queue bound
    /// closes the connection"). The caller must close this connection.
    SlowConsumer,
    /// No connection registered for this socket id, or its receiver is
    /// already gone.
    Gone,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    sockets: DashMap<SocketId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, socket_id: SocketId, handle: ConnectionHandle) {
        self.sockets.insert(socket_id, handle);
    }

    pub fn remove(&self, socket_id: SocketId) -> Option<ConnectionHandle> {
        self.sockets.remove(&socket_id).map(|(_, h)| h)
    }

    pub fn app_of(&self, socket_id: SocketId) -> Option<AppId> {
        self.sockets.get(&socket_id).map(|h| h.app_id)
    }

    /// Non-blocking send against the connection's bounded outbound queue
    /// (`spec.md` §4.1 "exceeding the queue bound closes the connection").
    /// Uses `try_send` rather than `send().await` so a full queue reports
    /// back immediately instead of making the caller — typically a
    /// fan-out over many sockets — wait on one slow consumer.
    pub fn send(&self, socket_id: SocketId, frame: OutboundFrame) -> SendOutcome {
        let sender = match self.sockets.get(&socket_id) {
            Some(h) => h.sender.clone(),
            None => return SendOutcome::Gone,
        };
        match sender.try_send(frame) {
            Ok(()) => SendOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::SlowConsumer,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Gone,
        }
    }

    pub fn connection_count_for_app(&self, app_id: AppId) -> usize {
        self.sockets.iter().filter(|e| e.value().app_id == app_id).count()
    }

    pub fn total_connections(&self) -> usize {
        self.sockets.len()
    }
}
