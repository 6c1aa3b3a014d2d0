use crate::{
    message::OutboundMessage,
    models::{connection_state::ConnectionState, principal::Principal},
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU32, Ordering},
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

pub type ConnectionId = Uuid;

pub(crate) struct Subscriptions {
    pub(crate) state: ConnectionState,
    pub(crate) channels: HashSet<String>,
}

/// A live client connection. Built by the gateway, then handed to the registry.
pub struct Connection {
    id: ConnectionId,
    principal: Principal,
    workspace_id: String,
    pub(crate) subscriptions: Mutex<Subscriptions>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    overflow_count: AtomicU32,
    close_token: CancellationToken,
    shutdown_token: CancellationToken,
    close_reason: OnceLock<String>,
}

impl Connection {
    /// `shutdown` is the process-wide token; cancelling it closes this connection too.
    pub fn new(
        principal: Principal,
        workspace_id: String,
        queue_capacity: usize,
        shutdown: &CancellationToken,
    ) -> (Connection, mpsc::Receiver<OutboundMessage>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity);

        let connection = Connection {
            id: Uuid::new_v4(),
            principal,
            workspace_id,
            subscriptions: Mutex::new(Subscriptions {
                state: ConnectionState::Connecting,
                channels: HashSet::new(),
            }),
            outbound_tx,
            overflow_count: AtomicU32::new(0),
            close_token: shutdown.child_token(),
            shutdown_token: shutdown.clone(),
            close_reason: OnceLock::new(),
        };

        (connection, outbound_rx)
    }
}

#[derive(Clone)]
pub struct ConnectionHandle(pub(crate) Arc<Connection>);

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.0.id
    }

    pub fn principal(&self) -> &Principal {
        &self.0.principal
    }

    pub fn workspace_id(&self) -> &str {
        &self.0.workspace_id
    }

    pub fn state(&self) -> ConnectionState {
        self.0.subscriptions.lock().state
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> =
            self.0.subscriptions.lock().channels.iter().cloned().collect();
        channels.sort();
        channels
    }

    /// Never waits for queue capacity.
    pub fn try_enqueue(
        &self,
        message: OutboundMessage,
    ) -> Result<(), TrySendError<OutboundMessage>> {
        self.0.outbound_tx.try_send(message)
    }

    /// Returns the number of overflows over the connection's lifetime, this one included.
    pub fn record_overflow(&self) -> u32 {
        self.0.overflow_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn overflow_count(&self) -> u32 {
        self.0.overflow_count.load(Ordering::Relaxed)
    }

    /// Asks the gateway to close this connection. The first reason given is kept.
    pub fn close(&self, reason: Option<&str>) {
        if let Some(reason) = reason {
            let _ = self.0.close_reason.set(reason.to_string());
        }
        self.0.close_token.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.0.close_token.is_cancelled()
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.0.close_token.cancelled()
    }

    /// The reason to report to the client before closing, if there is one.
    pub fn close_reason(&self) -> Option<String> {
        match self.0.close_reason.get() {
            Some(reason) => Some(reason.clone()),
            None if self.0.shutdown_token.is_cancelled() => {
                Some("server shutting down".to_string())
            }
            None => None,
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.0.id)
            .field("subject", &self.0.principal.subject)
            .field("workspace_id", &self.0.workspace_id)
            .finish()
    }
}
