use super::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::models::connection_state::ConnectionState;
use dashmap::DashMap;
use log::trace;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    workspace_id: String,
    channel: String,
}

impl BucketKey {
    fn new(workspace_id: &str, channel: &str) -> Self {
        BucketKey {
            workspace_id: workspace_id.to_string(),
            channel: channel.to_string(),
        }
    }
}

/// Live connections and the `(workspace, channel)` index used for dispatch.
///
/// A handle sits in a bucket only while its connection is `Active` and subscribed to that
/// channel. Every path locks the connection's subscriptions before touching a bucket.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    index: DashMap<BucketKey, HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Connection) -> ConnectionHandle {
        connection.subscriptions.lock().state = ConnectionState::Active;

        let handle = ConnectionHandle(Arc::new(connection));
        self.connections.insert(handle.id(), handle.clone());
        handle
    }

    /// Returns true if the channel was newly added.
    pub fn subscribe(&self, handle: &ConnectionHandle, channel: &str) -> bool {
        let mut subscriptions = handle.0.subscriptions.lock();
        if subscriptions.state != ConnectionState::Active {
            return false;
        }

        if !subscriptions.channels.insert(channel.to_string()) {
            return false;
        }

        self.index
            .entry(BucketKey::new(handle.workspace_id(), channel))
            .or_default()
            .insert(handle.id(), handle.clone());

        trace!("Connection {} subscribed to {channel}", handle.id());
        true
    }

    /// Returns true if the channel was subscribed.
    pub fn unsubscribe(&self, handle: &ConnectionHandle, channel: &str) -> bool {
        let mut subscriptions = handle.0.subscriptions.lock();
        if !subscriptions.channels.remove(channel) {
            return false;
        }

        if subscriptions.state == ConnectionState::Active {
            self.leave_bucket(handle, channel);
        }

        trace!("Connection {} unsubscribed from {channel}", handle.id());
        true
    }

    /// Takes an active connection out of every bucket ahead of a forced close.
    pub fn drain(&self, handle: &ConnectionHandle) -> bool {
        let mut subscriptions = handle.0.subscriptions.lock();
        if subscriptions.state != ConnectionState::Active {
            return false;
        }

        subscriptions.state = ConnectionState::Draining;
        for channel in &subscriptions.channels {
            self.leave_bucket(handle, channel);
        }

        true
    }

    /// Releases the connection. Only the first call does anything and returns true.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        {
            let mut subscriptions = handle.0.subscriptions.lock();
            if subscriptions.state == ConnectionState::Closed {
                return false;
            }

            if subscriptions.state == ConnectionState::Active {
                for channel in &subscriptions.channels {
                    self.leave_bucket(handle, channel);
                }
            }

            subscriptions.state = ConnectionState::Closed;
            subscriptions.channels.clear();
        }

        self.connections.remove(&handle.id());
        true
    }

    /// Snapshot of the connections subscribed to `channel` in `workspace_id`.
    pub fn lookup(&self, workspace_id: &str, channel: &str) -> Vec<ConnectionHandle> {
        self.index
            .get(&BucketKey::new(workspace_id, channel))
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.index.len()
    }

    fn leave_bucket(&self, handle: &ConnectionHandle, channel: &str) {
        let key = BucketKey::new(handle.workspace_id(), channel);
        if let Some(mut bucket) = self.index.get_mut(&key) {
            bucket.remove(&handle.id());
        }
        self.index.remove_if(&key, |_, bucket| bucket.is_empty());
    }
}
