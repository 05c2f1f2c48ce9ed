use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::protocol::ServerMessage;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresenceError {
    /// Same connection id registered twice with conflicting identities.
    #[error("connection {connection_id} already registered as {existing}")]
    DuplicateConnection {
        connection_id: String,
        existing: String,
    },
    /// Registration for a connection with no live transport.
    #[error("connection {0} is not attached")]
    NotConnected(String),
}

/// Live state for one connected transport session.
struct PeerHandle {
    tx: mpsc::UnboundedSender<ServerMessage>,
    participant_id: Option<String>,
    duo_connection_id: Option<String>,
}

/// Single source of truth for who is connected and who they claim to be.
/// Entries are created on transport connect and destroyed on disconnect;
/// identity is an idempotent upsert on top.
pub struct PresenceRegistry {
    peers: DashMap<String, PeerHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Record a freshly connected transport session.
    pub fn attach(&self, connection_id: String, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.peers.insert(
            connection_id,
            PeerHandle {
                tx,
                participant_id: None,
                duo_connection_id: None,
            },
        );
    }

    /// Idempotent identity upsert. Fails only when the connection already
    /// carries a different participant identity.
    pub fn register(
        &self,
        connection_id: &str,
        participant_id: &str,
        duo_connection_id: Option<String>,
    ) -> Result<(), PresenceError> {
        let mut handle = self
            .peers
            .get_mut(connection_id)
            .ok_or_else(|| PresenceError::NotConnected(connection_id.to_string()))?;

        if let Some(existing) = &handle.participant_id {
            if existing != participant_id {
                return Err(PresenceError::DuplicateConnection {
                    connection_id: connection_id.to_string(),
                    existing: existing.clone(),
                });
            }
        }
        handle.participant_id = Some(participant_id.to_string());
        handle.duo_connection_id = duo_connection_id;
        Ok(())
    }

    /// Remove the connection. Match/queue teardown is the caller's job and
    /// must happen before this so nothing references a dead connection.
    pub fn unregister(&self, connection_id: &str) -> bool {
        self.peers.remove(connection_id).is_some()
    }

    pub fn lookup(&self, connection_id: &str) -> Option<String> {
        self.peers
            .get(connection_id)
            .and_then(|h| h.participant_id.clone())
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.peers.contains_key(connection_id)
    }

    pub fn duo_of(&self, connection_id: &str) -> Option<String> {
        self.peers
            .get(connection_id)
            .and_then(|h| h.duo_connection_id.clone())
    }

    /// Whether either side declared the other as its duo partner.
    pub fn duo_linked(&self, a: &str, b: &str) -> bool {
        self.duo_of(a).as_deref() == Some(b) || self.duo_of(b).as_deref() == Some(a)
    }

    /// Deliver a message to the connection's transport. Returns false when
    /// the connection is gone; senders treat that as a silent drop.
    pub fn send(&self, connection_id: &str, message: ServerMessage) -> bool {
        match self.peers.get(connection_id) {
            Some(handle) => handle.tx.send(message).is_ok(),
            None => {
                trace!(connection_id, "dropping message for unknown connection");
                false
            }
        }
    }
}
