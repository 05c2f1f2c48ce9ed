use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

use crate::presence::PresenceRegistry;
use crate::protocol::{ServerMessage, SignalPayload};

/// An open delivery path for one endpoint of an active match.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    match_id: String,
    peer_connection_id: String,
}

/// Forwards negotiation/chat envelopes between the endpoints of an active
/// match without interpreting payloads. The engine opens a route per
/// endpoint when a match is bound and removes it on teardown, so late
/// envelopes from a dead negotiation cannot leak into a successor match
/// that reuses a connection id. Duo-linked connections may always signal
/// each other (their side-channel call rides the same relay).
pub struct SignalingRelay {
    presence: Arc<PresenceRegistry>,
    routes: DashMap<String, Route>,
}

impl SignalingRelay {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self {
            presence,
            routes: DashMap::new(),
        }
    }

    pub fn open_route(&self, connection_id: &str, match_id: &str, peer_connection_id: &str) {
        self.routes.insert(
            connection_id.to_string(),
            Route {
                match_id: match_id.to_string(),
                peer_connection_id: peer_connection_id.to_string(),
            },
        );
    }

    pub fn close_route(&self, connection_id: &str) {
        if let Some((_, route)) = self.routes.remove(connection_id) {
            trace!(connection_id, match_id = %route.match_id, "route closed");
        }
    }

    pub fn has_route(&self, connection_id: &str) -> bool {
        self.routes.contains_key(connection_id)
    }

    fn permits(&self, sender: &str, target: &str) -> bool {
        let routed = self
            .routes
            .get(sender)
            .map(|r| r.peer_connection_id == target)
            .unwrap_or(false);
        routed || self.presence.duo_linked(sender, target)
    }

    /// Deliver a signaling envelope verbatim. Drops silently when the
    /// target is unregistered or no open route/duo link permits the pair;
    /// stale sends are expected and harmless.
    pub fn relay(&self, sender: &str, target: &str, payload: SignalPayload) -> bool {
        if !self.permits(sender, target) {
            trace!(sender, target, "dropping signal without an open route");
            return false;
        }
        self.presence.send(
            target,
            ServerMessage::Message {
                from: sender.to_string(),
                payload,
            },
        )
    }

    /// Chat rides the identical path as signaling.
    pub fn chat(&self, sender: &str, target: &str, text: String) -> bool {
        if !self.permits(sender, target) {
            trace!(sender, target, "dropping chat without an open route");
            return false;
        }
        self.presence.send(
            target,
            ServerMessage::Chat {
                from: sender.to_string(),
                text,
            },
        )
    }
}
