use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roster::SyntheticProfile;

/// Matching preferences carried on a find-match request. Reserved for
/// filter-based pairing; accepted and stored but not yet consulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchPrefs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
}

/// Relayed signaling payload: a session description or an ICE candidate.
/// Contents are opaque to the server; only routing is interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    Description { description: serde_json::Value },
    Candidate { candidate: serde_json::Value },
}

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Enter the waiting pool / attempt pairing.
    FindMatch {
        participant_id: String,
        #[serde(default)]
        duo_connection_id: Option<String>,
        #[serde(default)]
        prefs: Option<MatchPrefs>,
    },
    /// Voluntary termination of an active match.
    EndMatch { match_id: String },
    /// Terminate own match and tell the named connections the caller left.
    Skip {
        #[serde(default)]
        targets: Vec<String>,
    },
    /// Signaling envelope relayed verbatim to `to`.
    Message {
        to: String,
        #[serde(flatten)]
        payload: SignalPayload,
    },
    /// Chat line relayed over the same path as signaling.
    Chat { to: String, text: String },
    /// Heartbeat.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every socket: the transport-assigned connection id
    /// (clients exchange these to form duo links).
    Connected { connection_id: String },
    /// Pairing result.
    Matched {
        match_id: String,
        partner_id: String,
        /// Absent for synthetic matches: there is no live socket to signal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partner_connection_id: Option<String>,
        is_fake: bool,
        /// Glare role for perfect negotiation; never true for synthetic
        /// counterparts.
        polite: bool,
        start_time: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counterpart: Option<SyntheticProfile>,
    },
    /// Queue acknowledgement.
    MatchStatus { status: MatchStatus },
    /// Termination result.
    MatchEnded {
        match_id: String,
        duration_ms: i64,
        is_fake: bool,
    },
    /// Recoverable failure notice.
    MatchError { message: String },
    /// Duo fan-out: the linked connection's partner found a counterpart.
    Peer {
        match_id: String,
        partner_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partner_connection_id: Option<String>,
        is_fake: bool,
    },
    /// The counterpart (or a skipping peer) is gone.
    StrangerLeft,
    /// Relayed signaling envelope.
    Message {
        from: String,
        #[serde(flatten)]
        payload: SignalPayload,
    },
    /// Relayed chat line.
    Chat { from: String, text: String },
    /// Heartbeat reply.
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
}

/// Generate a transport connection id.
pub fn generate_connection_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a globally unique match id.
pub fn generate_match_id() -> String {
    Uuid::new_v4().to_string()
}
