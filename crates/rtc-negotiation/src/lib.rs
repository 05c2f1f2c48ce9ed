//! Perfect-negotiation state machine for WebRTC signaling.
//!
//! Tracks the local side of an offer/answer exchange without touching any
//! media stack: callers feed in remote descriptions and ICE candidates as
//! they arrive off the wire and act on the returned outcomes. Glare (both
//! sides producing an offer at once) is resolved by the polite/impolite
//! rule: the impolite side ignores the colliding remote offer, the polite
//! side rolls back its own offer and answers instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which half of the offer/answer exchange a description carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as relayed over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate as relayed over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    /// `begin_offer` while a remote offer is waiting for our answer.
    #[error("cannot start an offer while answering a remote offer")]
    AnswerPending,
}

/// What to do with an incoming description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionOutcome {
    /// Colliding or stale description; drop it and carry on.
    Ignored,
    /// Description applied as the remote description.
    Applied {
        /// Candidates queued before the remote description existed, now
        /// ready to be added in arrival order.
        flushed: Vec<IceCandidate>,
        /// True when the remote description was an offer and the caller
        /// must produce an answer via [`Negotiator::local_answer`].
        reply_with_answer: bool,
    },
}

/// What to do with an incoming candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Add to the peer connection now.
    Apply(IceCandidate),
    /// Held until a remote description is applied.
    Queued,
}

/// Local negotiation state for one peer connection.
#[derive(Debug)]
pub struct Negotiator {
    polite: bool,
    making_offer: bool,
    ignore_offer: bool,
    stable: bool,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    queued: Vec<IceCandidate>,
}

impl Negotiator {
    pub fn new(polite: bool) -> Self {
        Self {
            polite,
            making_offer: false,
            ignore_offer: false,
            stable: true,
            local: None,
            remote: None,
            queued: Vec::new(),
        }
    }

    pub fn polite(&self) -> bool {
        self.polite
    }

    /// True once an offer/answer pair has been applied (or before any
    /// negotiation started).
    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote.as_ref()
    }

    /// Start a local offer. Returns the description to send to the peer.
    pub fn begin_offer(
        &mut self,
        sdp: impl Into<String>,
    ) -> Result<SessionDescription, NegotiationError> {
        if self.remote.as_ref().map(|d| d.kind) == Some(SdpKind::Offer) && !self.stable {
            return Err(NegotiationError::AnswerPending);
        }
        let description = SessionDescription::offer(sdp);
        self.making_offer = true;
        self.stable = false;
        self.local = Some(description.clone());
        Ok(description)
    }

    /// Record the answer produced for a previously accepted remote offer.
    /// Returns the description to send to the peer.
    pub fn local_answer(&mut self, sdp: impl Into<String>) -> SessionDescription {
        let description = SessionDescription::answer(sdp);
        self.local = Some(description.clone());
        self.stable = true;
        description
    }

    /// Feed a remote description received from signaling.
    pub fn receive_description(&mut self, description: SessionDescription) -> DescriptionOutcome {
        let collision =
            description.kind == SdpKind::Offer && (self.making_offer || !self.stable);

        self.ignore_offer = !self.polite && collision;
        if self.ignore_offer {
            return DescriptionOutcome::Ignored;
        }

        match description.kind {
            SdpKind::Offer => {
                // Polite rollback: an in-flight local offer is abandoned in
                // favour of the remote one.
                if collision {
                    self.local = None;
                    self.making_offer = false;
                }
                self.remote = Some(description);
                self.stable = false;
                DescriptionOutcome::Applied {
                    flushed: self.drain_queue(),
                    reply_with_answer: true,
                }
            }
            SdpKind::Answer => {
                // An answer only pairs with our own outstanding offer;
                // anything else is a stale duplicate.
                if self.local.as_ref().map(|d| d.kind) != Some(SdpKind::Offer) || self.stable {
                    return DescriptionOutcome::Ignored;
                }
                self.remote = Some(description);
                self.making_offer = false;
                self.stable = true;
                DescriptionOutcome::Applied {
                    flushed: self.drain_queue(),
                    reply_with_answer: false,
                }
            }
        }
    }

    /// Feed a remote ICE candidate received from signaling.
    pub fn receive_candidate(&mut self, candidate: IceCandidate) -> CandidateOutcome {
        if self.remote.is_some() {
            CandidateOutcome::Apply(candidate)
        } else {
            self.queued.push(candidate);
            CandidateOutcome::Queued
        }
    }

    fn drain_queue(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.queued)
    }
}
