use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::presence::{PresenceError, PresenceRegistry};
use crate::protocol::{generate_match_id, MatchPrefs, MatchStatus, ServerMessage};
use crate::recorder::{MatchRecord, Recorder};
use crate::relay::SignalingRelay;
use crate::roster::{SyntheticProfile, SyntheticRoster};

/// One side of a pairing as the engine sees it.
#[derive(Debug, Clone)]
struct Endpoint {
    connection_id: String,
    participant_id: String,
    duo_connection_id: Option<String>,
}

#[derive(Debug, Clone)]
enum Counterpart {
    Real(Endpoint),
    Synthetic(SyntheticProfile),
}

#[derive(Debug, Clone)]
struct ActiveMatch {
    match_id: String,
    requester: Endpoint,
    counterpart: Counterpart,
    started_at: DateTime<Utc>,
}

impl ActiveMatch {
    fn is_fake(&self) -> bool {
        matches!(self.counterpart, Counterpart::Synthetic(_))
    }
}

/// A connection that asked for a match and has none yet. `epoch`
/// invalidates fallback timers armed for an earlier waiting stint of the
/// same connection.
#[derive(Debug)]
struct WaitingEntry {
    participant_id: String,
    connection_id: String,
    duo_connection_id: Option<String>,
    enqueued_at: DateTime<Utc>,
    epoch: u64,
}

struct EngineInner {
    waiting: VecDeque<WaitingEntry>,
    active: HashMap<String, ActiveMatch>,
    by_connection: HashMap<String, String>,
    epochs: HashMap<String, u64>,
    roster: SyntheticRoster,
}

/// Decides who is paired with whom and when. All queue/match mutations go
/// through one mutex so per-connection transitions are totally ordered
/// and a connection id is never in the waiting queue and an active match
/// at once.
pub struct MatchEngine {
    presence: Arc<PresenceRegistry>,
    relay: Arc<SignalingRelay>,
    recorder: Recorder,
    config: Config,
    inner: Mutex<EngineInner>,
}

impl MatchEngine {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        relay: Arc<SignalingRelay>,
        recorder: Recorder,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            presence,
            relay,
            recorder,
            config,
            inner: Mutex::new(EngineInner {
                waiting: VecDeque::new(),
                active: HashMap::new(),
                by_connection: HashMap::new(),
                epochs: HashMap::new(),
                roster: SyntheticRoster::default(),
            }),
        })
    }

    /// Queue and active-match gauges for the ops surface.
    pub async fn stats(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        (inner.waiting.len(), inner.active.len())
    }

    /// Enter the waiting pool or pair immediately with the
    /// earliest-enqueued eligible waiter.
    pub async fn find_match(
        self: &Arc<Self>,
        connection_id: &str,
        participant_id: &str,
        duo_connection_id: Option<String>,
        _prefs: Option<MatchPrefs>,
    ) {
        if let Err(err) =
            self.presence
                .register(connection_id, participant_id, duo_connection_id.clone())
        {
            match err {
                PresenceError::DuplicateConnection { .. } => {
                    self.presence.send(
                        connection_id,
                        ServerMessage::MatchError {
                            message: err.to_string(),
                        },
                    );
                }
                PresenceError::NotConnected(_) => {
                    warn!(connection_id, "find_match from unattached connection");
                }
            }
            return;
        }

        let mut inner = self.inner.lock().await;

        // Already matched: nothing to do.
        if inner.by_connection.contains_key(connection_id) {
            debug!(connection_id, "find_match while matched; ignoring");
            return;
        }

        // Already waiting collapses to a requeue.
        inner.waiting.retain(|e| e.connection_id != connection_id);

        let requester = Endpoint {
            connection_id: connection_id.to_string(),
            participant_id: participant_id.to_string(),
            duo_connection_id,
        };

        let eligible = inner.waiting.iter().position(|entry| {
            entry.participant_id != requester.participant_id
                && Some(entry.connection_id.as_str()) != requester.duo_connection_id.as_deref()
                && entry.duo_connection_id.as_deref() != Some(connection_id)
        });

        if let Some(index) = eligible {
            let entry = inner.waiting.remove(index).expect("index in bounds");
            let waiting_side = Endpoint {
                connection_id: entry.connection_id,
                participant_id: entry.participant_id,
                duo_connection_id: entry.duo_connection_id,
            };
            self.bind_real(&mut inner, waiting_side, requester);
            return;
        }

        let epoch = {
            let counter = inner
                .epochs
                .entry(connection_id.to_string())
                .or_insert(0);
            *counter += 1;
            *counter
        };
        inner.waiting.push_back(WaitingEntry {
            participant_id: requester.participant_id,
            connection_id: requester.connection_id.clone(),
            duo_connection_id: requester.duo_connection_id,
            enqueued_at: Utc::now(),
            epoch,
        });
        drop(inner);

        self.presence.send(
            connection_id,
            ServerMessage::MatchStatus {
                status: MatchStatus::Waiting,
            },
        );
        self.arm_fallback(connection_id.to_string(), epoch, false);
    }

    /// Voluntary termination. Unknown match ids are a silent no-op;
    /// callers race disconnects and explicit ends.
    pub async fn end_match(&self, match_id: &str) {
        let mut inner = self.inner.lock().await;
        self.terminate(&mut inner, match_id);
    }

    /// Terminate own match (recording duration) and tell the named
    /// connections the caller is gone.
    pub async fn skip(&self, connection_id: &str, targets: &[String]) {
        let mut inner = self.inner.lock().await;
        if let Some(match_id) = inner.by_connection.get(connection_id).cloned() {
            self.terminate(&mut inner, &match_id);
        }
        drop(inner);

        for target in targets {
            self.presence.send(target, ServerMessage::StrangerLeft);
        }
    }

    /// Transport disconnect: cancel timers, purge the waiting entry,
    /// tear down any active match, then free the presence slot. After
    /// this returns nothing references the connection.
    pub async fn disconnect(&self, connection_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.waiting.retain(|e| e.connection_id != connection_id);
        inner.epochs.remove(connection_id);
        if let Some(match_id) = inner.by_connection.get(connection_id).cloned() {
            self.terminate(&mut inner, &match_id);
        }
        drop(inner);

        self.presence.unregister(connection_id);
    }

    fn bind_real(&self, inner: &mut EngineInner, waiting_side: Endpoint, requester: Endpoint) {
        let match_id = generate_match_id();
        let started_at = Utc::now();

        inner
            .by_connection
            .insert(requester.connection_id.clone(), match_id.clone());
        inner
            .by_connection
            .insert(waiting_side.connection_id.clone(), match_id.clone());
        self.relay.open_route(
            &requester.connection_id,
            &match_id,
            &waiting_side.connection_id,
        );
        self.relay.open_route(
            &waiting_side.connection_id,
            &match_id,
            &requester.connection_id,
        );

        info!(
            %match_id,
            requester = %requester.participant_id,
            counterpart = %waiting_side.participant_id,
            "paired"
        );

        // The requester completed the pair (arrived second) and takes the
        // polite role in negotiation glare.
        for (us, them, polite) in [
            (&requester, &waiting_side, true),
            (&waiting_side, &requester, false),
        ] {
            self.presence.send(
                &us.connection_id,
                ServerMessage::Matched {
                    match_id: match_id.clone(),
                    partner_id: them.participant_id.clone(),
                    partner_connection_id: Some(them.connection_id.clone()),
                    is_fake: false,
                    polite,
                    start_time: started_at,
                    counterpart: None,
                },
            );
            if let Some(duo) = &us.duo_connection_id {
                self.presence.send(
                    duo,
                    ServerMessage::Peer {
                        match_id: match_id.clone(),
                        partner_id: them.participant_id.clone(),
                        partner_connection_id: Some(them.connection_id.clone()),
                        is_fake: false,
                    },
                );
            }
        }

        self.recorder.record_start(MatchRecord {
            match_id: match_id.clone(),
            participant_id: requester.participant_id.clone(),
            counterpart_id: waiting_side.participant_id.clone(),
            is_fake: false,
            started_at,
            ended_at: None,
            duration_ms: None,
        });

        inner.active.insert(
            match_id.clone(),
            ActiveMatch {
                match_id,
                requester,
                counterpart: Counterpart::Real(waiting_side),
                started_at,
            },
        );
    }

    fn bind_synthetic(&self, inner: &mut EngineInner, requester: Endpoint) {
        let Some(profile) = inner.roster.pick(&mut rand::thread_rng()) else {
            self.presence.send(
                &requester.connection_id,
                ServerMessage::MatchError {
                    message: "no counterpart available".to_string(),
                },
            );
            return;
        };

        let match_id = generate_match_id();
        let started_at = Utc::now();
        let placeholder = format!("synthetic-{}", profile.id);

        inner
            .by_connection
            .insert(requester.connection_id.clone(), match_id.clone());
        // One-sided route: sends toward the placeholder are dropped, the
        // synthetic side never negotiates.
        self.relay
            .open_route(&requester.connection_id, &match_id, &placeholder);

        info!(
            %match_id,
            requester = %requester.participant_id,
            counterpart = %profile.id,
            "paired with synthetic counterpart"
        );

        self.presence.send(
            &requester.connection_id,
            ServerMessage::Matched {
                match_id: match_id.clone(),
                partner_id: profile.id.clone(),
                partner_connection_id: None,
                is_fake: true,
                polite: false,
                start_time: started_at,
                counterpart: Some(profile.clone()),
            },
        );
        if let Some(duo) = &requester.duo_connection_id {
            self.presence.send(
                duo,
                ServerMessage::Peer {
                    match_id: match_id.clone(),
                    partner_id: profile.id.clone(),
                    partner_connection_id: None,
                    is_fake: true,
                },
            );
        }

        self.recorder.record_start(MatchRecord {
            match_id: match_id.clone(),
            participant_id: requester.participant_id.clone(),
            counterpart_id: profile.id.clone(),
            is_fake: true,
            started_at,
            ended_at: None,
            duration_ms: None,
        });

        inner.active.insert(
            match_id.clone(),
            ActiveMatch {
                match_id,
                requester,
                counterpart: Counterpart::Synthetic(profile),
                started_at,
            },
        );
    }

    /// Remove the match, close its routes, notify the live endpoints and
    /// their duo partners, and record the final duration. Returns false
    /// for already-ended matches.
    fn terminate(&self, inner: &mut EngineInner, match_id: &str) -> bool {
        let Some(active) = inner.active.remove(match_id) else {
            debug!(match_id, "end for unknown match; ignoring");
            return false;
        };

        let ended_at = Utc::now();
        let duration_ms = (ended_at - active.started_at).num_milliseconds();
        let is_fake = active.is_fake();

        inner.by_connection.remove(&active.requester.connection_id);
        self.relay.close_route(&active.requester.connection_id);

        let ended = ServerMessage::MatchEnded {
            match_id: active.match_id.clone(),
            duration_ms,
            is_fake,
        };
        self.presence
            .send(&active.requester.connection_id, ended.clone());
        if let Some(duo) = &active.requester.duo_connection_id {
            self.presence.send(duo, ServerMessage::StrangerLeft);
        }

        if let Counterpart::Real(other) = &active.counterpart {
            inner.by_connection.remove(&other.connection_id);
            self.relay.close_route(&other.connection_id);
            self.presence.send(&other.connection_id, ended);
            if let Some(duo) = &other.duo_connection_id {
                self.presence.send(duo, ServerMessage::StrangerLeft);
            }
        }

        info!(%match_id, duration_ms, is_fake, "match ended");
        self.recorder
            .record_end(active.match_id, ended_at, duration_ms);
        true
    }

    fn arm_fallback(self: &Arc<Self>, connection_id: String, epoch: u64, forced: bool) {
        let engine = Arc::clone(self);
        let delay = if forced {
            self.config.synthetic_extra_wait
        } else {
            self.config.match_wait
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.fallback_fire(connection_id, epoch, forced).await;
        });
    }

    /// Fallback timer body. A no-op unless the connection is still in the
    /// same waiting stint the timer was armed for.
    async fn fallback_fire(self: Arc<Self>, connection_id: String, epoch: u64, forced: bool) {
        let mut inner = self.inner.lock().await;

        let position = inner
            .waiting
            .iter()
            .position(|e| e.connection_id == connection_id && e.epoch == epoch);
        let Some(index) = position else {
            return;
        };

        if !forced {
            let roll: f64 = rand::thread_rng().gen();
            if roll >= self.config.synthetic_match_probability {
                // Keep trying for a real partner a little longer; the
                // second expiry synthesizes unconditionally.
                drop(inner);
                self.arm_fallback(connection_id, epoch, true);
                return;
            }
        }

        let entry = inner.waiting.remove(index).expect("index in bounds");
        debug!(
            connection_id = %entry.connection_id,
            waited_ms = (Utc::now() - entry.enqueued_at).num_milliseconds(),
            forced,
            "fallback timer expired"
        );
        let requester = Endpoint {
            connection_id: entry.connection_id,
            participant_id: entry.participant_id,
            duo_connection_id: entry.duo_connection_id,
        };
        self.bind_synthetic(&mut inner, requester);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        engine: Arc<MatchEngine>,
        presence: Arc<PresenceRegistry>,
        relay: Arc<SignalingRelay>,
    }

    fn harness(probability: f64) -> Harness {
        let presence = Arc::new(PresenceRegistry::new());
        let relay = Arc::new(SignalingRelay::new(presence.clone()));
        let config = Config {
            synthetic_match_probability: probability,
            ..Config::default()
        };
        let engine = MatchEngine::new(
            presence.clone(),
            relay.clone(),
            Recorder::disabled(),
            config,
        );
        Harness {
            engine,
            presence,
            relay,
        }
    }

    impl Harness {
        fn connect(&self, id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.presence.attach(id.to_string(), tx);
            rx
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn matched_of(messages: &[ServerMessage]) -> Vec<&ServerMessage> {
        messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::Matched { .. }))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn second_requester_pairs_with_first() {
        let h = harness(0.8);
        let mut rx_a = h.connect("c-a");
        let mut rx_b = h.connect("c-b");

        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.find_match("c-b", "grace", None, None).await;

        let a_msgs = drain(&mut rx_a);
        let b_msgs = drain(&mut rx_b);

        // First requester saw the waiting acknowledgement, then the match.
        assert!(matches!(
            a_msgs[0],
            ServerMessage::MatchStatus {
                status: MatchStatus::Waiting
            }
        ));
        let a_matched_all = matched_of(&a_msgs);
        let b_matched_all = matched_of(&b_msgs);
        assert_eq!(a_matched_all.len(), 1, "expected exactly one matched for a");
        assert_eq!(b_matched_all.len(), 1, "expected exactly one matched for b");
        let (a_matched, b_matched) = (a_matched_all[0], b_matched_all[0]);

        match (a_matched, b_matched) {
            (
                ServerMessage::Matched {
                    match_id: id_a,
                    partner_id: partner_a,
                    is_fake: fake_a,
                    polite: polite_a,
                    ..
                },
                ServerMessage::Matched {
                    match_id: id_b,
                    partner_id: partner_b,
                    is_fake: fake_b,
                    polite: polite_b,
                    ..
                },
            ) => {
                assert_eq!(id_a, id_b);
                assert_eq!(partner_a, "grace");
                assert_eq!(partner_b, "ada");
                assert!(!fake_a && !fake_b);
                // The side that asked second is polite.
                assert!(!polite_a);
                assert!(*polite_b);
            }
            _ => unreachable!(),
        }

        let (waiting, active) = h.engine.stats().await;
        assert_eq!(waiting, 0);
        assert_eq!(active, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_queue_is_first_in_first_matched() {
        let h = harness(0.8);
        let mut rx_a = h.connect("c-a");
        let mut rx_b = h.connect("c-b");
        let _rx_c = h.connect("c-c");

        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.find_match("c-b", "grace", None, None).await;
        // b paired with a; c now queues alone.
        drain(&mut rx_a);
        drain(&mut rx_b);

        h.engine.end_match_for_test("c-a").await;
        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.find_match("c-c", "joan", None, None).await;

        // a re-queued before c asked, so c pairs with a.
        let a_msgs = drain(&mut rx_a);
        let partner = a_msgs.iter().find_map(|m| match m {
            ServerMessage::Matched { partner_id, .. } => Some(partner_id.clone()),
            _ => None,
        });
        assert_eq!(partner.as_deref(), Some("joan"));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_before_first_timer_leaves_nothing() {
        let h = harness(1.0);
        let mut rx_a = h.connect("c-a");

        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.disconnect("c-a").await;

        tokio::time::sleep(Duration::from_secs(12)).await;

        let msgs = drain(&mut rx_a);
        assert!(matched_of(&msgs).is_empty(), "must never match: {msgs:?}");
        let (waiting, active) = h.engine.stats().await;
        assert_eq!((waiting, active), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn synthetic_match_after_first_wait() {
        let h = harness(1.0);
        let mut rx_a = h.connect("c-a");

        h.engine.find_match("c-a", "ada", None, None).await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        let msgs = drain(&mut rx_a);
        let matched = matched_of(&msgs);
        assert_eq!(matched.len(), 1);
        match matched[0] {
            ServerMessage::Matched {
                is_fake,
                polite,
                partner_connection_id,
                counterpart,
                ..
            } => {
                assert!(*is_fake);
                assert!(!polite);
                assert!(partner_connection_id.is_none());
                assert!(counterpart.is_some());
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lost_coin_flip_forces_synthesis_after_second_wait() {
        let h = harness(0.0);
        let mut rx_a = h.connect("c-a");

        h.engine.find_match("c-a", "ada", None, None).await;

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(
            matched_of(&drain(&mut rx_a)).is_empty(),
            "no match between the two timers"
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        let msgs = drain(&mut rx_a);
        let matched = matched_of(&msgs);
        assert_eq!(matched.len(), 1, "exactly one matched event: {msgs:?}");
        assert!(matches!(
            matched[0],
            ServerMessage::Matched { is_fake: true, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_collapses_to_one_entry_and_one_outcome() {
        let h = harness(1.0);
        let mut rx_a = h.connect("c-a");

        h.engine.find_match("c-a", "ada", None, None).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        h.engine.find_match("c-a", "ada", None, None).await;

        let (waiting, _) = h.engine.stats().await;
        assert_eq!(waiting, 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        let msgs = drain(&mut rx_a);
        assert_eq!(
            matched_of(&msgs).len(),
            1,
            "stale timer must not double-fire: {msgs:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn same_participant_is_not_paired_with_itself() {
        let h = harness(0.0);
        let mut rx_a = h.connect("c-a");
        let mut rx_b = h.connect("c-b");

        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.find_match("c-b", "ada", None, None).await;

        assert!(matched_of(&drain(&mut rx_a)).is_empty());
        assert!(matched_of(&drain(&mut rx_b)).is_empty());
        let (waiting, active) = h.engine.stats().await;
        assert_eq!((waiting, active), (2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn duo_partners_are_not_paired_with_each_other() {
        let h = harness(0.0);
        let _rx_a = h.connect("c-a");
        let _rx_d = h.connect("c-d");

        h.engine
            .find_match("c-a", "ada", Some("c-d".into()), None)
            .await;
        h.engine.find_match("c-d", "dora", None, None).await;

        let (waiting, active) = h.engine.stats().await;
        assert_eq!((waiting, active), (2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn duo_partner_receives_peer_fanout() {
        let h = harness(0.8);
        let mut rx_a = h.connect("c-a");
        let mut rx_b = h.connect("c-b");
        let mut rx_d = h.connect("c-d");

        h.engine
            .find_match("c-a", "ada", Some("c-d".into()), None)
            .await;
        h.engine.find_match("c-b", "grace", None, None).await;

        let a_partner = drain(&mut rx_a).iter().find_map(|m| match m {
            ServerMessage::Matched { partner_id, .. } => Some(partner_id.clone()),
            _ => None,
        });
        assert_eq!(a_partner.as_deref(), Some("grace"));

        let b_partner = drain(&mut rx_b).iter().find_map(|m| match m {
            ServerMessage::Matched { partner_id, .. } => Some(partner_id.clone()),
            _ => None,
        });
        assert_eq!(b_partner.as_deref(), Some("ada"));

        let d_msgs = drain(&mut rx_d);
        match &d_msgs[..] {
            [ServerMessage::Peer {
                partner_id,
                is_fake,
                ..
            }] => {
                assert_eq!(partner_id, "grace");
                assert!(!is_fake);
            }
            other => panic!("expected one peer fan-out, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ending_twice_produces_one_ended_event() {
        let h = harness(0.8);
        let mut rx_a = h.connect("c-a");
        let mut rx_b = h.connect("c-b");

        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.find_match("c-b", "grace", None, None).await;
        let match_id = drain(&mut rx_a)
            .iter()
            .find_map(|m| match m {
                ServerMessage::Matched { match_id, .. } => Some(match_id.clone()),
                _ => None,
            })
            .unwrap();
        drain(&mut rx_b);

        h.engine.end_match(&match_id).await;
        h.engine.disconnect("c-a").await;

        let ended: Vec<_> = drain(&mut rx_b)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::MatchEnded { .. }))
            .collect();
        assert_eq!(ended.len(), 1);
        assert!(!h.relay.has_route("c-a"));
        assert!(!h.relay.has_route("c-b"));
    }

    #[tokio::test(start_paused = true)]
    async fn find_match_while_matched_is_a_noop() {
        let h = harness(0.8);
        let mut rx_a = h.connect("c-a");
        let mut rx_b = h.connect("c-b");

        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.find_match("c-b", "grace", None, None).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        h.engine.find_match("c-a", "ada", None, None).await;
        assert!(drain(&mut rx_a).is_empty());
        let (waiting, active) = h.engine.stats().await;
        assert_eq!((waiting, active), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn matched_timer_never_fires_synthetic() {
        let h = harness(1.0);
        let mut rx_a = h.connect("c-a");
        let mut rx_b = h.connect("c-b");

        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.find_match("c-b", "grace", None, None).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(matched_of(&drain(&mut rx_a)).is_empty());
        let (_, active) = h.engine.stats().await;
        assert_eq!(active, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_notifies_targets_and_ends_own_match() {
        let h = harness(0.8);
        let mut rx_a = h.connect("c-a");
        let mut rx_b = h.connect("c-b");

        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.find_match("c-b", "grace", None, None).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        h.engine.skip("c-a", &["c-b".to_string()]).await;

        let b_msgs = drain(&mut rx_b);
        assert!(b_msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::MatchEnded { .. })));
        assert!(b_msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::StrangerLeft)));
        let (_, active) = h.engine.stats().await;
        assert_eq!(active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn conflicting_identity_reports_match_error() {
        let h = harness(0.8);
        let mut rx_a = h.connect("c-a");

        h.engine.find_match("c-a", "ada", None, None).await;
        h.engine.find_match("c-a", "grace", None, None).await;

        let msgs = drain(&mut rx_a);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::MatchError { .. })));
        // Still exactly one waiting entry under the original identity.
        let (waiting, _) = h.engine.stats().await;
        assert_eq!(waiting, 1);
    }

    impl MatchEngine {
        /// Test helper: end whatever match the connection is in.
        async fn end_match_for_test(&self, connection_id: &str) {
            let mut inner = self.inner.lock().await;
            if let Some(match_id) = inner.by_connection.get(connection_id).cloned() {
                self.terminate(&mut inner, &match_id);
            }
        }
    }
}
