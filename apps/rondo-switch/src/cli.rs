use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use rtc_negotiation::{
    CandidateOutcome, DescriptionOutcome, IceCandidate, Negotiator, SessionDescription,
};

use crate::protocol::{ClientMessage, ServerMessage, SignalPayload};

#[derive(Parser, Debug)]
#[command(name = "rondo-switch")]
#[command(about = "Rondo matchmaking/signaling server and probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Run as server (default behavior if no command specified)
    #[arg(long)]
    pub server: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pair two throwaway clients against a live server and drive a
    /// glare-inducing negotiation through the relay. Only point this at
    /// an idle instance: probes pair with whoever is waiting.
    Probe {
        /// Server URL
        #[arg(short, long, default_value = "ws://localhost:8080")]
        url: String,

        /// Participant id prefix for the two probe clients
        #[arg(short, long, default_value = "probe")]
        participant: String,
    },
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct ProbeSide {
    label: &'static str,
    ws: WsStream,
    connection_id: String,
}

struct Pairing {
    match_id: String,
    partner_connection_id: String,
    polite: bool,
}

impl ProbeSide {
    async fn connect(ws_url: &str, label: &'static str) -> Result<Self> {
        let (ws, _) = timeout(Duration::from_secs(5), connect_async(ws_url))
            .await
            .context("connection timeout - is the server running?")?
            .context("failed to connect")?;

        let mut side = Self {
            label,
            ws,
            connection_id: String::new(),
        };
        match side.next_message(Duration::from_secs(5)).await? {
            ServerMessage::Connected { connection_id } => side.connection_id = connection_id,
            other => bail!("expected connected handshake, got {other:?}"),
        }
        debug!(label, connection_id = %side.connection_id, "probe connected");
        Ok(side)
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_message(&mut self, wait: Duration) -> Result<ServerMessage> {
        match self.try_next_message(wait).await? {
            Some(message) => Ok(message),
            None => bail!("timed out waiting for server message on {}", self.label),
        }
    }

    async fn try_next_message(&mut self, wait: Duration) -> Result<Option<ServerMessage>> {
        let deadline = timeout(wait, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Ok(Some(serde_json::from_str::<ServerMessage>(&text)?));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        bail!("connection closed for {}", self.label)
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(err.into()),
                }
            }
        })
        .await;
        match deadline {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    async fn await_matched(&mut self) -> Result<Pairing> {
        loop {
            match self.next_message(Duration::from_secs(15)).await? {
                ServerMessage::Matched {
                    match_id,
                    partner_connection_id,
                    is_fake,
                    polite,
                    ..
                } => {
                    if is_fake {
                        bail!("probe {} got a synthetic match; is the server idle?", self.label);
                    }
                    let partner_connection_id = partner_connection_id
                        .context("real match without partner connection id")?;
                    return Ok(Pairing {
                        match_id,
                        partner_connection_id,
                        polite,
                    });
                }
                ServerMessage::MatchStatus { .. } => continue,
                ServerMessage::MatchError { message } => bail!("match error: {message}"),
                other => {
                    debug!(label = self.label, "ignoring {other:?} while matching");
                }
            }
        }
    }
}

fn description_envelope(to: &str, description: &SessionDescription) -> Result<ClientMessage> {
    Ok(ClientMessage::Message {
        to: to.to_string(),
        payload: SignalPayload::Description {
            description: serde_json::to_value(description)?,
        },
    })
}

fn candidate_envelope(to: &str, candidate: &IceCandidate) -> Result<ClientMessage> {
    Ok(ClientMessage::Message {
        to: to.to_string(),
        payload: SignalPayload::Candidate {
            candidate: serde_json::to_value(candidate)?,
        },
    })
}

/// Pump one inbound envelope (if any) through the local negotiator.
async fn drive(side: &mut ProbeSide, negotiator: &mut Negotiator, partner: &str) -> Result<()> {
    let Some(message) = side.try_next_message(Duration::from_millis(500)).await? else {
        return Ok(());
    };

    match message {
        ServerMessage::Message { payload, .. } => match payload {
            SignalPayload::Description { description } => {
                let description: SessionDescription = serde_json::from_value(description)?;
                match negotiator.receive_description(description) {
                    DescriptionOutcome::Ignored => {
                        debug!(label = side.label, "ignored colliding description");
                    }
                    DescriptionOutcome::Applied {
                        flushed,
                        reply_with_answer,
                    } => {
                        debug!(
                            label = side.label,
                            flushed = flushed.len(),
                            "applied remote description"
                        );
                        if reply_with_answer {
                            let answer =
                                negotiator.local_answer(format!("v=0 answer-{}", side.label));
                            let envelope = description_envelope(partner, &answer)?;
                            side.send(&envelope).await?;
                        }
                    }
                }
            }
            SignalPayload::Candidate { candidate } => {
                let candidate: IceCandidate = serde_json::from_value(candidate)?;
                match negotiator.receive_candidate(candidate) {
                    CandidateOutcome::Apply(c) => {
                        debug!(label = side.label, candidate = %c.candidate, "applied candidate");
                    }
                    CandidateOutcome::Queued => {
                        debug!(label = side.label, "queued early candidate");
                    }
                }
            }
        },
        other => debug!(label = side.label, "ignoring {other:?} during negotiation"),
    }
    Ok(())
}

pub async fn run_probe(url: String, participant: String) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));

    let mut a = ProbeSide::connect(&ws_url, "a").await?;
    let mut b = ProbeSide::connect(&ws_url, "b").await?;

    a.send(&ClientMessage::FindMatch {
        participant_id: format!("{participant}-a"),
        duo_connection_id: None,
        prefs: None,
    })
    .await?;
    b.send(&ClientMessage::FindMatch {
        participant_id: format!("{participant}-b"),
        duo_connection_id: None,
        prefs: None,
    })
    .await?;

    let pairing_a = a.await_matched().await?;
    let pairing_b = b.await_matched().await?;

    if pairing_a.match_id != pairing_b.match_id
        || pairing_a.partner_connection_id != b.connection_id
        || pairing_b.partner_connection_id != a.connection_id
    {
        bail!("probes were not paired with each other; point the probe at an idle instance");
    }
    if pairing_a.polite == pairing_b.polite {
        bail!("both sides share the {} role", pairing_a.polite);
    }
    println!(
        "paired: match={} polite side={}",
        pairing_a.match_id,
        if pairing_a.polite { "a" } else { "b" }
    );

    let mut negotiator_a = Negotiator::new(pairing_a.polite);
    let mut negotiator_b = Negotiator::new(pairing_b.polite);

    // Deliberate glare: both sides offer at once, plus an early candidate
    // each to exercise the pre-description queue.
    let offer_a = negotiator_a.begin_offer("v=0 offer-a")?;
    let offer_b = negotiator_b.begin_offer("v=0 offer-b")?;
    let envelope = description_envelope(&pairing_a.partner_connection_id, &offer_a)?;
    a.send(&envelope).await?;
    let envelope = candidate_envelope(
        &pairing_a.partner_connection_id,
        &IceCandidate::new("candidate:a-0"),
    )?;
    a.send(&envelope).await?;
    let envelope = description_envelope(&pairing_b.partner_connection_id, &offer_b)?;
    b.send(&envelope).await?;
    let envelope = candidate_envelope(
        &pairing_b.partner_connection_id,
        &IceCandidate::new("candidate:b-0"),
    )?;
    b.send(&envelope).await?;

    let mut rounds = 0;
    while !(negotiator_a.is_stable() && negotiator_b.is_stable()) {
        rounds += 1;
        if rounds > 32 {
            bail!("negotiation did not converge");
        }
        drive(&mut a, &mut negotiator_a, &pairing_a.partner_connection_id).await?;
        drive(&mut b, &mut negotiator_b, &pairing_b.partner_connection_id).await?;
    }
    println!(
        "negotiation converged in {rounds} rounds: a={:?}/{:?} b={:?}/{:?}",
        negotiator_a.local_description().map(|d| d.kind),
        negotiator_a.remote_description().map(|d| d.kind),
        negotiator_b.local_description().map(|d| d.kind),
        negotiator_b.remote_description().map(|d| d.kind),
    );

    a.send(&ClientMessage::EndMatch {
        match_id: pairing_a.match_id.clone(),
    })
    .await?;
    for side in [&mut a, &mut b] {
        loop {
            match side.next_message(Duration::from_secs(5)).await? {
                ServerMessage::MatchEnded {
                    match_id,
                    duration_ms,
                    ..
                } => {
                    println!("{}: match {match_id} ended after {duration_ms}ms", side.label);
                    break;
                }
                other => debug!(label = side.label, "ignoring {other:?} while ending"),
            }
        }
    }

    Ok(())
}
