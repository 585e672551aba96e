#![forbid(unsafe_code)]

// WebSocket connection handler for individual clients

use super::protocol::{ClientMessage, ProtocolError, RelayKind, ServerMessage};
use crate::auth::Identity;
use crate::config::ServerConfig;
use crate::metrics::ServerMetrics;
use crate::room::relay::Ancillary;
use crate::room::{send_message, JoinOutcome, Outbound, RoomCoordinator};
use crate::turn::{ice_servers_for, TurnConfig};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounded channel capacity per client.
/// At 100 msg/s rate limit, 64 slots = 640ms of burst buffer.
const CHANNEL_CAPACITY: usize = 64;

/// Floor for the heartbeat period when the idle timeout is very short.
const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// Internal: 1 token in microseconds (for integer math).
const TOKEN_US: u64 = 1_000_000;

/// Per-connection token bucket. Refill rate and burst are both `per_sec` messages.
#[derive(Debug)]
struct TokenBucket {
    per_sec: u64,
    tokens_us: u64,
    max_tokens_us: u64,
    last_refill: Instant,
    warned: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum RateDecision {
    Allow,
    /// `notify` is set on the first rejection of a burst only
    Deny { notify: bool },
}

impl TokenBucket {
    fn new(per_sec: u64, now: Instant) -> Self {
        let max_tokens_us = per_sec.saturating_mul(TOKEN_US);
        Self {
            per_sec,
            tokens_us: max_tokens_us,
            max_tokens_us,
            last_refill: now,
            warned: false,
        }
    }

    fn take(&mut self, now: Instant) -> RateDecision {
        let elapsed_us = now.saturating_duration_since(self.last_refill).as_micros() as u64;
        self.last_refill = now;
        self.tokens_us = self
            .tokens_us
            .saturating_add(elapsed_us.saturating_mul(self.per_sec))
            .min(self.max_tokens_us);

        if self.tokens_us >= TOKEN_US {
            self.tokens_us -= TOKEN_US;
            self.warned = false;
            RateDecision::Allow
        } else {
            let notify = !self.warned;
            self.warned = true;
            RateDecision::Deny { notify }
        }
    }
}

/// Why an inbound frame never reached the coordinator
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid message: {0}")]
    Invalid(#[from] ProtocolError),
}

pub fn decode_frame(text: &str) -> Result<ClientMessage, FrameError> {
    let message: ClientMessage = serde_json::from_str(text)?;
    message.validate()?;
    Ok(message)
}

/// What the gateway tracks for one live connection
pub struct ConnectionState {
    pub conn_id: String,
    pub sender: Outbound,
    /// Verified identity from the upgrade token; overrides what `join` claims
    pub identity: Option<Identity>,
    pub current_room: Option<String>,
}

impl ConnectionState {
    pub fn new(conn_id: String, sender: Outbound, identity: Option<Identity>) -> Self {
        Self { conn_id, sender, identity, current_room: None }
    }
}

/// Ping period: three pings per idle window, so a live but silent client's
/// automatic Pongs keep the read side from timing out.
fn heartbeat_period(idle_timeout: Duration) -> Duration {
    (idle_timeout / 3).max(MIN_HEARTBEAT)
}

/// Writes queued frames to the socket, interleaved with heartbeat Pings.
/// Ends when every sender is gone or the socket refuses a write.
async fn send_loop<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Arc<String>>,
    heartbeat: Duration,
    metrics: ServerMetrics,
) where
    S: Sink<Message> + Unpin,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            queued = rx.recv() => match queued {
                Some(json) => {
                    metrics.inc_messages_sent();
                    Message::Text((*json).clone().into())
                }
                None => break,
            },
            _ = ticker.tick() => Message::Ping(Default::default()),
        };
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}

/// Handles a single WebSocket connection
pub async fn handle_connection(
    socket: WebSocket,
    coordinator: Arc<RoomCoordinator>,
    turn_config: Option<Arc<TurnConfig>>,
    config: Arc<ServerConfig>,
    identity: Option<Identity>,
    metrics: ServerMetrics,
    _permit: OwnedSemaphorePermit,
) {
    let conn_id = Uuid::new_v4().to_string();
    info!("New WebSocket connection: {}", conn_id);

    metrics.inc_connections_total();
    let _conn_guard = metrics.connection_active_guard();

    let (ws_sender, mut ws_receiver) = socket.split();

    // Bounded channel for sending messages to this client
    let (tx, rx) = mpsc::channel::<Arc<String>>(CHANNEL_CAPACITY);

    let conn_id_clone = conn_id.clone();
    let send_metrics = metrics.clone();
    let heartbeat = heartbeat_period(config.idle_timeout);

    // Spawn task to send messages and heartbeats to client
    let send_task = tokio::spawn(async move {
        send_loop(ws_sender, rx, heartbeat, send_metrics).await;
        debug!("Send task finished for connection: {}", conn_id_clone);
    });

    coordinator.register_connection(&conn_id, tx.clone());
    send_message(&tx, &conn_id, &ServerMessage::Connected {
        conn_id: conn_id.clone(),
        ice_servers: ice_servers_for(turn_config.as_deref(), &conn_id),
    });

    let mut state = ConnectionState::new(conn_id.clone(), tx, identity);
    let mut bucket = TokenBucket::new(config.rate_limit_per_sec, Instant::now());

    loop {
        // Idle timeout: close connection if no message arrives in time. Pongs to our
        // heartbeat count, so only dead or unresponsive peers hit this.
        let msg = match tokio::time::timeout(config.idle_timeout, ws_receiver.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(_))) | Ok(None) => break, // Stream error or closed
            Err(_) => {
                warn!("Idle timeout for connection {}", conn_id);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                metrics.inc_messages_received();

                match bucket.take(Instant::now()) {
                    RateDecision::Allow => {}
                    RateDecision::Deny { notify } => {
                        if notify {
                            warn!("Rate limit exceeded for connection {}", conn_id);
                            send_message(&state.sender, &conn_id, &ServerMessage::Error {
                                message: format!(
                                    "Rate limit exceeded: max {} messages/second",
                                    config.rate_limit_per_sec
                                ),
                            });
                        }
                        continue;
                    }
                }

                match decode_frame(&text) {
                    Ok(client_msg) => {
                        let start = Instant::now();
                        handle_client_message(client_msg, &mut state, &coordinator).await;
                        metrics.observe_message_handling(start.elapsed());
                    }
                    Err(e) => {
                        warn!("Rejected frame from {}: {}", conn_id, e);
                        metrics.inc_errors();
                        if state.sender.is_closed() {
                            break;
                        }
                        send_message(&state.sender, &conn_id, &ServerMessage::Error { message: e.to_string() });
                    }
                }
            }
            Message::Close(_) => {
                info!("Client {} closed connection", conn_id);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Ping replies are automatic; either frame resets the idle timeout
            }
            _ => {
                warn!("Unexpected message type from client {}", conn_id);
            }
        }
    }

    if let Some(room_key) = state.current_room.take() {
        coordinator.disconnect(&room_key, &conn_id).await;
    }
    coordinator.unregister_connection(&conn_id);

    // _conn_guard dropped here → dec_connections_active
    // _permit dropped here → release semaphore

    // A room entry in its grace window still holds a sender, so the channel
    // would not close on its own.
    drop(state);
    send_task.abort();

    info!("Connection handler finished for connection: {}", conn_id);
}

/// Dispatches one validated client event to the coordinator.
pub async fn handle_client_message(
    msg: ClientMessage,
    state: &mut ConnectionState,
    coordinator: &Arc<RoomCoordinator>,
) {
    let conn_id = state.conn_id.clone();
    match msg {
        ClientMessage::Join { room_key, stable_id, display_name } => {
            if let Some(previous) = state.current_room.take() {
                if previous != room_key {
                    coordinator.leave(&previous, &conn_id).await;
                } else {
                    state.current_room = Some(previous);
                }
            }

            let (stable_id, display_name) = match &state.identity {
                Some(identity) => (identity.stable_id.clone(), identity.display_name.clone()),
                None => (stable_id, display_name),
            };

            let outcome = coordinator
                .join(&room_key, &stable_id, &display_name, &conn_id, state.sender.clone())
                .await;
            if let JoinOutcome::Joined { .. } = outcome {
                state.current_room = Some(room_key);
            }
        }

        ClientMessage::RelayOffer { target, sdp } => {
            coordinator.relay(&conn_id, &target, RelayKind::Offer, sdp);
        }
        ClientMessage::RelayAnswer { target, sdp } => {
            coordinator.relay(&conn_id, &target, RelayKind::Answer, sdp);
        }
        ClientMessage::RelayCandidate { target, candidate } => {
            coordinator.relay(&conn_id, &target, RelayKind::Candidate, candidate);
        }

        ClientMessage::Chat { room_key, message } => {
            coordinator.broadcast_from(&room_key, &conn_id, Ancillary::Chat(message)).await;
        }
        ClientMessage::Reaction { room_key, emoji } => {
            coordinator.broadcast_from(&room_key, &conn_id, Ancillary::Reaction(emoji)).await;
        }
        ClientMessage::RaiseHand { room_key, raised } => {
            coordinator.broadcast_from(&room_key, &conn_id, Ancillary::RaiseHand(raised)).await;
        }
        ClientMessage::AudioToggle { room_key, muted } => {
            coordinator.broadcast_from(&room_key, &conn_id, Ancillary::Audio(muted)).await;
        }
        ClientMessage::VideoToggle { room_key, off } => {
            coordinator.broadcast_from(&room_key, &conn_id, Ancillary::Video(off)).await;
        }
        ClientMessage::ScreenShare { room_key, sharing } => {
            coordinator.broadcast_from(&room_key, &conn_id, Ancillary::ScreenShare(sharing)).await;
        }

        ClientMessage::Remove { room_key, target } => {
            coordinator.remove_participant(&room_key, &conn_id, &target).await;
        }
        ClientMessage::Mute { room_key, target } => {
            coordinator.mute(&room_key, &conn_id, &target).await;
        }
        ClientMessage::Unmute { room_key, target } => {
            coordinator.unmute(&room_key, &conn_id, &target).await;
        }
        ClientMessage::MuteAll { room_key } => {
            coordinator.mute_all(&room_key, &conn_id).await;
        }
        ClientMessage::UnmuteAll { room_key } => {
            coordinator.unmute_all(&room_key, &conn_id).await;
        }
        ClientMessage::Lock { room_key, locked } => {
            coordinator.set_lock(&room_key, &conn_id, locked).await;
        }
        ClientMessage::Spotlight { room_key, target } => {
            coordinator.spotlight(&room_key, &conn_id, target.as_deref()).await;
        }
        ClientMessage::EndForAll { room_key } => {
            if coordinator.end_for_all(&room_key, &conn_id).await
                && state.current_room.as_deref() == Some(room_key.as_str())
            {
                state.current_room = None;
            }
        }

        ClientMessage::Leave { room_key } => {
            if state.current_room.as_deref() != Some(room_key.as_str()) {
                debug!("Leave from {} for {} ignored: not its current room", conn_id, room_key);
                return;
            }
            coordinator.leave(&room_key, &conn_id).await;
            state.current_room = None;
        }
    }
}
