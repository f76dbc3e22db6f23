//! Per-process realtime hub (spec.md §4.5): maps `player_id ->
//! connection`, routes typed moves to the session's engine under a
//! per-session lock, and broadcasts the post-mutation sanitized
//! snapshot to both players.

pub mod server;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use duelstake_core::prelude::*;
use duelstake_game::{GameEngine, RuntimeError, SessionRuntime};
use duelstake_ledger::Ledger;
use duelstake_store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum HubError {
    #[error("no such session")]
    SessionNotFound,

    #[error("player is not part of this session")]
    PlayerNotInSession,

    #[error("unknown or expired player token")]
    InvalidToken,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// The hub's typed incoming message envelope (spec.md §4.5 "Incoming
/// messages are typed").
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    PlayCard { card: Value, declared_suit: Option<Value> },
    DrawCard,
    Pass,
    TakeShot { angle: f64, power: f64, screw: f64, english: f64 },
    ShotResult(Value),
    PlaceCueBall { x: f64, y: f64 },
    Concede,
    Ping,
}

impl ClientMessage {
    fn move_type(&self) -> &'static str {
        match self {
            ClientMessage::PlayCard { .. } => "play_card",
            ClientMessage::DrawCard => "draw_card",
            ClientMessage::Pass => "pass",
            ClientMessage::TakeShot { .. } => "take_shot",
            ClientMessage::ShotResult(_) => "shot_result",
            ClientMessage::PlaceCueBall { .. } => "place_cue_ball",
            ClientMessage::Concede => "concede",
            ClientMessage::Ping => "ping",
        }
    }

    fn payload(&self) -> Value {
        match self {
            ClientMessage::PlayCard { card, declared_suit } => {
                json!({"card": card, "declared_suit": declared_suit})
            }
            ClientMessage::TakeShot { angle, power, screw, english } => {
                json!({"angle": angle, "power": power, "screw": screw, "english": english})
            }
            ClientMessage::ShotResult(v) => v.clone(),
            ClientMessage::PlaceCueBall { x, y } => json!({"x": x, "y": y}),
            ClientMessage::DrawCard | ClientMessage::Pass | ClientMessage::Concede | ClientMessage::Ping => json!({}),
        }
    }
}

struct LiveSession {
    runtime: SessionRuntime<Box<dyn GameEngine>>,
    tx: broadcast::Sender<Value>,
}

/// Registry of in-progress sessions. One process owns every session it
/// registers; there is no cross-process handoff (spec.md §4.5 "per-
/// process"). Cheap to clone, the way `Broadcaster` shares its
/// `Arc<Mutex<_>>` state across every handle to it.
#[derive(Clone)]
pub struct Hub {
    store: Store,
    ledger: Ledger,
    sessions: Arc<Mutex<HashMap<SessionId, Arc<Mutex<LiveSession>>>>>,
    commission_pct: u32,
    tax_pct: u32,
    disconnect_grace: Duration,
}

impl Hub {
    pub fn new(store: Store, ledger: Ledger, commission_pct: u32, tax_pct: u32, disconnect_grace: Duration) -> Self {
        Self {
            store,
            ledger,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            commission_pct,
            tax_pct,
            disconnect_grace,
        }
    }

    /// Registers a freshly matched session with the hub (called right
    /// after `Matchmaker::finish_match` creates it).
    pub async fn spawn_session(&self, session: GameSession, engine: Box<dyn GameEngine>) {
        let id = session.id;
        let runtime = SessionRuntime::new(
            session,
            engine,
            self.store.clone(),
            self.ledger.clone(),
            self.commission_pct,
            self.tax_pct,
            self.disconnect_grace,
        );
        let (tx, _rx) = broadcast::channel(16);
        self.sessions.lock().await.insert(id, Arc::new(Mutex::new(LiveSession { runtime, tx })));
        info!(session_id = id.0, "session registered with hub");
    }

    async fn find_by_token(&self, game_token: &str) -> Result<Arc<Mutex<LiveSession>>, HubError> {
        let session = self.store.get_session_by_token(game_token).await.map_err(|e| match e {
            StoreError::NotFound => HubError::SessionNotFound,
            other => HubError::Storage(other),
        })?;
        self.sessions.lock().await.get(&session.id).cloned().ok_or(HubError::SessionNotFound)
    }

    async fn authenticate(&self, player_token: &str) -> Result<PlayerId, HubError> {
        self.store
            .get_player_by_token(player_token)
            .await
            .map(|p| p.id)
            .map_err(|_| HubError::InvalidToken)
    }

    /// On connection: authenticates the player, registers them as
    /// connected (triggering `AwaitingPlayers -> InProgress` once both
    /// sides are present), and returns the initial sanitized snapshot.
    pub async fn connect(&self, game_token: &str, player_token: &str) -> Result<Value, HubError> {
        let player = self.authenticate(player_token).await?;
        let live = self.find_by_token(game_token).await?;
        let mut live = live.lock().await;
        if !live.runtime.session.involves(player) {
            return Err(HubError::PlayerNotInSession);
        }
        live.runtime.mark_connected(player).await?;
        let snapshot = self.snapshot_envelope(&live.runtime, player);
        self.broadcast_update(&live).await;
        Ok(snapshot)
    }

    pub async fn subscribe(&self, game_token: &str) -> Result<broadcast::Receiver<Value>, HubError> {
        let live = self.find_by_token(game_token).await?;
        let live = live.lock().await;
        Ok(live.tx.subscribe())
    }

    /// Routes one typed client message to the session's engine under
    /// the session lock (spec.md §4.5 "strictly serialized").
    pub async fn handle_message(
        &self,
        game_token: &str,
        player_token: &str,
        message: ClientMessage,
    ) -> Result<(), HubError> {
        if matches!(message, ClientMessage::Ping) {
            return Ok(());
        }
        let player = self.authenticate(player_token).await?;
        let live = self.find_by_token(game_token).await?;
        let mut live = live.lock().await;
        if !live.runtime.session.involves(player) {
            return Err(HubError::PlayerNotInSession);
        }

        if matches!(message, ClientMessage::Concede) {
            live.runtime.concede(player).await?;
        } else {
            live.runtime.submit_move(player, message.move_type(), &message.payload()).await?;
        }
        self.broadcast_update(&live).await;
        Ok(())
    }

    /// spec.md §4.5 "a closed connection enters a disconnect-grace
    /// timer rather than forfeiting immediately".
    pub async fn handle_disconnect(&self, game_token: &str, player_token: &str) -> Result<(), HubError> {
        let player = self.authenticate(player_token).await?;
        let live = self.find_by_token(game_token).await?;
        let mut live = live.lock().await;
        live.runtime.mark_disconnected(player, Utc::now());
        debug!(session_token = game_token, player = player.0, "player disconnected, grace timer started");
        Ok(())
    }

    /// spec.md §4.6 "disconnect forfeit" ticker: sweep every live
    /// session and forfeit anyone past their grace period.
    pub async fn tick_disconnect_forfeits(&self, now: chrono::DateTime<Utc>) -> Result<usize, HubError> {
        let sessions: Vec<Arc<Mutex<LiveSession>>> = self.sessions.lock().await.values().cloned().collect();
        let mut forfeited = 0;
        for live in sessions {
            let mut live = live.lock().await;
            if live.runtime.check_disconnect_forfeit(now).await? {
                forfeited += 1;
                self.broadcast_update(&live).await;
            }
        }
        Ok(forfeited)
    }

    /// Drops a session from the registry once it has reached a
    /// terminal status, freeing its broadcast channel.
    pub async fn retire_completed(&self) {
        let mut sessions = self.sessions.lock().await;
        let mut to_remove = Vec::new();
        for (&id, live) in sessions.iter() {
            let live = live.lock().await;
            if live.runtime.session.status.is_terminal() {
                to_remove.push(id);
            }
        }
        for id in to_remove {
            sessions.remove(&id);
        }
    }

    fn snapshot_envelope<E: GameEngine>(&self, runtime: &SessionRuntime<E>, player: PlayerId) -> Value {
        json!({
            "type": "game_update",
            "session_id": runtime.session.id.0,
            "session_status": runtime.session.status.as_str(),
            "state": runtime.engine().state_for(player),
        })
    }

    async fn broadcast_update(&self, live: &LiveSession) {
        for player in [live.runtime.session.player1_id, live.runtime.session.player2_id] {
            let envelope = self.snapshot_envelope(&live.runtime, player);
            // Single shared channel; each client-side subscriber filters to
            // its own sanitized view by `for_player` tagging below.
            let tagged = json!({"for_player": player.0, "update": envelope});
            if let Err(e) = live.tx.send(tagged) {
                debug!(error = %e, "no active subscribers for broadcast");
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl ErrorMessage {
    pub fn from_hub_error(e: &HubError) -> Self {
        Self { kind: "error", message: e.to_string() }
    }
}
