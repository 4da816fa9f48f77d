//! Development relay for the overlay.
//!
//! Overlays connect to `/ws` and subscribe with `joinChannel`. Each channel
//! replays its script to every subscriber; actions sent back are logged and
//! kept for inspection. The config endpoints serve fixtures.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tableside_protocol::{normalize_login, ActionRequest, ClientAction};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod args;
pub mod fixtures;
pub mod script;

pub use args::RelayArgs;
pub use fixtures::Fixtures;
pub use script::{Script, ScriptError, ScriptLibrary, Step};

/// Actions kept for inspection; older ones are dropped first.
pub const ACTION_LOG_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    /// Directory of `<channel>.jsonl` scripts.
    pub scripts: Option<PathBuf>,
    /// JSON file backing the config endpoints.
    pub fixtures: Option<PathBuf>,
    /// Start a channel's script over once it ends.
    pub loop_scripts: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 9001)),
            scripts: None,
            fixtures: None,
            loop_scripts: false,
        }
    }
}

/// An action an overlay sent, as the relay received it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub at: DateTime<Utc>,
    pub subscriber: Uuid,
    pub request: ActionRequest,
}

struct Subscriber {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Channel {
    subscribers: Vec<Subscriber>,
    /// Last snapshot frame sent, for late joiners.
    last_snapshot: Option<String>,
    replaying: bool,
}

#[derive(Clone)]
pub struct AppState {
    scripts: Arc<ScriptLibrary>,
    fixtures: Arc<Fixtures>,
    channels: Arc<Mutex<HashMap<String, Channel>>>,
    actions: Arc<Mutex<VecDeque<ActionRecord>>>,
    action_limit: usize,
    loop_scripts: bool,
}

impl AppState {
    pub fn new(scripts: ScriptLibrary, fixtures: Fixtures, loop_scripts: bool) -> Self {
        Self {
            scripts: Arc::new(scripts),
            fixtures: Arc::new(fixtures),
            channels: Arc::new(Mutex::new(HashMap::new())),
            actions: Arc::new(Mutex::new(VecDeque::new())),
            action_limit: ACTION_LOG_LIMIT,
            loop_scripts,
        }
    }

    /// Keep at most `limit` actions in the log.
    pub fn with_action_limit(mut self, limit: usize) -> Self {
        self.action_limit = limit.max(1);
        self
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, ScriptError> {
        let scripts = match &config.scripts {
            Some(dir) => ScriptLibrary::from_dir(dir)?,
            None => ScriptLibrary::default(),
        };
        let fixtures = match &config.fixtures {
            Some(path) => Fixtures::load(path)?,
            None => Fixtures::default(),
        };
        Ok(Self::new(scripts, fixtures, config.loop_scripts))
    }

    /// The most recent actions received, oldest first.
    pub fn actions(&self) -> Vec<ActionRecord> {
        self.actions.lock().iter().cloned().collect()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(&normalize_login(channel))
            .map_or(0, |c| c.subscribers.len())
    }

    /// Send a raw frame to every subscriber of `channel`. Returns how many
    /// subscribers it reached.
    pub fn broadcast(&self, channel: &str, frame: &str, snapshot: bool) -> usize {
        let mut channels = self.channels.lock();
        let Some(ch) = channels.get_mut(channel) else {
            return 0;
        };
        if snapshot {
            ch.last_snapshot = Some(frame.to_string());
        }
        ch.subscribers.retain(|s| s.tx.send(frame.to_string()).is_ok());
        ch.subscribers.len()
    }

    fn subscribe(&self, channel: &str, id: Uuid, tx: &mpsc::UnboundedSender<String>) -> bool {
        let mut channels = self.channels.lock();
        let ch = channels.entry(channel.to_string()).or_default();
        ch.subscribers.retain(|s| s.id != id);
        if let Some(snapshot) = &ch.last_snapshot {
            let _ = tx.send(snapshot.clone());
        }
        ch.subscribers.push(Subscriber { id, tx: tx.clone() });
        info!(%channel, subscriber = %short(id), subscribers = ch.subscribers.len(), "[JOIN] overlay subscribed");

        let start = !ch.replaying && self.scripts.for_channel(channel).is_some_and(|s| !s.is_empty());
        if start {
            ch.replaying = true;
        }
        start
    }

    fn unsubscribe(&self, channel: &str, id: Uuid) {
        let mut channels = self.channels.lock();
        if let Some(ch) = channels.get_mut(channel) {
            ch.subscribers.retain(|s| s.id != id);
            debug!(%channel, subscriber = %short(id), "[LEAVE] overlay gone");
        }
    }

    fn record(&self, subscriber: Uuid, request: ActionRequest) {
        info!(
            channel = %request.channel,
            subscriber = %short(subscriber),
            action = request.action.name(),
            "[ACTION] {:?}",
            request.action
        );
        let mut actions = self.actions.lock();
        if actions.len() >= self.action_limit {
            actions.pop_front();
        }
        actions.push_back(ActionRecord {
            at: Utc::now(),
            subscriber,
            request,
        });
    }
}

fn short(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/config/public", get(public_config))
        .route("/api/balances", get(balances))
        .route("/api/cosmetics/catalog", get(catalog))
        .route("/api/cosmetics/loadout/:channel", get(loadout))
        .with_state(state)
}

/// Bind and serve until the process stops.
pub async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("relay listening on ws://{}/ws", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub async fn public_config(State(state): State<AppState>) -> Json<Value> {
    Json(state.fixtures.public.clone())
}

pub async fn balances(State(state): State<AppState>) -> Json<Value> {
    Json(state.fixtures.balances.clone())
}

pub async fn catalog(State(state): State<AppState>) -> Json<Value> {
    Json(state.fixtures.catalog.clone())
}

pub async fn loadout(State(state): State<AppState>, Path(channel): Path<String>) -> Json<Value> {
    Json(state.fixtures.loadout(&channel))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx_out, mut rx_out) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(frame) = rx_out.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let my_id = Uuid::new_v4();
    let mut joined: Option<String> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let request = match ActionRequest::decode(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(subscriber = %short(my_id), error = %e, "unreadable action");
                        continue;
                    }
                };
                route_action(request, &state, &mut joined, my_id, &tx_out);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(channel) = joined {
        state.unsubscribe(&channel, my_id);
    }
}

fn route_action(
    request: ActionRequest,
    state: &AppState,
    joined: &mut Option<String>,
    my_id: Uuid,
    tx_out: &mpsc::UnboundedSender<String>,
) {
    let channel = normalize_login(&request.channel);
    if channel.is_empty() {
        warn!(subscriber = %short(my_id), "action without a channel");
        return;
    }

    if request.action == ClientAction::JoinChannel {
        if let Some(previous) = joined.replace(channel.clone()) {
            if previous != channel {
                state.unsubscribe(&previous, my_id);
            }
        }
        if state.subscribe(&channel, my_id, tx_out) {
            tokio::spawn(replay(state.clone(), channel));
        }
    }
    state.record(my_id, request);
}

/// Play the channel's script to its subscribers. Stops when nobody is
/// listening any more.
async fn replay(state: AppState, channel: String) {
    let Some(script) = state.scripts.for_channel(&channel).cloned() else {
        return;
    };
    info!(%channel, steps = script.steps.len(), "[REPLAY] starting");

    'outer: loop {
        for step in &script.steps {
            tokio::time::sleep(step.delay).await;
            let frame = step.frame_for(&channel);
            let reached = state.broadcast(&channel, &frame, step.is_snapshot());
            debug!(%channel, event = step.name, reached, "[REPLAY] step");
            if reached == 0 {
                break 'outer;
            }
        }
        if !state.loop_scripts {
            break;
        }
    }

    if let Some(ch) = state.channels.lock().get_mut(&channel) {
        ch.replaying = false;
    }
    info!(%channel, "[REPLAY] finished");
}
