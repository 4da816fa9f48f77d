//! Transport lifecycle: connect, subscribe, reconnect with backoff.
//!
//! The manager runs as one background task. Inbound frames are decoded at
//! this boundary, so everything downstream sees typed `ServerEvent`s; frames
//! that fail to decode are logged and dropped. Connection state is published
//! on a watch channel.

use crate::config::ReconnectPolicy;
use crate::error::{Error, Result};
use futures::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tableside_protocol::{decode_event, ActionRequest, ClientAction, ServerEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Disconnected,
}

/// Full-screen overlays driven by the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Loading,
    Error,
}

impl ConnectionState {
    pub fn screen(&self) -> Option<Screen> {
        match self {
            ConnectionState::Connected => None,
            ConnectionState::Reconnecting => Some(Screen::Loading),
            ConnectionState::Disconnected => Some(Screen::Error),
        }
    }
}

/// What the transport hands to the overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ServerEvent),
    /// A text frame that did not decode; already dropped.
    Malformed { error: String },
}

enum SessionEnd {
    /// The overlay went away; stop for good.
    Shutdown,
    /// The socket dropped; reconnect.
    Lost(String),
}

/// Map `http(s)` endpoints onto `ws(s)` and reject anything else.
pub fn websocket_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => return Err(Error::InvalidScheme(other.to_string())),
    };
    url.set_scheme(scheme).map_err(|_| Error::InvalidScheme(raw.to_string()))?;
    Ok(url)
}

pub struct ConnectionManager {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<ClientAction>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Start the connection task for `channel`. The state starts out as
    /// `Reconnecting` until the first connect succeeds.
    pub fn spawn(
        server_url: &str,
        channel: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Inbound>)> {
        let url = websocket_url(server_url)?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Reconnecting);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let channel = channel.into();

        let task = tokio::spawn(run(url, channel, policy, state_tx, events_tx, out_rx));
        let manager = Self {
            state: state_rx,
            outbound: out_tx,
            task,
        };
        Ok((manager, events_rx))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Queue an action for the bound channel. Actions sent while the socket
    /// is down are discarded on reconnect rather than replayed.
    pub fn send(&self, action: ClientAction) -> Result<()> {
        self.outbound.send(action).map_err(|_| Error::ConnectionClosed)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn run(
    url: Url,
    channel: String,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<Inbound>,
    mut outbound: mpsc::UnboundedReceiver<ClientAction>,
) {
    let mut rng = StdRng::from_entropy();
    let mut failures: u32 = 0;

    loop {
        let mut stale = 0;
        while outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            warn!(stale, "dropped actions queued while disconnected");
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                failures = 0;
                state.send_replace(ConnectionState::Connected);
                info!(%url, %channel, "[CONNECT] connected");
                match session(ws, &channel, &events, &mut outbound).await {
                    SessionEnd::Shutdown => {
                        state.send_replace(ConnectionState::Disconnected);
                        debug!(%channel, "connection task stopping");
                        return;
                    }
                    SessionEnd::Lost(reason) => warn!(%channel, %reason, "[CONNECT] connection lost"),
                }
            }
            Err(e) => {
                failures += 1;
                warn!(%url, attempt = failures, error = %e, "[CONNECT] connect failed");
            }
        }

        if policy.exhausted(failures) {
            error!(%url, attempts = failures, "{}", Error::ReconnectExhausted(failures));
            state.send_replace(ConnectionState::Disconnected);
            return;
        }
        if events.is_closed() {
            state.send_replace(ConnectionState::Disconnected);
            return;
        }

        state.send_replace(ConnectionState::Reconnecting);
        let delay = policy.delay(failures.max(1), &mut rng);
        debug!(?delay, "reconnecting after delay");
        tokio::time::sleep(delay).await;
    }
}

async fn session<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    channel: &str,
    events: &mpsc::UnboundedSender<Inbound>,
    outbound: &mut mpsc::UnboundedReceiver<ClientAction>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();

    if let Err(e) = send_action(&mut write, channel, ClientAction::JoinChannel).await {
        return SessionEnd::Lost(e.to_string());
    }

    loop {
        tokio::select! {
            action = outbound.recv() => match action {
                Some(action) => {
                    if let Err(e) = send_action(&mut write, channel, action).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                None => {
                    let _ = write.close().await;
                    return SessionEnd::Shutdown;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let inbound = match decode_event(&text) {
                        Ok(event) => Inbound::Event(event),
                        Err(e) => {
                            warn!(error = %e, "dropping undecodable frame");
                            Inbound::Malformed { error: e.to_string() }
                        }
                    };
                    if events.send(inbound).is_err() {
                        let _ = write.close().await;
                        return SessionEnd::Shutdown;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return SessionEnd::Lost(frame.map_or("closed by server".into(), |f| f.reason.to_string()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("stream ended".into()),
            },
        }
    }
}

async fn send_action<W>(write: &mut W, channel: &str, action: ClientAction) -> Result<()>
where
    W: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let name = action.name();
    let json = ActionRequest::new(channel, action).encode()?;
    write.send(Message::Text(json)).await?;
    debug!(action = name, %channel, "[ACTION] sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn http_urls_become_websocket_urls() {
        assert_eq!(websocket_url("http://h:1/ws").unwrap().as_str(), "ws://h:1/ws");
        assert_eq!(websocket_url("https://h/ws").unwrap().scheme(), "wss");
        assert_eq!(websocket_url("wss://h/ws").unwrap().scheme(), "wss");
        assert!(matches!(websocket_url("ftp://h"), Err(Error::InvalidScheme(_))));
    }

    #[test]
    fn screens_follow_state() {
        assert_eq!(ConnectionState::Connected.screen(), None);
        assert_eq!(ConnectionState::Reconnecting.screen(), Some(Screen::Loading));
        assert_eq!(ConnectionState::Disconnected.screen(), Some(Screen::Error));
    }

    fn fast_policy(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            factor: 2.0,
            jitter: 0.0,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn joins_decodes_and_rejoins_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut joins = Vec::new();
            for round in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let Some(Ok(Message::Text(join))) = ws.next().await else {
                    panic!("expected join");
                };
                joins.push(ActionRequest::decode(&join).unwrap());
                ws.send(Message::Text("{not json".into())).await.unwrap();
                let state = format!(r#"{{"event":"state","data":{{"channel":"table-3","roundId":{round}}}}}"#);
                ws.send(Message::Text(state)).await.unwrap();
                if round == 1 {
                    let Some(Ok(Message::Text(action))) = ws.next().await else {
                        panic!("expected action");
                    };
                    return (joins, ActionRequest::decode(&action).unwrap());
                }
                // drop the socket to force a reconnect
            }
            unreachable!()
        });

        let (manager, mut inbound) =
            ConnectionManager::spawn(&format!("ws://{addr}/ws"), "table-3", fast_policy(None)).unwrap();

        let mut decoded = 0;
        let mut malformed = 0;
        while decoded < 2 {
            match inbound.recv().await.unwrap() {
                Inbound::Event(event) => {
                    assert_eq!(event.channel(), Some("table-3"));
                    decoded += 1;
                }
                Inbound::Malformed { .. } => malformed += 1,
            }
        }
        assert_eq!(malformed, 2);
        assert_eq!(manager.state(), ConnectionState::Connected);
        manager.send(ClientAction::PlayerStand).unwrap();

        let (joins, action) = server.await.unwrap();
        assert_eq!(joins.len(), 2);
        assert!(joins.iter().all(|j| j.action == ClientAction::JoinChannel && j.channel == "table-3"));
        assert_eq!(action.action, ClientAction::PlayerStand);
        manager.shutdown();
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_budget() {
        // bind then drop so the port refuses connections
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let (manager, _inbound) =
            ConnectionManager::spawn(&format!("ws://{addr}/ws"), "table-3", fast_policy(Some(3))).unwrap();
        let mut state = manager.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while *state.borrow_and_update() != ConnectionState::Disconnected {
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
