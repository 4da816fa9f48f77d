use crate::animation::{Canvas, RestingFace};
use crate::assets::AssetFetcher;
use crate::channel::{BindingSource, ChannelBinding};
use crate::config::{OverlayConfig, ReconnectPolicy};
use crate::connection::Screen;
use crate::error::{AssetError, Error};
use crate::overlay::Overlay;
use crate::profile::RenderDefaults;
use crate::reconciler::{Notice, NoticeLevel, TimerKey};
use crate::render::{mount_marked, Mounted, Renderer, TableView};
use crate::timers::TimerEvent;
use futures::future::{BoxFuture, FutureExt};
use futures::{SinkExt, StreamExt};
use image::RgbaImage;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tableside_protocol::{decode_event, ActionRequest, ClientAction, ServerEvent};
use tokio_tungstenite::tungstenite::Message;

/// Every asset is missing.
struct NotFound;

impl AssetFetcher for NotFound {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, AssetError>> {
        let url = url.to_string();
        async move { Err(AssetError::Status { url, status: 404 }) }.boxed()
    }
}

#[derive(Debug, Default)]
struct CanvasLog {
    frames: usize,
    rested: Option<RestingFace>,
    detached: bool,
}

struct FakeCanvas(Rc<RefCell<CanvasLog>>);

impl Canvas for FakeCanvas {
    fn is_attached(&self) -> bool {
        !self.0.borrow().detached
    }

    fn draw_frame(&mut self, _frame: &RgbaImage) {
        self.0.borrow_mut().frames += 1;
    }

    fn show_static(&mut self, face: RestingFace) {
        self.0.borrow_mut().rested = Some(face);
    }
}

#[derive(Default)]
struct Record {
    views: Vec<TableView>,
    notices: Vec<Notice>,
    screens: Vec<Option<Screen>>,
    countdowns: Vec<(TimerKey, String, Duration)>,
    canvases: Vec<Rc<RefCell<CanvasLog>>>,
}

#[derive(Clone, Default)]
struct FakeRenderer(Rc<RefCell<Record>>);

impl Renderer for FakeRenderer {
    fn render(&mut self, view: &TableView) -> Vec<Mounted> {
        let record = self.0.clone();
        record.borrow_mut().views.push(view.clone());
        mount_marked(view, || {
            let log = Rc::new(RefCell::new(CanvasLog::default()));
            record.borrow_mut().canvases.push(log.clone());
            Box::new(FakeCanvas(log))
        })
    }

    fn show_screen(&mut self, screen: Option<Screen>) {
        self.0.borrow_mut().screens.push(screen);
    }

    fn notice(&mut self, notice: &Notice) {
        self.0.borrow_mut().notices.push(notice.clone());
    }

    fn countdown(&mut self, key: TimerKey, label: &str, remaining: Duration) {
        self.0.borrow_mut().countdowns.push((key, label.to_string(), remaining));
    }
}

fn event(value: serde_json::Value) -> ServerEvent {
    decode_event(&value.to_string()).unwrap()
}

fn overlay_with(config: OverlayConfig, channel: &str) -> (Overlay<FakeRenderer>, Rc<RefCell<Record>>) {
    let renderer = FakeRenderer::default();
    let record = renderer.0.clone();
    let binding = ChannelBinding::new(channel, &config.lobby_prefix, BindingSource::Query).unwrap();
    let overlay = Overlay::new(config, binding, RenderDefaults::default(), renderer, Arc::new(NotFound)).unwrap();
    (overlay, record)
}

fn overlay(viewer: Option<&str>) -> (Overlay<FakeRenderer>, Rc<RefCell<Record>>) {
    let config = OverlayConfig {
        viewer: viewer.map(str::to_string),
        seat_count: 3,
        ..Default::default()
    };
    overlay_with(config, "table-3")
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn foreign_channel_changes_nothing_on_screen() {
    let (mut overlay, record) = overlay(Some("p"));
    let foreign = event(json!({"event": "roundStarted", "data": {
        "channel": "table-9", "roundId": 1,
        "players": [{"login": "p", "hand": ["Ah", "Kh"]}]
    }}));
    assert!(overlay.handle_event(&foreign).is_none());
    assert!(overlay.state().players.is_empty());
    assert!(record.borrow().views.is_empty());
    assert!(overlay.scheduler().is_empty());
}

#[tokio::test]
async fn only_the_new_card_animates_and_missing_sprites_degrade() {
    let (mut overlay, record) = overlay(Some("p"));
    overlay.handle_event(&event(json!({"event": "roundStarted", "data": {
        "channel": "table-3", "roundId": 7,
        "players": [{"login": "P", "hand": ["9c", "2h"]}]
    }})));
    assert_eq!(overlay.scheduler().len(), 2);

    overlay.handle_event(&event(json!({"event": "playerUpdate", "data": {
        "channel": "table-3",
        "player": {"login": "p", "hand": ["9c", "2h", "Kd"]}
    }})));
    {
        let record = record.borrow();
        let view = record.views.last().unwrap();
        assert_eq!(view.animated_cards(), 1);
        let seat = view.seat_of("p").unwrap();
        assert!(seat.cards[2].animate.is_some());
        assert!(seat.cards.iter().all(|c| c.face_up));
    }
    assert_eq!(overlay.scheduler().len(), 3);

    // every sprite 404s: each card settles on static art
    settle().await;
    let stats = overlay.tick(Instant::now());
    assert_eq!(stats.degraded, 3);
    assert!(overlay.scheduler().is_empty());
    let record = record.borrow();
    assert!(record.canvases.iter().all(|c| c.borrow().rested == Some(RestingFace::FaceUp)));
    assert!(record.canvases.iter().all(|c| c.borrow().frames == 0));
    assert_eq!(overlay.state().player("p").unwrap().card_count(), 3);
}

#[tokio::test]
async fn other_players_cards_deal_face_down_until_the_result() {
    let (mut overlay, record) = overlay(None);
    overlay.handle_event(&event(json!({"event": "state", "data": {
        "channel": "table-3", "roundId": 1, "phase": "dealing",
        "players": [{"login": "ann", "hand": ["Ah", "Kh"]}],
        "dealerHand": ["7s"]
    }})));
    {
        let record = record.borrow();
        let view = record.views.last().unwrap();
        assert!(view.seat_of("ann").unwrap().cards.iter().all(|c| !c.face_up));
        assert!(view.dealer[0].face_up);
    }

    overlay.handle_event(&event(json!({"event": "roundResult", "data": {
        "channel": "table-3",
        "results": [{"login": "ann", "outcome": "win", "payout": 20}]
    }})));
    let record = record.borrow();
    let view = record.views.last().unwrap();
    let ann = view.seat_of("ann").unwrap();
    assert!(ann.cards.iter().all(|c| c.face_up));
    assert!(ann.effect.is_some());
}

#[tokio::test(start_paused = true)]
async fn countdown_ticks_reach_the_renderer() {
    let (mut overlay, record) = overlay(None);
    overlay.handle_event(&event(json!({"event": "bettingStarted", "data": {"channel": "table-3", "durationMs": 2000}})));
    assert!(overlay.timers().is_active(TimerKey::Countdown));

    let tick: TimerEvent = overlay.next_timer().await.unwrap();
    assert!(overlay.handle_timer(tick));
    assert_eq!(
        record.borrow().countdowns,
        vec![(TimerKey::Countdown, "Betting closes".to_string(), Duration::from_secs(2))]
    );

    overlay.handle_event(&event(json!({"event": "roundResult", "data": {"channel": "table-3", "results": []}})));
    assert_eq!(overlay.timers().active(), 0);
}

#[tokio::test]
async fn malformed_frames_become_warnings() {
    let (mut overlay, record) = overlay(None);
    overlay.handle_inbound(crate::connection::Inbound::Malformed { error: "expected value".into() });
    let record = record.borrow();
    assert_eq!(record.notices.len(), 1);
    assert_eq!(record.notices[0].level, NoticeLevel::Warn);
    assert!(record.views.is_empty());
}

#[tokio::test]
async fn animations_toggle_off_at_runtime() {
    let (mut overlay, record) = overlay(Some("p"));
    overlay.handle_event(&event(json!({"event": "overlaySettings", "data": {"channel": "table-3", "animations": false}})));
    overlay.handle_event(&event(json!({"event": "state", "data": {
        "channel": "table-3", "roundId": 1,
        "players": [{"login": "p", "hand": ["Ah"]}]
    }})));
    assert!(overlay.scheduler().is_empty());
    let record = record.borrow();
    assert_eq!(record.canvases.len(), 1);
    assert_eq!(record.canvases[0].borrow().rested, Some(RestingFace::FaceUp));
}

#[tokio::test]
async fn actions_are_gated_by_controls() {
    let (mut overlay, _) = overlay(Some("p"));
    // nothing dealt yet
    assert!(!overlay.send_action(ClientAction::PlayerHit).unwrap());

    overlay.handle_event(&event(json!({"event": "state", "data": {
        "channel": "table-3", "roundId": 1, "phase": "dealing", "toAct": "p",
        "players": [{"login": "p", "hand": ["9c", "7d"]}]
    }})));
    assert!(overlay.state().actions.hit);
    assert!(matches!(overlay.send_action(ClientAction::PlayerHit), Err(Error::ConnectionClosed)));
    // poker controls stay off outside lobby channels
    assert!(!overlay.send_action(ClientAction::PlayerFold).unwrap());
}

#[tokio::test]
async fn accessibility_adds_a_description() {
    let config = OverlayConfig {
        accessibility: true,
        seat_count: 2,
        ..Default::default()
    };
    let (mut overlay, record) = overlay_with(config, "table-3");
    overlay.handle_event(&event(json!({"event": "state", "data": {
        "channel": "table-3", "roundId": 1, "phase": "betting",
        "players": [{"login": "ann", "displayName": "Ann", "bet": 25}]
    }})));
    let record = record.borrow();
    let description = record.views[0].description.as_deref().unwrap();
    assert!(description.contains("Seat 1: Ann, bet 25."), "{description}");
    assert!(description.contains("pot 25"));
}

#[tokio::test]
async fn skin_change_reaches_the_next_flip() {
    let (mut overlay, record) = overlay(Some("p"));
    overlay.handle_event(&event(json!({"event": "overlaySettings", "data": {
        "channel": "table-3", "cardFace": "https://cdn.example/gold/"
    }})));
    overlay.handle_event(&event(json!({"event": "state", "data": {
        "channel": "table-3", "roundId": 1,
        "players": [{"login": "p", "hand": ["10h"]}]
    }})));
    let record = record.borrow();
    assert_eq!(record.views.last().unwrap().card_face.as_deref(), Some("https://cdn.example/gold/"));
    assert_eq!(
        crate::render::face_skin(record.views.last().unwrap(), None, &"10h".parse().unwrap()),
        "https://cdn.example/gold/10h.png"
    );
}

#[tokio::test]
async fn run_follows_the_socket_until_it_gives_up() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // the reconnect that follows is refused
        drop(listener);
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let Some(Ok(Message::Text(join))) = ws.next().await else {
            panic!("expected join");
        };
        let state = json!({"event": "state", "data": {
            "channel": "table-3", "roundId": 1,
            "players": [{"login": "ann", "bet": 5}]
        }});
        ws.send(Message::Text(state.to_string())).await.unwrap();
        ws.close(None).await.unwrap();
        ActionRequest::decode(&join).unwrap()
    });

    let config = OverlayConfig {
        server_url: format!("http://{addr}/ws"),
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            jitter: 0.0,
            max_attempts: Some(1),
        },
        ..Default::default()
    };
    let (overlay, record) = overlay_with(config, "table-3");
    tokio::time::timeout(Duration::from_secs(10), overlay.run()).await.unwrap().unwrap();

    let join = server.await.unwrap();
    assert_eq!(join.action, ClientAction::JoinChannel);
    assert_eq!(join.channel, "table-3");

    let record = record.borrow();
    assert!(record.views.iter().any(|v| v.seat_of("ann").is_some_and(|s| s.bet == 5)));
    assert_eq!(record.screens.first(), Some(&Some(Screen::Loading)));
    assert!(record.screens.contains(&None));
    assert_eq!(record.screens.last(), Some(&Some(Screen::Error)));
}
