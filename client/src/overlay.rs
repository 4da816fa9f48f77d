//! The overlay: one loop that owns the reconciler, the renderer, the
//! animation scheduler and the timers.
//!
//! Single-table, multi-table and accessible overlays are all this type with a
//! different `OverlayConfig`. The loop multiplexes inbound events, timer ticks
//! and animation frames; reconciliation itself never awaits.

use crate::animation::{AnimationRequest, FlipSkins, Scheduler, SpriteSet, TickStats};
use crate::assets::{AssetFetcher, Assets, HttpFetcher};
use crate::channel::{self, BindingSources, ChannelBinding};
use crate::config::OverlayConfig;
use crate::connection::{ConnectionManager, ConnectionState, Inbound, Screen};
use crate::error::{Error, Result};
use crate::model::OverlayState;
use crate::profile::{ProfileClient, PublicConfig, RenderDefaults};
use crate::reconciler::{Notice, Reconciler, Reconciliation};
use crate::render::{back_skin, face_skin, table_view, Mounted, Renderer, TableView};
use crate::timers::{TimerEvent, TimerRegistry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tableside_protocol::{ClientAction, ServerEvent};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

const ASSET_TIMEOUT: Duration = Duration::from_secs(15);

pub struct Overlay<R: Renderer> {
    config: OverlayConfig,
    reconciler: Reconciler,
    renderer: R,
    assets: Assets,
    scheduler: Scheduler,
    timers: TimerRegistry,
    timer_rx: Option<mpsc::UnboundedReceiver<TimerEvent>>,
    connection: Option<ConnectionManager>,
}

impl<R: Renderer> Overlay<R> {
    /// Resolve the channel, fetch profile defaults and build the overlay.
    /// Profile failures fall back to defaults; only an unresolvable channel
    /// or a bad URL is an error.
    pub async fn bootstrap(mut config: OverlayConfig, renderer: R) -> Result<Self> {
        let profile = config.profile_url.as_deref().map(ProfileClient::new).transpose()?;
        let public = match &profile {
            Some(profile) => profile.load_public().await,
            None => PublicConfig::default(),
        };

        let binding = channel::resolve(
            BindingSources {
                page_url: config.page_url.as_deref(),
                token: config.token.as_deref(),
                token_secret: config.token_secret.as_deref(),
                server_default: public.channel.as_deref(),
            },
            &config.lobby_prefix,
        )?;

        if config.viewer.is_none() {
            config.viewer = config
                .token
                .as_deref()
                .and_then(|token| channel::identity_from_token(token, config.token_secret.as_deref()).ok())
                .and_then(|claims| claims.viewer().map(str::to_string));
        }

        let defaults = match &profile {
            Some(profile) => profile.load_channel(&public, binding.name()).await,
            None => RenderDefaults::from_public(&public),
        };
        let fetcher = Arc::new(HttpFetcher::new(ASSET_TIMEOUT)?);
        Self::new(config, binding, defaults, renderer, fetcher)
    }

    /// Build an overlay without touching the network.
    pub fn new(
        config: OverlayConfig,
        binding: ChannelBinding,
        defaults: RenderDefaults,
        renderer: R,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Result<Self> {
        let base = config.asset_base_url.as_deref().map(Url::parse).transpose()?;
        let assets = Assets::new(fetcher, base);
        let mut scheduler = Scheduler::new(assets.clone(), SpriteSet::default());
        scheduler.set_enabled(config.animations);

        let seat_count = defaults.seat_count.unwrap_or(config.seat_count);
        let overflow_cap = defaults.overflow_cap.unwrap_or(config.overflow_cap);
        let mut reconciler = Reconciler::new(binding, seat_count, overflow_cap).with_viewer(config.viewer.as_deref());
        if let Some(game) = defaults.game {
            reconciler.seed_game(game);
        }
        reconciler.seed_settings(defaults.table_tint, defaults.card_back, defaults.card_face);
        reconciler.seed_profiles(defaults.balances, defaults.player_cosmetics);

        let (timers, timer_rx) = TimerRegistry::new();
        info!(
            channel = reconciler.binding().name(),
            lobby = reconciler.binding().is_lobby(),
            viewer = ?reconciler.viewer(),
            seat_count,
            "overlay ready"
        );
        Ok(Self {
            config,
            reconciler,
            renderer,
            assets,
            scheduler,
            timers,
            timer_rx: Some(timer_rx),
            connection: None,
        })
    }

    pub fn state(&self) -> &OverlayState {
        self.reconciler.state()
    }

    pub fn channel(&self) -> &str {
        self.reconciler.binding().name()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Apply one event and carry out its side effects: timers, notices,
    /// skin invalidation, a redraw and the animations the redraw marked.
    /// Must run inside a tokio runtime when the event arms a timer.
    pub fn handle_event(&mut self, event: &ServerEvent) -> Option<Reconciliation> {
        let settings = &self.reconciler.state().settings;
        let old_skins = [settings.card_back.clone(), settings.card_face.clone()];

        let out = self.reconciler.apply_event(event)?;
        for command in &out.timers {
            self.timers.apply(command);
        }
        for notice in &out.notices {
            self.renderer.notice(notice);
        }

        let settings = &self.reconciler.state().settings;
        if out.skins_changed {
            let new_skins = [settings.card_back.as_deref(), settings.card_face.as_deref()];
            self.assets
                .invalidate_skins(old_skins.iter().flatten().map(String::as_str).chain(new_skins.into_iter().flatten()));
        }
        self.scheduler.set_enabled(self.config.animations && settings.animations);

        let view = table_view(
            self.reconciler.state(),
            self.reconciler.viewer(),
            &out,
            self.config.accessibility,
        );
        let mounted = self.renderer.render(&view);
        if !mounted.is_empty() {
            debug!(count = mounted.len(), "queueing animations");
        }
        for element in mounted {
            self.scheduler.queue(animation_request(&view, element));
        }
        Some(out)
    }

    pub fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Event(event) => {
                self.handle_event(&event);
            }
            Inbound::Malformed { error } => {
                debug!(%error, "malformed frame reported");
                self.renderer.notice(&Notice::warn("Skipped an unreadable table update"));
            }
        }
    }

    /// Forward a live timer tick to the renderer. Stale ticks are ignored.
    pub fn handle_timer(&mut self, tick: TimerEvent) -> bool {
        if !self.timers.is_current(&tick) {
            return false;
        }
        self.renderer.countdown(tick.key, &tick.label, tick.remaining);
        true
    }

    pub fn on_connection(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => info!(channel = self.channel(), "overlay connected"),
            ConnectionState::Reconnecting => info!(channel = self.channel(), "overlay reconnecting"),
            ConnectionState::Disconnected => warn!(channel = self.channel(), "overlay disconnected"),
        }
        self.renderer.show_screen(state.screen());
    }

    /// Advance animations by one frame.
    pub fn tick(&mut self, now: Instant) -> TickStats {
        self.scheduler.tick(now)
    }

    /// Next timer tick, for callers driving the overlay by hand.
    pub async fn next_timer(&mut self) -> Option<TimerEvent> {
        next_item(&mut self.timer_rx).await
    }

    /// Send `action` if the current controls allow it. Returns `false` when
    /// the action is not available right now.
    pub fn send_action(&self, action: ClientAction) -> Result<bool> {
        if !self.reconciler.state().actions.allows(&action) {
            debug!(action = action.name(), "action not available");
            return Ok(false);
        }
        let connection = self.connection.as_ref().ok_or(Error::ConnectionClosed)?;
        connection.send(action)?;
        Ok(true)
    }

    /// Connect and run until the connection gives up. The returned future is
    /// not `Send`: canvases belong to the renderer's thread.
    pub async fn run(self) -> Result<()> {
        self.run_with(None).await
    }

    /// Like `run`, also sending every action that arrives on `actions`.
    pub async fn run_with(mut self, mut actions: Option<mpsc::UnboundedReceiver<ClientAction>>) -> Result<()> {
        let (manager, mut inbound) =
            ConnectionManager::spawn(&self.config.server_url, self.channel(), self.config.reconnect)?;
        let mut connection = manager.subscribe();
        self.connection = Some(manager);
        self.renderer.show_screen(Some(Screen::Loading));

        let mut ticks = self.timer_rx.take();
        let mut frames = tokio::time::interval(self.config.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_inbound(frame),
                    None => break,
                },
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *connection.borrow_and_update();
                    self.on_connection(state);
                }
                Some(tick) = next_item(&mut ticks) => {
                    self.handle_timer(tick);
                }
                Some(action) = next_item(&mut actions) => {
                    let name = action.name();
                    match self.send_action(action) {
                        Ok(true) => {}
                        Ok(false) => self.renderer.notice(&Notice::info(format!("{name} is not available right now"))),
                        Err(e) => warn!(action = name, error = %e, "action not sent"),
                    }
                }
                _ = frames.tick(), if self.scheduler.wants_frame() => {
                    self.tick(Instant::now());
                }
            }
        }

        self.timers.clear_all();
        self.scheduler.cancel_all();
        self.renderer.show_screen(Some(Screen::Error));
        info!(channel = self.channel(), "overlay stopped");
        Ok(())
    }
}

async fn next_item<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn animation_request(view: &TableView, mounted: Mounted) -> AnimationRequest {
    let skins = mounted.card.as_ref().map(|(card, owner)| {
        let seat = owner.as_deref().and_then(|login| view.seat_of(login));
        FlipSkins {
            back: back_skin(view, seat),
            face: face_skin(view, seat, card),
        }
    });
    AnimationRequest {
        kind: mounted.kind,
        canvas: mounted.canvas,
        skins,
        rest: mounted.rest,
    }
}
