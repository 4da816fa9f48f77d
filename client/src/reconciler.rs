//! Merges inbound events into the local `OverlayState`.
//!
//! `apply_event` is the only way state changes. It is synchronous and runs to
//! completion; the returned `Reconciliation` lists the side effects (new
//! cards to animate, seat effects, timers, notices) for the caller to carry
//! out.

use crate::channel::ChannelBinding;
use crate::controls::{self, ControlContext};
use crate::model::{OverlayState, Player};
use crate::queue::{self, QueuePartition};
use crate::seats::SeatEngine;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tableside_protocol::{
    normalize_login, BettingStarted, Card, Cosmetics, GameKind, OverlaySettings, Payouts, Phase, PlayerPayload, PlayerTurn,
    PokerBetting, PokerPhase, PokerStreet, ReadyStatus, RoundResult, ServerEvent, TableSnapshot,
};
use tracing::{debug, trace};

/// Where a card sits on the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CardSlot {
    /// `index` is the position across all of the player's hands.
    Player { login: String, hand: usize, index: usize },
    Dealer { index: usize },
    Community { index: usize },
}

/// A card that was not rendered before this event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCard {
    pub slot: CardSlot,
    pub card: Card,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeatEffectKind {
    Fold,
    AllIn,
    WinBurst,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatEffect {
    pub login: String,
    pub kind: SeatEffectKind,
}

/// Named timers the reconciler arms and clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Betting window countdown.
    Countdown,
    /// The acting player's turn clock.
    Turn,
    /// Ready-up countdown before a round.
    Ready,
}

impl TimerKey {
    pub fn name(&self) -> &'static str {
        match self {
            TimerKey::Countdown => "countdown",
            TimerKey::Turn => "turn",
            TimerKey::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCommand {
    Arm { key: TimerKey, remaining: Duration, label: String },
    Clear(TimerKey),
    ClearAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, text: text.into() }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warn, text: text.into() }
    }
}

/// Side effects of one applied event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub new_cards: Vec<NewCard>,
    pub effects: Vec<SeatEffect>,
    pub timers: Vec<TimerCommand>,
    pub notices: Vec<Notice>,
    pub round_reset: bool,
    pub seats_changed: bool,
    /// Card skins changed; cached skin images are stale.
    pub skins_changed: bool,
}

impl Reconciliation {
    pub fn is_quiet(&self) -> bool {
        self.new_cards.is_empty() && self.effects.is_empty() && self.timers.is_empty() && self.notices.is_empty()
    }
}

pub struct Reconciler {
    binding: ChannelBinding,
    viewer: Option<String>,
    state: OverlayState,
    seats: SeatEngine,
    /// Cards already rendered, per login and hand, within the current round.
    rendered: HashMap<String, Vec<Vec<Card>>>,
    dealer_count: usize,
    community_count: usize,
    /// Logins whose win burst already played this round.
    celebrated: HashSet<String>,
    insurance_offered: bool,
    /// Profile data for players the roster has not described yet.
    seeded_balances: HashMap<String, i64>,
    seeded_cosmetics: HashMap<String, Cosmetics>,
}

impl Reconciler {
    pub fn new(binding: ChannelBinding, seat_count: usize, overflow_cap: usize) -> Self {
        Self {
            state: OverlayState::new(binding.name(), seat_count, overflow_cap),
            seats: SeatEngine::new(seat_count),
            binding,
            viewer: None,
            rendered: HashMap::new(),
            dealer_count: 0,
            community_count: 0,
            celebrated: HashSet::new(),
            insurance_offered: false,
            seeded_balances: HashMap::new(),
            seeded_cosmetics: HashMap::new(),
        }
    }

    pub fn with_viewer(mut self, viewer: Option<&str>) -> Self {
        self.set_viewer(viewer);
        self
    }

    pub fn set_viewer(&mut self, viewer: Option<&str>) {
        self.viewer = viewer.map(normalize_login).filter(|v| !v.is_empty());
        self.refresh_controls();
    }

    pub fn viewer(&self) -> Option<&str> {
        self.viewer.as_deref()
    }

    pub fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    /// Seed balances and cosmetics fetched at load. Roster data wins once it
    /// arrives.
    pub fn seed_profiles(&mut self, balances: HashMap<String, i64>, cosmetics: HashMap<String, Cosmetics>) {
        self.seeded_balances = balances;
        self.seeded_cosmetics = cosmetics;
        let mut players = std::mem::take(&mut self.state.players);
        for player in &mut players {
            self.hydrate(player);
        }
        self.state.players = players;
    }

    fn hydrate(&self, player: &mut Player) {
        if player.balance.is_none() {
            player.balance = self.seeded_balances.get(&player.login).copied();
        }
        if player.cosmetics == Cosmetics::default() {
            if let Some(cosmetics) = self.seeded_cosmetics.get(&player.login) {
                player.cosmetics = cosmetics.clone();
            }
        }
    }

    pub fn seed_game(&mut self, game: GameKind) {
        self.state.game = game;
        self.refresh_controls();
    }

    /// Apply render defaults that arrive from the profile service.
    pub fn seed_settings(&mut self, table_tint: Option<String>, card_back: Option<String>, card_face: Option<String>) {
        let settings = &mut self.state.settings;
        settings.table_tint = table_tint.or(settings.table_tint.take());
        settings.card_back = card_back.or(settings.card_back.take());
        settings.card_face = card_face.or(settings.card_face.take());
    }

    /// Apply one inbound event. Returns `None` when the event belongs to a
    /// different channel and was discarded.
    pub fn apply_event(&mut self, event: &ServerEvent) -> Option<Reconciliation> {
        if !self.binding.matches(event.channel()) {
            trace!(event = event.name(), channel = ?event.channel(), bound = self.binding.name(), "dropping foreign event");
            return None;
        }

        let mut out = Reconciliation::default();
        match event {
            ServerEvent::State(snapshot) => self.on_state(snapshot, &mut out),
            ServerEvent::RoundStarted(snapshot) => self.on_round_started(snapshot, &mut out),
            ServerEvent::BettingStarted(e) => self.on_betting_started(e, &mut out),
            ServerEvent::RoundResult(e) => self.on_round_result(e, &mut out),
            ServerEvent::Payouts(e) => self.on_payouts(e, &mut out),
            ServerEvent::PokerBetting(e) => self.on_poker_betting(e, &mut out),
            ServerEvent::PlayerUpdate(e) => {
                self.patch_players(e.patches(), &mut out);
                self.finish_roster(e.pot, &mut out);
            }
            ServerEvent::PlayerTurn(e) => self.on_player_turn(e, &mut out),
            ServerEvent::QueueUpdate(e) => self.on_queue(&e.waiting, &mut out),
            ServerEvent::PokerPhase(e) => self.on_poker_phase(e, &mut out),
            ServerEvent::ReadyStatus(e) => self.on_ready(e, &mut out),
            ServerEvent::OverlaySettings(e) => self.on_settings(e, &mut out),
        }
        self.refresh_controls();

        debug!(
            event = event.name(),
            phase = %self.state.phase,
            players = self.state.players.len(),
            new_cards = out.new_cards.len(),
            "applied event"
        );
        Some(out)
    }

    fn on_state(&mut self, snapshot: &TableSnapshot, out: &mut Reconciliation) {
        let new_round = matches!(
            (self.state.round_id, snapshot.round_id),
            (Some(current), Some(incoming)) if current != incoming
        );
        if new_round {
            self.reset_round(out);
        }
        self.merge_snapshot(snapshot, out);
    }

    fn on_round_started(&mut self, snapshot: &TableSnapshot, out: &mut Reconciliation) {
        // a redelivered start for the round in progress is not a new boundary
        let repeat = snapshot.round_id.is_some() && snapshot.round_id == self.state.round_id;
        if !repeat {
            self.reset_round(out);
        }
        out.timers.push(TimerCommand::Clear(TimerKey::Countdown));
        out.timers.push(TimerCommand::Clear(TimerKey::Ready));
        self.state.phase = Phase::Dealing;
        self.merge_snapshot(snapshot, out);
    }

    fn on_betting_started(&mut self, e: &BettingStarted, out: &mut Reconciliation) {
        self.state.phase = Phase::Betting;
        self.state.limits.min = e.min_bet.or(self.state.limits.min);
        self.state.limits.max = e.max_bet.or(self.state.limits.max);
        if let Some(remaining) = remaining(e.ends_at, e.duration_ms, Utc::now()) {
            out.timers.push(TimerCommand::Arm {
                key: TimerKey::Countdown,
                remaining,
                label: "Betting closes".into(),
            });
        }
    }

    fn on_round_result(&mut self, e: &RoundResult, out: &mut Reconciliation) {
        self.merge_snapshot(&e.table, out);
        self.state.phase = Phase::Result;
        self.state.to_act = None;
        self.state.results = e.results.clone();
        out.timers.push(TimerCommand::ClearAll);

        for result in &e.results {
            if result.payout > 0 {
                self.celebrate(&normalize_login(&result.login), out);
            }
        }
    }

    fn on_payouts(&mut self, e: &Payouts, out: &mut Reconciliation) {
        for (login, balance) in &e.balances {
            if let Some(player) = self.state.player_mut(&normalize_login(login)) {
                player.balance = Some(*balance);
            }
        }
        for payout in &e.payouts {
            let login = normalize_login(&payout.login);
            if payout.amount > 0 && self.celebrate(&login, out) {
                let name = self
                    .state
                    .player(&login)
                    .map(|p| p.display_name.clone())
                    .unwrap_or_else(|| payout.login.clone());
                out.notices.push(Notice::info(format!("{name} wins {}", payout.amount)));
            }
        }
    }

    fn on_poker_betting(&mut self, e: &PokerBetting, out: &mut Reconciliation) {
        self.state.phase = Phase::Betting;
        if e.current_bet.is_some() {
            self.state.current_bet = e.current_bet;
        }
        if let Some(to_act) = &e.to_act {
            self.state.to_act = Some(normalize_login(to_act));
        }
        self.patch_players(e.players.iter(), out);
        self.finish_roster(e.pot, out);
    }

    fn on_player_turn(&mut self, e: &PlayerTurn, out: &mut Reconciliation) {
        let login = normalize_login(&e.login);
        if login.is_empty() {
            return;
        }
        if let (Some(idx), Some(player)) = (e.hand_index, self.state.player_mut(&login)) {
            player.active_hand = idx;
        }
        let is_me = self.viewer.as_deref() == Some(login.as_str());
        self.insurance_offered = is_me && e.can_insure;
        if self.insurance_offered {
            out.notices.push(Notice::info("Insurance is available"));
        }

        let name = self.state.player(&login).map(|p| p.display_name.clone()).unwrap_or(e.login.clone());
        self.state.to_act = Some(login);
        match remaining(e.ends_at, e.duration_ms, Utc::now()) {
            Some(remaining) => out.timers.push(TimerCommand::Arm {
                key: TimerKey::Turn,
                remaining,
                label: format!("{name} to act"),
            }),
            None => out.timers.push(TimerCommand::Clear(TimerKey::Turn)),
        }
        if is_me {
            out.notices.push(Notice::info("Your turn"));
        }
    }

    fn on_queue(&mut self, waiting: &serde_json::Value, out: &mut Reconciliation) {
        let seats = &self.seats;
        self.state.queue = queue::normalize(waiting, |login| seats.is_seated(login));
        self.refresh_seating(out);
    }

    fn on_poker_phase(&mut self, e: &PokerPhase, out: &mut Reconciliation) {
        self.state.street = Some(e.street);
        self.state.phase = match e.street {
            PokerStreet::Showdown => Phase::Result,
            _ => Phase::Dealing,
        };
        self.state.current_bet = None;
        if let Some(cards) = &e.community_cards {
            let rendered = &mut self.state.community_cards;
            if cards.len() >= rendered.len() {
                *rendered = cards.clone();
            }
            diff_cards(&self.state.community_cards, &mut self.community_count, |index| CardSlot::Community { index }, out);
        }
        if let Some(pot) = e.pot {
            self.state.pot = pot;
        }
    }

    fn on_ready(&mut self, e: &ReadyStatus, out: &mut Reconciliation) {
        self.state.ready = e.ready.iter().map(|l| normalize_login(l)).filter(|l| !l.is_empty()).collect();
        match e.countdown_ms {
            Some(ms) => out.timers.push(TimerCommand::Arm {
                key: TimerKey::Ready,
                remaining: Duration::from_millis(ms),
                label: "Round starts".into(),
            }),
            None => out.timers.push(TimerCommand::Clear(TimerKey::Ready)),
        }
    }

    fn on_settings(&mut self, e: &OverlaySettings, out: &mut Reconciliation) {
        let settings = &mut self.state.settings;
        if e.table_tint.is_some() {
            settings.table_tint = e.table_tint.clone();
        }
        if let Some(cap) = e.overflow_cap {
            settings.overflow_cap = cap;
        }
        if let Some(animations) = e.animations {
            settings.animations = animations;
        }
        if e.card_back.is_some() && e.card_back != settings.card_back {
            settings.card_back = e.card_back.clone();
            out.skins_changed = true;
        }
        if e.card_face.is_some() && e.card_face != settings.card_face {
            settings.card_face = e.card_face.clone();
            out.skins_changed = true;
        }
        self.refresh_seating(out);
    }

    /// Start a new round: every baseline goes back to zero.
    fn reset_round(&mut self, out: &mut Reconciliation) {
        self.rendered.clear();
        self.dealer_count = 0;
        self.community_count = 0;
        self.celebrated.clear();
        self.insurance_offered = false;
        self.state.results.clear();
        self.state.dealer_hand.clear();
        self.state.community_cards.clear();
        self.state.street = None;
        self.state.current_bet = None;
        self.state.to_act = None;
        self.state.ready.clear();
        for player in &mut self.state.players {
            player.hand = None;
            player.hands = None;
        }
        out.round_reset = true;
    }

    fn merge_snapshot(&mut self, snapshot: &TableSnapshot, out: &mut Reconciliation) {
        if snapshot.round_id.is_some() {
            self.state.round_id = snapshot.round_id;
        }
        if let Some(game) = snapshot.game {
            self.state.game = game;
        }
        if let Some(phase) = snapshot.phase {
            self.state.phase = phase;
        }
        if let Some(to_act) = &snapshot.to_act {
            self.state.to_act = Some(normalize_login(to_act));
        }
        if let Some(players) = &snapshot.players {
            self.replace_roster(players, out);
        }
        if let Some(dealer) = &snapshot.dealer_hand {
            if dealer.len() >= self.state.dealer_hand.len() {
                self.state.dealer_hand = dealer.clone();
            }
        }
        if let Some(community) = &snapshot.community_cards {
            if community.len() >= self.state.community_cards.len() {
                self.state.community_cards = community.clone();
            }
        }
        diff_cards(&self.state.dealer_hand, &mut self.dealer_count, |index| CardSlot::Dealer { index }, out);
        diff_cards(&self.state.community_cards, &mut self.community_count, |index| CardSlot::Community { index }, out);

        if !snapshot.waiting.is_null() {
            let seats = &self.seats;
            self.state.queue = queue::normalize(&snapshot.waiting, |login| seats.is_seated(login));
        }
        self.finish_roster(snapshot.pot, out);
    }

    /// Replace the roster wholesale, keeping already-rendered cards when a
    /// snapshot within the same round reports fewer of them.
    fn replace_roster(&mut self, players: &[PlayerPayload], out: &mut Reconciliation) {
        let mut previous: HashMap<String, Player> =
            self.state.players.drain(..).map(|p| (p.login.clone(), p)).collect();
        let mut seen = HashSet::new();

        for payload in players {
            let Some(mut player) = Player::from_payload(payload) else {
                continue;
            };
            if !seen.insert(player.login.clone()) {
                continue;
            }
            if let Some(old) = previous.remove(&player.login) {
                if player.card_count() < old.card_count() {
                    debug!(login = %player.login, "snapshot regressed card count; keeping rendered cards");
                    player.keep_cards_of(&old);
                }
                if player.balance.is_none() {
                    player.balance = old.balance;
                }
                if payload.cosmetics.is_none() {
                    player.cosmetics = old.cosmetics.clone();
                }
                effects_between(&old, &player, out);
            }
            self.hydrate(&mut player);
            self.state.players.push(player);
        }

        for gone in previous.keys() {
            self.rendered.remove(gone);
        }
    }

    fn patch_players<'a>(&mut self, patches: impl Iterator<Item = &'a PlayerPayload>, out: &mut Reconciliation) {
        for patch in patches {
            let login = normalize_login(&patch.login);
            if login.is_empty() {
                continue;
            }
            match self.state.players.iter_mut().find(|p| p.login == login) {
                Some(player) => {
                    let before = player.clone();
                    player.apply_patch(patch);
                    if player.card_count() < before.card_count() {
                        debug!(%login, "patch regressed card count; keeping rendered cards");
                        player.keep_cards_of(&before);
                    }
                    effects_between(&before, player, out);
                }
                None => {
                    if let Some(mut player) = Player::from_payload(patch) {
                        self.hydrate(&mut player);
                        self.state.players.push(player);
                    }
                }
            }
        }
    }

    /// Card diffs, pot, seats and effects after any roster change.
    fn finish_roster(&mut self, pot: Option<u64>, out: &mut Reconciliation) {
        for player in &self.state.players {
            let layout = player.layout();
            let before = self.rendered.get(&player.login).map_or(&[][..], Vec::as_slice);
            if before == layout.as_slice() {
                continue;
            }
            let fresh = fresh_positions(before, &layout);
            let cards = player.cards();
            for index in fresh {
                let Some(&(hand, card)) = cards.get(index) else {
                    continue;
                };
                out.new_cards.push(NewCard {
                    slot: CardSlot::Player {
                        login: player.login.clone(),
                        hand,
                        index,
                    },
                    card,
                });
            }
            self.rendered.insert(player.login.clone(), layout);
        }

        let pot = pot.unwrap_or_else(|| self.state.total_bets());
        self.state.pot = pot;
        self.refresh_seating(out);
    }

    /// Re-sync seats with the roster, then split the waiting list against
    /// the new assignments.
    fn refresh_seating(&mut self, out: &mut Reconciliation) {
        let before = self.state.seating.by_seat.clone();
        self.seats.sync_seats(self.state.players.iter().map(|p| p.login.as_str()));

        let seats = &self.seats;
        let queue = std::mem::take(&mut self.state.queue);
        let (seated, overflow): (Vec<_>, Vec<_>) = queue
            .seated
            .into_iter()
            .chain(queue.overflow)
            .partition(|e| seats.is_seated(&e.login));
        self.state.queue = QueuePartition { seated, overflow };
        self.seats.set_queue_names(self.state.queue.overflow.iter().map(|e| e.label.clone()).collect());

        self.state.seating = self.seats.seating(&self.state.players, self.state.settings.overflow_cap);
        if before != self.state.seating.by_seat {
            out.seats_changed = true;
        }
    }

    fn refresh_controls(&mut self) {
        self.state.actions = controls::derive(
            &self.state,
            ControlContext {
                viewer: self.viewer.as_deref(),
                poker_controls: self.binding.is_lobby(),
                insurance_offered: self.insurance_offered,
            },
        );
    }

    /// Queue a win burst once per login per round.
    fn celebrate(&mut self, login: &str, out: &mut Reconciliation) -> bool {
        if login.is_empty() || !self.celebrated.insert(login.to_string()) {
            return false;
        }
        out.effects.push(SeatEffect {
            login: login.to_string(),
            kind: SeatEffectKind::WinBurst,
        });
        true
    }
}

/// Flat positions in `after` holding cards that `before` did not render.
///
/// With the same hand shape each hand grows at its end. A split or merge
/// reshuffles the hands, so cards are matched by value instead and a dealt
/// card keeps its baseline in whichever hand it moved to.
fn fresh_positions(before: &[Vec<Card>], after: &[Vec<Card>]) -> Vec<usize> {
    let mut fresh = Vec::new();
    let mut flat = 0;
    if before.len() == after.len() {
        for (old, new) in before.iter().zip(after) {
            fresh.extend(flat + old.len().min(new.len())..flat + new.len());
            flat += new.len();
        }
        return fresh;
    }

    let mut unmatched: Vec<Card> = before.iter().flatten().copied().collect();
    for card in after.iter().flatten() {
        match unmatched.iter().position(|c| c == card) {
            Some(i) => {
                unmatched.swap_remove(i);
            }
            None => fresh.push(flat),
        }
        flat += 1;
    }
    fresh
}

/// Fold and all-in effects fire on the false -> true transition only.
fn effects_between(before: &Player, after: &Player, out: &mut Reconciliation) {
    if after.folded && !before.folded {
        out.effects.push(SeatEffect {
            login: after.login.clone(),
            kind: SeatEffectKind::Fold,
        });
    }
    if after.all_in && !before.all_in {
        out.effects.push(SeatEffect {
            login: after.login.clone(),
            kind: SeatEffectKind::AllIn,
        });
    }
}

/// Mark cards past the recorded count as new and advance the count.
fn diff_cards(cards: &[Card], recorded: &mut usize, slot: impl Fn(usize) -> CardSlot, out: &mut Reconciliation) {
    if cards.len() <= *recorded {
        return;
    }
    for (index, card) in cards.iter().enumerate().skip(*recorded) {
        out.new_cards.push(NewCard {
            slot: slot(index),
            card: *card,
        });
    }
    *recorded = cards.len();
}

/// Time left on a server-supplied deadline, preferring the absolute `ends_at`.
pub(crate) fn remaining(ends_at: Option<DateTime<Utc>>, duration_ms: Option<u64>, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(ends_at) = ends_at {
        return Some((ends_at - now).to_std().unwrap_or(Duration::ZERO));
    }
    duration_ms.map(Duration::from_millis)
}
