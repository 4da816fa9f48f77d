//! What the renderer draws.
//!
//! `table_view` turns the reconciled state into a flat view: seats in seat
//! order, cards with their face visibility decided for the current viewer,
//! and an animation marker on everything that just appeared. A `Renderer`
//! draws that view and hands back a canvas for every marked element.

use crate::animation::{AnimationKind, Canvas, RestingFace};
use crate::connection::Screen;
use crate::controls::ActionSet;
use crate::model::{OverlayState, Player};
use crate::reconciler::{CardSlot, Notice, NoticeLevel, Reconciliation, SeatEffectKind, TimerKey};
use image::RgbaImage;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;
use tableside_protocol::{Card, Cosmetics, GameKind, HandResult, Phase, PokerStreet};

pub const DEFAULT_CARD_BACK: &str = "cards/back.png";
pub const DEFAULT_CARD_FACES: &str = "cards/classic/";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardView {
    pub card: Card,
    pub face_up: bool,
    pub hand: usize,
    /// Set on cards that were not rendered before this update.
    pub animate: Option<AnimationKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeatView {
    pub seat: usize,
    pub login: String,
    pub display_name: String,
    pub cards: Vec<CardView>,
    pub active_hand: usize,
    pub bet: u64,
    pub balance: Option<i64>,
    pub folded: bool,
    pub all_in: bool,
    pub ready: bool,
    pub acting: bool,
    pub effect: Option<AnimationKind>,
    pub cosmetics: Cosmetics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableView {
    pub channel: String,
    pub game: GameKind,
    pub phase: Phase,
    pub street: Option<PokerStreet>,
    pub pot: u64,
    /// One entry per physical seat, `None` when empty.
    pub seats: Vec<Option<SeatView>>,
    pub dealer: Vec<CardView>,
    pub community: Vec<CardView>,
    pub overflow: Vec<String>,
    pub results: Vec<HandResult>,
    pub actions: ActionSet,
    pub table_tint: Option<String>,
    pub card_back: Option<String>,
    pub card_face: Option<String>,
    /// Screen-reader description, present when accessibility is on.
    pub description: Option<String>,
}

impl TableView {
    pub fn seat_of(&self, login: &str) -> Option<&SeatView> {
        self.seats.iter().flatten().find(|s| s.login == login)
    }

    pub fn animated_cards(&self) -> usize {
        let seated = self.seats.iter().flatten().flat_map(|s| &s.cards);
        seated
            .chain(&self.dealer)
            .chain(&self.community)
            .filter(|c| c.animate.is_some())
            .count()
    }
}

/// Whether `viewer` may see the face of a card held by `owner`. Other
/// players' cards stay hidden until the result phase reveals them.
pub fn face_visible(owner: &str, viewer: Option<&str>, phase: Phase) -> bool {
    phase == Phase::Result || viewer == Some(owner)
}

fn card_animation(face_up: bool) -> AnimationKind {
    if face_up {
        AnimationKind::Flip
    } else {
        AnimationKind::Deal
    }
}

fn effect_animation(kind: SeatEffectKind) -> AnimationKind {
    match kind {
        SeatEffectKind::Fold => AnimationKind::Fold,
        SeatEffectKind::AllIn => AnimationKind::AllIn,
        SeatEffectKind::WinBurst => AnimationKind::WinBurst,
    }
}

pub fn table_view(state: &OverlayState, viewer: Option<&str>, fresh: &Reconciliation, accessibility: bool) -> TableView {
    let mut new_player_cards: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut new_dealer = Vec::new();
    let mut new_community = Vec::new();
    for new in &fresh.new_cards {
        match &new.slot {
            CardSlot::Player { login, index, .. } => new_player_cards.entry(login.as_str()).or_default().push(*index),
            CardSlot::Dealer { index } => new_dealer.push(*index),
            CardSlot::Community { index } => new_community.push(*index),
        }
    }
    let effects: HashMap<&str, AnimationKind> = fresh
        .effects
        .iter()
        .map(|e| (e.login.as_str(), effect_animation(e.kind)))
        .collect();

    let seat_view = |seat: usize, player: &Player| {
        let face_up = face_visible(&player.login, viewer, state.phase);
        let fresh_idx = new_player_cards.get(player.login.as_str());
        let cards = player
            .cards()
            .into_iter()
            .enumerate()
            .map(|(i, (hand, card))| CardView {
                card,
                face_up,
                hand,
                animate: fresh_idx.filter(|idx| idx.contains(&i)).map(|_| card_animation(face_up)),
            })
            .collect();
        SeatView {
            seat,
            login: player.login.clone(),
            display_name: player.display_name.clone(),
            cards,
            active_hand: player.active_hand,
            bet: player.bet,
            balance: player.balance,
            folded: player.folded,
            all_in: player.all_in,
            ready: state.ready.contains(&player.login),
            acting: state.to_act.as_deref() == Some(player.login.as_str()),
            effect: effects.get(player.login.as_str()).copied(),
            cosmetics: player.cosmetics.clone(),
        }
    };

    let seats = (0..state.seating.seat_count)
        .map(|seat| {
            state.seating.by_seat.get(&seat).and_then(|login| state.player(login)).map(|p| seat_view(seat, p))
        })
        .collect();

    let mut view = TableView {
        channel: state.channel.clone(),
        game: state.game,
        phase: state.phase,
        street: state.street,
        pot: state.pot,
        seats,
        dealer: shared_cards(&state.dealer_hand, &new_dealer),
        community: shared_cards(&state.community_cards, &new_community),
        overflow: state.seating.overflow.clone(),
        results: state.results.clone(),
        actions: state.actions,
        table_tint: state.settings.table_tint.clone(),
        card_back: state.settings.card_back.clone(),
        card_face: state.settings.card_face.clone(),
        description: None,
    };
    if accessibility {
        view.description = Some(describe(&view));
    }
    view
}

/// Dealer and community cards are always face up.
fn shared_cards(cards: &[Card], fresh: &[usize]) -> Vec<CardView> {
    cards
        .iter()
        .enumerate()
        .map(|(i, card)| CardView {
            card: *card,
            face_up: true,
            hand: 0,
            animate: fresh.contains(&i).then_some(AnimationKind::Flip),
        })
        .collect()
}

/// Back skin for a card: the owner's cosmetic, then the table's.
pub fn back_skin(view: &TableView, owner: Option<&SeatView>) -> String {
    owner
        .and_then(|s| s.cosmetics.card_back.clone())
        .or_else(|| view.card_back.clone())
        .unwrap_or_else(|| DEFAULT_CARD_BACK.to_string())
}

/// Face art for one card within the chosen face set.
pub fn face_skin(view: &TableView, owner: Option<&SeatView>, card: &Card) -> String {
    let set = owner
        .and_then(|s| s.cosmetics.card_face.clone())
        .or_else(|| view.card_face.clone())
        .unwrap_or_else(|| DEFAULT_CARD_FACES.to_string());
    let sep = if set.ends_with('/') { "" } else { "/" };
    format!("{set}{sep}{}.png", card.asset_key())
}

fn card_text(card: &CardView) -> String {
    if card.face_up {
        card.card.to_string()
    } else {
        "face-down card".into()
    }
}

/// Plain-text description of the table for assistive technology.
pub fn describe(view: &TableView) -> String {
    let mut out = String::new();
    let _ = write!(out, "{} table, {} phase", view.game, view.phase);
    if let Some(street) = view.street {
        let _ = write!(out, " ({street:?})");
    }
    let _ = writeln!(out, ", pot {}.", view.pot);
    if !view.dealer.is_empty() {
        let cards: Vec<_> = view.dealer.iter().map(card_text).collect();
        let _ = writeln!(out, "Dealer: {}.", cards.join(", "));
    }
    if !view.community.is_empty() {
        let cards: Vec<_> = view.community.iter().map(card_text).collect();
        let _ = writeln!(out, "Board: {}.", cards.join(", "));
    }
    for seat in view.seats.iter().flatten() {
        let _ = write!(out, "Seat {}: {}", seat.seat + 1, seat.display_name);
        if !seat.cards.is_empty() {
            let cards: Vec<_> = seat.cards.iter().map(card_text).collect();
            let _ = write!(out, ", cards {}", cards.join(", "));
        }
        if seat.bet > 0 {
            let _ = write!(out, ", bet {}", seat.bet);
        }
        if seat.folded {
            out.push_str(", folded");
        }
        if seat.all_in {
            out.push_str(", all in");
        }
        if seat.acting {
            out.push_str(", to act");
        }
        out.push_str(".\n");
    }
    if !view.overflow.is_empty() {
        let _ = writeln!(out, "Waiting: {}.", view.overflow.join(", "));
    }
    out
}

/// A marked element the renderer mounted, ready to be animated.
pub struct Mounted {
    pub kind: AnimationKind,
    pub canvas: Box<dyn Canvas>,
    /// The card and its owner's login, for skin lookup. `None` for seat
    /// effects.
    pub card: Option<(Card, Option<String>)>,
    pub rest: RestingFace,
}

/// Draws views. Implementations own their canvases; the overlay never
/// touches them except through `Canvas`.
pub trait Renderer {
    /// Draw `view`, replacing the previous frame. Returns one canvas per
    /// element carrying an animation marker.
    fn render(&mut self, view: &TableView) -> Vec<Mounted>;

    fn show_screen(&mut self, screen: Option<Screen>);

    fn notice(&mut self, notice: &Notice);

    fn countdown(&mut self, key: TimerKey, label: &str, remaining: Duration);
}

/// Collect every marked element of `view` in draw order, with the canvas
/// factory supplying a fresh canvas for each.
pub fn mount_marked(view: &TableView, mut canvas: impl FnMut() -> Box<dyn Canvas>) -> Vec<Mounted> {
    let mut mounted = Vec::new();
    for seat in view.seats.iter().flatten() {
        for card in seat.cards.iter().filter(|c| c.animate.is_some()) {
            mounted.push(Mounted {
                kind: card_animation(card.face_up),
                canvas: canvas(),
                card: Some((card.card, Some(seat.login.clone()))),
                rest: if card.face_up { RestingFace::FaceUp } else { RestingFace::FaceDown },
            });
        }
        if let Some(effect) = seat.effect {
            mounted.push(Mounted {
                kind: effect,
                canvas: canvas(),
                card: None,
                rest: RestingFace::Clear,
            });
        }
    }
    for card in view.dealer.iter().chain(&view.community).filter(|c| c.animate.is_some()) {
        mounted.push(Mounted {
            kind: AnimationKind::Flip,
            canvas: canvas(),
            card: Some((card.card, None)),
            rest: RestingFace::FaceUp,
        });
    }
    mounted
}

/// Canvas for the text renderer. Every redraw detaches the previous frame's
/// canvases, the way a re-render replaces DOM elements.
pub struct TextCanvas {
    generation: u64,
    current: Rc<Cell<u64>>,
    frames: Rc<Cell<usize>>,
    rested: Rc<RefCell<Vec<RestingFace>>>,
}

impl Canvas for TextCanvas {
    fn is_attached(&self) -> bool {
        self.current.get() == self.generation
    }

    fn draw_frame(&mut self, _frame: &RgbaImage) {
        self.frames.set(self.frames.get() + 1);
    }

    fn show_static(&mut self, face: RestingFace) {
        self.rested.borrow_mut().push(face);
    }
}

/// Headless renderer that writes the table as text.
pub struct TextRenderer<W: Write> {
    out: W,
    generation: Rc<Cell<u64>>,
    frames: Rc<Cell<usize>>,
    rested: Rc<RefCell<Vec<RestingFace>>>,
    screen: Option<Screen>,
    countdowns: HashMap<TimerKey, (String, Duration)>,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            generation: Rc::new(Cell::new(0)),
            frames: Rc::new(Cell::new(0)),
            rested: Rc::new(RefCell::new(Vec::new())),
            screen: None,
            countdowns: HashMap::new(),
        }
    }

    pub fn frames_drawn(&self) -> usize {
        self.frames.get()
    }

    pub fn rested(&self) -> Vec<RestingFace> {
        self.rested.borrow().clone()
    }

    pub fn screen(&self) -> Option<Screen> {
        self.screen
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn canvas(&self) -> Box<dyn Canvas> {
        Box::new(TextCanvas {
            generation: self.generation.get(),
            current: self.generation.clone(),
            frames: self.frames.clone(),
            rested: self.rested.clone(),
        })
    }
}

impl<W: Write> Renderer for TextRenderer<W> {
    fn render(&mut self, view: &TableView) -> Vec<Mounted> {
        self.generation.set(self.generation.get() + 1);

        let mut text = String::new();
        let _ = writeln!(text, "== {} | {} | {} | pot {} ==", view.channel, view.game, view.phase, view.pot);
        if !view.dealer.is_empty() {
            let cards: Vec<_> = view.dealer.iter().map(|c| c.card.to_string()).collect();
            let _ = writeln!(text, "  dealer: {}", cards.join(" "));
        }
        if !view.community.is_empty() {
            let cards: Vec<_> = view.community.iter().map(|c| c.card.to_string()).collect();
            let _ = writeln!(text, "  board:  {}", cards.join(" "));
        }
        for (i, seat) in view.seats.iter().enumerate() {
            let Some(seat) = seat else {
                let _ = writeln!(text, "  [{}] (empty)", i + 1);
                continue;
            };
            let cards: Vec<_> = seat
                .cards
                .iter()
                .map(|c| {
                    let face = if c.face_up { c.card.to_string() } else { "??".into() };
                    if c.animate.is_some() {
                        format!("{face}*")
                    } else {
                        face
                    }
                })
                .collect();
            let mut flags = String::new();
            if seat.acting {
                flags.push_str(" <-");
            }
            if seat.ready {
                flags.push_str(" ready");
            }
            if seat.folded {
                flags.push_str(" folded");
            }
            if seat.all_in {
                flags.push_str(" all-in");
            }
            if let Some(effect) = seat.effect {
                let _ = write!(flags, " {effect:?}");
            }
            let _ = writeln!(text, "  [{}] {} bet {} | {}{}", i + 1, seat.display_name, seat.bet, cards.join(" "), flags);
        }
        if !view.overflow.is_empty() {
            let _ = writeln!(text, "  waiting: {}", view.overflow.join(", "));
        }
        for result in &view.results {
            let _ = writeln!(text, "  result: {} {:?} {:+}", result.login, result.outcome, result.payout);
        }
        if let Some(description) = &view.description {
            text.push_str(description);
        }
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();

        let current = &*self;
        mount_marked(view, || current.canvas())
    }

    fn show_screen(&mut self, screen: Option<Screen>) {
        if self.screen == screen {
            return;
        }
        self.screen = screen;
        let line = match screen {
            None => return,
            Some(Screen::Loading) => "-- connecting... --\n",
            Some(Screen::Error) => "-- disconnected --\n",
        };
        let _ = self.out.write_all(line.as_bytes());
    }

    fn notice(&mut self, notice: &Notice) {
        let tag = match notice.level {
            NoticeLevel::Info => "[NOTICE]",
            NoticeLevel::Warn => "[WARN]",
        };
        let _ = writeln!(self.out, "{tag} {}", notice.text);
    }

    fn countdown(&mut self, key: TimerKey, label: &str, remaining: Duration) {
        self.countdowns.insert(key, (label.to_string(), remaining));
        let _ = writeln!(self.out, "[TIMER] {label}: {}s", remaining.as_secs());
    }
}
