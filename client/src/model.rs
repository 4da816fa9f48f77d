//! The overlay's local render-state snapshot.
//!
//! One `OverlayState` value is owned by the reconciler and handed by
//! reference to the renderer; nothing else mutates it.

use crate::controls::ActionSet;
use crate::queue::QueuePartition;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tableside_protocol::{
    normalize_login, Card, Cosmetics, GameKind, HandResult, Phase, PlayerPayload, PokerStreet,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub login: String,
    pub display_name: String,
    pub hand: Option<Vec<Card>>,
    pub hands: Option<Vec<Vec<Card>>>,
    pub active_hand: usize,
    pub bet: u64,
    pub street_bet: u64,
    pub balance: Option<i64>,
    pub folded: bool,
    pub all_in: bool,
    pub cosmetics: Cosmetics,
}

impl Player {
    /// Build a player from a roster entry. Entries without a login are
    /// unusable and yield `None`.
    pub fn from_payload(payload: &PlayerPayload) -> Option<Self> {
        let login = normalize_login(&payload.login);
        if login.is_empty() {
            return None;
        }
        let display_name = payload
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(payload.login.trim())
            .to_string();
        Some(Self {
            login,
            display_name,
            hand: payload.hand.clone(),
            hands: payload.hands.clone(),
            active_hand: payload.active_hand.unwrap_or(0),
            bet: payload.bet.unwrap_or(0),
            street_bet: payload.street_bet.unwrap_or(0),
            balance: payload.balance,
            folded: payload.folded.unwrap_or(false),
            all_in: payload.all_in.unwrap_or(false),
            cosmetics: payload.cosmetics.clone().unwrap_or_default(),
        })
    }

    /// Overwrite only the fields present in `patch`.
    pub fn apply_patch(&mut self, patch: &PlayerPayload) {
        if let Some(name) = patch.display_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            self.display_name = name.to_string();
        }
        if let Some(hand) = &patch.hand {
            self.hand = Some(hand.clone());
        }
        if let Some(hands) = &patch.hands {
            self.hands = Some(hands.clone());
        }
        if let Some(active) = patch.active_hand {
            self.active_hand = active;
        }
        if let Some(bet) = patch.bet {
            self.bet = bet;
        }
        if let Some(street_bet) = patch.street_bet {
            self.street_bet = street_bet;
        }
        if patch.balance.is_some() {
            self.balance = patch.balance;
        }
        if let Some(folded) = patch.folded {
            self.folded = folded;
        }
        if let Some(all_in) = patch.all_in {
            self.all_in = all_in;
        }
        if let Some(cosmetics) = &patch.cosmetics {
            self.cosmetics = cosmetics.clone();
        }
    }

    pub fn is_split(&self) -> bool {
        self.hands.as_ref().is_some_and(|h| !h.is_empty())
    }

    /// Cards in render order as `(hand index, card)`. Split hands replace the
    /// single hand.
    pub fn cards(&self) -> Vec<(usize, Card)> {
        match (&self.hands, &self.hand) {
            (Some(hands), _) if !hands.is_empty() => hands
                .iter()
                .enumerate()
                .flat_map(|(i, h)| h.iter().map(move |c| (i, *c)))
                .collect(),
            (_, Some(hand)) => hand.iter().map(|c| (0, *c)).collect(),
            _ => Vec::new(),
        }
    }

    /// Cards grouped by hand; a single hand is one group.
    pub fn layout(&self) -> Vec<Vec<Card>> {
        match (&self.hands, &self.hand) {
            (Some(hands), _) if !hands.is_empty() => hands.clone(),
            (_, Some(hand)) => vec![hand.clone()],
            _ => Vec::new(),
        }
    }

    pub fn card_count(&self) -> usize {
        match (&self.hands, &self.hand) {
            (Some(hands), _) if !hands.is_empty() => hands.iter().map(Vec::len).sum(),
            (_, Some(hand)) => hand.len(),
            _ => 0,
        }
    }

    /// The hand the player is currently acting on.
    pub fn current_hand(&self) -> &[Card] {
        match (&self.hands, &self.hand) {
            (Some(hands), _) if !hands.is_empty() => hands
                .get(self.active_hand)
                .or_else(|| hands.first())
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            (_, Some(hand)) => hand,
            _ => &[],
        }
    }

    /// Take over another snapshot's cards for this player.
    pub(crate) fn keep_cards_of(&mut self, other: &Player) {
        self.hand = other.hand.clone();
        self.hands = other.hands.clone();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableSettings {
    pub table_tint: Option<String>,
    pub card_back: Option<String>,
    pub card_face: Option<String>,
    pub overflow_cap: usize,
    pub animations: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BetLimits {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

/// Seat occupancy as last computed by the seat engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Seating {
    pub seat_count: usize,
    pub by_seat: BTreeMap<usize, String>,
    /// Display names of players without a seat, already capped.
    pub overflow: Vec<String>,
}

impl Seating {
    pub fn seat_of(&self, login: &str) -> Option<usize> {
        self.by_seat.iter().find(|(_, l)| l.as_str() == login).map(|(s, _)| *s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlayState {
    pub channel: String,
    pub game: GameKind,
    pub round_id: Option<u64>,
    pub phase: Phase,
    pub street: Option<PokerStreet>,
    pub players: Vec<Player>,
    pub dealer_hand: Vec<Card>,
    pub community_cards: Vec<Card>,
    pub pot: u64,
    pub current_bet: Option<u64>,
    pub limits: BetLimits,
    pub to_act: Option<String>,
    pub ready: BTreeSet<String>,
    pub queue: QueuePartition,
    pub results: Vec<HandResult>,
    pub seating: Seating,
    pub settings: TableSettings,
    pub actions: ActionSet,
}

impl OverlayState {
    pub fn new(channel: impl Into<String>, seat_count: usize, overflow_cap: usize) -> Self {
        Self {
            channel: channel.into(),
            seating: Seating {
                seat_count,
                ..Default::default()
            },
            settings: TableSettings {
                overflow_cap,
                animations: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn player(&self, login: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.login == login)
    }

    pub fn player_mut(&mut self, login: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.login == login)
    }

    pub fn total_bets(&self) -> u64 {
        self.players.iter().map(|p| p.bet).sum()
    }
}
