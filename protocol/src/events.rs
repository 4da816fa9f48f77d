//! Inbound, channel-scoped events.
//!
//! Every frame on the wire is an adjacently tagged envelope:
//! `{"event": "roundStarted", "data": { "channel": "table-3", ... }}`.
//! Payload fields are optional wherever servers have been seen to omit them;
//! the reconciler decides what a missing field means.

use crate::{Card, GameKind, Phase, PokerStreet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cosmetics {
    pub card_back: Option<String>,
    pub card_face: Option<String>,
    pub seat_frame: Option<String>,
    pub tint: Option<String>,
}

/// A player as it appears in a roster or a patch. Absent fields mean
/// "unchanged" for patches and "default" for full snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawPlayer")]
pub struct PlayerPayload {
    pub login: String,
    pub display_name: Option<String>,
    pub hand: Option<Vec<Card>>,
    pub hands: Option<Vec<Vec<Card>>>,
    pub active_hand: Option<usize>,
    pub bet: Option<u64>,
    pub street_bet: Option<u64>,
    pub balance: Option<i64>,
    pub folded: Option<bool>,
    pub all_in: Option<bool>,
    pub cosmetics: Option<Cosmetics>,
}

/// Player as servers send it. The login and the name each go by several
/// keys, sometimes more than one at once; the first non-empty one wins.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPlayer {
    login: Value,
    username: Value,
    user: Value,
    display_name: Value,
    name: Value,
    hand: Option<Vec<Card>>,
    hands: Option<Vec<Vec<Card>>>,
    active_hand: Option<usize>,
    #[serde(deserialize_with = "amount::unsigned")]
    bet: Option<u64>,
    #[serde(deserialize_with = "amount::unsigned")]
    street_bet: Option<u64>,
    #[serde(deserialize_with = "amount::signed")]
    balance: Option<i64>,
    folded: Option<bool>,
    all_in: Option<bool>,
    cosmetics: Option<Cosmetics>,
}

fn first_text(values: &[&Value]) -> Option<String> {
    values
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

impl From<RawPlayer> for PlayerPayload {
    fn from(raw: RawPlayer) -> Self {
        Self {
            login: first_text(&[&raw.login, &raw.username, &raw.user]).unwrap_or_default(),
            display_name: first_text(&[&raw.display_name, &raw.name]),
            hand: raw.hand,
            hands: raw.hands,
            active_hand: raw.active_hand,
            bet: raw.bet,
            street_bet: raw.street_bet,
            balance: raw.balance,
            folded: raw.folded,
            all_in: raw.all_in,
            cosmetics: raw.cosmetics,
        }
    }
}

/// Chip amounts. Integers pass through; fractional numbers and numeric
/// strings are rounded; anything negative or non-numeric reads as absent.
mod amount {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use std::collections::HashMap;

    fn number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|n: &f64| n.is_finite())
    }

    pub fn unsigned<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let value = Value::deserialize(d)?;
        if let Some(n) = value.as_u64() {
            return Ok(Some(n));
        }
        Ok(number(&value).filter(|n| *n >= 0.0).map(|n| n.round() as u64))
    }

    pub fn signed<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let value = Value::deserialize(d)?;
        if let Some(n) = value.as_i64() {
            return Ok(Some(n));
        }
        Ok(number(&value).map(|n| n.round() as i64))
    }

    pub fn signed_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(signed(d)?.unwrap_or(0))
    }

    /// Balances keyed by login; unreadable entries are skipped.
    pub fn balances<'de, D: Deserializer<'de>>(d: D) -> Result<HashMap<String, i64>, D::Error> {
        let raw = Option::<HashMap<String, Value>>::deserialize(d)?.unwrap_or_default();
        Ok(raw
            .into_iter()
            .filter_map(|(login, value)| signed(value).ok().flatten().map(|n| (login, n)))
            .collect())
    }
}

impl PlayerPayload {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            ..Default::default()
        }
    }

    pub fn with_hand(mut self, hand: Vec<Card>) -> Self {
        self.hand = Some(hand);
        self
    }

    pub fn with_bet(mut self, bet: u64) -> Self {
        self.bet = Some(bet);
        self
    }
}

/// Full table snapshot, carried by `state` and `roundStarted`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableSnapshot {
    pub channel: Option<String>,
    pub round_id: Option<u64>,
    pub game: Option<GameKind>,
    pub phase: Option<Phase>,
    /// `None` means the snapshot does not enumerate players and leaves the
    /// roster alone.
    pub players: Option<Vec<PlayerPayload>>,
    pub dealer_hand: Option<Vec<Card>>,
    pub community_cards: Option<Vec<Card>>,
    #[serde(deserialize_with = "amount::unsigned")]
    pub pot: Option<u64>,
    pub to_act: Option<String>,
    /// Raw waiting list; entries may be strings or objects.
    #[serde(alias = "queue")]
    pub waiting: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Blackjack,
    Push,
    Lose,
    Bust,
    Surrender,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandResult {
    pub login: String,
    #[serde(default = "unknown_outcome")]
    pub outcome: Outcome,
    #[serde(default, deserialize_with = "amount::signed_or_zero")]
    pub payout: i64,
}

fn unknown_outcome() -> Outcome {
    Outcome::Unknown
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoundResult {
    #[serde(flatten)]
    pub table: TableSnapshot,
    pub results: Vec<HandResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BettingStarted {
    pub channel: Option<String>,
    pub duration_ms: Option<u64>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "amount::unsigned")]
    pub min_bet: Option<u64>,
    #[serde(deserialize_with = "amount::unsigned")]
    pub max_bet: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub login: String,
    #[serde(deserialize_with = "amount::signed_or_zero")]
    pub amount: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Payouts {
    pub channel: Option<String>,
    pub payouts: Vec<Payout>,
    #[serde(deserialize_with = "amount::balances")]
    pub balances: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PokerBetting {
    pub channel: Option<String>,
    pub players: Vec<PlayerPayload>,
    #[serde(deserialize_with = "amount::unsigned")]
    pub pot: Option<u64>,
    #[serde(deserialize_with = "amount::unsigned")]
    pub current_bet: Option<u64>,
    #[serde(deserialize_with = "amount::unsigned")]
    pub min_raise: Option<u64>,
    pub to_act: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerUpdate {
    pub channel: Option<String>,
    pub player: Option<PlayerPayload>,
    pub players: Vec<PlayerPayload>,
    #[serde(deserialize_with = "amount::unsigned")]
    pub pot: Option<u64>,
}

impl PlayerUpdate {
    /// All patched players, whether sent as `player` or `players`.
    pub fn patches(&self) -> impl Iterator<Item = &PlayerPayload> {
        self.player.iter().chain(self.players.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerTurn {
    pub channel: Option<String>,
    pub login: String,
    pub hand_index: Option<usize>,
    pub duration_ms: Option<u64>,
    pub ends_at: Option<DateTime<Utc>>,
    pub can_insure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueUpdate {
    pub channel: Option<String>,
    #[serde(alias = "queue")]
    pub waiting: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PokerPhase {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(alias = "phase")]
    pub street: PokerStreet,
    #[serde(default)]
    pub community_cards: Option<Vec<Card>>,
    #[serde(default, deserialize_with = "amount::unsigned")]
    pub pot: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadyStatus {
    pub channel: Option<String>,
    pub ready: Vec<String>,
    pub countdown_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlaySettings {
    pub channel: Option<String>,
    pub table_tint: Option<String>,
    pub overflow_cap: Option<usize>,
    pub animations: Option<bool>,
    pub card_back: Option<String>,
    pub card_face: Option<String>,
}

/// Every event the overlay consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    State(TableSnapshot),
    RoundStarted(TableSnapshot),
    BettingStarted(BettingStarted),
    RoundResult(RoundResult),
    Payouts(Payouts),
    PokerBetting(PokerBetting),
    PlayerUpdate(PlayerUpdate),
    PlayerTurn(PlayerTurn),
    QueueUpdate(QueueUpdate),
    PokerPhase(PokerPhase),
    ReadyStatus(ReadyStatus),
    OverlaySettings(OverlaySettings),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::State(_) => "state",
            ServerEvent::RoundStarted(_) => "roundStarted",
            ServerEvent::BettingStarted(_) => "bettingStarted",
            ServerEvent::RoundResult(_) => "roundResult",
            ServerEvent::Payouts(_) => "payouts",
            ServerEvent::PokerBetting(_) => "pokerBetting",
            ServerEvent::PlayerUpdate(_) => "playerUpdate",
            ServerEvent::PlayerTurn(_) => "playerTurn",
            ServerEvent::QueueUpdate(_) => "queueUpdate",
            ServerEvent::PokerPhase(_) => "pokerPhase",
            ServerEvent::ReadyStatus(_) => "readyStatus",
            ServerEvent::OverlaySettings(_) => "overlaySettings",
        }
    }

    /// The channel the event is scoped to, if the payload carried one.
    pub fn channel(&self) -> Option<&str> {
        let channel = match self {
            ServerEvent::State(s) | ServerEvent::RoundStarted(s) => &s.channel,
            ServerEvent::BettingStarted(e) => &e.channel,
            ServerEvent::RoundResult(e) => &e.table.channel,
            ServerEvent::Payouts(e) => &e.channel,
            ServerEvent::PokerBetting(e) => &e.channel,
            ServerEvent::PlayerUpdate(e) => &e.channel,
            ServerEvent::PlayerTurn(e) => &e.channel,
            ServerEvent::QueueUpdate(e) => &e.channel,
            ServerEvent::PokerPhase(e) => &e.channel,
            ServerEvent::ReadyStatus(e) => &e.channel,
            ServerEvent::OverlaySettings(e) => &e.channel,
        };
        channel.as_deref()
    }

    /// Whether the event carries roster data.
    pub fn is_roster_bearing(&self) -> bool {
        matches!(
            self,
            ServerEvent::State(_)
                | ServerEvent::RoundStarted(_)
                | ServerEvent::RoundResult(_)
                | ServerEvent::PokerBetting(_)
                | ServerEvent::PlayerUpdate(_)
        )
    }
}

/// Decode one text frame into a typed event.
pub fn decode_event(text: &str) -> serde_json::Result<ServerEvent> {
    serde_json::from_str(text)
}

pub fn encode_event(event: &ServerEvent) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Rank, Suit};

    #[test]
    fn decodes_state_with_partial_players() {
        let text = r#"{
            "event": "state",
            "data": {
                "channel": "table-3",
                "phase": "betting",
                "players": [
                    {"login": "Alice", "hand": ["Ah", {"rank": "10", "suit": "spades"}], "bet": 25},
                    {"username": "bob", "hand": null}
                ],
                "waiting": ["carol", {"login": "dave"}, 7]
            }
        }"#;
        let event = decode_event(text).unwrap();
        assert_eq!(event.name(), "state");
        assert_eq!(event.channel(), Some("table-3"));
        assert!(event.is_roster_bearing());

        let ServerEvent::State(snapshot) = event else {
            panic!("expected state");
        };
        let players = snapshot.players.unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].hand.as_ref().unwrap()[1].rank, Rank::Ten);
        assert_eq!(players[0].hand.as_ref().unwrap()[0].suit, Suit::Hearts);
        assert_eq!(players[1].login, "bob");
        assert!(players[1].hand.is_none());
        assert!(snapshot.pot.is_none());
        assert!(snapshot.waiting.is_array());
    }

    #[test]
    fn round_result_flattens_table_fields() {
        let text = r#"{"event":"roundResult","data":{"channel":"t","pot":90,
            "players":[],"results":[{"login":"a","outcome":"blackjack","payout":75},
            {"login":"b","outcome":"weird"}]}}"#;
        let ServerEvent::RoundResult(result) = decode_event(text).unwrap() else {
            panic!("expected roundResult");
        };
        assert_eq!(result.table.channel.as_deref(), Some("t"));
        assert_eq!(result.table.pot, Some(90));
        assert_eq!(result.results[0].outcome, Outcome::Blackjack);
        assert_eq!(result.results[1].outcome, Outcome::Unknown);
        assert_eq!(result.results[1].payout, 0);
    }

    #[test]
    fn player_update_accepts_single_or_many() {
        let one = r#"{"event":"playerUpdate","data":{"channel":"t","player":{"login":"a","bet":5}}}"#;
        let many = r#"{"event":"playerUpdate","data":{"channel":"t","players":[{"login":"a"},{"login":"b"}]}}"#;
        let ServerEvent::PlayerUpdate(one) = decode_event(one).unwrap() else { panic!() };
        let ServerEvent::PlayerUpdate(many) = decode_event(many).unwrap() else { panic!() };
        assert_eq!(one.patches().count(), 1);
        assert_eq!(many.patches().count(), 2);
    }

    #[test]
    fn amounts_are_read_leniently() {
        let text = r#"{"event":"state","data":{"channel":"t","pot":12.5,"players":[
            {"login":"a","bet":"15","balance":-20.4},
            {"login":"b","bet":-3,"streetBet":null}]}}"#;
        let ServerEvent::State(snapshot) = decode_event(text).unwrap() else {
            panic!("expected state");
        };
        assert_eq!(snapshot.pot, Some(13));
        let players = snapshot.players.unwrap();
        assert_eq!(players[0].bet, Some(15));
        assert_eq!(players[0].balance, Some(-20));
        assert_eq!(players[1].bet, None);
        assert_eq!(players[1].street_bet, None);

        let text = r#"{"event":"payouts","data":{"payouts":[{"login":"a","amount":7.6}],"balances":{"a":10.2,"b":"lots"}}}"#;
        let ServerEvent::Payouts(payouts) = decode_event(text).unwrap() else {
            panic!("expected payouts");
        };
        assert_eq!(payouts.payouts[0].amount, 8);
        assert_eq!(payouts.balances, HashMap::from([("a".to_string(), 10)]));
    }

    #[test]
    fn login_and_name_take_the_first_non_empty_key() {
        let text = r#"{"event":"playerUpdate","data":{"players":[
            {"login":"ann","username":"ann","user":"x","displayName":"Ann","name":"Annie"},
            {"login":"","username":"Bob","name":"Bobby"},
            {"login":5,"user":"cy"}]}}"#;
        let ServerEvent::PlayerUpdate(update) = decode_event(text).unwrap() else {
            panic!("expected playerUpdate");
        };
        let players: Vec<_> = update.patches().map(|p| (p.login.as_str(), p.display_name.as_deref())).collect();
        assert_eq!(players, vec![("ann", Some("Ann")), ("Bob", Some("Bobby")), ("cy", None)]);
    }

    #[test]
    fn unknown_events_fail_to_decode() {
        assert!(decode_event(r#"{"event":"chat","data":{}}"#).is_err());
        assert!(decode_event("not json").is_err());
    }

    #[test]
    fn missing_channel_is_none() {
        let ev = decode_event(r#"{"event":"readyStatus","data":{"ready":["a"]}}"#).unwrap();
        assert_eq!(ev.channel(), None);
    }
}
