use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod actions;
pub mod events;

pub use actions::{ActionRequest, ClientAction};
pub use events::*;

/// ---- Game kinds ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    #[default]
    Blackjack,
    #[serde(alias = "holdem", alias = "texasholdem")]
    Poker,
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::Blackjack => write!(f, "Blackjack"),
            GameKind::Poker => write!(f, "Poker"),
        }
    }
}

/// Coarse table phase. Drives UI state only, never game rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    #[serde(alias = "lobby", alias = "idle")]
    Waiting,
    #[serde(alias = "deal")]
    Dealing,
    #[serde(alias = "acting", alias = "betting_open")]
    Betting,
    #[serde(alias = "showdown", alias = "payout", alias = "results")]
    Result,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Waiting => "waiting",
            Phase::Dealing => "dealing",
            Phase::Betting => "betting",
            Phase::Result => "result",
        };
        f.write_str(s)
    }
}

/// Poker street carried by `pokerPhase`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PokerStreet {
    Preflop,
    Flop,
    Turn,
    River,
    Showdown,
}

/// ---- Cards ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Suit {
    Clubs,
    Diamonds,
    Hearts,
    Spades,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Rank {
    Two = 2,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

impl Suit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Suit::Clubs => "♣",
            Suit::Diamonds => "♦",
            Suit::Hearts => "♥",
            Suit::Spades => "♠",
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Suit::Clubs => 'c',
            Suit::Diamonds => 'd',
            Suit::Hearts => 'h',
            Suit::Spades => 's',
        }
    }

    pub fn is_red(&self) -> bool {
        matches!(self, Suit::Diamonds | Suit::Hearts)
    }
}

impl FromStr for Suit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "c" | "club" | "clubs" | "♣" => Ok(Suit::Clubs),
            "d" | "diamond" | "diamonds" | "♦" => Ok(Suit::Diamonds),
            "h" | "heart" | "hearts" | "♥" => Ok(Suit::Hearts),
            "s" | "spade" | "spades" | "♠" => Ok(Suit::Spades),
            other => Err(format!("unknown suit {other:?}")),
        }
    }
}

impl TryFrom<String> for Suit {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Suit> for String {
    fn from(s: Suit) -> Self {
        match s {
            Suit::Clubs => "clubs",
            Suit::Diamonds => "diamonds",
            Suit::Hearts => "hearts",
            Suit::Spades => "spades",
        }
        .to_string()
    }
}

impl Rank {
    pub fn label(&self) -> &'static str {
        match self {
            Rank::Ace => "A",
            Rank::King => "K",
            Rank::Queen => "Q",
            Rank::Jack => "J",
            Rank::Ten => "10",
            Rank::Nine => "9",
            Rank::Eight => "8",
            Rank::Seven => "7",
            Rank::Six => "6",
            Rank::Five => "5",
            Rank::Four => "4",
            Rank::Three => "3",
            Rank::Two => "2",
        }
    }
}

impl FromStr for Rank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let r = match s.trim().to_uppercase().as_str() {
            "A" | "1" | "14" | "ACE" => Rank::Ace,
            "2" | "TWO" => Rank::Two,
            "3" | "THREE" => Rank::Three,
            "4" | "FOUR" => Rank::Four,
            "5" | "FIVE" => Rank::Five,
            "6" | "SIX" => Rank::Six,
            "7" | "SEVEN" => Rank::Seven,
            "8" | "EIGHT" => Rank::Eight,
            "9" | "NINE" => Rank::Nine,
            "10" | "T" | "TEN" => Rank::Ten,
            "J" | "11" | "JACK" => Rank::Jack,
            "Q" | "12" | "QUEEN" => Rank::Queen,
            "K" | "13" | "KING" => Rank::King,
            other => return Err(format!("unknown rank {other:?}")),
        };
        Ok(r)
    }
}

impl TryFrom<String> for Rank {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rank> for String {
    fn from(r: Rank) -> Self {
        r.label().to_string()
    }
}

/// A dealt card. Whether its face is shown is decided at render time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "CardRepr")]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

/// Servers send either `{"rank": "K", "suit": "hearts"}` or a compact `"Kh"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CardRepr {
    Compact(String),
    Full { rank: Rank, suit: Suit },
}

impl TryFrom<CardRepr> for Card {
    type Error = String;

    fn try_from(repr: CardRepr) -> Result<Self, Self::Error> {
        match repr {
            CardRepr::Full { rank, suit } => Ok(Card { rank, suit }),
            CardRepr::Compact(s) => s.parse(),
        }
    }
}

impl FromStr for Card {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .char_indices()
            .last()
            .map(|(i, _)| i)
            .ok_or_else(|| "empty card".to_string())?;
        if split == 0 {
            return Err(format!("card {s:?} is missing a suit"));
        }
        let (rank, suit) = s.split_at(split);
        Ok(Card {
            rank: rank.parse()?,
            suit: suit.parse()?,
        })
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.rank.label(), self.suit.symbol())
    }
}

impl Card {
    /// Asset key used for face skins, e.g. `10h`, `as`.
    pub fn asset_key(&self) -> String {
        format!("{}{}", self.rank.label().to_lowercase(), self.suit.letter())
    }
}

/// Case-normalized login used as the identity key everywhere.
pub fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_accepts_object_and_compact_forms() {
        let full: Card = serde_json::from_str(r#"{"rank":"K","suit":"hearts"}"#).unwrap();
        let compact: Card = serde_json::from_str(r#""Kh""#).unwrap();
        assert_eq!(full, compact);

        let ten: Card = serde_json::from_str(r#""10♠""#).unwrap();
        assert_eq!(ten, Card { rank: Rank::Ten, suit: Suit::Spades });
        assert_eq!(ten.to_string(), "10♠");
        assert_eq!(ten.asset_key(), "10s");
    }

    #[test]
    fn card_rejects_garbage() {
        assert!(serde_json::from_str::<Card>(r#""Z""#).is_err());
        assert!(serde_json::from_str::<Card>(r#"{"rank":"X","suit":"hearts"}"#).is_err());
        assert!(serde_json::from_str::<Card>("42").is_err());
    }

    #[test]
    fn phase_aliases() {
        let p: Phase = serde_json::from_str(r#""showdown""#).unwrap();
        assert_eq!(p, Phase::Result);
        let p: Phase = serde_json::from_str(r#""lobby""#).unwrap();
        assert_eq!(p, Phase::Waiting);
        assert_eq!(serde_json::to_string(&Phase::Betting).unwrap(), r#""betting""#);
    }

    #[test]
    fn login_normalization() {
        assert_eq!(normalize_login("  SomeOne "), "someone");
    }
}
