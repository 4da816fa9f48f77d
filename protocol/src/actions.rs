use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Player actions emitted on user interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientAction {
    /// Sent on every (re)connect to subscribe to the bound channel.
    JoinChannel,

    // Blackjack
    PlayerHit,
    PlayerStand,
    PlayerDouble,
    PlayerSurrender,
    PlayerSplit,
    PlayerSwitchHand {
        #[serde(rename = "handIndex")]
        hand_index: usize,
    },
    PlayerInsurance {
        accept: bool,
    },

    // Poker
    PlayerCheck,
    PlayerCall,
    PlayerRaise {
        amount: u64,
    },
    PlayerFold,
    PlayerHold {
        #[serde(default)]
        indices: Vec<usize>,
    },

    // Table control
    ForceDraw,
    StartRound,
}

impl ClientAction {
    pub fn name(&self) -> &'static str {
        match self {
            ClientAction::JoinChannel => "joinChannel",
            ClientAction::PlayerHit => "playerHit",
            ClientAction::PlayerStand => "playerStand",
            ClientAction::PlayerDouble => "playerDouble",
            ClientAction::PlayerSurrender => "playerSurrender",
            ClientAction::PlayerSplit => "playerSplit",
            ClientAction::PlayerSwitchHand { .. } => "playerSwitchHand",
            ClientAction::PlayerInsurance { .. } => "playerInsurance",
            ClientAction::PlayerCheck => "playerCheck",
            ClientAction::PlayerCall => "playerCall",
            ClientAction::PlayerRaise { .. } => "playerRaise",
            ClientAction::PlayerFold => "playerFold",
            ClientAction::PlayerHold { .. } => "playerHold",
            ClientAction::ForceDraw => "forceDraw",
            ClientAction::StartRound => "startRound",
        }
    }

    pub fn is_poker(&self) -> bool {
        matches!(
            self,
            ClientAction::PlayerCheck
                | ClientAction::PlayerCall
                | ClientAction::PlayerRaise { .. }
                | ClientAction::PlayerFold
                | ClientAction::PlayerHold { .. }
        )
    }
}

/// An action addressed to a channel, as it goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: Uuid,
    pub channel: String,
    #[serde(flatten)]
    pub action: ClientAction,
}

impl ActionRequest {
    pub fn new(channel: impl Into<String>, action: ClientAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            action,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
