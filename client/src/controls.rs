//! Which action buttons are enabled. UI state only: the server still decides
//! whether an action is legal.

use crate::model::OverlayState;
use serde::Serialize;
use tableside_protocol::{ClientAction, GameKind, Phase, Rank};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionSet {
    pub hit: bool,
    pub stand: bool,
    pub double: bool,
    pub surrender: bool,
    pub split: bool,
    pub switch_hand: bool,
    pub insurance: bool,
    pub check: bool,
    pub call: bool,
    pub raise: bool,
    pub fold: bool,
    pub hold: bool,
    pub force_draw: bool,
    pub start_round: bool,
}

impl ActionSet {
    pub fn allows(&self, action: &ClientAction) -> bool {
        match action {
            ClientAction::JoinChannel => true,
            ClientAction::PlayerHit => self.hit,
            ClientAction::PlayerStand => self.stand,
            ClientAction::PlayerDouble => self.double,
            ClientAction::PlayerSurrender => self.surrender,
            ClientAction::PlayerSplit => self.split,
            ClientAction::PlayerSwitchHand { .. } => self.switch_hand,
            ClientAction::PlayerInsurance { .. } => self.insurance,
            ClientAction::PlayerCheck => self.check,
            ClientAction::PlayerCall => self.call,
            ClientAction::PlayerRaise { .. } => self.raise,
            ClientAction::PlayerFold => self.fold,
            ClientAction::PlayerHold { .. } => self.hold,
            ClientAction::ForceDraw => self.force_draw,
            ClientAction::StartRound => self.start_round,
        }
    }

    pub fn any(&self) -> bool {
        *self != ActionSet::default()
    }
}

/// Inputs besides the table snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ControlContext<'a> {
    pub viewer: Option<&'a str>,
    /// Poker betting controls are only offered on lobby channels.
    pub poker_controls: bool,
    /// The server offered insurance on the current turn.
    pub insurance_offered: bool,
}

pub fn derive(state: &OverlayState, ctx: ControlContext<'_>) -> ActionSet {
    let mut set = ActionSet::default();

    let owner = ctx.viewer.is_some_and(|v| v == state.channel);
    let between_rounds = matches!(state.phase, Phase::Waiting | Phase::Result);
    set.start_round = owner && between_rounds;
    set.force_draw = owner && state.phase == Phase::Dealing;

    let Some(me) = ctx.viewer.and_then(|v| state.player(v)) else {
        return set;
    };
    let my_turn = state.to_act.as_deref().map_or(true, |t| t == me.login);

    match state.game {
        GameKind::Blackjack => {
            if state.phase != Phase::Dealing || !my_turn || me.folded {
                return set;
            }
            let hand = me.current_hand();
            if hand.is_empty() {
                return set;
            }
            let fresh = hand.len() == 2;
            set.hit = true;
            set.stand = true;
            set.double = fresh;
            set.surrender = fresh && !me.is_split();
            set.split = fresh && !me.is_split() && hand[0].rank == hand[1].rank;
            set.switch_hand = me.hands.as_ref().is_some_and(|h| h.len() > 1);
            let dealer_ace = state.dealer_hand.first().is_some_and(|c| c.rank == Rank::Ace);
            set.insurance = fresh && (ctx.insurance_offered || dealer_ace);
        }
        GameKind::Poker => {
            if !ctx.poker_controls || me.folded || me.all_in {
                return set;
            }
            match state.phase {
                Phase::Betting if my_turn => {
                    let to_call = state.current_bet.unwrap_or(0).saturating_sub(me.street_bet);
                    set.check = to_call == 0;
                    set.call = to_call > 0;
                    set.raise = me.balance.map_or(true, |b| b > to_call as i64);
                    set.fold = true;
                }
                Phase::Dealing => set.hold = me.card_count() > 0,
                _ => {}
            }
        }
    }
    set
}
