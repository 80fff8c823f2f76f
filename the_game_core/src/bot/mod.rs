//! 机器人策略
//!
//! 每个策略都实现 [`Strategy`]：输入某位玩家看到的游戏状态，返回下一步动作。
//! 策略之间没有继承关系，可以随意替换。所有策略在没有合法出牌时都会选择结束回合。

mod greedy;
mod phased;
mod random;

use std::fmt;
use std::str::FromStr;

use crate::card::{ASCENDING_BOUNDARY, Card, DESCENDING_BOUNDARY};
use crate::logic::{Move, possible_moves};
use crate::message::ClientMessage;
use crate::state::{GameState, PileId};

pub use greedy::{MinimalJumpStrategy, SafeTenStrategy, SmartStrategy, TwoCardGreedyStrategy};
pub use phased::PhasedStrategy;
pub use random::RandomStrategy;

/// 机器人提出的一步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMove {
    PlayCard { card_value: u8, pile_id: PileId },
    EndTurn,
}

impl BotMove {
    pub fn into_message(self, state: &GameState, player_id: &str) -> ClientMessage {
        match self {
            BotMove::PlayCard { card_value, pile_id } => ClientMessage::PlayCard {
                game_id: state.game_id,
                player_id: player_id.to_string(),
                card_value,
                pile_id: pile_id.to_string(),
            },
            BotMove::EndTurn => ClientMessage::EndTurn {
                game_id: state.game_id,
                player_id: player_id.to_string(),
            },
        }
    }
}

impl From<Move> for BotMove {
    fn from(mv: Move) -> Self {
        BotMove::PlayCard { card_value: mv.card.value, pile_id: mv.pile }
    }
}

/// 机器人策略
pub trait Strategy: Send + Sync {
    /// 在游戏结束或不是该玩家的回合时返回 `None`
    fn next_move(&self, player_id: &str, state: &GameState) -> Option<BotMove>;
}

/// 只有轮到 `player_id` 且游戏未结束时才需要决策
pub(crate) fn should_act(player_id: &str, state: &GameState) -> bool {
    !state.game_over && state.is_current_player(player_id)
}

/// 带评分信息的合法出牌
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScoredMove {
    pub mv: Move,
    pub jump_back: bool,
    pub jump: u8,
    // 出牌后该牌堆在前进方向上还剩多少空间
    pub room: u8,
}

pub(crate) fn scored_moves(player_id: &str, state: &GameState) -> Vec<ScoredMove> {
    possible_moves(state, player_id)
        .into_iter()
        .filter_map(|mv| {
            let pile = state.pile(mv.pile)?;
            Some(ScoredMove {
                mv,
                jump_back: pile.is_jump_back(mv.card),
                jump: pile.jump(mv.card),
                room: room_after(pile.ascending, mv.card),
            })
        })
        .collect()
}

fn room_after(ascending: bool, card: Card) -> u8 {
    if ascending {
        DESCENDING_BOUNDARY.saturating_sub(card.value)
    } else {
        card.value.saturating_sub(ASCENDING_BOUNDARY)
    }
}

/// 跳跃最小的出牌，平局时取最先出现的
pub(crate) fn smallest_jump<'a>(moves: impl IntoIterator<Item = &'a ScoredMove>) -> Option<ScoredMove> {
    moves.into_iter().fold(None, |best: Option<ScoredMove>, m| match best {
        Some(b) if b.jump <= m.jump => Some(b),
        _ => Some(*m),
    })
}

/// 留下空间最大的 "倒退10" 出牌
pub(crate) fn roomiest_jump_back(moves: &[ScoredMove]) -> Option<ScoredMove> {
    moves
        .iter()
        .filter(|m| m.jump_back)
        .fold(None, |best: Option<ScoredMove>, m| match best {
            Some(b) if b.room >= m.room => Some(b),
            _ => Some(*m),
        })
}

// --- 策略注册 ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Random,
    MinimalJump,
    SafeTen,
    Smart,
    TwoCardGreedy,
    Phased,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::Random,
        StrategyKind::MinimalJump,
        StrategyKind::SafeTen,
        StrategyKind::Smart,
        StrategyKind::TwoCardGreedy,
        StrategyKind::Phased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Random => "random",
            StrategyKind::MinimalJump => "minimal-jump",
            StrategyKind::SafeTen => "safe-ten",
            StrategyKind::Smart => "smart",
            StrategyKind::TwoCardGreedy => "two-card-greedy",
            StrategyKind::Phased => "phased",
        }
    }

    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyKind::Random => Box::new(RandomStrategy::new(None)),
            StrategyKind::MinimalJump => Box::new(MinimalJumpStrategy),
            StrategyKind::SafeTen => Box::new(SafeTenStrategy),
            StrategyKind::Smart => Box::new(SmartStrategy),
            StrategyKind::TwoCardGreedy => Box::new(TwoCardGreedyStrategy),
            StrategyKind::Phased => Box::new(PhasedStrategy),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = StrategyKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown strategy '{}', expected one of: {}", s, names.join(", "))
            })
    }
}
