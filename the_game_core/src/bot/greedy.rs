use super::{BotMove, Strategy, roomiest_jump_back, scored_moves, should_act, smallest_jump};
use crate::state::GameState;

/// 贪心：出跳跃最小的牌；遇到 "倒退10" 立即采用
pub struct MinimalJumpStrategy;

impl Strategy for MinimalJumpStrategy {
    fn next_move(&self, player_id: &str, state: &GameState) -> Option<BotMove> {
        if !should_act(player_id, state) {
            return None;
        }

        let moves = scored_moves(player_id, state);
        if let Some(jump_back) = moves.iter().find(|m| m.jump_back) {
            return Some(jump_back.mv.into());
        }
        Some(smallest_jump(&moves).map_or(BotMove::EndTurn, |m| m.mv.into()))
    }
}

/// 保守：有 "倒退10" 就出，否则退回到最小跳跃
pub struct SafeTenStrategy;

impl Strategy for SafeTenStrategy {
    fn next_move(&self, player_id: &str, state: &GameState) -> Option<BotMove> {
        if !should_act(player_id, state) {
            return None;
        }

        let moves = scored_moves(player_id, state);
        let chosen = moves
            .iter()
            .copied()
            .find(|m| m.jump_back)
            .or_else(|| smallest_jump(&moves));
        Some(chosen.map_or(BotMove::EndTurn, |m| m.mv.into()))
    }
}

/// 攻守兼顾：优先选留下空间最大的 "倒退10"，否则出跳跃最小的前进牌
pub struct SmartStrategy;

impl Strategy for SmartStrategy {
    fn next_move(&self, player_id: &str, state: &GameState) -> Option<BotMove> {
        if !should_act(player_id, state) {
            return None;
        }

        let moves = scored_moves(player_id, state);
        let chosen = roomiest_jump_back(&moves)
            .or_else(|| smallest_jump(moves.iter().filter(|m| !m.jump_back)));
        Some(chosen.map_or(BotMove::EndTurn, |m| m.mv.into()))
    }
}

/// 每回合只出够两张就结束，出牌时取最小跳跃
pub struct TwoCardGreedyStrategy;

impl Strategy for TwoCardGreedyStrategy {
    fn next_move(&self, player_id: &str, state: &GameState) -> Option<BotMove> {
        if !should_act(player_id, state) {
            return None;
        }
        if state.cards_played_this_turn >= 2 {
            return Some(BotMove::EndTurn);
        }

        let moves = scored_moves(player_id, state);
        Some(smallest_jump(&moves).map_or(BotMove::EndTurn, |m| m.mv.into()))
    }
}
