use super::{BotMove, ScoredMove, Strategy, roomiest_jump_back, scored_moves, should_act, smallest_jump};
use crate::state::GameState;

// 按牌堆剩余张数划分阶段
const EARLY_GAME_DECK_SIZE: usize = 65;
const MID_GAME_DECK_SIZE: usize = 30;
// 开局优先出两端的牌
const EXTREME_CARD_MIN: u8 = 20;
const EXTREME_CARD_MAX: u8 = 80;
// 中局优先出中间的牌
const MID_CARD_MIN: u8 = 40;
const MID_CARD_MAX: u8 = 60;

/// 分阶段策略
///
/// 1. 有 "倒退10" 就出。
/// 2. 开局 (牌堆 > 65) 优先出小于 20 或大于 80 的牌；
///    中局 (牌堆 > 30) 优先出 40..=60 的牌；残局不挑。
/// 3. 在候选集合里取跳跃最小的；偏好集合为空时退回到所有前进出牌。
pub struct PhasedStrategy;

impl PhasedStrategy {
    fn preferred(deck_size: usize, m: &ScoredMove) -> bool {
        let value = m.mv.card.value;
        if deck_size > EARLY_GAME_DECK_SIZE {
            !(EXTREME_CARD_MIN..=EXTREME_CARD_MAX).contains(&value)
        } else if deck_size > MID_GAME_DECK_SIZE {
            (MID_CARD_MIN..=MID_CARD_MAX).contains(&value)
        } else {
            true
        }
    }
}

impl Strategy for PhasedStrategy {
    fn next_move(&self, player_id: &str, state: &GameState) -> Option<BotMove> {
        if !should_act(player_id, state) {
            return None;
        }

        let moves = scored_moves(player_id, state);
        if let Some(jump_back) = roomiest_jump_back(&moves) {
            return Some(jump_back.mv.into());
        }

        let forward: Vec<ScoredMove> = moves.into_iter().filter(|m| !m.jump_back).collect();
        let preferred: Vec<ScoredMove> = forward
            .iter()
            .copied()
            .filter(|m| Self::preferred(state.deck_size, m))
            .collect();
        let candidates = if preferred.is_empty() { &forward } else { &preferred };

        Some(smallest_jump(candidates).map_or(BotMove::EndTurn, |m| m.mv.into()))
    }
}
