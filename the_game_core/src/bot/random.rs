use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{BotMove, Strategy, should_act};
use crate::logic::possible_moves;
use crate::state::GameState;

/// 随机出一张合法的牌
///
/// `Strategy` 的方法只拿到 `&self`，随机数生成器放在锁里。
/// 传入种子时行为可复现，便于测试。
pub struct RandomStrategy {
    rng: Mutex<StdRng>,
}

impl RandomStrategy {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        RandomStrategy { rng: Mutex::new(rng) }
    }
}

impl Strategy for RandomStrategy {
    fn next_move(&self, player_id: &str, state: &GameState) -> Option<BotMove> {
        if !should_act(player_id, state) {
            return None;
        }

        let moves = possible_moves(state, player_id);
        if moves.is_empty() {
            return Some(BotMove::EndTurn);
        }
        let idx = self.rng.lock().random_range(0..moves.len());
        Some(moves[idx].into())
    }
}
