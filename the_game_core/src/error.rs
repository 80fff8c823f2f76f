use thiserror::Error;

/// 规则引擎返回的失败。失败时输入状态保持不变，调用方不得持久化任何中间结果。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("pile '{0}' not found")]
    PileNotFound(String),

    #[error("invalid move: card {card} on pile {pile} (top: {top})")]
    IllegalMove { card: u8, pile: String, top: u8 },

    #[error("player '{0}' not found")]
    PlayerNotFound(String),

    #[error("player does not have card {0}")]
    CardNotInHand(u8),

    #[error("not enough cards in deck to deal a new hand (need {needed}, have {available})")]
    InsufficientCards { needed: usize, available: usize },

    #[error("must play at least {required} card(s) to end turn (played {played})")]
    InsufficientPlaysThisTurn { required: u32, played: u32 },
}
