use rand::Rng;
use rand::prelude::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
// --- 核心数据结构定义 ---

/// 发牌堆中最小的牌面
pub const MIN_CARD: u8 = 2;
/// 发牌堆中最大的牌面
pub const MAX_CARD: u8 = 99;
/// 一副牌的张数 (2..=99)
pub const DECK_SIZE: usize = (MAX_CARD - MIN_CARD + 1) as usize;
/// 升序牌堆的起始边界牌，不属于发牌堆
pub const ASCENDING_BOUNDARY: u8 = 1;
/// 降序牌堆的起始边界牌，不属于发牌堆
pub const DESCENDING_BOUNDARY: u8 = 100;
/// "倒退10" 规则的步长
pub const JUMP_BACK: u8 = 10;

/// 单张牌 (Card)
/// 只有一个属性：牌面数值。按值比较。
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct Card {
    pub value: u8,
}

impl Card {
    pub fn new(value: u8) -> Card {
        Card { value }
    }

    /// 是否是可以出现在发牌堆里的牌 (而不是边界牌)
    pub fn is_playable_value(&self) -> bool {
        (MIN_CARD..=MAX_CARD).contains(&self.value)
    }
}

impl From<u8> for Card {
    fn from(value: u8) -> Self {
        Card { value }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

// --- 牌组生成 ---

/// 创建一副按顺序排列的 98 张牌 (2..=99)
pub fn create_deck() -> Vec<Card> {
    (MIN_CARD..=MAX_CARD).map(Card::new).collect()
}

/// 用给定的随机数生成器洗出一副新牌
pub fn shuffled_deck<R: Rng + ?Sized>(rng: &mut R) -> Vec<Card> {
    let mut deck = create_deck();
    deck.shuffle(rng);
    deck
}

// --- 单元测试 ---
