use crate::card::{ASCENDING_BOUNDARY, Card, DESCENDING_BOUNDARY, JUMP_BACK};
use crate::error::GameError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type GameId = Uuid;
pub type PlayerId = String;

/// 四个牌堆的固定编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PileId {
    Up1,
    Up2,
    Down1,
    Down2,
}

impl PileId {
    pub const ALL: [PileId; 4] = [PileId::Up1, PileId::Up2, PileId::Down1, PileId::Down2];

    pub fn as_str(&self) -> &'static str {
        match self {
            PileId::Up1 => "up1",
            PileId::Up2 => "up2",
            PileId::Down1 => "down1",
            PileId::Down2 => "down2",
        }
    }

    pub fn is_ascending(&self) -> bool {
        matches!(self, PileId::Up1 | PileId::Up2)
    }
}

impl fmt::Display for PileId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PileId {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PileId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| GameError::PileNotFound(s.to_string()))
    }
}

/// 牌堆：方向在创建时固定，`cards` 保存完整的出牌历史，第一张是边界牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pile {
    pub ascending: bool,
    pub cards: Vec<Card>,
}

impl Pile {
    pub fn new(ascending: bool) -> Self {
        Pile {
            ascending,
            cards: vec![Card::new(Self::boundary_value(ascending))],
        }
    }

    fn boundary_value(ascending: bool) -> u8 {
        if ascending { ASCENDING_BOUNDARY } else { DESCENDING_BOUNDARY }
    }

    /// 堆顶牌的数值。历史永远至少包含边界牌，空历史按边界牌处理。
    pub fn top_value(&self) -> u8 {
        self.cards
            .last()
            .map_or(Self::boundary_value(self.ascending), |c| c.value)
    }

    /// 是否是 "倒退10" 的出牌
    pub fn is_jump_back(&self, card: Card) -> bool {
        let top = self.top_value();
        if self.ascending {
            top.checked_sub(JUMP_BACK) == Some(card.value)
        } else {
            top.checked_add(JUMP_BACK) == Some(card.value)
        }
    }

    /// 出牌是否合法：顺着方向前进，或者正好倒退10
    pub fn accepts(&self, card: Card) -> bool {
        let top = self.top_value();
        let forward = if self.ascending { card.value > top } else { card.value < top };
        forward || self.is_jump_back(card)
    }

    /// 出这张牌后堆顶移动的距离
    pub fn jump(&self, card: Card) -> u8 {
        self.top_value().abs_diff(card.value)
    }

    /// 除边界牌外是否已经有人出过牌
    pub fn has_plays(&self) -> bool {
        self.cards.len() > 1
    }
}

/// 玩家手牌，规则上不关心顺序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hand {
    pub cards: Vec<Card>,
}

impl Hand {
    pub fn contains(&self, card: Card) -> bool {
        self.cards.contains(&card)
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// 从手牌中移除一张牌，返回是否找到
    pub fn remove(&mut self, card: Card) -> bool {
        match self.cards.iter().position(|c| *c == card) {
            Some(idx) => {
                self.cards.remove(idx);
                true
            }
            None => false,
        }
    }

    /// 升序排列的牌面，仅用于展示
    pub fn sorted_values(&self) -> Vec<u8> {
        let mut values: Vec<u8> = self.cards.iter().map(|c| c.value).collect();
        values.sort_unstable();
        values
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GamePhase {
    InProgress,
    Won,
    Lost,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameState {
    pub game_id: GameId,
    // 出牌顺序
    pub player_ids: Vec<PlayerId>,
    // 牌堆，从前端发牌。发给客户端时会被清空，只保留 deck_size。
    pub deck: Vec<Card>,
    pub deck_size: usize,
    pub piles: BTreeMap<PileId, Pile>,
    pub hands: HashMap<PlayerId, Hand>,
    pub current_turn_player_id: PlayerId,
    pub cards_played_this_turn: u32,
    pub game_over: bool,
    pub message: String,
    // 每次成功写入存储时由服务端递增，规则引擎不修改它
    #[serde(default)]
    pub version: u64,
}

/// 四个牌堆的初始状态
pub fn initial_piles() -> BTreeMap<PileId, Pile> {
    PileId::ALL
        .into_iter()
        .map(|id| (id, Pile::new(id.is_ascending())))
        .collect()
}

// --- GameState 的实现方法 ---

impl GameState {
    pub fn pile(&self, pile_id: PileId) -> Option<&Pile> {
        self.piles.get(&pile_id)
    }

    pub fn hand(&self, player_id: &str) -> Option<&Hand> {
        self.hands.get(player_id)
    }

    pub fn is_current_player(&self, player_id: &str) -> bool {
        self.current_turn_player_id == player_id
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.player_ids.iter().any(|id| id == player_id)
    }

    /// 是否已经有人出过牌
    pub fn has_started(&self) -> bool {
        self.piles.values().any(Pile::has_plays)
    }

    /// 本回合结束前至少要出的牌数：牌堆为空时为 1，否则为 2
    pub fn min_plays_this_turn(&self) -> u32 {
        if self.deck.is_empty() && self.deck_size == 0 { 1 } else { 2 }
    }

    pub fn phase(&self) -> GamePhase {
        if !self.game_over {
            GamePhase::InProgress
        } else if self.deck_size == 0 && self.hands.values().all(Hand::is_empty) {
            GamePhase::Won
        } else {
            GamePhase::Lost
        }
    }

    pub(crate) fn sync_deck_size(&mut self) {
        self.deck_size = self.deck.len();
    }

    /// 发给客户端的视图：隐藏牌堆的顺序，只保留剩余张数
    pub fn for_client(&self) -> Self {
        let mut client_state = self.clone();
        client_state.deck.clear();
        client_state
    }
}
