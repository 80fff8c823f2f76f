use crate::card::*;
use crate::error::GameError;
use crate::state::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 创建者的起始手牌数
pub const STARTING_HAND_SIZE: usize = 8;
/// 胜利时写入 GameState.message 的文字
pub const VICTORY_MESSAGE: &str = "You won! All cards have been played.";

/// 一个合法的出牌组合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub card: Card,
    pub pile: PileId,
}

// --- 核心游戏流程函数 ---
// 所有函数都不修改输入：成功时返回新的状态，失败时返回 GameError。

/// 创建一局新游戏
///
/// - 洗一副 98 张的新牌。
/// - 给创建者发 8 张牌。
/// - 四个牌堆放上边界牌 (升序 1，降序 100)。
/// - 创建者是唯一的玩家，也是当前行动的玩家。
pub fn create_game(game_id: GameId, creator: &str) -> GameState {
    create_game_with_rng(game_id, creator, &mut rand::rng())
}

/// 与 [`create_game`] 相同，但使用调用方提供的随机数生成器洗牌
pub fn create_game_with_rng<R: Rng + ?Sized>(game_id: GameId, creator: &str, rng: &mut R) -> GameState {
    let mut deck = shuffled_deck(rng);
    let hand: Vec<Card> = deck.drain(..STARTING_HAND_SIZE).collect();

    let mut state = GameState {
        game_id,
        player_ids: vec![creator.to_string()],
        deck,
        deck_size: 0,
        piles: initial_piles(),
        hands: [(creator.to_string(), Hand { cards: hand })].into_iter().collect(),
        current_turn_player_id: creator.to_string(),
        cards_played_this_turn: 0,
        game_over: false,
        message: String::new(),
        version: 0,
    };
    state.sync_deck_size();
    state
}

/// 添加一名玩家，并从牌堆前端给他发 `hand_size` 张牌
///
/// 是否允许重复的玩家ID、是否允许开局后加入，都由上层决定，这里不检查。
/// 重复的ID会把新发的牌并入已有手牌，保证不丢牌。
pub fn add_player(state: &GameState, player_id: &str, hand_size: usize) -> Result<GameState, GameError> {
    if state.deck.len() < hand_size {
        return Err(GameError::InsufficientCards {
            needed: hand_size,
            available: state.deck.len(),
        });
    }

    let mut new_state = state.clone();
    let dealt: Vec<Card> = new_state.deck.drain(..hand_size).collect();
    new_state.player_ids.push(player_id.to_string());
    new_state
        .hands
        .entry(player_id.to_string())
        .or_default()
        .cards
        .extend(dealt);
    new_state.sync_deck_size();
    Ok(new_state)
}

/// 处理一次出牌
///
/// 检查顺序：牌堆是否存在 -> 出牌是否合法 -> 玩家是否存在 -> 玩家是否持有这张牌。
/// 成功后牌从手牌移到牌堆，本回合出牌数加一。
/// 如果本回合出牌数仍不足 2，手里还有牌，但已经没有任何一张能出，则游戏失败。
pub fn play_card(state: &GameState, player_id: &str, card_value: u8, pile_id: &str) -> Result<GameState, GameError> {
    let pile_id: PileId = pile_id.parse()?;
    let card = Card::new(card_value);

    let pile = state
        .pile(pile_id)
        .ok_or_else(|| GameError::PileNotFound(pile_id.to_string()))?;
    if !pile.accepts(card) {
        return Err(GameError::IllegalMove {
            card: card_value,
            pile: pile_id.to_string(),
            top: pile.top_value(),
        });
    }

    let hand = state
        .hand(player_id)
        .ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))?;
    if !hand.contains(card) {
        return Err(GameError::CardNotInHand(card_value));
    }

    let mut new_state = state.clone();
    if let Some(hand) = new_state.hands.get_mut(player_id) {
        hand.remove(card);
    }
    if let Some(pile) = new_state.piles.get_mut(&pile_id) {
        pile.cards.push(card);
    }
    new_state.cards_played_this_turn += 1;

    // 出牌后检查是否已经卡死
    if new_state.cards_played_this_turn < 2 {
        if let Some(hand) = new_state.hands.get(player_id) {
            if !hand.is_empty() && !is_move_possible(hand, &new_state.piles) {
                new_state.game_over = true;
                new_state.message = format!("Player {} lost: No more valid moves.", player_id);
            }
        }
    }

    Ok(new_state)
}

/// 结束当前回合
///
/// - 出牌数不足 (牌堆非空时 2 张，牌堆为空时 1 张) 则失败。
/// - 从牌堆前端补牌，补的张数等于本回合出的张数，牌堆不够时有多少补多少。
/// - 重置出牌计数，行动权交给下一位玩家 (循环)。
/// - 牌堆和所有手牌都为空时，游戏胜利。
pub fn end_turn(state: &GameState, player_id: &str) -> Result<GameState, GameError> {
    let required = state.min_plays_this_turn();
    if state.cards_played_this_turn < required {
        return Err(GameError::InsufficientPlaysThisTurn {
            required,
            played: state.cards_played_this_turn,
        });
    }

    let player_idx = state
        .player_ids
        .iter()
        .position(|id| id == player_id)
        .ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))?;
    if !state.hands.contains_key(player_id) {
        return Err(GameError::PlayerNotFound(player_id.to_string()));
    }

    let mut new_state = state.clone();

    // 补牌
    let draw_count = (new_state.cards_played_this_turn as usize).min(new_state.deck.len());
    let drawn: Vec<Card> = new_state.deck.drain(..draw_count).collect();
    if let Some(hand) = new_state.hands.get_mut(player_id) {
        hand.cards.extend(drawn);
    }
    new_state.sync_deck_size();

    new_state.cards_played_this_turn = 0;

    let next_idx = (player_idx + 1) % new_state.player_ids.len();
    new_state.current_turn_player_id = new_state.player_ids[next_idx].clone();

    if new_state.deck.is_empty() && new_state.hands.values().all(Hand::is_empty) {
        new_state.game_over = true;
        new_state.message = VICTORY_MESSAGE.to_string();
    }

    Ok(new_state)
}

// --- 辅助逻辑函数 ---

/// 手牌中是否有任意一张牌可以出在任意一个牌堆上
pub fn is_move_possible(hand: &Hand, piles: &BTreeMap<PileId, Pile>) -> bool {
    hand.cards
        .iter()
        .any(|card| piles.values().any(|pile| pile.accepts(*card)))
}

/// 列出某位玩家当前所有合法的出牌
pub fn possible_moves(state: &GameState, player_id: &str) -> Vec<Move> {
    let Some(hand) = state.hand(player_id) else {
        return Vec::new();
    };

    let mut moves = Vec::new();
    for card in &hand.cards {
        for (pile_id, pile) in &state.piles {
            if pile.accepts(*card) {
                moves.push(Move { card: *card, pile: *pile_id });
            }
        }
    }
    moves
}

// --- 单元测试 ---
