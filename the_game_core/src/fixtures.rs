//! 测试用的 GameState 构造函数

use crate::card::Card;
use crate::state::{GameState, Hand, Pile, PileId};
use uuid::Uuid;

pub(crate) fn pile_with_top(ascending: bool, top: u8) -> Pile {
    let mut pile = Pile::new(ascending);
    if top != pile.top_value() {
        pile.cards.push(Card::new(top));
    }
    pile
}

/// 构造一个测试用的 GameState
///
/// `hands` 的顺序即出牌顺序，第一位玩家为当前行动者；
/// `tops` 依次是 up1、up2、down1、down2 的堆顶。
pub(crate) fn setup_test_game(hands: &[(&str, &[u8])], tops: [u8; 4], deck: &[u8]) -> GameState {
    let piles = PileId::ALL
        .into_iter()
        .zip(tops)
        .map(|(id, top)| (id, pile_with_top(id.is_ascending(), top)))
        .collect();
    let deck: Vec<Card> = deck.iter().copied().map(Card::new).collect();

    GameState {
        game_id: Uuid::new_v4(),
        player_ids: hands.iter().map(|(id, _)| id.to_string()).collect(),
        deck_size: deck.len(),
        deck,
        piles,
        hands: hands
            .iter()
            .map(|(id, cards)| {
                (id.to_string(), Hand { cards: cards.iter().copied().map(Card::new).collect() })
            })
            .collect(),
        current_turn_player_id: hands[0].0.to_string(),
        cards_played_this_turn: 0,
        game_over: false,
        message: String::new(),
        version: 0,
    }
}
