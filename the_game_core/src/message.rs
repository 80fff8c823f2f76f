use crate::state::{GameId, GameState, PlayerId};
use serde::{Deserialize, Serialize};

// --- 客户端 -> 服务器 的消息 ---
// 每一条对应一个 RPC 请求。

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// 创建新游戏。不提供玩家ID时由服务器生成。
    CreateGame { player_id: Option<PlayerId> },
    /// 加入一局已存在的游戏
    JoinGame { game_id: GameId, player_id: PlayerId },
    /// 出一张牌
    PlayCard {
        game_id: GameId,
        player_id: PlayerId,
        card_value: u8,
        pile_id: String,
    },
    /// 结束回合
    EndTurn { game_id: GameId, player_id: PlayerId },
    /// 订阅一局游戏的状态推送，直到连接断开或取消
    StreamGameState { game_id: GameId },
    /// 取消之前的订阅
    StopStream { game_id: GameId },
}

// --- 服务器 -> 客户端 的消息 ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ServerMessage {
    GameCreated {
        game_state: GameState,
    },
    GameJoined {
        success: bool,
        message: String,
        game_state: Option<GameState>,
    },
    CardPlayed {
        success: bool,
        message: String,
    },
    TurnEnded {
        success: bool,
        message: String,
        game_state: Option<GameState>,
    },
    /// 订阅推送的游戏状态快照 (已隐藏牌堆顺序)
    GameStateSnapshot(GameState),
    /// 订阅已结束
    StreamClosed { game_id: GameId },
    /// 基础设施错误或无法解析的请求
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }
}
