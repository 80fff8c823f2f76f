//! # The Game 核心逻辑库
//!
//! 这个 `core` crate 包含了合作卡牌游戏 "The Game" 的状态定义、
//! 规则引擎 (纯函数的状态转换)、机器人策略，以及客户端-服务器通信消息的定义。
//! 它不做任何 I/O，可以被服务器、客户端和测试复用。

pub mod bot;
mod card;
mod error;
#[cfg(test)]
mod fixtures;
pub mod logic;
mod message;
mod state;

pub use card::*;

pub use error::GameError;

pub use message::*;

pub use state::*;
