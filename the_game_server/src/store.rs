//! 游戏状态存储
//!
//! 每个 game id 对应一份权威的 `GameState`，以 JSON 字节的形式保存。
//! `get`/`put` 对底层介质都是原子的：一次 `put` 要么完整可见，要么不可见。

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;

use the_game_core::{GameId, GameState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("game {0} not found")]
    NotFound(GameId),

    #[error("failed to encode or decode game state: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn get(&self, game_id: GameId) -> Result<GameState, StoreError>;

    async fn put(&self, game_id: GameId, state: &GameState) -> Result<(), StoreError>;
}

fn encode(state: &GameState) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(state)?)
}

fn decode(bytes: &[u8]) -> Result<GameState, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

// --- 进程内存储 ---

/// 单进程部署或测试时使用的内存存储
#[derive(Default)]
pub struct MemoryStore {
    games: DashMap<GameId, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn get(&self, game_id: GameId) -> Result<GameState, StoreError> {
        // 先克隆字节再解码，避免在持有分片锁时做反序列化
        let bytes = self
            .games
            .get(&game_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(game_id))?;
        decode(&bytes)
    }

    async fn put(&self, game_id: GameId, state: &GameState) -> Result<(), StoreError> {
        let bytes = Bytes::from(encode(state)?);
        self.games.insert(game_id, bytes);
        Ok(())
    }
}

// --- Redis 存储 ---

pub struct RedisStore {
    conn: ConnectionManager,
}

pub(crate) fn game_key(game_id: GameId) -> String {
    format!("game:{}", game_id)
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(RedisStore { conn })
    }
}

#[async_trait]
impl GameStore for RedisStore {
    async fn get(&self, game_id: GameId) -> Result<GameState, StoreError> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get(game_key(game_id)).await?;
        match bytes {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(game_id)),
        }
    }

    async fn put(&self, game_id: GameId, state: &GameState) -> Result<(), StoreError> {
        let bytes = encode(state)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(game_key(game_id), bytes).await?;
        Ok(())
    }
}
