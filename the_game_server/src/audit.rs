//! 审计日志
//!
//! 每个成功的状态变更都会追加一条事件记录。审计写入不在请求的关键路径上：
//! 失败只记日志，不会影响玩家看到的结果。

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use the_game_core::{GameId, PlayerId};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to write audit log: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode audit event: {0}")]
    Codec(#[from] serde_json::Error),
}

/// 事件类型写在 `event_type`，其余字段放在嵌套的 `payload` 对象里
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    GameStart { player_id: PlayerId },
    PlayerJoined { player_id: PlayerId },
    PlayCard { player_id: PlayerId, card_value: u8, pile_id: String },
    EndTurn { player_id: PlayerId },
    GameOver { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub game_id: GameId,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl GameEvent {
    pub fn now(game_id: GameId, payload: EventPayload) -> Self {
        GameEvent {
            timestamp: OffsetDateTime::now_utc(),
            game_id,
            payload,
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: &GameEvent) -> Result<(), AuditError>;
}

/// 不落盘
pub struct NoopAuditLog;

#[async_trait]
impl AuditLog for NoopAuditLog {
    async fn record(&self, _event: &GameEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// 以 JSON Lines 格式追加写入文件
pub struct JsonlAuditLog {
    file: Mutex<File>,
}

impl JsonlAuditLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(JsonlAuditLog { file: Mutex::new(file) })
    }
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn record(&self, event: &GameEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        // 整行在锁内写完，并发事件不会交错
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
