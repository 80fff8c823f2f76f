//! 游戏更新通知
//!
//! 通知本身不带状态，只表示 "这局游戏变了，请重新读取"。
//! 订阅者收到信号后自己去存储里取最新状态，所以合并或丢弃重复信号都是安全的。

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use the_game_core::GameId;

const SIGNAL_BUFFER: usize = 16;
const PUBLISH_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("update subscription for game {0} closed")]
    Closed(GameId),
}

#[async_trait]
pub trait UpdateNotifier: Send + Sync {
    /// 订阅某局游戏的更新信号。返回时订阅已经生效。
    async fn subscribe(&self, game_id: GameId) -> Result<Subscription, NotifyError>;

    async fn publish(&self, game_id: GameId) -> Result<(), NotifyError>;
}

pub(crate) fn channel_name(game_id: GameId) -> String {
    format!("game-updates:{}", game_id)
}

// --- 订阅句柄 ---

enum SignalSource {
    Broadcast(broadcast::Receiver<()>),
    Channel(mpsc::Receiver<()>),
}

struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.0.take() {
            unsubscribe();
        }
    }
}

/// 一次订阅，析构时自动退订
pub struct Subscription {
    game_id: GameId,
    source: SignalSource,
    // 字段按声明顺序析构：接收端先释放，再执行退订
    _unsubscribe: Unsubscribe,
}

impl Subscription {
    fn new(game_id: GameId, source: SignalSource, unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            game_id,
            source,
            _unsubscribe: Unsubscribe(Some(Box::new(unsubscribe))),
        }
    }

    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    /// 等待下一个更新信号；底层通道关闭时返回 `None`
    pub async fn recv(&mut self) -> Option<()> {
        match &mut self.source {
            SignalSource::Broadcast(rx) => match rx.recv().await {
                Ok(()) => Some(()),
                // 落后的订阅者只需要知道 "有变化"，丢掉的信号合并成一个
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(game_id = %self.game_id, skipped, "合并积压的更新信号");
                    Some(())
                }
                Err(broadcast::error::RecvError::Closed) => None,
            },
            SignalSource::Channel(rx) => rx.recv().await,
        }
    }
}

// --- 进程内通知 ---

/// 单进程部署使用的通知器，每局游戏一个广播通道
#[derive(Default)]
pub struct LocalNotifier {
    channels: Arc<DashMap<GameId, broadcast::Sender<()>>>,
}

impl LocalNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl UpdateNotifier for LocalNotifier {
    async fn subscribe(&self, game_id: GameId) -> Result<Subscription, NotifyError> {
        let rx = self
            .channels
            .entry(game_id)
            .or_insert_with(|| broadcast::channel(SIGNAL_BUFFER).0)
            .subscribe();

        let channels = self.channels.clone();
        Ok(Subscription::new(game_id, SignalSource::Broadcast(rx), move || {
            // 最后一个订阅者离开时回收通道
            channels.remove_if(&game_id, |_, tx| tx.receiver_count() == 0);
        }))
    }

    async fn publish(&self, game_id: GameId) -> Result<(), NotifyError> {
        if let Some(tx) = self.channels.get(&game_id) {
            // 没有接收者时 send 返回错误，这不是失败
            let _ = tx.send(());
        }
        Ok(())
    }
}

// --- Redis 通知 ---

/// 多实例部署使用的通知器，基于 Redis pub/sub
pub struct RedisNotifier {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisNotifier {
    pub async fn connect(redis_url: &str) -> Result<Self, NotifyError> {
        let client = redis::Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        Ok(RedisNotifier { client, publisher })
    }
}

#[async_trait]
impl UpdateNotifier for RedisNotifier {
    async fn subscribe(&self, game_id: GameId) -> Result<Subscription, NotifyError> {
        // 订阅需要独占一条连接
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel_name(game_id)).await?;

        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let forwarder = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while messages.next().await.is_some() {
                match tx.try_send(()) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                    Err(mpsc::error::TrySendError::Closed(())) => break,
                }
            }
            debug!(%game_id, "Redis 订阅转发结束");
        });

        Ok(Subscription::new(game_id, SignalSource::Channel(rx), move || forwarder.abort()))
    }

    async fn publish(&self, game_id: GameId) -> Result<(), NotifyError> {
        let channel = channel_name(game_id);
        let mut last_err = None;
        for attempt in 1..=PUBLISH_RETRIES {
            let mut conn = self.publisher.clone();
            match conn.publish::<_, _, ()>(&channel, "update").await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(%game_id, attempt, error = %e, "发布更新信号失败");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(NotifyError::Unavailable(e)),
            None => Ok(()),
        }
    }
}
