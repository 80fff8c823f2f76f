//! 会话服务
//!
//! 每个 RPC 请求都落到这里：读取状态、检查请求方是否有权行动、调用规则引擎、
//! 写回存储并广播更新信号。同一局游戏的变更在进程内按到达顺序串行执行。

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use the_game_core::logic;
use the_game_core::{GameError, GameId, GameState, PlayerId};

use crate::audit::{AuditLog, EventPayload, GameEvent};
use crate::notifier::{NotifyError, UpdateNotifier};
use crate::store::{GameStore, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("game {0} not found")]
    GameNotFound(GameId),

    #[error("it is not your turn (current player: {current})")]
    NotYourTurn { current: PlayerId },

    #[error("game is already over: {message}")]
    GameOver { message: String },

    #[error("player '{0}' has already joined this game")]
    AlreadyJoined(PlayerId),

    #[error("game has already started, no new players can join")]
    GameStarted,

    #[error(transparent)]
    Rule(#[from] GameError),

    #[error("game store failure: {0}")]
    Store(StoreError),

    #[error("update notifier failure: {0}")]
    Notify(#[from] NotifyError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(game_id) => ServiceError::GameNotFound(game_id),
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    /// 请求本身被拒绝 (规则、回合、加入策略)，而不是基础设施出错
    pub fn is_rejection(&self) -> bool {
        !matches!(self, ServiceError::Store(_) | ServiceError::Notify(_))
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub join_hand_size: usize,
}

impl ServiceConfig {
    pub const DEFAULT_JOIN_HAND_SIZE: usize = 7;
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            join_hand_size: Self::DEFAULT_JOIN_HAND_SIZE,
        }
    }
}

// --- 每局游戏一把锁 ---

#[derive(Default)]
pub struct GameLocks {
    locks: DashMap<GameId, Arc<Mutex<()>>>,
}

/// 持有期间独占一局游戏；释放时若无人等待则回收这把锁
pub struct GameGuard<'a> {
    locks: &'a GameLocks,
    game_id: GameId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl GameLocks {
    pub async fn lock(&self, game_id: GameId) -> GameGuard<'_> {
        let lock = self.locks.entry(game_id).or_default().clone();
        let guard = lock.lock_owned().await;
        GameGuard {
            locks: self,
            game_id,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for GameGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.game_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

// --- 推送目标 ---

/// 游戏状态推送的接收端
#[async_trait]
pub trait StateSink: Send {
    /// 对端已经离开时返回 false
    async fn send_state(&mut self, state: GameState) -> bool;
}

#[async_trait]
impl StateSink for mpsc::Sender<GameState> {
    async fn send_state(&mut self, state: GameState) -> bool {
        self.send(state).await.is_ok()
    }
}

// --- 服务 ---

pub struct GameService {
    store: Arc<dyn GameStore>,
    notifier: Arc<dyn UpdateNotifier>,
    audit: mpsc::UnboundedSender<GameEvent>,
    locks: GameLocks,
    config: ServiceConfig,
}

impl GameService {
    pub fn new(
        store: Arc<dyn GameStore>,
        notifier: Arc<dyn UpdateNotifier>,
        audit: Arc<dyn AuditLog>,
        config: ServiceConfig,
    ) -> Self {
        GameService {
            store,
            notifier,
            audit: spawn_audit_writer(audit),
            locks: GameLocks::default(),
            config,
        }
    }

    pub async fn create_game(&self, player_id: Option<PlayerId>) -> Result<GameState, ServiceError> {
        let game_id = Uuid::new_v4();
        let player_id = player_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut state = logic::create_game(game_id, &player_id);
        state.version = 1;
        self.store.put(game_id, &state).await?;

        info!(%game_id, %player_id, "创建新游戏");
        self.record(game_id, vec![EventPayload::GameStart { player_id }]);
        Ok(state)
    }

    pub async fn join_game(&self, game_id: GameId, player_id: &str) -> Result<GameState, ServiceError> {
        let hand_size = self.config.join_hand_size;
        let state = self
            .mutate(
                game_id,
                |state| {
                    if state.game_over {
                        return Err(ServiceError::GameOver { message: state.message.clone() });
                    }
                    if state.has_player(player_id) {
                        return Err(ServiceError::AlreadyJoined(player_id.to_string()));
                    }
                    if state.has_started() {
                        return Err(ServiceError::GameStarted);
                    }
                    Ok(logic::add_player(state, player_id, hand_size)?)
                },
                |_| vec![EventPayload::PlayerJoined { player_id: player_id.to_string() }],
            )
            .await?;

        info!(%game_id, player_id, players = state.player_ids.len(), "玩家加入游戏");
        Ok(state)
    }

    pub async fn play_card(
        &self,
        game_id: GameId,
        player_id: &str,
        card_value: u8,
        pile_id: &str,
    ) -> Result<GameState, ServiceError> {
        let state = self
            .mutate(
                game_id,
                |state| {
                    ensure_turn(state, player_id)?;
                    Ok(logic::play_card(state, player_id, card_value, pile_id)?)
                },
                |next| {
                    let played = EventPayload::PlayCard {
                        player_id: player_id.to_string(),
                        card_value,
                        pile_id: pile_id.to_string(),
                    };
                    with_game_over(next, played)
                },
            )
            .await?;

        debug!(%game_id, player_id, card_value, pile_id, "出牌");
        if state.game_over {
            info!(%game_id, message = %state.message, "游戏结束");
        }
        Ok(state)
    }

    pub async fn end_turn(&self, game_id: GameId, player_id: &str) -> Result<GameState, ServiceError> {
        let state = self
            .mutate(
                game_id,
                |state| {
                    ensure_turn(state, player_id)?;
                    Ok(logic::end_turn(state, player_id)?)
                },
                |next| with_game_over(next, EventPayload::EndTurn { player_id: player_id.to_string() }),
            )
            .await?;

        debug!(%game_id, player_id, next = %state.current_turn_player_id, "回合结束");
        if state.game_over {
            info!(%game_id, message = %state.message, "游戏结束");
        }
        Ok(state)
    }

    /// 持续推送一局游戏的最新状态
    ///
    /// 先订阅再读取，保证读取之后发生的任何变更都会触发一次推送。
    /// 首次读取失败直接返回错误；之后的读取失败只记日志并等待下一个信号。
    /// 取消或接收端关闭时正常返回。
    pub async fn stream_game_state<S: StateSink>(
        &self,
        game_id: GameId,
        mut sink: S,
        cancel: CancellationToken,
    ) -> Result<(), ServiceError> {
        let mut updates = self.notifier.subscribe(game_id).await?;

        let state = self.store.get(game_id).await?;
        let mut last_version = state.version;
        if !sink.send_state(state).await {
            return Ok(());
        }
        debug!(game_id = %updates.game_id(), "开始推送游戏状态");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%game_id, "状态推送已取消");
                    return Ok(());
                }
                signal = updates.recv() => {
                    if signal.is_none() {
                        return Err(NotifyError::Closed(game_id).into());
                    }
                    match self.store.get(game_id).await {
                        // 合并的信号可能让同一版本被读到两次
                        Ok(state) if state.version <= last_version => {}
                        Ok(state) => {
                            last_version = state.version;
                            if !sink.send_state(state).await {
                                return Ok(());
                            }
                        }
                        Err(e) => warn!(%game_id, error = %e, "读取最新状态失败，跳过本次推送"),
                    }
                }
            }
        }
    }

    // --- 内部辅助 ---

    /// 加锁 -> 读取 -> 变换 -> 版本加一 -> 写回 -> 广播
    ///
    /// 写回之前的任何失败都不会改动存储。
    async fn mutate<F, E>(&self, game_id: GameId, apply: F, events: E) -> Result<GameState, ServiceError>
    where
        F: FnOnce(&GameState) -> Result<GameState, ServiceError> + Send,
        E: FnOnce(&GameState) -> Vec<EventPayload> + Send,
    {
        let _guard = self.locks.lock(game_id).await;

        let current = self.store.get(game_id).await?;
        let mut next = apply(&current)?;
        next.version = current.version + 1;
        self.store.put(game_id, &next).await?;
        // 持锁入队，审计顺序与写入顺序一致
        self.record(game_id, events(&next));

        if let Err(e) = self.notifier.publish(game_id).await {
            warn!(%game_id, error = %e, "广播更新信号失败");
        }
        Ok(next)
    }

    /// 审计写入在后台完成，不阻塞请求
    fn record(&self, game_id: GameId, events: Vec<EventPayload>) {
        for payload in events {
            if self.audit.send(GameEvent::now(game_id, payload)).is_err() {
                warn!(%game_id, "审计写入任务已退出，事件被丢弃");
                return;
            }
        }
    }
}

/// 唯一的审计写入任务，按入队顺序逐条写入
///
/// 服务被释放、发送端全部关闭后任务退出。
fn spawn_audit_writer(audit: Arc<dyn AuditLog>) -> mpsc::UnboundedSender<GameEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<GameEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = audit.record(&event).await {
                warn!(game_id = %event.game_id, error = %e, "写入审计日志失败");
            }
        }
    });
    tx
}

fn with_game_over(state: &GameState, event: EventPayload) -> Vec<EventPayload> {
    let mut events = vec![event];
    if state.game_over {
        events.push(EventPayload::GameOver { message: state.message.clone() });
    }
    events
}

fn ensure_turn(state: &GameState, player_id: &str) -> Result<(), ServiceError> {
    if state.game_over {
        return Err(ServiceError::GameOver { message: state.message.clone() });
    }
    if !state.is_current_player(player_id) {
        return Err(ServiceError::NotYourTurn {
            current: state.current_turn_player_id.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use the_game_core::{Card, Hand, Pile, PileId};
    use tokio::time::timeout;

    use crate::audit::{AuditError, NoopAuditLog};
    use crate::notifier::{LocalNotifier, Subscription};
    use crate::store::MemoryStore;

    fn redis_down() -> redis::RedisError {
        redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"))
    }

    // --- 测试替身 ---

    struct FailingNotifier;

    #[async_trait]
    impl UpdateNotifier for FailingNotifier {
        async fn subscribe(&self, _game_id: GameId) -> Result<Subscription, NotifyError> {
            Err(NotifyError::Unavailable(redis_down()))
        }

        async fn publish(&self, _game_id: GameId) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable(redis_down()))
        }
    }

    /// 读取正常，写入总是失败
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl GameStore for ReadOnlyStore {
        async fn get(&self, game_id: GameId) -> Result<GameState, StoreError> {
            self.0.get(game_id).await
        }

        async fn put(&self, _game_id: GameId, _state: &GameState) -> Result<(), StoreError> {
            Err(StoreError::Unavailable(redis_down()))
        }
    }

    /// 第 `fail_on` 次读取失败
    struct FlakyStore {
        inner: Arc<MemoryStore>,
        gets: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl GameStore for FlakyStore {
        async fn get(&self, game_id: GameId) -> Result<GameState, StoreError> {
            if self.gets.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(StoreError::Unavailable(redis_down()));
            }
            self.inner.get(game_id).await
        }

        async fn put(&self, game_id: GameId, state: &GameState) -> Result<(), StoreError> {
            self.inner.put(game_id, state).await
        }
    }

    /// 第一次读取返回旧状态，同时在返回前写入新状态并广播
    struct RacingStore {
        inner: MemoryStore,
        notifier: Arc<LocalNotifier>,
        raced: AtomicBool,
    }

    #[async_trait]
    impl GameStore for RacingStore {
        async fn get(&self, game_id: GameId) -> Result<GameState, StoreError> {
            let current = self.inner.get(game_id).await?;
            if !self.raced.swap(true, Ordering::SeqCst) {
                let mut newer = current.clone();
                newer.version += 1;
                newer.message = "written during the first read".to_string();
                self.inner.put(game_id, &newer).await?;
                let _ = self.notifier.publish(game_id).await;
            }
            Ok(current)
        }

        async fn put(&self, game_id: GameId, state: &GameState) -> Result<(), StoreError> {
            self.inner.put(game_id, state).await
        }
    }

    #[derive(Default)]
    struct RecordingAudit {
        events: Mutex<Vec<GameEvent>>,
    }

    #[async_trait]
    impl AuditLog for RecordingAudit {
        async fn record(&self, event: &GameEvent) -> Result<(), AuditError> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    /// 出牌事件写得慢，其他事件立即写入
    #[derive(Default)]
    struct SlowPlayAudit {
        inner: RecordingAudit,
    }

    #[async_trait]
    impl AuditLog for SlowPlayAudit {
        async fn record(&self, event: &GameEvent) -> Result<(), AuditError> {
            if matches!(event.payload, EventPayload::PlayCard { .. }) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.inner.record(event).await
        }
    }

    async fn wait_for_events(audit: &RecordingAudit, count: usize) -> Vec<EventPayload> {
        let mut events = Vec::new();
        for _ in 0..200 {
            events = audit.events.lock().await.clone();
            if events.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        events.into_iter().map(|e| e.payload).collect()
    }

    // --- 构造 ---

    fn service_with(store: Arc<dyn GameStore>, notifier: Arc<dyn UpdateNotifier>) -> GameService {
        GameService::new(store, notifier, Arc::new(NoopAuditLog), ServiceConfig::default())
    }

    fn memory_service() -> (GameService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), Arc::new(LocalNotifier::new()));
        (service, store)
    }

    fn pile(ascending: bool, top: u8) -> Pile {
        let mut pile = Pile::new(ascending);
        if top != pile.top_value() {
            pile.cards.push(Card::new(top));
        }
        pile
    }

    /// 写入一局指定手牌和堆顶的游戏，第一位玩家先行动
    async fn seed_game(store: &dyn GameStore, hands: &[(&str, &[u8])], tops: [u8; 4]) -> GameState {
        let game_id = Uuid::new_v4();
        let mut state = logic::create_game(game_id, hands[0].0);
        state.player_ids = hands.iter().map(|(id, _)| id.to_string()).collect();
        state.hands = hands
            .iter()
            .map(|(id, cards)| {
                let cards = cards.iter().map(|&v| Card::new(v)).collect();
                (id.to_string(), Hand { cards })
            })
            .collect();
        state.piles = [
            (PileId::Up1, pile(true, tops[0])),
            (PileId::Up2, pile(true, tops[1])),
            (PileId::Down1, pile(false, tops[2])),
            (PileId::Down2, pile(false, tops[3])),
        ]
        .into_iter()
        .collect();
        state.version = 1;
        store.put(game_id, &state).await.unwrap();
        state
    }

    async fn recv_state(rx: &mut mpsc::Receiver<GameState>) -> GameState {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a state")
            .expect("stream closed")
    }

    // --- 创建与加入 ---

    #[tokio::test]
    async fn test_create_game_persists_initial_state() {
        let (service, store) = memory_service();
        let state = service.create_game(Some("alice".to_string())).await.unwrap();

        assert_eq!(state.player_ids, vec!["alice".to_string()]);
        assert_eq!(state.current_turn_player_id, "alice");
        assert_eq!(state.hand("alice").unwrap().len(), logic::STARTING_HAND_SIZE);
        assert_eq!(state.version, 1);
        assert_eq!(store.get(state.game_id).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_create_game_generates_player_id() {
        let (service, _) = memory_service();
        for player_id in [None, Some(String::new()), Some("  ".to_string())] {
            let state = service.create_game(player_id).await.unwrap();
            assert!(Uuid::parse_str(&state.current_turn_player_id).is_ok());
        }
    }

    #[tokio::test]
    async fn test_join_game_deals_configured_hand() {
        let (service, store) = memory_service();
        let created = service.create_game(Some("alice".to_string())).await.unwrap();

        let joined = service.join_game(created.game_id, "bob").await.unwrap();
        assert_eq!(joined.player_ids, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(joined.hand("bob").unwrap().len(), ServiceConfig::DEFAULT_JOIN_HAND_SIZE);
        assert_eq!(joined.deck_size, created.deck_size - ServiceConfig::DEFAULT_JOIN_HAND_SIZE);
        assert_eq!(joined.current_turn_player_id, "alice");
        assert_eq!(joined.version, 2);
        assert_eq!(store.get(created.game_id).await.unwrap(), joined);
    }

    #[tokio::test]
    async fn test_join_game_rejects_duplicate_player() {
        let (service, _) = memory_service();
        let created = service.create_game(Some("alice".to_string())).await.unwrap();

        let err = service.join_game(created.game_id, "alice").await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyJoined(ref id) if id == "alice"));
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_join_game_rejects_late_join() {
        let (service, store) = memory_service();
        let state = seed_game(store.as_ref(), &[("alice", &[30, 40])], [1, 1, 100, 100]).await;
        service.play_card(state.game_id, "alice", 30, "up1").await.unwrap();

        let err = service.join_game(state.game_id, "bob").await.unwrap_err();
        assert!(matches!(err, ServiceError::GameStarted));
    }

    #[tokio::test]
    async fn test_unknown_game_is_reported() {
        let (service, _) = memory_service();
        let game_id = Uuid::new_v4();

        let err = service.join_game(game_id, "bob").await.unwrap_err();
        assert!(matches!(err, ServiceError::GameNotFound(id) if id == game_id));
        assert!(matches!(
            service.end_turn(game_id, "bob").await,
            Err(ServiceError::GameNotFound(_))
        ));
    }

    // --- 出牌与回合 ---

    #[tokio::test]
    async fn test_play_card_bumps_version_and_persists() {
        let (service, store) = memory_service();
        let state = seed_game(store.as_ref(), &[("alice", &[30, 40, 50])], [1, 1, 100, 100]).await;

        let played = service.play_card(state.game_id, "alice", 30, "up1").await.unwrap();
        assert_eq!(played.version, 2);
        assert_eq!(played.cards_played_this_turn, 1);
        assert_eq!(played.pile(PileId::Up1).unwrap().top_value(), 30);
        assert_eq!(store.get(state.game_id).await.unwrap(), played);
    }

    #[tokio::test]
    async fn test_play_card_rejects_wrong_player() {
        let (service, store) = memory_service();
        let state = seed_game(store.as_ref(), &[("alice", &[30]), ("bob", &[40])], [1, 1, 100, 100]).await;

        let err = service.play_card(state.game_id, "bob", 40, "up1").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotYourTurn { ref current } if current == "alice"));
        assert!(err.is_rejection());
        assert_eq!(store.get(state.game_id).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_rule_violation_leaves_store_untouched() {
        let (service, store) = memory_service();
        let state = seed_game(store.as_ref(), &[("alice", &[30, 40])], [50, 1, 100, 100]).await;

        let err = service.play_card(state.game_id, "alice", 30, "up1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Rule(GameError::IllegalMove { card: 30, top: 50, .. })));
        assert!(err.is_rejection());
        assert_eq!(store.get(state.game_id).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_moves_rejected_after_game_over() {
        let (service, store) = memory_service();
        let mut state = seed_game(store.as_ref(), &[("alice", &[30, 40])], [1, 1, 100, 100]).await;
        state.game_over = true;
        state.message = "Player alice lost: No more valid moves.".to_string();
        store.put(state.game_id, &state).await.unwrap();

        let err = service.play_card(state.game_id, "alice", 30, "up1").await.unwrap_err();
        assert!(matches!(err, ServiceError::GameOver { .. }));
        assert!(matches!(
            service.end_turn(state.game_id, "alice").await,
            Err(ServiceError::GameOver { .. })
        ));
        assert!(matches!(
            service.join_game(state.game_id, "bob").await,
            Err(ServiceError::GameOver { .. })
        ));
    }

    #[tokio::test]
    async fn test_end_turn_rotates_and_refills() {
        let (service, store) = memory_service();
        let state = seed_game(store.as_ref(), &[("alice", &[30, 40, 90]), ("bob", &[50])], [1, 1, 100, 100]).await;
        let game_id = state.game_id;

        let err = service.end_turn(game_id, "alice").await.unwrap_err();
        assert!(matches!(err, ServiceError::Rule(GameError::InsufficientPlaysThisTurn { .. })));

        service.play_card(game_id, "alice", 30, "up1").await.unwrap();
        service.play_card(game_id, "alice", 40, "up1").await.unwrap();
        let ended = service.end_turn(game_id, "alice").await.unwrap();

        assert_eq!(ended.current_turn_player_id, "bob");
        assert_eq!(ended.cards_played_this_turn, 0);
        assert_eq!(ended.hand("alice").unwrap().len(), 3);
        assert_eq!(ended.deck_size, state.deck_size - 2);
        assert_eq!(ended.version, 4);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_play() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), Arc::new(FailingNotifier));
        let state = seed_game(store.as_ref(), &[("alice", &[30, 40])], [1, 1, 100, 100]).await;

        let played = service.play_card(state.game_id, "alice", 30, "up1").await.unwrap();
        assert_eq!(store.get(state.game_id).await.unwrap(), played);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_rejection() {
        let inner = MemoryStore::new();
        let state = seed_game(&inner, &[("alice", &[30, 40])], [1, 1, 100, 100]).await;
        let service = service_with(Arc::new(ReadOnlyStore(inner)), Arc::new(LocalNotifier::new()));

        let err = service.play_card(state.game_id, "alice", 30, "up1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Unavailable(_))));
        assert!(!err.is_rejection());
    }

    #[tokio::test]
    async fn test_losing_play_is_audited() {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(RecordingAudit::default());
        let service = GameService::new(
            store.clone(),
            Arc::new(LocalNotifier::new()),
            audit.clone(),
            ServiceConfig::default(),
        );
        // 99 出在 up1 之后，50 已经无处可出
        let state = seed_game(store.as_ref(), &[("alice", &[99, 50])], [98, 98, 3, 3]).await;

        let played = service.play_card(state.game_id, "alice", 99, "up1").await.unwrap();
        assert!(played.game_over);

        assert_eq!(
            wait_for_events(&audit, 2).await,
            vec![
                EventPayload::PlayCard { player_id: "alice".into(), card_value: 99, pile_id: "up1".into() },
                EventPayload::GameOver { message: "Player alice lost: No more valid moves.".into() },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_audit_keeps_move_order() {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(SlowPlayAudit::default());
        let service = GameService::new(
            store.clone(),
            Arc::new(LocalNotifier::new()),
            audit.clone(),
            ServiceConfig::default(),
        );
        let state = seed_game(store.as_ref(), &[("alice", &[30, 40])], [1, 1, 100, 100]).await;

        service.play_card(state.game_id, "alice", 30, "up1").await.unwrap();
        service.play_card(state.game_id, "alice", 40, "up1").await.unwrap();
        let ended = service.end_turn(state.game_id, "alice").await.unwrap();
        assert!(!ended.game_over);

        assert_eq!(
            wait_for_events(&audit.inner, 3).await,
            vec![
                EventPayload::PlayCard { player_id: "alice".into(), card_value: 30, pile_id: "up1".into() },
                EventPayload::PlayCard { player_id: "alice".into(), card_value: 40, pile_id: "up1".into() },
                EventPayload::EndTurn { player_id: "alice".into() },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_are_serialized() {
        let (service, _) = memory_service();
        let service = Arc::new(service);
        let game_id = service.create_game(Some("host".to_string())).await.unwrap().game_id;

        let joins: Vec<_> = (0..10)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move { service.join_game(game_id, &format!("p{}", i)).await })
            })
            .collect();
        for join in joins {
            join.await.unwrap().unwrap();
        }

        let final_state = service.store.get(game_id).await.unwrap();
        assert_eq!(final_state.player_ids.len(), 11);
        assert_eq!(final_state.version, 11);
        assert_eq!(service.locks.len(), 0);
    }

    // --- 状态推送 ---

    #[tokio::test]
    async fn test_stream_sends_initial_state_and_updates() {
        let (service, store) = memory_service();
        let service = Arc::new(service);
        let state = seed_game(store.as_ref(), &[("alice", &[30, 40])], [1, 1, 100, 100]).await;
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let stream = tokio::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move { service.stream_game_state(state.game_id, tx, cancel).await }
        });

        assert_eq!(recv_state(&mut rx).await, state);
        service.play_card(state.game_id, "alice", 30, "up1").await.unwrap();
        let update = recv_state(&mut rx).await;
        assert_eq!(update.version, 2);
        assert_eq!(update.cards_played_this_turn, 1);

        cancel.cancel();
        assert!(stream.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stream_unknown_game_fails() {
        let (service, _) = memory_service();
        let (tx, _rx) = mpsc::channel(1);
        let result = service
            .stream_game_state(Uuid::new_v4(), tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ServiceError::GameNotFound(_))));
    }

    #[tokio::test]
    async fn test_stream_subscription_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), Arc::new(FailingNotifier));
        let state = seed_game(store.as_ref(), &[("alice", &[30])], [1, 1, 100, 100]).await;
        let (tx, _rx) = mpsc::channel(1);

        let result = service.stream_game_state(state.game_id, tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServiceError::Notify(_))));
    }

    #[tokio::test]
    async fn test_stream_ends_when_receiver_leaves() {
        let (service, store) = memory_service();
        let state = seed_game(store.as_ref(), &[("alice", &[30])], [1, 1, 100, 100]).await;
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = service.stream_game_state(state.game_id, tx, CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stream_catches_write_during_first_read() {
        let notifier = Arc::new(LocalNotifier::new());
        let inner = MemoryStore::new();
        let state = seed_game(&inner, &[("alice", &[30])], [1, 1, 100, 100]).await;
        let store = Arc::new(RacingStore {
            inner,
            notifier: notifier.clone(),
            raced: AtomicBool::new(false),
        });
        let service = Arc::new(service_with(store, notifier));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let stream = tokio::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move { service.stream_game_state(state.game_id, tx, cancel).await }
        });

        assert_eq!(recv_state(&mut rx).await.version, 1);
        let newer = recv_state(&mut rx).await;
        assert_eq!(newer.version, 2);
        assert_eq!(newer.message, "written during the first read");

        cancel.cancel();
        assert!(stream.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stream_skips_failed_refetch() {
        let inner = Arc::new(MemoryStore::new());
        let state = seed_game(inner.as_ref(), &[("alice", &[30, 40, 50])], [1, 1, 100, 100]).await;
        // 第一次读取是初始快照，第二次读取 (第一个信号之后) 失败
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            gets: AtomicUsize::new(0),
            fail_on: 2,
        });
        let notifier = Arc::new(LocalNotifier::new());
        let stream_service = Arc::new(service_with(store, notifier.clone()));
        let writer = service_with(inner, notifier);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let stream = tokio::spawn({
            let service = stream_service.clone();
            let cancel = cancel.clone();
            async move { service.stream_game_state(state.game_id, tx, cancel).await }
        });

        assert_eq!(recv_state(&mut rx).await.version, 1);
        writer.play_card(state.game_id, "alice", 30, "up1").await.unwrap();
        // 稍等，让第一个信号被消费掉再发第二个
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.play_card(state.game_id, "alice", 40, "up1").await.unwrap();

        let update = recv_state(&mut rx).await;
        assert_eq!(update.version, 3);
        assert_eq!(update.cards_played_this_turn, 2);

        cancel.cancel();
        assert!(stream.await.unwrap().is_ok());
    }
}
