use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use the_game_core::{ClientMessage, GameId, GameState, ServerMessage};

use crate::service::{GameService, ServiceError, StateSink};

// 服务器全局状态
pub struct AppState {
    pub service: GameService,
    // 服务器关闭时取消，所有连接和推送都挂在它下面
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// 处理 WebSocket 连接请求
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// 把推送的状态包装成快照消息，隐藏牌堆顺序
struct SnapshotSink {
    tx: mpsc::Sender<ServerMessage>,
}

#[async_trait]
impl StateSink for SnapshotSink {
    async fn send_state(&mut self, state: GameState) -> bool {
        self.tx
            .send(ServerMessage::GameStateSnapshot(state.for_client()))
            .await
            .is_ok()
    }
}

/// 一条连接的上下文
struct Connection {
    tx: mpsc::Sender<ServerMessage>,
    // 连接关闭时取消，是服务器关闭令牌的子令牌
    cancel: CancellationToken,
    // 正在进行的推送，按游戏ID索引
    streams: HashMap<GameId, CancellationToken>,
}

impl Connection {
    /// 清掉已经结束的推送，结束的推送任务会取消自己的令牌
    fn prune_finished_streams(&mut self) {
        self.streams.retain(|_, token| !token.is_cancelled());
    }
}

/// 处理单个 WebSocket 连接的生命周期
async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();

    // 创建一个 MPSC 通道，请求处理和推送任务都通过它向客户端写消息
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);

    // 启动一个新任务，专门负责将 MPSC 通道中的消息发送到 WebSocket
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let payload = match serde_json::to_string(&msg) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("序列化消息失败: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                // 发送失败，说明客户端已断开，退出任务
                break;
            }
        }
    });

    let mut conn = Connection {
        tx,
        cancel: state.shutdown.child_token(),
        streams: HashMap::new(),
    };

    // 主循环，处理从客户端接收到的消息
    loop {
        let msg = tokio::select! {
            _ = conn.cancel.cancelled() => break,
            msg = receiver.next() => msg,
        };
        let Some(Ok(msg)) = msg else { break };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_client_message(client_msg, &state, &mut conn).await,
                Err(e) => {
                    warn!("解析消息失败: {}", e);
                    let _ = conn.tx.send(ServerMessage::error(format!("invalid request: {}", e))).await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // 客户端断开连接，取消这条连接上的所有推送
    conn.cancel.cancel();
    info!("客户端连接关闭");
}

/// 基础设施错误返回 `Error`，其它错误由调用方包装成 `success: false`
fn rejection_message(e: ServiceError) -> Result<String, ServerMessage> {
    if e.is_rejection() {
        debug!("请求被拒绝: {}", e);
        Ok(e.to_string())
    } else {
        error!("处理请求失败: {}", e);
        Err(ServerMessage::error(e.to_string()))
    }
}

/// 核心消息处理逻辑
async fn handle_client_message(msg: ClientMessage, state: &SharedState, conn: &mut Connection) {
    let reply = match msg {
        ClientMessage::CreateGame { player_id } => match state.service.create_game(player_id).await {
            Ok(game_state) => ServerMessage::GameCreated {
                game_state: game_state.for_client(),
            },
            Err(e) => {
                error!("创建游戏失败: {}", e);
                ServerMessage::error(e.to_string())
            }
        },
        ClientMessage::JoinGame { game_id, player_id } => {
            match state.service.join_game(game_id, &player_id).await {
                Ok(game_state) => ServerMessage::GameJoined {
                    success: true,
                    message: game_state.message.clone(),
                    game_state: Some(game_state.for_client()),
                },
                Err(e) => rejection_message(e).map_or_else(
                    |err| err,
                    |message| ServerMessage::GameJoined {
                        success: false,
                        message,
                        game_state: None,
                    },
                ),
            }
        }
        ClientMessage::PlayCard {
            game_id,
            player_id,
            card_value,
            pile_id,
        } => match state
            .service
            .play_card(game_id, &player_id, card_value, &pile_id)
            .await
        {
            Ok(game_state) => ServerMessage::CardPlayed {
                success: true,
                message: game_state.message,
            },
            Err(e) => rejection_message(e).map_or_else(
                |err| err,
                |message| ServerMessage::CardPlayed { success: false, message },
            ),
        },
        ClientMessage::EndTurn { game_id, player_id } => {
            match state.service.end_turn(game_id, &player_id).await {
                Ok(game_state) => ServerMessage::TurnEnded {
                    success: true,
                    message: game_state.message.clone(),
                    game_state: Some(game_state.for_client()),
                },
                Err(e) => rejection_message(e).map_or_else(
                    |err| err,
                    |message| ServerMessage::TurnEnded {
                        success: false,
                        message,
                        game_state: None,
                    },
                ),
            }
        }
        ClientMessage::StreamGameState { game_id } => {
            conn.prune_finished_streams();
            if conn.streams.contains_key(&game_id) {
                ServerMessage::error(format!("already streaming game {}", game_id))
            } else {
                let token = conn.cancel.child_token();
                conn.streams.insert(game_id, token.clone());
                tokio::spawn(run_stream(state.clone(), game_id, conn.tx.clone(), token));
                return;
            }
        }
        ClientMessage::StopStream { game_id } => {
            conn.prune_finished_streams();
            match conn.streams.remove(&game_id) {
                Some(token) => {
                    token.cancel();
                    return;
                }
                None => ServerMessage::error(format!("no active stream for game {}", game_id)),
            }
        }
    };
    let _ = conn.tx.send(reply).await;
}

/// 推送任务：结束时总会发一条 `StreamClosed`
async fn run_stream(
    state: SharedState,
    game_id: GameId,
    tx: mpsc::Sender<ServerMessage>,
    token: CancellationToken,
) {
    info!(%game_id, "开始状态推送");
    let sink = SnapshotSink { tx: tx.clone() };
    if let Err(e) = state.service.stream_game_state(game_id, sink, token.clone()).await {
        warn!(%game_id, "状态推送失败: {}", e);
        let _ = tx.send(ServerMessage::error(e.to_string())).await;
    }
    // 标记为已结束，之后可以重新订阅同一局游戏
    token.cancel();
    let _ = tx.send(ServerMessage::StreamClosed { game_id }).await;
    info!(%game_id, "状态推送结束");
}
