use anyhow::{Result, bail};
use clap::Args;
use tracing::{debug, info};

use the_game_core::bot::{RandomStrategy, Strategy, StrategyKind};
use the_game_core::{ClientMessage, GameId, GameState, PlayerId, ServerMessage};

use crate::connection::Connection;

#[derive(Debug, Args)]
pub struct BotArgs {
    /// 出牌策略: random, minimal-jump, safe-ten, smart, two-card-greedy, phased
    #[arg(long, default_value = "smart")]
    pub strategy: StrategyKind,

    /// 机器人的玩家ID
    #[arg(long, default_value = "bot-player")]
    pub player: PlayerId,

    /// 加入已有的游戏；不指定时新建一局
    #[arg(long)]
    pub game: Option<GameId>,

    /// random 策略的随机种子
    #[arg(long)]
    pub seed: Option<u64>,
}

impl BotArgs {
    fn build_strategy(&self) -> Box<dyn Strategy> {
        match self.strategy {
            StrategyKind::Random => Box::new(RandomStrategy::new(self.seed)),
            other => other.build(),
        }
    }
}

/// 收到一条服务器消息后机器人该做什么
#[derive(Debug, PartialEq)]
enum Step {
    Send(ClientMessage),
    Wait,
    Finished(String),
}

/// 根据推送的状态驱动策略
///
/// 推送和出牌回复的到达顺序不确定，所以只对版本号大于上次行动时的状态做决策，
/// 同一个状态不会被行动两次。
struct BotDriver {
    strategy: Box<dyn Strategy>,
    player_id: PlayerId,
    last_acted: Option<u64>,
}

impl BotDriver {
    fn new(strategy: Box<dyn Strategy>, player_id: PlayerId) -> Self {
        BotDriver {
            strategy,
            player_id,
            last_acted: None,
        }
    }

    fn on_message(&mut self, msg: ServerMessage) -> Result<Step> {
        match msg {
            ServerMessage::GameStateSnapshot(state) => Ok(self.on_state(&state)),
            // 被拒绝的动作重试也不会成功
            ServerMessage::CardPlayed { success: false, message }
            | ServerMessage::TurnEnded { success: false, message, .. } => bail!("move rejected: {}", message),
            ServerMessage::Error { message } => bail!("server error: {}", message),
            ServerMessage::StreamClosed { game_id } => bail!("stream for game {} closed", game_id),
            _ => Ok(Step::Wait),
        }
    }

    fn on_state(&mut self, state: &GameState) -> Step {
        if state.game_over {
            return Step::Finished(state.message.clone());
        }
        if self.last_acted.is_some_and(|version| state.version <= version) {
            return Step::Wait;
        }
        match self.strategy.next_move(&self.player_id, state) {
            Some(mv) => {
                debug!(version = state.version, ?mv, "机器人行动");
                self.last_acted = Some(state.version);
                Step::Send(mv.into_message(state, &self.player_id))
            }
            None => Step::Wait,
        }
    }
}

/// 创建或加入一局游戏，返回游戏ID
async fn take_seat(conn: &mut Connection, args: &BotArgs) -> Result<GameId> {
    let request = match args.game {
        Some(game_id) => ClientMessage::JoinGame {
            game_id,
            player_id: args.player.clone(),
        },
        None => ClientMessage::CreateGame {
            player_id: Some(args.player.clone()),
        },
    };
    conn.send(&request).await?;

    while let Some(msg) = conn.recv().await? {
        match msg {
            ServerMessage::GameCreated { game_state } => return Ok(game_state.game_id),
            ServerMessage::GameJoined { success: true, game_state: Some(game_state), .. } => {
                return Ok(game_state.game_id);
            }
            ServerMessage::GameJoined { message, .. } => bail!("failed to join game: {}", message),
            ServerMessage::Error { message } => bail!("server error: {}", message),
            _ => {}
        }
    }
    bail!("connection closed before the game was set up")
}

/// 入座后订阅状态推送，一直出牌直到游戏结束
pub async fn run(mut conn: Connection, args: BotArgs) -> Result<()> {
    let game_id = take_seat(&mut conn, &args).await?;
    info!(%game_id, player = %args.player, strategy = %args.strategy, "机器人入座");

    conn.send(&ClientMessage::StreamGameState { game_id }).await?;

    let mut driver = BotDriver::new(args.build_strategy(), args.player.clone());
    while let Some(msg) = conn.recv().await? {
        match driver.on_message(msg)? {
            Step::Send(request) => conn.send(&request).await?,
            Step::Wait => {}
            Step::Finished(message) => {
                info!(%game_id, "游戏结束: {}", message);
                println!("游戏结束: {}", message);
                return conn.close().await;
            }
        }
    }
    bail!("connection closed before the game ended")
}
