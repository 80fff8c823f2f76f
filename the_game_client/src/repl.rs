use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use the_game_core::{ClientMessage, GameId, GamePhase, GameState, PileId, PlayerId, ServerMessage};

use crate::connection::Connection;

/// 用户输入的一条命令
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Create { player_id: Option<PlayerId> },
    Join { game_id: GameId, player_id: PlayerId },
    Play { card_value: u8, pile_id: PileId },
    End,
    Watch { game_id: Option<GameId> },
    Unwatch,
    Help,
    Exit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["create"] => Ok(Command::Create { player_id: None }),
        ["create", player] => Ok(Command::Create { player_id: Some(player.to_string()) }),
        ["join", game, player] => {
            let game_id = game.parse().map_err(|_| format!("无效的游戏ID: {}", game))?;
            Ok(Command::Join { game_id, player_id: player.to_string() })
        }
        ["join", ..] => Err("用法: join <游戏ID> <玩家ID>".to_string()),
        ["play", card, pile] => {
            let card_value = card.parse().map_err(|_| format!("无效的牌: {}", card))?;
            let pile_id = pile.parse().map_err(|_| format!("无效的牌堆: {} (up1/up2/down1/down2)", pile))?;
            Ok(Command::Play { card_value, pile_id })
        }
        ["play", ..] => Err("用法: play <牌> <牌堆>".to_string()),
        ["end"] => Ok(Command::End),
        ["watch"] => Ok(Command::Watch { game_id: None }),
        ["watch", game] => {
            let game_id = game.parse().map_err(|_| format!("无效的游戏ID: {}", game))?;
            Ok(Command::Watch { game_id: Some(game_id) })
        }
        ["unwatch"] => Ok(Command::Unwatch),
        ["help"] => Ok(Command::Help),
        ["exit"] | ["quit"] => Ok(Command::Exit),
        [] => Err(String::new()),
        _ => Err(format!("未知命令: {}", line.trim())),
    }
}

fn print_help() {
    println!("可用命令:");
    println!("  create [玩家ID]           - 创建一局新游戏");
    println!("  join <游戏ID> <玩家ID>    - 加入一局游戏");
    println!("  play <牌> <牌堆>          - 出牌，牌堆为 up1/up2/down1/down2");
    println!("  end                       - 结束回合");
    println!("  watch [游戏ID]            - 订阅游戏状态推送 (默认当前游戏)");
    println!("  unwatch                   - 取消订阅");
    println!("  help                      - 显示帮助");
    println!("  exit                      - 退出");
}

/// 当前会话：在哪一局游戏里、以谁的身份
#[derive(Debug, Default)]
struct Session {
    game_id: Option<GameId>,
    player_id: Option<PlayerId>,
    // 已发出但还没确认的加入请求
    pending_join: Option<(GameId, PlayerId)>,
    watching: Option<GameId>,
}

impl Session {
    fn seat(&self) -> Option<(GameId, PlayerId)> {
        Some((self.game_id?, self.player_id.clone()?))
    }

    /// 把命令翻译成要发出的请求，可能为空
    fn request(&mut self, command: Command) -> Result<Vec<ClientMessage>, String> {
        let msg = match command {
            Command::Create { player_id } => ClientMessage::CreateGame { player_id },
            Command::Join { game_id, player_id } => {
                self.pending_join = Some((game_id, player_id.clone()));
                ClientMessage::JoinGame { game_id, player_id }
            }
            Command::Play { card_value, pile_id } => {
                let (game_id, player_id) = self.seat().ok_or("请先创建或加入一局游戏")?;
                ClientMessage::PlayCard { game_id, player_id, card_value, pile_id: pile_id.to_string() }
            }
            Command::End => {
                let (game_id, player_id) = self.seat().ok_or("请先创建或加入一局游戏")?;
                ClientMessage::EndTurn { game_id, player_id }
            }
            Command::Watch { game_id } => {
                let game_id = game_id.or(self.game_id).ok_or("没有指定要订阅的游戏")?;
                if self.watching == Some(game_id) {
                    return Ok(Vec::new());
                }
                // 一次只看一局
                let mut msgs = Vec::new();
                if let Some(previous) = self.watching.replace(game_id) {
                    msgs.push(ClientMessage::StopStream { game_id: previous });
                }
                msgs.push(ClientMessage::StreamGameState { game_id });
                return Ok(msgs);
            }
            Command::Unwatch => {
                let game_id = self.watching.take().ok_or("当前没有订阅")?;
                ClientMessage::StopStream { game_id }
            }
            Command::Help | Command::Exit => return Ok(Vec::new()),
        };
        Ok(vec![msg])
    }

    fn on_message(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::GameCreated { game_state } => {
                self.game_id = Some(game_state.game_id);
                // 创建者就是第一个行动的玩家
                self.player_id = Some(game_state.current_turn_player_id.clone());
            }
            ServerMessage::GameJoined { success, .. } => {
                if let Some((game_id, player_id)) = self.pending_join.take() {
                    if *success {
                        self.game_id = Some(game_id);
                        self.player_id = Some(player_id);
                    }
                }
            }
            ServerMessage::StreamClosed { game_id } => {
                if self.watching == Some(*game_id) {
                    self.watching = None;
                }
            }
            _ => {}
        }
    }
}

/// 把游戏状态渲染成几行文字；`me` 的手牌会被列出
fn render_state(state: &GameState, me: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "游戏 {} (版本 {})", state.game_id, state.version);

    let players: Vec<String> = state
        .player_ids
        .iter()
        .map(|id| {
            let cards = state.hand(id).map_or(0, |h| h.len());
            let marker = if state.is_current_player(id) { "*" } else { "" };
            format!("{}{} ({}张)", marker, id, cards)
        })
        .collect();
    let _ = writeln!(out, "玩家: {}", players.join(", "));
    let _ = writeln!(
        out,
        "牌堆剩余: {} | 本回合已出: {}/{}",
        state.deck_size,
        state.cards_played_this_turn,
        state.min_plays_this_turn()
    );

    let piles: Vec<String> = PileId::ALL
        .iter()
        .filter_map(|&id| {
            let pile = state.pile(id)?;
            let arrow = if pile.ascending { "↑" } else { "↓" };
            Some(format!("{} {} {}", id, arrow, pile.top_value()))
        })
        .collect();
    let _ = writeln!(out, "{}", piles.join(" | "));

    if let Some(hand) = me.and_then(|id| state.hand(id)) {
        let cards: Vec<String> = hand.sorted_values().iter().map(u8::to_string).collect();
        let _ = writeln!(out, "你的手牌: {}", cards.join(" "));
    }

    match state.phase() {
        GamePhase::InProgress => {}
        GamePhase::Won => {
            let _ = writeln!(out, "胜利! {}", state.message);
        }
        GamePhase::Lost => {
            let _ = writeln!(out, "失败: {}", state.message);
        }
    }
    out
}

fn print_message(msg: &ServerMessage, session: &Session) {
    let me = session.player_id.as_deref();
    match msg {
        ServerMessage::GameCreated { game_state } => {
            println!("\n<-- 游戏已创建，你是 {}", game_state.current_turn_player_id);
            print!("{}", render_state(game_state, me));
        }
        ServerMessage::GameJoined { success: true, game_state, .. } => {
            println!("\n<-- 加入成功");
            if let Some(game_state) = game_state {
                print!("{}", render_state(game_state, me));
            }
        }
        ServerMessage::TurnEnded { success: true, game_state, .. } => {
            println!("\n<-- 回合结束");
            if let Some(game_state) = game_state {
                print!("{}", render_state(game_state, me));
            }
        }
        ServerMessage::CardPlayed { success: true, message } => {
            if message.is_empty() {
                println!("\n<-- 出牌成功");
            } else {
                println!("\n<-- 出牌成功: {}", message);
            }
        }
        ServerMessage::GameJoined { success: false, message, .. }
        | ServerMessage::CardPlayed { success: false, message }
        | ServerMessage::TurnEnded { success: false, message, .. } => {
            println!("\n<-- 请求被拒绝: {}", message);
        }
        ServerMessage::GameStateSnapshot(game_state) => {
            println!("\n<-- [推送]");
            print!("{}", render_state(game_state, me));
        }
        ServerMessage::StreamClosed { game_id } => println!("\n<-- 游戏 {} 的推送已结束", game_id),
        ServerMessage::Error { message } => println!("\n<-- [错误] {}", message),
    }
}

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}

pub async fn run(mut conn: Connection) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut session = Session::default();

    println!("--- The Game 客户端 ---");
    print_help();
    prompt()?;

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Command::Exit) => {
                        println!("正在断开连接...");
                        break;
                    }
                    Ok(Command::Help) => print_help(),
                    Ok(command) => match session.request(command) {
                        Ok(msgs) => {
                            for msg in &msgs {
                                conn.send(msg).await?;
                            }
                        }
                        Err(e) => println!("{}", e),
                    },
                    Err(e) if e.is_empty() => {}
                    Err(e) => println!("{}", e),
                }
                prompt()?;
            }
            msg = conn.recv() => {
                let Some(msg) = msg? else {
                    println!("\n服务器关闭了连接");
                    break;
                };
                session.on_message(&msg);
                print_message(&msg, &session);
                prompt()?;
            }
        }
    }

    conn.close().await
}
