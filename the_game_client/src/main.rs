mod bot;
mod connection;
mod repl;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::connection::Connection;

/// The Game 客户端
#[derive(Debug, Parser)]
#[command(name = "the_game_client", version)]
struct Cli {
    /// 服务器的 WebSocket 地址
    #[arg(long, env = "THE_GAME_URL", default_value = "ws://127.0.0.1:25917/ws")]
    url: Url,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 交互式命令行
    Repl,
    /// 让机器人按指定策略玩一局
    Bot(bot::BotArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 交互模式下日志会打断输入，默认只输出警告
    let default_level = match cli.command {
        Command::Repl => "warn",
        Command::Bot(_) => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("正在连接到: {}", cli.url);
    let conn = Connection::connect(&cli.url).await?;
    println!("连接成功!");

    match cli.command {
        Command::Repl => repl::run(conn).await,
        Command::Bot(args) => bot::run(conn, args).await,
    }
}
