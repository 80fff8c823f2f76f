use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::service::ServiceConfig;

/// The Game 服务器
#[derive(Debug, Parser)]
#[command(name = "the_game_server", version)]
pub struct Config {
    /// 监听地址
    #[arg(long, env = "THE_GAME_LISTEN", default_value = "0.0.0.0:25917")]
    pub listen: SocketAddr,

    /// Redis 连接串；不设置时使用进程内存储和通知
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// 审计日志文件 (JSON Lines)
    #[arg(long, env = "THE_GAME_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// 新加入的玩家发几张牌
    #[arg(long, env = "THE_GAME_JOIN_HAND_SIZE", default_value_t = ServiceConfig::DEFAULT_JOIN_HAND_SIZE)]
    pub join_hand_size: usize,

    /// 以 JSON 格式输出日志
    #[arg(long)]
    pub log_json: bool,
}

impl Config {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            join_hand_size: self.join_hand_size,
        }
    }
}
