mod audit;
mod config;
mod notifier;
mod service;
mod store;
mod ws;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audit::{AuditLog, JsonlAuditLog, NoopAuditLog};
use crate::config::Config;
use crate::notifier::{LocalNotifier, RedisNotifier, UpdateNotifier};
use crate::service::GameService;
use crate::store::{GameStore, MemoryStore, RedisStore};
use crate::ws::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    let (store, notifier): (Arc<dyn GameStore>, Arc<dyn UpdateNotifier>) = match &config.redis_url {
        Some(url) => {
            info!("使用 Redis 存储和通知");
            (
                Arc::new(RedisStore::connect(url).await?),
                Arc::new(RedisNotifier::connect(url).await?),
            )
        }
        None => {
            warn!("未配置 Redis，游戏状态只保存在本进程内");
            (Arc::new(MemoryStore::new()), Arc::new(LocalNotifier::new()))
        }
    };

    let audit: Arc<dyn AuditLog> = match &config.audit_log {
        Some(path) => {
            info!("审计日志写入 {}", path.display());
            Arc::new(JsonlAuditLog::open(path).await?)
        }
        None => Arc::new(NoopAuditLog),
    };

    let shutdown = CancellationToken::new();
    let state = SharedState::new(AppState {
        service: GameService::new(store, notifier, audit, config.service_config()),
        shutdown: shutdown.clone(),
    });
    let app = ws::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!("服务器正在监听 {}", config.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("服务器已关闭");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// 等待 Ctrl-C，然后通知所有连接退出
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // 收不到信号时不能直接关闭，继续服务
        error!("监听退出信号失败: {}", e);
        std::future::pending::<()>().await;
    }
    info!("正在关闭服务器...");
    shutdown.cancel();
}
