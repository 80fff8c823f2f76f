use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

use the_game_core::{ClientMessage, ServerMessage};

/// 与服务器之间的一条 WebSocket 连接，收发的都是 JSON 文本帧
pub struct Connection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connection {
    pub async fn connect(url: &Url) -> Result<Self> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("无法连接到 {}", url))?;
        Ok(Connection { stream })
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let payload = serde_json::to_string(msg)?;
        debug!("--> {}", payload);
        self.stream.send(Message::Text(payload.into())).await?;
        Ok(())
    }

    /// 下一条服务器消息；连接关闭时返回 `None`
    ///
    /// 非文本帧和无法解析的帧会被跳过。
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => warn!("解析服务器消息失败: {}", e),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}
