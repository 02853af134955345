//! 传输层
//!
//! [`Connector`] 负责打开一条底层连接，返回一对通道（[`Link`]）：出站文本/关闭帧、入站文本/关闭事件。
//! 连接管理器只和 Link 打交道，因此既可以接真实的 WebSocket（[`WsConnector`]），也可以在测试中接内存通道。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::core::ClientError;

/// 正常关闭
pub const NORMAL_CLOSURE: u16 = 1000;
/// 对端关闭帧未携带状态码
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// 连接在没有关闭帧的情况下中断
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// 入站事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Closed { code: u16 },
}

/// 出站指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// 已打开连接的本端
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
    _guard: Option<DropGuard>,
}

/// 已打开连接的对端（由传输实现或测试持有）
pub struct Peer {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub inbound: mpsc::UnboundedSender<Frame>,
}

impl Link {
    /// 创建一对相连的 Link / Peer
    pub fn pair() -> (Link, Peer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Link {
                outbound: out_tx,
                inbound: in_rx,
                _guard: None,
            },
            Peer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    /// Link 被丢弃时取消 token，用于停止传输实现的后台读任务
    fn with_guard(mut self, token: &CancellationToken) -> Self {
        self._guard = Some(token.clone().drop_guard());
        self
    }
}

/// 连接器 trait：打开一条到 url 的连接
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Link, ClientError>;
}

/// 基于 tokio-tungstenite 的 WebSocket 连接器
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Link, ClientError> {
        let connecting = tokio_tungstenite::connect_async(url);
        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| ClientError::ConnectTimeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        tracing::debug!("WebSocket handshake completed: {}", url);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (link, peer) = Link::pair();
        let Peer {
            outbound: mut out_rx,
            inbound: in_tx,
        } = peer;
        let token = CancellationToken::new();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                match msg {
                    Outbound::Text(text) => {
                        if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                        break;
                    }
                }
            }
            // 对端先关闭时 tungstenite 排队的关闭应答在这里刷出
            if let Err(e) = ws_tx.close().await {
                tracing::debug!("WebSocket sink close: {}", e);
            }
        });

        let reader_token = token.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = reader_token.cancelled() => return,
                    msg = ws_rx.next() => msg,
                };

                let frame = match msg {
                    Some(Ok(WsMessage::Text(text))) => Frame::Text(text),
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame
                            .map(|f| u16::from(f.code))
                            .unwrap_or(NO_STATUS_RECEIVED);
                        let _ = in_tx.send(Frame::Closed { code });
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket receive error: {}", e);
                        let _ = in_tx.send(Frame::Closed {
                            code: ABNORMAL_CLOSURE,
                        });
                        return;
                    }
                    None => {
                        let _ = in_tx.send(Frame::Closed {
                            code: ABNORMAL_CLOSURE,
                        });
                        return;
                    }
                };

                if in_tx.send(frame).is_err() {
                    return;
                }
            }
        });

        Ok(link.with_guard(&token))
    }
}
