//! 连接管理器
//!
//! 后台任务独占一条底层连接：建立、关闭、异常断开后按指数退避重连，并把入站信封解析后
//! 以 [`ConnectionEvent`] 发给唯一的观察者通道。句柄（[`ConnectionManager`]）只通过命令通道与任务交互，
//! 任务内部逐条处理命令 / 入站帧 / 定时器，因此状态无需加锁。

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, Sleep};

use super::message::{Envelope, ResultPayload, SearchRequest, StatusPayload};
use super::transport::{Connector, Frame, Link, Outbound, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::core::{ClientError, ErrorRecord, ReconnectPolicy};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// 连接管理器发给观察者的通知
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { code: u16 },
    Status(StatusPayload),
    Result(ResultPayload),
    Error(ErrorRecord),
}

/// 对外可见的只读快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// 已使用的重连次数
    pub attempts: u32,
    /// 已安排但尚未触发的重连等待时长
    pub pending_reconnect: Option<Duration>,
}

/// 连接管理器配置
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub policy: ReconnectPolicy,
}

enum Command {
    Connect {
        observer: mpsc::UnboundedSender<ConnectionEvent>,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Send {
        request: SearchRequest,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// 连接管理器句柄；丢弃句柄等同于 disconnect
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<ConnectionSnapshot>,
}

impl ConnectionManager {
    /// 创建句柄并启动后台任务（需在 tokio 运行时中调用）
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot {
            state: ConnectionState::Disconnected,
            attempts: 0,
            pending_reconnect: None,
        });

        let actor = ConnectionActor {
            config,
            connector,
            cmd_rx,
            snapshot_tx,
            state: ConnectionState::Disconnected,
            attempts: 0,
            link: None,
            observer: None,
            reconnect: None,
            reconnect_delay: None,
        };
        tokio::spawn(actor.run());

        Self {
            cmd_tx,
            snapshot_rx,
        }
    }

    /// 建立连接并注册观察者（替换旧的观察者）；已连接时直接返回
    pub async fn connect(
        &self,
        observer: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect { observer, reply })
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// 发送搜索请求；未连接时返回 NotConnected
    pub async fn send(&self, request: SearchRequest) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send { request, reply })
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// 取消待触发的重连并以 1000 关闭连接
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot_rx.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// 订阅快照变化
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot_rx.clone()
    }
}

struct ConnectionActor {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<ConnectionSnapshot>,
    state: ConnectionState,
    attempts: u32,
    link: Option<Link>,
    observer: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    /// 至多一个重连定时器
    reconnect: Option<Pin<Box<Sleep>>>,
    reconnect_delay: Option<Duration>,
}

impl ConnectionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                frame = next_frame(&mut self.link) => self.handle_frame(frame),
                _ = reconnect_timer(&mut self.reconnect) => self.fire_reconnect().await,
            }
        }

        // 句柄已丢弃
        self.close_normally();
        tracing::debug!("Connection manager stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { observer, reply } => {
                self.observer = Some(observer);
                let result = match self.state {
                    ConnectionState::Connected | ConnectionState::Connecting => Ok(()),
                    ConnectionState::Disconnected | ConnectionState::Closing => {
                        self.cancel_reconnect();
                        self.open().await
                    }
                };
                let _ = reply.send(result);
            }
            Command::Send { request, reply } => {
                let _ = reply.send(self.send(request));
            }
            Command::Disconnect { reply } => {
                self.close_normally();
                let _ = reply.send(());
            }
        }
    }

    fn send(&mut self, request: SearchRequest) -> Result<(), ClientError> {
        let link = match (&self.link, self.state) {
            (Some(link), ConnectionState::Connected) => link,
            _ => return Err(ClientError::NotConnected),
        };
        let text = Envelope::search(request).to_json()?;
        link.outbound
            .send(Outbound::Text(text))
            .map_err(|_| ClientError::NotConnected)?;
        tracing::debug!("Search request sent");
        Ok(())
    }

    async fn open(&mut self) -> Result<(), ClientError> {
        self.set_state(ConnectionState::Connecting);

        match self.connector.open(&self.config.endpoint).await {
            Ok(link) => {
                tracing::info!("WebSocket connected: {}", self.config.endpoint);
                self.link = Some(link);
                self.attempts = 0;
                self.set_state(ConnectionState::Connected);
                self.notify(ConnectionEvent::Connected);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("WebSocket connection failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// 显式断开：取消重连、以 1000 关闭底层连接
    fn close_normally(&mut self) {
        self.cancel_reconnect();
        self.attempts = 0;

        if let Some(link) = self.link.take() {
            self.set_state(ConnectionState::Closing);
            let _ = link.outbound.send(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: "Client disconnect".to_string(),
            });
            drop(link);
            self.set_state(ConnectionState::Disconnected);
            self.notify(ConnectionEvent::Disconnected {
                code: NORMAL_CLOSURE,
            });
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Text(text) => self.dispatch(&text),
            Frame::Closed { code } => {
                tracing::info!(code, "WebSocket disconnected");
                self.link = None;
                self.set_state(ConnectionState::Disconnected);
                self.notify(ConnectionEvent::Disconnected { code });

                if code != NORMAL_CLOSURE && self.config.policy.allows(self.attempts) {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn dispatch(&mut self, text: &str) {
        match Envelope::parse(text) {
            Ok(Envelope::Status(status)) => self.notify(ConnectionEvent::Status(status)),
            Ok(Envelope::SearchComplete(result)) => self.notify(ConnectionEvent::Result(result)),
            Ok(Envelope::Error(record)) => self.notify(ConnectionEvent::Error(record)),
            Ok(other) => {
                tracing::warn!("Unexpected inbound message type: {}", other.kind());
            }
            Err(e) => {
                tracing::warn!("Failed to parse WebSocket message: {}", e);
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.config.policy.delay(self.attempts);
        tracing::info!(
            attempt = self.attempts + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        self.reconnect = Some(Box::pin(sleep(delay)));
        self.reconnect_delay = Some(delay);
        self.publish();
    }

    fn cancel_reconnect(&mut self) {
        self.reconnect = None;
        self.reconnect_delay = None;
    }

    async fn fire_reconnect(&mut self) {
        self.cancel_reconnect();
        self.attempts += 1;
        let max = self.config.policy.max_attempts();
        tracing::info!("Attempting to reconnect ({}/{})...", self.attempts, max);

        if self.open().await.is_err() {
            if self.config.policy.allows(self.attempts) {
                self.schedule_reconnect();
            } else {
                tracing::error!("Max reconnection attempts reached");
                self.notify(ConnectionEvent::Error(ErrorRecord::connection_failed()));
                self.publish();
            }
        }
    }

    fn notify(&mut self, event: ConnectionEvent) {
        if let Some(observer) = &self.observer {
            if observer.send(event).is_err() {
                tracing::debug!("Connection observer dropped");
                self.observer = None;
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(ConnectionSnapshot {
            state: self.state,
            attempts: self.attempts,
            pending_reconnect: self.reconnect_delay,
        });
    }
}

/// 无连接时永远挂起；入站通道关闭视为异常断开
async fn next_frame(link: &mut Option<Link>) -> Frame {
    match link {
        Some(link) => link.inbound.recv().await.unwrap_or(Frame::Closed {
            code: ABNORMAL_CLOSURE,
        }),
        None => pending().await,
    }
}

async fn reconnect_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}
