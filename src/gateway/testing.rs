//! 测试用内存连接器

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::transport::{Connector, Link, Peer};
use crate::core::ClientError;

/// 按脚本返回连接结果：`true` 表示打开成功，脚本耗尽后一律失败
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<bool>>,
    peers: mpsc::UnboundedSender<Peer>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedConnector {
    pub(crate) fn new(script: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            peers,
            attempts: Mutex::new(Vec::new()),
        });
        (connector, peers_rx)
    }

    /// 每次 open 被调用的时刻
    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, _url: &str) -> Result<Link, ClientError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let ok = self.script.lock().unwrap().pop_front().unwrap_or(false);
        if !ok {
            return Err(ClientError::Connect("refused".to_string()));
        }
        let (link, peer) = Link::pair();
        let _ = self.peers.send(peer);
        Ok(link)
    }
}

/// 单次应答的 HTTP 服务器，返回可 POST 的地址
pub(crate) async fn serve_http_once(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 8192];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
    });
    format!("http://{}/api/search", addr)
}

/// 接受连接、读取请求但从不应答的 HTTP 服务器
pub(crate) async fn serve_http_silent() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 8192];
        let _ = socket.read(&mut buf).await;
        // 保持连接直到客户端放弃
        let _ = socket.read(&mut buf).await;
    });
    format!("http://{}/api/search", addr)
}
