//! 搜索编排器：主控循环
//!
//! 负责：持有唯一的 SearchSession 与（按需创建的）连接管理器，建立 cmd/state 两条通道，
//! 并在后台任务中消费用户命令（Search/Retry/ClearError/ClearResults/Disconnect/Quit）、
//! 连接事件、回退通道结果与重试定时器，每次变化后把会话快照推送给 UI。

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, Sleep};
use uuid::Uuid;

use super::error::{ClientError, ErrorCode, ErrorRecord};
use super::recovery::RetryPolicy;
use super::state::SearchSession;
use crate::config::{AppConfig, TransportMode};
use crate::gateway::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, Connector, FallbackClient, SearchOutcome,
    SearchRequest, SearchSettings,
};

/// 从 UI 发往编排器的用户命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 发起搜索（loading 中再次提交会被拒绝）
    Search {
        prompt: String,
        settings: SearchSettings,
    },
    /// 按线性退避重放最近一次搜索
    Retry,
    ClearError,
    /// 重置会话并释放连接
    ClearResults,
    /// 断开并释放连接管理器
    Disconnect,
    /// 退出编排循环
    Quit,
}

type FallbackReply = oneshot::Receiver<Result<SearchOutcome, ErrorRecord>>;

/// 编排器独占的连接：管理器句柄 + 唯一观察者通道
struct OwnedConnection {
    manager: ConnectionManager,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// 启动编排器：返回命令发送端、会话快照接收端与后台任务句柄
pub fn spawn_orchestrator(
    cfg: AppConfig,
    connector: Arc<dyn Connector>,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<SearchSession>,
    JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(SearchSession::default());

    let orchestrator = SearchOrchestrator {
        retry_policy: cfg.retry.policy(),
        cfg,
        connector,
        fallback_client: None,
        session: SearchSession::default(),
        state_tx,
        connection: None,
        fallback: None,
        retry: None,
        request_id: None,
    };
    let handle = tokio::spawn(orchestrator.run(cmd_rx));

    (cmd_tx, state_rx, handle)
}

struct SearchOrchestrator {
    cfg: AppConfig,
    connector: Arc<dyn Connector>,
    /// 首次回退请求时构建
    fallback_client: Option<FallbackClient>,
    retry_policy: RetryPolicy,
    session: SearchSession,
    state_tx: watch::Sender<SearchSession>,
    connection: Option<OwnedConnection>,
    /// 进行中的回退请求
    fallback: Option<FallbackReply>,
    /// 至多一个重试定时器
    retry: Option<Pin<Box<Sleep>>>,
    request_id: Option<Uuid>,
}

impl SearchOrchestrator {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                // 先处理已排队的命令，再处理事件
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Quit) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                event = next_event(&mut self.connection) => self.handle_event(event),
                outcome = fallback_outcome(&mut self.fallback) => self.handle_fallback(outcome),
                _ = retry_timer(&mut self.retry) => self.fire_retry().await,
            }
        }

        self.teardown_connection().await;
        tracing::debug!("Search orchestrator stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Search { prompt, settings } => {
                if let Err(e) = self.search(SearchRequest::new(prompt, settings)).await {
                    tracing::warn!("Search rejected: {}", e);
                }
            }
            Command::Retry => self.schedule_retry(),
            Command::ClearError => {
                self.session.clear_error();
                self.publish();
            }
            Command::ClearResults => {
                self.retry = None;
                self.fallback = None;
                self.teardown_connection().await;
                self.session.clear_results();
                self.request_id = None;
                self.publish();
            }
            Command::Disconnect => {
                self.retry = None;
                self.teardown_connection().await;
                if self.session.apply_disconnect(Instant::now()) {
                    tracing::warn!(request_id = ?self.request_id, "Disconnected while a search was in flight");
                }
                self.publish();
            }
            // 由 run 处理
            Command::Quit => {}
        }
    }

    /// 进入 loading，校验后经当前通道发送；任何失败都落到 error 状态
    async fn search(&mut self, mut request: SearchRequest) -> Result<(), ClientError> {
        self.drain_events();
        if self.session.is_loading() {
            return Err(ClientError::Busy);
        }
        self.retry = None;

        request.sanitize();
        let request_id = Uuid::new_v4();
        self.request_id = Some(request_id);
        self.session.begin(request.clone(), Instant::now());
        self.publish();
        tracing::info!(
            request_id = %request_id,
            queries = request.settings.queries,
            content_mode = request.settings.content_mode,
            "Search started"
        );

        let violations = request.validate(&self.cfg.validation);
        if !violations.is_empty() {
            let details = violations
                .iter()
                .map(|v| format!("{}: {}", v.field, v.message))
                .collect::<Vec<_>>()
                .join("; ");
            self.fail(
                ErrorRecord::new(ErrorCode::ValidationFailed, "Request validation failed")
                    .with_details(details),
            );
            return Ok(());
        }

        match self.cfg.app.transport {
            TransportMode::Streaming => {
                if let Err(e) = self.send_streaming(request).await {
                    self.fail(e.to_record());
                }
            }
            TransportMode::Fallback => self.send_fallback(request),
        }
        Ok(())
    }

    async fn send_streaming(&mut self, request: SearchRequest) -> Result<(), ClientError> {
        if self.connection.is_none() {
            let (events_tx, events) = mpsc::unbounded_channel();
            let manager = ConnectionManager::new(
                ConnectionConfig {
                    endpoint: self.cfg.stream.endpoint.clone(),
                    policy: self.cfg.stream.reconnect.policy(),
                },
                self.connector.clone(),
            );
            self.connection = Some(OwnedConnection {
                manager,
                events_tx,
                events,
            });
        }
        let conn = match self.connection.as_ref() {
            Some(conn) => conn,
            None => return Err(ClientError::Closed),
        };

        conn.manager.connect(conn.events_tx.clone()).await?;
        conn.manager.send(request).await
    }

    fn send_fallback(&mut self, request: SearchRequest) {
        let client = match &self.fallback_client {
            Some(client) => client.clone(),
            None => match FallbackClient::new(&self.cfg.fallback.url, self.cfg.fallback.timeout()) {
                Ok(client) => {
                    self.fallback_client = Some(client.clone());
                    client
                }
                Err(e) => {
                    tracing::error!("Failed to build HTTP client: {}", e);
                    self.fail(
                        ErrorRecord::new(ErrorCode::NetworkError, "HTTP client could not be initialized")
                            .with_details(e.to_string()),
                    );
                    return;
                }
            },
        };
        let (tx, rx) = oneshot::channel();
        tracing::debug!(request_id = ?self.request_id, "Posting search to {}", client.url());
        tokio::spawn(async move {
            let _ = tx.send(client.search(&request).await);
        });
        self.fallback = Some(rx);
    }

    /// 命令优先于事件处理，新搜索开始前先按到达顺序消化已排队的事件
    fn drain_events(&mut self) {
        let mut queued = Vec::new();
        if let Some(conn) = self.connection.as_mut() {
            while let Ok(event) = conn.events.try_recv() {
                queued.push(event);
            }
        }
        for event in queued {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        let now = Instant::now();
        let changed = match event {
            ConnectionEvent::Connected => false,
            ConnectionEvent::Disconnected { code } => {
                let lost = self.session.apply_disconnect(now);
                if lost {
                    tracing::warn!(request_id = ?self.request_id, code, "Connection lost during search");
                }
                lost
            }
            ConnectionEvent::Status(status) => {
                tracing::debug!(request_id = ?self.request_id, stage = %status.stage, "Search progress");
                let applied = self.session.apply_status(status);
                if !applied {
                    tracing::debug!("Status ignored outside of a search");
                }
                applied
            }
            ConnectionEvent::Result(payload) => {
                let count = payload.results.len();
                let applied =
                    self.session
                        .apply_result(payload.results, payload.queries, payload.elapsed_ms);
                if applied {
                    tracing::info!(
                        request_id = ?self.request_id,
                        results = count,
                        elapsed_ms = payload.elapsed_ms,
                        "Search completed"
                    );
                } else {
                    tracing::warn!("Result ignored outside of a search");
                }
                applied
            }
            ConnectionEvent::Error(record) => {
                let code = record.code;
                let applied = self.session.apply_error(record, now);
                if applied {
                    tracing::warn!(request_id = ?self.request_id, code = %code, "Search failed");
                } else {
                    tracing::warn!(code = %code, "Error ignored outside of a search");
                }
                applied
            }
        };

        if changed {
            self.publish();
        }
    }

    fn handle_fallback(&mut self, outcome: Result<Result<SearchOutcome, ErrorRecord>, oneshot::error::RecvError>) {
        self.fallback = None;
        let now = Instant::now();
        match outcome {
            Ok(Ok(outcome)) => {
                let elapsed_ms = self.session.live_elapsed_ms(now);
                let count = outcome.results.len();
                if self.session.apply_result(outcome.results, outcome.queries, elapsed_ms) {
                    tracing::info!(request_id = ?self.request_id, results = count, elapsed_ms, "Search completed");
                    self.publish();
                }
            }
            Ok(Err(record)) => self.fail(record),
            Err(_) => self.fail(ErrorRecord::new(
                ErrorCode::UnknownError,
                "Fallback request was aborted",
            )),
        }
    }

    fn schedule_retry(&mut self) {
        if self.session.last_params.is_none() {
            tracing::debug!("Nothing to retry");
            return;
        }
        if !self.retry_policy.allows(self.session.retry_count) {
            tracing::warn!(
                "Max retry attempts reached ({})",
                self.retry_policy.max_retries()
            );
            return;
        }
        if self.session.is_loading() {
            tracing::debug!("Retry ignored while a search is in flight");
            return;
        }

        self.session.retry_count += 1;
        let delay = self.retry_policy.delay(self.session.retry_count);
        tracing::info!(
            retry = self.session.retry_count,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );
        self.retry = Some(Box::pin(sleep(delay)));
        self.publish();
    }

    async fn fire_retry(&mut self) {
        self.retry = None;
        let Some(params) = self.session.last_params.clone() else {
            return;
        };
        tracing::info!(
            "Retrying search ({}/{})",
            self.session.retry_count,
            self.retry_policy.max_retries()
        );
        if let Err(e) = self.search(params).await {
            tracing::warn!("Retry rejected: {}", e);
        }
    }

    fn fail(&mut self, record: ErrorRecord) {
        tracing::warn!(request_id = ?self.request_id, code = %record.code, "Search failed: {}", record.message);
        if self.session.apply_error(record, Instant::now()) {
            self.publish();
        }
    }

    /// 以 1000 关闭并丢弃连接管理器；其观察者通道随之失效，迟到事件不会再进入会话
    async fn teardown_connection(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.manager.disconnect().await;
            tracing::debug!("Connection manager released");
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.session.clone());
    }
}

/// 无连接时永远挂起
async fn next_event(connection: &mut Option<OwnedConnection>) -> ConnectionEvent {
    match connection {
        Some(conn) => match conn.events.recv().await {
            Some(event) => event,
            None => pending().await,
        },
        None => pending().await,
    }
}

async fn fallback_outcome(
    reply: &mut Option<FallbackReply>,
) -> Result<Result<SearchOutcome, ErrorRecord>, oneshot::error::RecvError> {
    match reply {
        Some(rx) => rx.await,
        None => pending().await,
    }
}

async fn retry_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::i18n::{localized, Locale};
    use crate::core::state::LoadingState;
    use crate::gateway::testing::{serve_http_once, ScriptedConnector};
    use crate::gateway::{Frame, Outbound, Peer, NORMAL_CLOSURE};
    use std::time::Duration;

    fn spawn(
        script: &[bool],
    ) -> (
        Arc<ScriptedConnector>,
        mpsc::UnboundedReceiver<Peer>,
        mpsc::UnboundedSender<Command>,
        watch::Receiver<SearchSession>,
    ) {
        let (connector, peers) = ScriptedConnector::new(script);
        let (cmd_tx, state_rx, _handle) = spawn_orchestrator(AppConfig::default(), connector.clone());
        (connector, peers, cmd_tx, state_rx)
    }

    fn search_cmd(prompt: &str) -> Command {
        Command::Search {
            prompt: prompt.to_string(),
            settings: SearchSettings {
                queries: 3,
                content_mode: false,
                engines: None,
            },
        }
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<SearchSession>, pred: F) -> SearchSession
    where
        F: Fn(&SearchSession) -> bool,
    {
        loop {
            if pred(&rx.borrow_and_update()) {
                return rx.borrow().clone();
            }
            rx.changed().await.unwrap();
        }
    }

    /// 取出对端收到的下一条文本帧并解析为 JSON
    async fn next_sent(peer: &mut Peer) -> serde_json::Value {
        match peer.outbound.recv().await.unwrap() {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected {:?}", other),
        }
    }

    fn status_frame(stage: &str) -> Frame {
        Frame::Text(format!(
            r#"{{"type":"status","data":{{"stage":"{}","progress":1,"total":3,"message":"working","timestamp":1700000000}}}}"#,
            stage
        ))
    }

    fn result_frame(elapsed_ms: u64) -> Frame {
        Frame::Text(format!(
            r#"{{"type":"search_complete","data":{{"queries":["cats","cat facts"],"results":[{{"title":"Cats","url":"https://cats.example","snippet":"meow","score":0.9}}],"elapsed_ms":{}}}}}"#,
            elapsed_ms
        ))
    }

    #[tokio::test]
    async fn test_successful_search_flow() {
        let (_connector, mut peers, cmd_tx, mut state) = spawn(&[true]);
        cmd_tx.send(search_cmd("  cats  ")).unwrap();

        let mut peer = peers.recv().await.unwrap();
        let sent = next_sent(&mut peer).await;
        assert_eq!(sent["type"], "search");
        assert_eq!(sent["data"]["prompt"], "cats");
        assert_eq!(sent["data"]["settings"]["queries"], 3);

        let loading = wait_for(&mut state, |s| s.is_loading()).await;
        assert_eq!(loading.prompt, "cats");
        assert!(loading.last_error.is_none());

        peer.inbound.send(status_frame("fetching")).unwrap();
        let progress = wait_for(&mut state, |s| s.last_status.is_some()).await;
        assert_eq!(progress.last_status.unwrap().stage, "fetching");

        peer.inbound.send(result_frame(420)).unwrap();
        let done = wait_for(&mut state, |s| s.loading_state == LoadingState::Success).await;
        assert_eq!(done.elapsed_ms, 420);
        assert_eq!(done.results.len(), 1);
        assert_eq!(done.queries, vec!["cats".to_string(), "cat facts".to_string()]);
        assert!(done.last_error.is_none());
        assert!(done.last_status.is_none());
    }

    #[tokio::test]
    async fn test_abnormal_close_while_loading_is_connection_lost() {
        let (_connector, mut peers, cmd_tx, mut state) = spawn(&[true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        let mut peer = peers.recv().await.unwrap();
        next_sent(&mut peer).await;

        peer.inbound.send(Frame::Closed { code: 1006 }).unwrap();
        let failed = wait_for(&mut state, |s| s.has_error()).await;
        assert_eq!(failed.loading_state, LoadingState::Error);
        assert_eq!(failed.last_error.unwrap().code, ErrorCode::ConnectionLost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnects_replace_connection_lost() {
        let (connector, mut peers, cmd_tx, mut state) = spawn(&[true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        let mut peer = peers.recv().await.unwrap();
        next_sent(&mut peer).await;

        peer.inbound.send(Frame::Closed { code: 1006 }).unwrap();
        let failed = wait_for(&mut state, |s| {
            s.last_error.as_ref().map(|e| &e.code) == Some(&ErrorCode::ConnectionFailed)
        })
        .await;
        assert_eq!(failed.loading_state, LoadingState::Error);
        // 首次连接 + 5 次重连
        assert_eq!(connector.attempt_times().len(), 6);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempt_times().len(), 6);
    }

    #[tokio::test]
    async fn test_server_error_shows_localized_message() {
        let (_connector, mut peers, cmd_tx, mut state) = spawn(&[true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        let mut peer = peers.recv().await.unwrap();
        next_sent(&mut peer).await;

        peer.inbound
            .send(Frame::Text(
                r#"{"type":"error","data":{"code":"MISSING_API_KEY","message":"OPENROUTER_API_KEY not set"}}"#
                    .to_string(),
            ))
            .unwrap();
        let failed = wait_for(&mut state, |s| s.has_error()).await;
        assert_eq!(failed.loading_state, LoadingState::Error);
        assert_eq!(failed.last_error.as_ref().unwrap().code, ErrorCode::MissingApiKey);

        let shown = failed.error_message(Locale::En).unwrap();
        assert_eq!(shown, localized(&ErrorCode::MissingApiKey, Locale::En).unwrap());
        assert!(!shown.contains("OPENROUTER_API_KEY"));
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_the_wire() {
        let (connector, _peers, cmd_tx, mut state) = spawn(&[true]);
        cmd_tx
            .send(Command::Search {
                prompt: "cats".to_string(),
                settings: SearchSettings {
                    queries: 0,
                    content_mode: false,
                    engines: Some(vec!["Google".to_string(), "altavista".to_string()]),
                },
            })
            .unwrap();

        let failed = wait_for(&mut state, |s| s.has_error()).await;
        let record = failed.last_error.unwrap();
        assert_eq!(record.code, ErrorCode::ValidationFailed);
        let details = record.details.unwrap();
        assert!(details.contains("settings.queries"));
        assert!(details.contains("invalid engine: altavista"));
        assert!(!details.contains("google"));
        assert!(connector.attempt_times().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_failed() {
        let (_connector, _peers, cmd_tx, mut state) = spawn(&[false]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        let failed = wait_for(&mut state, |s| s.has_error()).await;
        assert_eq!(failed.last_error.as_ref().unwrap().code, ErrorCode::ConnectionFailed);
        assert!(failed.can_retry(3));
    }

    #[tokio::test]
    async fn test_overlapping_search_is_rejected() {
        let (_connector, mut peers, cmd_tx, mut state) = spawn(&[true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        cmd_tx.send(search_cmd("dogs")).unwrap();

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(next_sent(&mut peer).await["data"]["prompt"], "cats");

        peer.inbound.send(result_frame(10)).unwrap();
        let done = wait_for(&mut state, |s| s.loading_state == LoadingState::Success).await;
        assert_eq!(done.prompt, "cats");
        assert!(peer.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_events_are_ignored_after_success() {
        let (_connector, mut peers, cmd_tx, mut state) = spawn(&[true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        let mut peer = peers.recv().await.unwrap();
        next_sent(&mut peer).await;

        peer.inbound.send(result_frame(420)).unwrap();
        peer.inbound
            .send(Frame::Text(
                r#"{"type":"error","data":{"code":"SEARCH_FAILED","message":"late"}}"#.to_string(),
            ))
            .unwrap();
        peer.inbound.send(Frame::Closed { code: 1006 }).unwrap();
        let done = wait_for(&mut state, |s| s.loading_state == LoadingState::Success).await;
        assert_eq!(done.elapsed_ms, 420);

        // 迟到的错误与断开都不会产生新的快照
        let changed = tokio::time::timeout(Duration::from_millis(200), state.changed()).await;
        assert!(changed.is_err());
        let session = state.borrow().clone();
        assert_eq!(session.loading_state, LoadingState::Success);
        assert!(session.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_linear_backoff_and_caps_at_three() {
        let (connector, _peers, cmd_tx, mut state) = spawn(&[]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        wait_for(&mut state, |s| s.has_error()).await;

        let mut waits = Vec::new();
        for k in 1..=3u64 {
            let requested_at = Instant::now();
            cmd_tx.send(Command::Retry).unwrap();
            tokio::time::sleep(Duration::from_millis(k * 1000 + 10)).await;
            let session = state.borrow().clone();
            assert_eq!(session.retry_count, k as u32);
            assert_eq!(session.loading_state, LoadingState::Error);

            let times = connector.attempt_times();
            assert_eq!(times.len(), k as usize + 1);
            waits.push((times[k as usize] - requested_at).as_millis());
        }
        assert_eq!(waits, vec![1000, 2000, 3000]);

        // 第四次重试不生效
        cmd_tx.send(Command::Retry).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempt_times().len(), 4);
        let session = state.borrow().clone();
        assert_eq!(session.retry_count, 3);
        assert!(!session.can_retry(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_retry_resets_counter() {
        let (_connector, mut peers, cmd_tx, mut state) = spawn(&[false, true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        wait_for(&mut state, |s| s.has_error()).await;

        cmd_tx.send(Command::Retry).unwrap();
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(next_sent(&mut peer).await["data"]["prompt"], "cats");
        assert_eq!(state.borrow().retry_count, 1);

        peer.inbound.send(result_frame(42)).unwrap();
        let done = wait_for(&mut state, |s| s.loading_state == LoadingState::Success).await;
        assert_eq!(done.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_search_cancels_pending_retry() {
        let (connector, mut peers, cmd_tx, mut state) = spawn(&[false, true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        wait_for(&mut state, |s| s.has_error()).await;

        cmd_tx.send(Command::Retry).unwrap();
        cmd_tx.send(search_cmd("dogs")).unwrap();
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(next_sent(&mut peer).await["data"]["prompt"], "dogs");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempt_times().len(), 2);
        assert!(peer.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clear_error_and_clear_results() {
        let (_connector, mut peers, cmd_tx, mut state) = spawn(&[true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        let mut peer = peers.recv().await.unwrap();
        next_sent(&mut peer).await;
        peer.inbound
            .send(Frame::Text(
                r#"{"type":"error","data":{"code":"SEARCH_FAILED","message":"engines down"}}"#.to_string(),
            ))
            .unwrap();
        wait_for(&mut state, |s| s.has_error()).await;

        cmd_tx.send(Command::ClearError).unwrap();
        let cleared = wait_for(&mut state, |s| !s.has_error()).await;
        assert_eq!(cleared.loading_state, LoadingState::Idle);
        assert!(cleared.last_params.is_some());

        cmd_tx.send(Command::ClearResults).unwrap();
        let reset = wait_for(&mut state, |s| s.last_params.is_none()).await;
        assert_eq!(reset.loading_state, LoadingState::Idle);
        assert!(reset.results.is_empty());
        assert_eq!(reset.retry_count, 0);

        // 连接随会话一起释放
        assert_eq!(
            peer.outbound.recv().await,
            Some(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: "Client disconnect".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_disconnect_while_loading_is_connection_lost() {
        let (_connector, mut peers, cmd_tx, mut state) = spawn(&[true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        let mut peer = peers.recv().await.unwrap();
        next_sent(&mut peer).await;

        cmd_tx.send(Command::Disconnect).unwrap();
        let failed = wait_for(&mut state, |s| s.has_error()).await;
        assert_eq!(failed.last_error.unwrap().code, ErrorCode::ConnectionLost);
        assert!(matches!(peer.outbound.recv().await, Some(Outbound::Close { code: 1000, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_retry() {
        let (connector, _peers, cmd_tx, mut state) = spawn(&[false, true]);
        cmd_tx.send(search_cmd("cats")).unwrap();
        wait_for(&mut state, |s| s.has_error()).await;

        cmd_tx.send(Command::Retry).unwrap();
        cmd_tx.send(Command::Disconnect).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        // 断开后不会再因重试而重建连接
        assert_eq!(connector.attempt_times().len(), 1);
        let session = state.borrow().clone();
        assert_eq!(session.loading_state, LoadingState::Error);
        assert_eq!(session.retry_count, 1);
    }

    #[tokio::test]
    async fn test_quit_stops_the_loop() {
        let (connector, _peers) = ScriptedConnector::new(&[]);
        let (cmd_tx, _state, handle) = spawn_orchestrator(AppConfig::default(), connector);
        cmd_tx.send(Command::Quit).unwrap();
        handle.await.unwrap();
        assert!(cmd_tx.send(Command::ClearError).is_err());
    }

    #[tokio::test]
    async fn test_fallback_transport_success() {
        let url = serve_http_once(
            "200 OK",
            r#"{"results":[{"title":"Cats","url":"https://cats.example","snippet":"meow","score":1.0}],"queries":["cats"]}"#,
        )
        .await;
        let mut cfg = AppConfig::default();
        cfg.app.transport = TransportMode::Fallback;
        cfg.fallback.url = url;
        let (connector, _peers) = ScriptedConnector::new(&[]);
        let (cmd_tx, mut state, _handle) = spawn_orchestrator(cfg, connector.clone());

        cmd_tx.send(search_cmd("cats")).unwrap();
        let done = wait_for(&mut state, |s| s.loading_state == LoadingState::Success).await;
        assert_eq!(done.results.len(), 1);
        assert_eq!(done.queries, vec!["cats".to_string()]);
        assert!(connector.attempt_times().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_transport_error() {
        let url = serve_http_once(
            "500 Internal Server Error",
            r#"{"error":{"code":"QUERY_GENERATION_FAILED","message":"model refused"}}"#,
        )
        .await;
        let mut cfg = AppConfig::default();
        cfg.app.transport = TransportMode::Fallback;
        cfg.fallback.url = url;
        let (connector, _peers) = ScriptedConnector::new(&[]);
        let (cmd_tx, mut state, _handle) = spawn_orchestrator(cfg, connector);

        cmd_tx.send(search_cmd("cats")).unwrap();
        let failed = wait_for(&mut state, |s| s.has_error()).await;
        assert_eq!(failed.last_error.unwrap().code, ErrorCode::QueryGenerationFailed);
    }
}
