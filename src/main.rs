//! Scout - 流式搜索客户端
//!
//! 入口：初始化日志、加载配置、启动编排器，发起一次搜索并打印进度与结果。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Local};
use clap::Parser;
use scout::config::{load_config, AppConfig, TransportMode};
use scout::core::{format_elapsed, spawn_orchestrator, Command, LoadingState, SearchSession};
use scout::gateway::{SearchSettings, StatusPayload, WsConnector};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

#[derive(Debug, Parser)]
#[command(name = "scout", version, about = "Streaming web search client")]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(long, env = "SCOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Number of search queries to generate
    #[arg(long, default_value_t = 3)]
    queries: u32,

    /// Fetch and analyze page content
    #[arg(long)]
    content: bool,

    /// Restrict to a search engine (repeatable)
    #[arg(long = "engine", value_name = "ID")]
    engines: Vec<String>,

    /// Use the one-shot HTTP endpoint instead of the streaming one
    #[arg(long)]
    fallback: bool,

    /// Retry a failed search up to N times
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// What to search for
    #[arg(required = true)]
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    scout::observability::init();

    let mut cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    if cli.fallback {
        cfg.app.transport = TransportMode::Fallback;
    }
    let locale = cfg.app.locale;
    let max_retries = cli.retries.min(cfg.retry.max_retries);

    let connector = Arc::new(WsConnector::new(cfg.stream.connect_timeout()));
    let (cmd_tx, mut state_rx, handle) = spawn_orchestrator(cfg, connector);

    let settings = SearchSettings {
        queries: cli.queries,
        content_mode: cli.content,
        engines: (!cli.engines.is_empty()).then_some(cli.engines),
    };
    cmd_tx
        .send(Command::Search {
            prompt: cli.prompt.join(" "),
            settings,
        })
        .context("Search orchestrator is not running")?;

    let outcome = tokio::select! {
        outcome = follow(&mut state_rx, &cmd_tx, max_retries) => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            None
        }
    };

    let _ = cmd_tx.send(Command::Quit);
    handle.await.context("Search orchestrator panicked")?;

    match outcome {
        Some(session) if session.loading_state == LoadingState::Success => {
            print_results(&session);
            Ok(())
        }
        Some(session) => {
            let message = session
                .error_message(locale)
                .unwrap_or_else(|| "Search did not complete".to_string());
            anyhow::bail!(message)
        }
        None => Ok(()),
    }
}

/// 跟随会话快照直到成功或不可再重试的错误
async fn follow(
    state_rx: &mut watch::Receiver<SearchSession>,
    cmd_tx: &mpsc::UnboundedSender<Command>,
    max_retries: u32,
) -> Option<SearchSession> {
    // 已处理过错误的那次搜索（以开始时刻区分）
    let mut handled: Option<Instant> = None;
    let mut last_stage: Option<(String, u64)> = None;

    loop {
        let session = state_rx.borrow_and_update().clone();
        match session.loading_state {
            LoadingState::Loading => {
                if let Some(status) = &session.last_status {
                    let key = (status.stage.clone(), status.progress);
                    if last_stage.as_ref() != Some(&key) {
                        print_status(status);
                        last_stage = Some(key);
                    }
                }
            }
            LoadingState::Success => return Some(session),
            LoadingState::Error if session.started_at != handled => {
                handled = session.started_at;
                let retryable = session
                    .last_error
                    .as_ref()
                    .map(|e| e.code.is_transport())
                    .unwrap_or(false);
                if !retryable || !session.can_retry(max_retries) {
                    return Some(session);
                }
                if let Some(err) = &session.last_error {
                    eprintln!("{}; retrying ({}/{})", err, session.retry_count + 1, max_retries);
                }
                if cmd_tx.send(Command::Retry).is_err() {
                    return Some(session);
                }
            }
            _ => {}
        }

        if state_rx.changed().await.is_err() {
            return None;
        }
    }
}

fn print_status(status: &StatusPayload) {
    let at = DateTime::from_timestamp_millis(status.timestamp)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    eprintln!(
        "[{}] {} {}/{} {}",
        at, status.stage, status.progress, status.total, status.message
    );
}

fn print_results(session: &SearchSession) {
    if !session.queries.is_empty() {
        println!("Queries: {}", session.queries.join(" | "));
    }
    println!(
        "{} results in {}",
        session.results.len(),
        format_elapsed(session.elapsed_ms)
    );
    for (i, item) in session.results.iter().enumerate() {
        println!();
        println!("{:>2}. {} ({:.2})", i + 1, item.title, item.score);
        println!("    {}", item.url);
        if !item.snippet.is_empty() {
            println!("    {}", item.snippet);
        }
    }
}
