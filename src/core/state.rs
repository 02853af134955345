//! 搜索会话状态：UI 渲染的唯一数据源
//!
//! 状态迁移都是纯函数式的方法（不做 IO），由编排器在处理命令 / 连接事件时调用；
//! UI 只读取快照与派生视图（is_loading、has_error、耗时格式化、错误文案）。

use serde::Serialize;
use tokio::time::Instant;

use super::error::ErrorRecord;
use super::i18n::{user_message, Locale};
use crate::gateway::{ResultItem, SearchRequest, SearchSettings, StatusPayload};

/// 加载阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingState {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// 单个编排器持有的搜索会话
#[derive(Clone, Debug, Default, Serialize)]
pub struct SearchSession {
    pub loading_state: LoadingState,
    pub prompt: String,
    pub settings: SearchSettings,
    #[serde(skip)]
    pub started_at: Option<Instant>,
    /// 结束后冻结的耗时（毫秒）
    pub elapsed_ms: u64,
    pub last_status: Option<StatusPayload>,
    pub last_error: Option<ErrorRecord>,
    pub retry_count: u32,
    /// 最近一次 search 的参数，供 retry 使用
    pub last_params: Option<SearchRequest>,
    pub results: Vec<ResultItem>,
    pub queries: Vec<String>,
}

impl SearchSession {
    /// idle | success | error -> loading
    pub fn begin(&mut self, request: SearchRequest, now: Instant) {
        self.loading_state = LoadingState::Loading;
        self.last_error = None;
        self.prompt = request.prompt.clone();
        self.settings = request.settings.clone();
        self.last_params = Some(request);
        self.started_at = Some(now);
        self.elapsed_ms = 0;
        self.last_status = None;
    }

    /// 仅在 loading 时记录进度
    pub fn apply_status(&mut self, status: StatusPayload) -> bool {
        if self.loading_state != LoadingState::Loading {
            return false;
        }
        self.last_status = Some(status);
        true
    }

    /// loading -> success
    pub fn apply_result(&mut self, results: Vec<ResultItem>, queries: Vec<String>, elapsed_ms: u64) -> bool {
        if self.loading_state != LoadingState::Loading {
            return false;
        }
        self.results = results;
        self.queries = queries;
        self.elapsed_ms = elapsed_ms;
        self.loading_state = LoadingState::Success;
        self.retry_count = 0;
        self.last_status = None;
        true
    }

    /// loading -> error；已处于 error 时只替换 last_error
    pub fn apply_error(&mut self, record: ErrorRecord, now: Instant) -> bool {
        match self.loading_state {
            LoadingState::Loading => {
                self.elapsed_ms = self.measured_ms(now);
            }
            LoadingState::Error => {}
            LoadingState::Idle | LoadingState::Success => return false,
        }
        self.last_error = Some(record);
        self.loading_state = LoadingState::Error;
        self.last_status = None;
        true
    }

    /// 搜索进行中断开连接 -> CONNECTION_LOST
    pub fn apply_disconnect(&mut self, now: Instant) -> bool {
        if self.loading_state != LoadingState::Loading {
            return false;
        }
        self.apply_error(ErrorRecord::connection_lost(), now)
    }

    /// error -> idle
    pub fn clear_error(&mut self) {
        self.last_error = None;
        if self.loading_state == LoadingState::Error {
            self.loading_state = LoadingState::Idle;
        }
    }

    pub fn clear_results(&mut self) {
        *self = SearchSession::default();
    }

    pub fn is_loading(&self) -> bool {
        self.loading_state == LoadingState::Loading
    }

    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    /// 是否展示“重试”：有错误、还有重试次数、且有可复用的参数
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.has_error() && self.retry_count < max_retries && self.last_params.is_some()
    }

    /// loading 时为实时耗时，否则为冻结值
    pub fn live_elapsed_ms(&self, now: Instant) -> u64 {
        if self.is_loading() {
            self.measured_ms(now)
        } else {
            self.elapsed_ms
        }
    }

    pub fn elapsed_display(&self, now: Instant) -> String {
        format_elapsed(self.live_elapsed_ms(now))
    }

    /// 面向用户的错误文案
    pub fn error_message(&self, locale: Locale) -> Option<String> {
        self.last_error.as_ref().map(|e| user_message(e, locale))
    }

    fn measured_ms(&self, now: Instant) -> u64 {
        self.started_at
            .map(|start| now.saturating_duration_since(start).as_millis() as u64)
            .unwrap_or(0)
    }
}

/// 按量级格式化耗时：`420ms` / `1.5s` / `2m 5s`
pub fn format_elapsed(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let secs = ms / 1000;
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
