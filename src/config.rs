//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCOUT__*` 覆盖（双下划线表示嵌套，如 `SCOUT__STREAM__ENDPOINT=ws://host/api/ws/search`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{Locale, ReconnectPolicy, RetryPolicy};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub stream: StreamSection,
    pub retry: RetrySection,
    pub fallback: FallbackSection,
    pub validation: ValidationSection,
}

/// 搜索请求走哪条通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// WebSocket 流式通道（默认）
    #[default]
    Streaming,
    /// 一次性 POST 请求
    Fallback,
}

/// [app] 段：界面语言、通道选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub locale: Locale,
    pub transport: TransportMode,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            locale: Locale::En,
            transport: TransportMode::Streaming,
        }
    }
}

/// [stream] 段：流式端点与连接超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub endpoint: String,
    /// 建立连接的超时（毫秒）
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectSection,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/api/ws/search".to_string(),
            connect_timeout_ms: 10_000,
            reconnect: ReconnectSection::default(),
        }
    }
}

impl StreamSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// [stream.reconnect] 段：传输层重连（指数退避）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectSection {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// [retry] 段：逻辑搜索重试（线性退避），与传输层重连相互独立
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub delay_unit_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_unit_ms: 1000,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.delay_unit_ms))
    }
}

/// [fallback] 段：非流式回退通道
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/api/search".to_string(),
            timeout_ms: 120_000,
        }
    }
}

impl FallbackSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// [validation] 段：发送前的请求校验上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub max_prompt_length: usize,
    pub max_queries: u32,
    pub max_engines: usize,
    pub supported_engines: Vec<String>,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            max_prompt_length: 1000,
            max_queries: 20,
            max_engines: 10,
            supported_engines: default_supported_engines(),
        }
    }
}

fn default_supported_engines() -> Vec<String> {
    [
        "google",
        "bing",
        "duckduckgo",
        "brave",
        "qwant",
        "yandex",
        "wikipedia",
        "github",
        "stackoverflow",
        "reddit",
        "youtube",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// 从 config 目录加载配置，环境变量 SCOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCOUT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCOUT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
