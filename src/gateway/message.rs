//! 流式通道消息协议定义
//!
//! 所有消息都是 `{type, data}` 信封；入站消息在边界处按类型解析并校验载荷，
//! 不合法的消息被丢弃，不会以无类型 JSON 的形式流入编排器。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ValidationSection;
use crate::core::ErrorRecord;

/// 搜索设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    /// 需要生成的搜索查询数量（≥ 1）
    pub queries: u32,
    /// 是否抓取并分析页面内容
    pub content_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engines: Option<Vec<String>>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            queries: 3,
            content_mode: false,
            engines: None,
        }
    }
}

/// 搜索请求（`search` 载荷）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub prompt: String,
    pub settings: SearchSettings,
}

/// 单条校验失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl SearchRequest {
    pub fn new(prompt: impl Into<String>, settings: SearchSettings) -> Self {
        Self {
            prompt: prompt.into(),
            settings,
        }
    }

    /// 清理输入：去掉 prompt 首尾空白；engines 转小写、去空、去重（保持顺序）
    pub fn sanitize(&mut self) {
        self.prompt = self.prompt.trim().to_string();

        if let Some(engines) = self.settings.engines.take() {
            let mut seen = HashSet::new();
            let unique: Vec<String> = engines
                .into_iter()
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty() && seen.insert(e.clone()))
                .collect();
            self.settings.engines = if unique.is_empty() { None } else { Some(unique) };
        }
    }

    /// 校验请求，返回全部违规项
    pub fn validate(&self, limits: &ValidationSection) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        if self.prompt.trim().is_empty() {
            violations.push(FieldViolation {
                field: "prompt",
                message: "prompt cannot be empty".to_string(),
            });
        }
        if self.prompt.chars().count() > limits.max_prompt_length {
            violations.push(FieldViolation {
                field: "prompt",
                message: format!("prompt cannot exceed {} characters", limits.max_prompt_length),
            });
        }
        if self.settings.queries < 1 || self.settings.queries > limits.max_queries {
            violations.push(FieldViolation {
                field: "settings.queries",
                message: format!("queries must be between 1 and {}", limits.max_queries),
            });
        }
        if let Some(engines) = &self.settings.engines {
            for engine in engines {
                if !limits.supported_engines.iter().any(|s| s == engine) {
                    violations.push(FieldViolation {
                        field: "settings.engines",
                        message: format!("invalid engine: {}", engine),
                    });
                }
            }
            if engines.len() > limits.max_engines {
                violations.push(FieldViolation {
                    field: "settings.engines",
                    message: format!("cannot specify more than {} engines", limits.max_engines),
                });
            }
        }

        violations
    }
}

/// 进度状态（`status` 载荷）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub stage: String,
    pub progress: u64,
    pub total: u64,
    pub message: String,
    /// 服务端时间戳（毫秒）
    pub timestamp: i64,
}

/// 单条搜索结果，核心逻辑只做透传
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub score: f64,
}

/// 最终结果（`search_complete` 载荷）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub queries: Vec<String>,
    pub results: Vec<ResultItem>,
    pub elapsed_ms: u64,
}

/// 信封（`{type, data}`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    /// 客户端 -> 服务端
    Search(SearchRequest),
    Status(StatusPayload),
    SearchComplete(ResultPayload),
    Error(ErrorRecord),
}

/// 入站解析失败
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown message type: {0}")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl Envelope {
    pub fn search(request: SearchRequest) -> Self {
        Envelope::Search(request)
    }

    /// 解析入站文本；`error` 载荷不合法时归一化为 UNKNOWN_ERROR 而不是丢弃
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(EnvelopeError::Malformed)?;
        let invalid = |source| EnvelopeError::InvalidPayload {
            kind: raw.kind.clone(),
            source,
        };

        match raw.kind.as_str() {
            "status" => serde_json::from_value(raw.data.clone())
                .map(Envelope::Status)
                .map_err(invalid),
            "search_complete" => serde_json::from_value(raw.data.clone())
                .map(Envelope::SearchComplete)
                .map_err(invalid),
            "error" => Ok(Envelope::Error(ErrorRecord::normalize(raw.data.clone()))),
            "search" => serde_json::from_value(raw.data.clone())
                .map(Envelope::Search)
                .map_err(invalid),
            _ => Err(EnvelopeError::UnknownType(raw.kind.clone())),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Search(_) => "search",
            Envelope::Status(_) => "status",
            Envelope::SearchComplete(_) => "search_complete",
            Envelope::Error(_) => "error",
        }
    }
}
