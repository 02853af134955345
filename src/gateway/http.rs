//! 非流式回退通道：一次性 POST 搜索请求
//!
//! 超时 / 网络不可达 / HTTP 异常在这里被归一化为 ErrorRecord。

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::message::{ResultItem, SearchRequest};
use crate::core::{ErrorCode, ErrorRecord};

/// 回退通道的成功响应
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchOutcome {
    #[serde(default)]
    pub results: Vec<ResultItem>,
    #[serde(default)]
    pub queries: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorRecord,
}

/// HTTP 回退客户端
#[derive(Clone)]
pub struct FallbackClient {
    client: Client,
    url: String,
    timeout: Duration,
}

impl FallbackClient {
    /// 构建失败（如 TLS 后端初始化失败）时返回错误，不退回无超时的默认客户端
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome, ErrorRecord> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorBody>(&body) {
                Ok(ErrorBody { error }) => error,
                Err(_) => ErrorRecord::new(ErrorCode::HttpError, format!("HTTP {}", status.as_u16()))
                    .with_details(truncate(&body, 200)),
            });
        }

        serde_json::from_str::<SearchOutcome>(&body).map_err(|e| {
            ErrorRecord::new(ErrorCode::UnknownError, "Unexpected response from the server")
                .with_details(e.to_string())
        })
    }

    fn classify(&self, err: reqwest::Error) -> ErrorRecord {
        if err.is_timeout() {
            ErrorRecord::new(
                ErrorCode::Timeout,
                format!("No response within {} ms", self.timeout.as_millis()),
            )
        } else if err.is_connect() || err.is_request() {
            ErrorRecord::new(ErrorCode::NetworkError, "Server is unreachable").with_details(err.to_string())
        } else if let Some(status) = err.status() {
            ErrorRecord::new(ErrorCode::HttpError, format!("HTTP {}", status.as_u16()))
        } else {
            ErrorRecord::new(ErrorCode::UnknownError, "Request failed").with_details(err.to_string())
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}
