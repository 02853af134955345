//! 错误分类：服务端业务错误码、客户端传输错误，以及统一的 ErrorRecord
//!
//! 传输层异常在连接管理器 / 回退通道边界被归一化为 ErrorRecord，编排器只看到 ErrorRecord。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误码（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ErrorCode {
    // 服务端业务错误
    InvalidRequest,
    ValidationFailed,
    MissingApiKey,
    QueryGenerationFailed,
    SearchFailed,
    ContentFetchFailed,
    ResponseEncodingFailed,
    InternalError,
    // 客户端检测到的传输错误
    ConnectionFailed,
    ConnectionLost,
    Timeout,
    NetworkError,
    HttpError,
    /// 兜底
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::MissingApiKey => "MISSING_API_KEY",
            ErrorCode::QueryGenerationFailed => "QUERY_GENERATION_FAILED",
            ErrorCode::SearchFailed => "SEARCH_FAILED",
            ErrorCode::ContentFetchFailed => "CONTENT_FETCH_FAILED",
            ErrorCode::ResponseEncodingFailed => "RESPONSE_ENCODING_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::HttpError => "HTTP_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 是否由客户端在传输边界检测到
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionLost
                | ErrorCode::Timeout
                | ErrorCode::NetworkError
                | ErrorCode::HttpError
        )
    }
}

/// 不在封闭集合中的错误码
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown error code: {0}")]
pub struct UnknownCode(pub String);

impl TryFrom<String> for ErrorCode {
    type Error = UnknownCode;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        let known = match code.as_str() {
            "INVALID_REQUEST" => ErrorCode::InvalidRequest,
            "VALIDATION_FAILED" => ErrorCode::ValidationFailed,
            "MISSING_API_KEY" => ErrorCode::MissingApiKey,
            "QUERY_GENERATION_FAILED" => ErrorCode::QueryGenerationFailed,
            "SEARCH_FAILED" => ErrorCode::SearchFailed,
            "CONTENT_FETCH_FAILED" => ErrorCode::ContentFetchFailed,
            "RESPONSE_ENCODING_FAILED" => ErrorCode::ResponseEncodingFailed,
            "INTERNAL_ERROR" => ErrorCode::InternalError,
            "CONNECTION_FAILED" => ErrorCode::ConnectionFailed,
            "CONNECTION_LOST" => ErrorCode::ConnectionLost,
            "TIMEOUT" => ErrorCode::Timeout,
            "NETWORK_ERROR" => ErrorCode::NetworkError,
            "HTTP_ERROR" => ErrorCode::HttpError,
            "UNKNOWN_ERROR" => ErrorCode::UnknownError,
            _ => return Err(UnknownCode(code)),
        };
        Ok(known)
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化错误记录（与服务端 `error` 载荷同形）
///
/// 反序列化时，集合外的错误码被归入 UNKNOWN_ERROR，原始码与信息写入 details。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireErrorRecord")]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Deserialize)]
struct WireErrorRecord {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<String>,
}

impl From<WireErrorRecord> for ErrorRecord {
    fn from(wire: WireErrorRecord) -> Self {
        match ErrorCode::try_from(wire.code) {
            Ok(code) => Self {
                code,
                message: wire.message,
                details: wire.details,
            },
            Err(UnknownCode(code)) => {
                let mut raw = format!("{}: {}", code, wire.message);
                if let Some(details) = wire.details {
                    raw.push_str(&format!(" ({})", details));
                }
                Self::new(ErrorCode::UnknownError, wire.message).with_details(raw)
            }
        }
    }
}

impl ErrorRecord {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn connection_failed() -> Self {
        Self::new(ErrorCode::ConnectionFailed, "Failed to restore the connection")
            .with_details("Maximum reconnection attempts exceeded")
    }

    pub fn connection_lost() -> Self {
        Self::new(
            ErrorCode::ConnectionLost,
            "Connection to the server was lost during the search",
        )
    }

    /// 将任意值归一化为 ErrorRecord：结构合法则原样使用，否则包装为 UNKNOWN_ERROR 并把原始信息放进 details
    pub fn normalize(value: serde_json::Value) -> Self {
        if let Ok(record) = serde_json::from_value::<ErrorRecord>(value.clone()) {
            return record;
        }
        let details = match &value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => match map.get("message") {
                Some(serde_json::Value::String(msg)) => msg.clone(),
                _ => value.to_string(),
            },
            other => other.to_string(),
        };
        Self::new(ErrorCode::UnknownError, "Unexpected error").with_details(details)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// 客户端库错误（连接、发送、编排器命令）
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket not connected")]
    NotConnected,

    #[error("WebSocket connection failed: {0}")]
    Connect(String),

    #[error("Connection attempt timed out after {0} ms")]
    ConnectTimeout(u64),

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("A search is already in progress")]
    Busy,

    /// 后台任务已退出
    #[error("Client task closed")]
    Closed,
}

impl ClientError {
    /// 传输边界的错误归一化
    pub fn to_record(&self) -> ErrorRecord {
        match self {
            ClientError::NotConnected | ClientError::Connect(_) | ClientError::Closed => {
                ErrorRecord::new(ErrorCode::ConnectionFailed, "Could not connect to the search server")
                    .with_details(self.to_string())
            }
            ClientError::ConnectTimeout(_) => {
                ErrorRecord::new(ErrorCode::ConnectionFailed, "Connection attempt timed out")
                    .with_details(self.to_string())
            }
            ClientError::Serialize(e) => {
                ErrorRecord::new(ErrorCode::InvalidRequest, "Failed to encode the request")
                    .with_details(e.to_string())
            }
            ClientError::Busy => ErrorRecord::new(ErrorCode::UnknownError, self.to_string()),
        }
    }
}
