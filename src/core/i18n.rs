//! 面向用户的错误文案
//!
//! UI 只展示按错误码查表得到的本地化文案；查不到时使用固定模板嵌入原始信息。

use serde::Deserialize;

use super::error::{ErrorCode, ErrorRecord};

/// 界面语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Zh,
}

fn lookup_en(code: &ErrorCode) -> Option<&'static str> {
    let msg = match code {
        ErrorCode::InvalidRequest => "The search request is malformed.",
        ErrorCode::ValidationFailed => "Please check the search parameters and try again.",
        ErrorCode::MissingApiKey => "The search service is not configured: the API key is missing.",
        ErrorCode::QueryGenerationFailed => "Could not generate search queries for this prompt.",
        ErrorCode::SearchFailed => "The search engines did not respond. Please try again.",
        ErrorCode::ContentFetchFailed => "Could not fetch page content for analysis.",
        ErrorCode::ResponseEncodingFailed => "The server could not encode the response.",
        ErrorCode::InternalError => "Internal server error.",
        ErrorCode::ConnectionFailed => "Could not connect to the search server.",
        ErrorCode::ConnectionLost => "The connection was lost while searching.",
        ErrorCode::Timeout => "The search took too long and was cancelled.",
        ErrorCode::NetworkError => "Network is unreachable. Check your connection.",
        ErrorCode::HttpError => "The server returned an unexpected HTTP response.",
        ErrorCode::UnknownError => return None,
    };
    Some(msg)
}

fn lookup_zh(code: &ErrorCode) -> Option<&'static str> {
    let msg = match code {
        ErrorCode::InvalidRequest => "搜索请求格式不正确。",
        ErrorCode::ValidationFailed => "请检查搜索参数后重试。",
        ErrorCode::MissingApiKey => "搜索服务未配置 API Key。",
        ErrorCode::QueryGenerationFailed => "无法为该问题生成搜索查询。",
        ErrorCode::SearchFailed => "搜索引擎没有响应，请重试。",
        ErrorCode::ContentFetchFailed => "无法获取页面内容进行分析。",
        ErrorCode::ResponseEncodingFailed => "服务端无法编码响应。",
        ErrorCode::InternalError => "服务器内部错误。",
        ErrorCode::ConnectionFailed => "无法连接到搜索服务器。",
        ErrorCode::ConnectionLost => "搜索过程中连接已断开。",
        ErrorCode::Timeout => "搜索超时，已取消。",
        ErrorCode::NetworkError => "网络不可达，请检查网络连接。",
        ErrorCode::HttpError => "服务器返回了异常的 HTTP 响应。",
        ErrorCode::UnknownError => return None,
    };
    Some(msg)
}

/// 错误码对应的本地化文案；未映射的码返回 None
pub fn localized(code: &ErrorCode, locale: Locale) -> Option<&'static str> {
    match locale {
        Locale::En => lookup_en(code),
        Locale::Zh => lookup_zh(code),
    }
}

/// 最终展示给用户的文案
pub fn user_message(record: &ErrorRecord, locale: Locale) -> String {
    if let Some(msg) = localized(&record.code, locale) {
        return msg.to_string();
    }
    // UNKNOWN_ERROR 包装的原始信息在 details 中
    let raw = match (record.code, record.details.as_deref()) {
        (ErrorCode::UnknownError, Some(details)) => details,
        _ => record.message.as_str(),
    };
    match locale {
        Locale::En => format!("Unknown error: {}", raw),
        Locale::Zh => format!("未知错误: {}", raw),
    }
}
