//! Scout - 流式搜索客户端
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与文案、重连 / 重试策略、搜索会话、编排器
//! - **gateway**: 信封协议、WebSocket 连接管理、HTTP 回退通道
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod gateway;
pub mod observability;
