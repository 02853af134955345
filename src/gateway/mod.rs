//! 搜索服务网关（客户端侧）
//!
//! ## 流式通道
//!
//! - **message**：`{type, data}` 信封与各类载荷，入站消息在此处解析、校验
//! - **transport**：`Connector` 抽象与基于 tokio-tungstenite 的 WebSocket 实现
//! - **connection**：连接管理器，独占一条连接，负责重连与入站分发
//!
//! ## 回退通道
//!
//! - **http**：一次性 POST 请求，用于未启用流式通道的场景

mod connection;
mod http;
mod message;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionSnapshot, ConnectionState,
};
pub use http::{FallbackClient, SearchOutcome};
pub use message::{
    Envelope, EnvelopeError, FieldViolation, ResultItem, ResultPayload, SearchRequest,
    SearchSettings, StatusPayload,
};
pub use transport::{
    Connector, Frame, Link, Outbound, Peer, WsConnector, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
    NO_STATUS_RECEIVED,
};
