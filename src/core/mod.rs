//! 核心编排层：错误分类与文案、重连 / 重试策略、搜索会话状态、主控循环

pub mod error;
pub mod i18n;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use error::{ClientError, ErrorCode, ErrorRecord};
pub use i18n::{localized, user_message, Locale};
pub use orchestrator::{spawn_orchestrator, Command};
pub use recovery::{ReconnectPolicy, RetryPolicy};
pub use state::{format_elapsed, LoadingState, SearchSession};
