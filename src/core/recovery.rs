//! 恢复策略
//!
//! 两套互相独立的退避：
//! - [`ReconnectPolicy`]：传输层重连，指数退避并封顶
//! - [`RetryPolicy`]：逻辑搜索重试，线性退避

use std::time::Duration;

/// 传输层重连策略：第 n 次（从 0 计）等待 `min(base * 2^n, cap)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            base,
            cap,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 已用 attempts 次时是否还允许再安排一次重连
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(1000), Duration::from_millis(30_000))
    }
}

/// 搜索重试策略：第 k 次重试（从 1 计）等待 `unit * k`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, unit: Duration) -> Self {
        Self { max_retries, unit }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn allows(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    pub fn delay(&self, retry_count: u32) -> Duration {
        self.unit.saturating_mul(retry_count)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}
