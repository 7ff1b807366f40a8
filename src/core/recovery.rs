//! 错误恢复引擎
//!
//! 根据 LlmError 类型返回 RecoveryAction，供容错层决定是在同一 Provider 上退避重试、切换到下一个 Provider 还是终止。

use std::time::Duration;

use crate::llm::LlmError;

/// 单次 Provider 失败后的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待 delay 后在同一 Provider 上重试（仅瞬时错误且仍有重试次数）
    RetrySameProvider { delay: Duration },
    /// 放弃当前 Provider，尝试链中的下一个
    NextProvider,
    /// 终止整条链（调用方已取消）
    Abort,
}

/// 指数退避：base * 2^(attempt-1)，上限 max
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RecoveryEngine {
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            backoff_base,
            backoff_max,
        }
    }

    /// attempt 从 1 开始；max_attempts 为每个 Provider 的尝试上限
    pub fn handle(&self, err: &LlmError, attempt: u32, max_attempts: u32) -> RecoveryAction {
        match err {
            LlmError::Cancelled => RecoveryAction::Abort,
            // 认证失败、内容不合格：重试同一 Provider 只会浪费时延预算
            LlmError::Auth(_) | LlmError::InvalidResponse(_) => RecoveryAction::NextProvider,
            e if e.is_transient() && attempt < max_attempts => RecoveryAction::RetrySameProvider {
                delay: self.backoff(attempt),
            },
            _ => RecoveryAction::NextProvider,
        }
    }

    /// 第 attempt 次失败后的退避时长
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// 单个 Provider 用满 max_attempts 时的退避总和
    pub fn total_backoff(&self, max_attempts: u32) -> Duration {
        let mut total = Duration::ZERO;
        for attempt in 1..max_attempts {
            let delay = self.backoff(attempt);
            // 到达上限或倍数饱和（2^31 之后）后每次退避相同
            if delay >= self.backoff_max || attempt > 32 {
                let remaining = max_attempts - attempt;
                let rest = delay.checked_mul(remaining).unwrap_or(Duration::MAX);
                return total.saturating_add(rest);
            }
            total = total.saturating_add(delay);
        }
        total
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_millis(2000))
    }
}
