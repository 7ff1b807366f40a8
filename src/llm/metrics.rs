//! Provider 调用统计
//!
//! 所有线程共享同一份统计，内部加锁；snapshot 返回拷贝供日志或监控读取。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::llm::LlmError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub invalid_responses: u64,
    pub total_latency_ms: u64,
}

impl ProviderStats {
    pub fn average_latency_ms(&self) -> u64 {
        if self.calls == 0 {
            0
        } else {
            self.total_latency_ms / self.calls
        }
    }
}

#[derive(Debug, Default)]
pub struct ProviderMetrics {
    stats: Mutex<HashMap<String, ProviderStats>>,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_stats(&self, provider: &str, f: impl FnOnce(&mut ProviderStats)) {
        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(stats.entry(provider.to_string()).or_default());
    }

    /// 记录一次被接受的调用
    pub fn record_success(&self, provider: &str, elapsed: Duration) {
        self.with_stats(provider, |s| {
            s.calls += 1;
            s.successes += 1;
            s.total_latency_ms += elapsed.as_millis() as u64;
        });
    }

    /// 记录一次失败的调用（含校验不通过）
    pub fn record_failure(&self, provider: &str, error: &LlmError, elapsed: Duration) {
        self.with_stats(provider, |s| {
            s.calls += 1;
            s.failures += 1;
            s.total_latency_ms += elapsed.as_millis() as u64;
            match error {
                LlmError::Timeout(_) => s.timeouts += 1,
                LlmError::InvalidResponse(_) => s.invalid_responses += 1,
                _ => {}
            }
        });
    }

    pub fn get(&self, provider: &str) -> ProviderStats {
        self.snapshot().remove(provider).unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<String, ProviderStats> {
        match self.stats.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
