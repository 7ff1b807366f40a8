//! 可观测性：日志初始化与 Provider 统计输出

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::llm::ProviderMetrics;

/// 默认 info，可通过 RUST_LOG 覆盖；重复调用时忽略
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 将各 Provider 的调用统计写入日志
pub fn log_provider_metrics(metrics: &ProviderMetrics) {
    let mut snapshot: Vec<_> = metrics.snapshot().into_iter().collect();
    snapshot.sort_by(|a, b| a.0.cmp(&b.0));
    for (provider, stats) in snapshot {
        tracing::info!(
            provider = %provider,
            calls = stats.calls,
            successes = stats.successes,
            failures = stats.failures,
            timeouts = stats.timeouts,
            invalid_responses = stats.invalid_responses,
            avg_latency_ms = stats.average_latency_ms(),
            "Provider stats"
        );
    }
}
