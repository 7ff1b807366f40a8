//! 容错调用层：有序 Provider 链 + 每 Provider 重试退避 + 响应校验
//!
//! 对每个 Provider（按 priority 升序）：
//! 1. 以该 Provider 的超时调用 ModelInvoker
//! 2. 校验响应（空文本、短于 min_response_chars 视为失败，不返回给调用方）
//! 3. 失败时由 RecoveryEngine 决定同 Provider 退避重试或切换到下一个
//!
//! 全部失败返回 ExhaustedError，按链顺序每个 Provider 一条失败记录。
//! 单次 invoke 的时延上界见 [`ResilientClient::max_latency`]。

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::{RecoveryAction, RecoveryEngine};
use crate::llm::{ChainedProvider, LlmError, ModelInvoker, ProviderChain, ProviderMetrics};

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 每个 Provider 的最大尝试次数（1 表示不做 Provider 内重试）
    pub retries_per_provider: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries_per_provider: 1,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_millis(2000),
        }
    }
}

/// 单次尝试记录
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub provider: String,
    pub attempt: u32,
    pub elapsed: Duration,
    /// None 表示该次尝试被接受
    pub error: Option<LlmError>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// 成功的调用结果
#[derive(Debug, Clone)]
pub struct Invocation {
    pub text: String,
    pub provider: String,
    pub attempts: Vec<AttemptRecord>,
}

impl Invocation {
    pub fn failure_count(&self) -> usize {
        self.attempts.iter().filter(|a| !a.succeeded()).count()
    }

    pub fn success_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.succeeded()).count()
    }
}

/// 单个 Provider 的最终失败原因
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    pub attempts: u32,
    pub error: LlmError,
}

/// 链上所有 Provider 均失败（或调用被取消）
#[derive(Error, Debug, Clone, PartialEq)]
#[error("All providers exhausted: {}", summarize(.failures))]
pub struct ExhaustedError {
    pub failures: Vec<ProviderFailure>,
}

fn summarize(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{} x{}: {}", f.provider, f.attempts, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ExhaustedError {
    pub fn was_cancelled(&self) -> bool {
        self.failures
            .last()
            .is_some_and(|f| f.error == LlmError::Cancelled)
    }

    /// 诊断用的失败原因列表（链顺序）
    pub fn reasons(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.provider, f.error))
            .collect()
    }
}

/// 包装 Provider 链的容错客户端
pub struct ResilientClient {
    chain: ProviderChain,
    invoker: ModelInvoker,
    recovery: RecoveryEngine,
    retries_per_provider: u32,
    min_response_chars: usize,
    metrics: Arc<ProviderMetrics>,
}

impl ResilientClient {
    pub fn new(chain: ProviderChain, retry: RetryConfig, min_response_chars: usize) -> Self {
        Self {
            chain,
            invoker: ModelInvoker::new(),
            recovery: RecoveryEngine::new(retry.backoff_base, retry.backoff_max),
            retries_per_provider: retry.retries_per_provider.max(1),
            min_response_chars,
            metrics: Arc::new(ProviderMetrics::new()),
        }
    }

    /// 与其他组件共享统计
    pub fn with_metrics(mut self, metrics: Arc<ProviderMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    /// 单次 invoke 的时延上界：
    /// Σ(provider.timeout × retries_per_provider) + 每个 Provider 重试间的退避总和
    pub fn max_latency(&self) -> Duration {
        let per_provider_backoff = self.recovery.total_backoff(self.retries_per_provider);
        self.chain
            .iter()
            .map(|p| {
                p.descriptor
                    .timeout
                    .checked_mul(self.retries_per_provider)
                    .unwrap_or(Duration::MAX)
                    .saturating_add(per_provider_backoff)
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// 响应校验：拒绝空文本与过短文本
    fn validate(&self, text: String) -> Result<String, LlmError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(LlmError::InvalidResponse("empty response".to_string()));
        }
        let chars = trimmed.chars().count();
        if chars < self.min_response_chars {
            return Err(LlmError::InvalidResponse(format!(
                "response too short ({} < {} chars)",
                chars, self.min_response_chars
            )));
        }
        Ok(trimmed.to_string())
    }

    /// 按链顺序调用，返回第一个通过校验的响应
    pub async fn invoke(&self, prompt: &str, cancel: &CancellationToken) -> Result<Invocation, ExhaustedError> {
        let mut attempts = Vec::new();
        let mut failures = Vec::new();

        for provider in self.chain.iter() {
            match self.try_provider(provider, prompt, cancel, &mut attempts).await {
                Ok(text) => {
                    return Ok(Invocation {
                        text,
                        provider: provider.descriptor.name.clone(),
                        attempts,
                    });
                }
                Err(failure) => {
                    let abort = failure.error == LlmError::Cancelled;
                    failures.push(failure);
                    if abort {
                        break;
                    }
                }
            }
        }

        let err = ExhaustedError { failures };
        if err.was_cancelled() {
            tracing::info!(reasons = ?err.reasons(), "Provider chain cancelled");
        } else {
            tracing::error!(reasons = ?err.reasons(), "All providers exhausted");
        }
        Err(err)
    }

    async fn try_provider(
        &self,
        provider: &ChainedProvider,
        prompt: &str,
        cancel: &CancellationToken,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<String, ProviderFailure> {
        let name = provider.descriptor.name.as_str();
        let timeout = provider.descriptor.timeout;
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let result = self
                .invoker
                .call(provider, prompt, timeout, cancel)
                .await
                .and_then(|text| self.validate(text));
            let elapsed = started.elapsed();

            let error = match result {
                Ok(text) => {
                    self.metrics.record_success(name, elapsed);
                    tracing::info!(
                        provider = name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        chars = text.chars().count(),
                        "Provider call succeeded"
                    );
                    attempts.push(AttemptRecord {
                        provider: name.to_string(),
                        attempt,
                        elapsed,
                        error: None,
                    });
                    return Ok(text);
                }
                Err(e) => e,
            };

            if error != LlmError::Cancelled {
                self.metrics.record_failure(name, &error, elapsed);
            }
            tracing::warn!(
                provider = name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %error,
                "Provider call failed"
            );
            attempts.push(AttemptRecord {
                provider: name.to_string(),
                attempt,
                elapsed,
                error: Some(error.clone()),
            });

            match self.recovery.handle(&error, attempt, self.retries_per_provider) {
                RecoveryAction::RetrySameProvider { delay } => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(ProviderFailure {
                                provider: name.to_string(),
                                attempts: attempt,
                                error: LlmError::Cancelled,
                            });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                RecoveryAction::NextProvider | RecoveryAction::Abort => {
                    return Err(ProviderFailure {
                        provider: name.to_string(),
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, Scripted, ScriptedLlmClient};

    const VALID: &str = "Here are three apartments in Brickell that match your budget of $2,500 per month.";

    fn scripted(steps: Vec<Scripted>) -> Arc<ScriptedLlmClient> {
        Arc::new(ScriptedLlmClient::new(steps))
    }

    fn chain(providers: Vec<(&str, Duration, Arc<ScriptedLlmClient>)>) -> ProviderChain {
        let mut builder = ProviderChain::builder();
        for (name, timeout, client) in providers {
            let client: Arc<dyn LlmClient> = client;
            builder = builder.remote(name, timeout, client);
        }
        builder.build()
    }

    fn client(chain: ProviderChain, retries: u32) -> ResilientClient {
        ResilientClient::new(
            chain,
            RetryConfig {
                retries_per_provider: retries,
                backoff_base: Duration::from_millis(5),
                backoff_max: Duration::from_millis(20),
            },
            20,
        )
    }

    #[tokio::test]
    async fn test_primary_success_single_attempt() {
        let primary = scripted(vec![Scripted::ok(VALID)]);
        let secondary = scripted(vec![Scripted::ok(VALID)]);
        let rc = client(
            chain(vec![
                ("primary", Duration::from_millis(100), primary.clone()),
                ("secondary", Duration::from_millis(100), secondary.clone()),
            ]),
            1,
        );
        let inv = rc.invoke("p", &CancellationToken::new()).await.unwrap();
        assert_eq!(inv.provider, "primary");
        assert_eq!(inv.attempts.len(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_primary_timeout_falls_back_to_secondary() {
        let secondary_text = "x".repeat(120);
        let primary = scripted(vec![Scripted::hang()]);
        let secondary = scripted(vec![Scripted::ok(secondary_text.clone())]);
        let rc = client(
            chain(vec![
                ("primary", Duration::from_millis(30), primary),
                ("secondary", Duration::from_millis(200), secondary),
            ]),
            1,
        );
        let inv = rc.invoke("p", &CancellationToken::new()).await.unwrap();
        assert_eq!(inv.provider, "secondary");
        assert_eq!(inv.text, secondary_text);
        assert_eq!(inv.failure_count(), 1);
        assert_eq!(inv.success_count(), 1);
        assert!(matches!(inv.attempts[0].error, Some(LlmError::Timeout(_))));

        assert_eq!(rc.metrics().get("primary").timeouts, 1);
        assert_eq!(rc.metrics().get("secondary").successes, 1);
    }

    #[tokio::test]
    async fn test_all_timeouts_one_failure_per_provider_in_order() {
        let names = ["primary", "secondary", "offline"];
        let rc = client(
            chain(
                names
                    .iter()
                    .map(|n| (*n, Duration::from_millis(20), scripted(vec![Scripted::hang()])))
                    .collect(),
            ),
            1,
        );
        let err = rc.invoke("p", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.failures.len(), 3);
        let order: Vec<_> = err.failures.iter().map(|f| f.provider.as_str()).collect();
        assert_eq!(order, names);
        assert!(err
            .failures
            .iter()
            .all(|f| matches!(f.error, LlmError::Timeout(_)) && f.attempts == 1));
        assert!(!err.was_cancelled());
    }

    #[tokio::test]
    async fn test_short_and_empty_responses_rejected() {
        let primary = scripted(vec![Scripted::ok("   ")]);
        let secondary = scripted(vec![Scripted::ok("ok!")]);
        let rc = client(
            chain(vec![
                ("primary", Duration::from_millis(100), primary),
                ("secondary", Duration::from_millis(100), secondary),
            ]),
            3,
        );
        let err = rc.invoke("p", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.failures.len(), 2);
        // 内容不合格不做 Provider 内重试
        assert!(err.failures.iter().all(|f| f.attempts == 1));
        assert!(err
            .failures
            .iter()
            .all(|f| matches!(f.error, LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_transient_error_retried_within_provider() {
        let primary = scripted(vec![
            Scripted::err(LlmError::Transport("connection reset".into())),
            Scripted::ok(VALID),
        ]);
        let rc = client(chain(vec![("primary", Duration::from_millis(100), primary.clone())]), 2);
        let inv = rc.invoke("p", &CancellationToken::new()).await.unwrap();
        assert_eq!(inv.provider, "primary");
        assert_eq!(primary.calls(), 2);
        assert_eq!(inv.attempts[1].attempt, 2);
    }

    #[tokio::test]
    async fn test_auth_error_skips_retries() {
        let primary = scripted(vec![Scripted::err(LlmError::Auth("invalid key".into()))]);
        let secondary = scripted(vec![Scripted::ok(VALID)]);
        let rc = client(
            chain(vec![
                ("primary", Duration::from_millis(100), primary.clone()),
                ("secondary", Duration::from_millis(100), secondary),
            ]),
            3,
        );
        let inv = rc.invoke("p", &CancellationToken::new()).await.unwrap();
        assert_eq!(inv.provider, "secondary");
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_latency_bounded_by_max_latency() {
        let rc = client(
            chain(vec![
                ("a", Duration::from_millis(25), scripted(vec![Scripted::hang()])),
                ("b", Duration::from_millis(25), scripted(vec![Scripted::hang()])),
            ]),
            2,
        );
        // 2 × (25ms × 2 + 5ms 退避)
        assert_eq!(rc.max_latency(), Duration::from_millis(110));

        let started = Instant::now();
        let err = rc.invoke("p", &CancellationToken::new()).await.unwrap_err();
        let elapsed = started.elapsed();
        assert_eq!(err.failures.len(), 2);
        assert!(err.failures.iter().all(|f| f.attempts == 2));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < rc.max_latency() + Duration::from_millis(500));
    }

    #[test]
    fn test_max_latency_saturates_on_extreme_config() {
        let rc = client(
            chain(vec![
                ("a", Duration::MAX, scripted(vec![])),
                ("b", Duration::from_secs(u64::MAX / 2), scripted(vec![])),
            ]),
            u32::MAX,
        );
        assert_eq!(rc.max_latency(), Duration::MAX);
    }

    #[tokio::test]
    async fn test_cancel_stops_chain() {
        let secondary = scripted(vec![Scripted::ok(VALID)]);
        let rc = client(
            chain(vec![
                ("primary", Duration::from_secs(10), scripted(vec![Scripted::hang()])),
                ("secondary", Duration::from_secs(10), secondary.clone()),
            ]),
            1,
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = rc.invoke("p", &cancel).await.unwrap_err();
        assert!(err.was_cancelled());
        assert_eq!(err.failures.len(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let rc = client(ProviderChain::default(), 1);
        let err = rc.invoke("p", &CancellationToken::new()).await.unwrap_err();
        assert!(err.failures.is_empty());
        assert_eq!(rc.max_latency(), Duration::ZERO);
        assert!(err.to_string().contains("no providers configured"));
    }
}
