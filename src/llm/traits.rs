//! LLM 客户端抽象
//!
//! 每个 Provider 后端（OpenAI 兼容 / Ollama / Mock）实现 LlmClient：对单个 Prompt 返回原始文本或类型化错误。
//! 超时与取消不在此层处理，由 ModelInvoker 统一施加。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// 单次 Provider 调用的失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Cancelled")]
    Cancelled,
}

impl LlmError {
    /// 瞬时错误：同一 Provider 重试可能成功
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout(_) | LlmError::Transport(_) | LlmError::RateLimited(_)
        )
    }

    /// 按 HTTP 状态码与错误文本归类 Provider 报告的错误
    pub fn classify(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        match status {
            Some(401) | Some(403) => LlmError::Auth(message),
            Some(429) => LlmError::RateLimited(message),
            _ if lower.contains("api key")
                || lower.contains("unauthorized")
                || lower.contains("authentication") =>
            {
                LlmError::Auth(message)
            }
            _ if lower.contains("rate limit") || lower.contains("too many requests") => {
                LlmError::RateLimited(message)
            }
            _ => LlmError::Transport(message),
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成：返回模型原始输出
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}
