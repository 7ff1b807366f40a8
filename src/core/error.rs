//! 顶层错误分类
//!
//! 只有 AllProvidersExhausted 对用户可见，并以致歉回复呈现；PersistenceUnavailable 记录后吞掉（降级模式）；
//! RoutingAmbiguous 永不致命，由粘性默认消解。Provider 级错误只在容错层内部重试或升级。

use thiserror::Error;

use crate::llm::{ExhaustedError, LlmError};
use crate::memory::StoreError;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Provider timeout: {0}")]
    ProviderTimeout(String),

    #[error("Provider transport error: {0}")]
    ProviderTransportError(String),

    #[error("Provider returned invalid response: {0}")]
    ProviderInvalidResponse(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthError(String),

    #[error(transparent)]
    AllProvidersExhausted(#[from] ExhaustedError),

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] StoreError),

    #[error("Routing ambiguous: {0}")]
    RoutingAmbiguous(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<LlmError> for SwarmError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(d) => SwarmError::ProviderTimeout(format!("{d:?}")),
            LlmError::Transport(m) | LlmError::RateLimited(m) => SwarmError::ProviderTransportError(m),
            LlmError::InvalidResponse(m) => SwarmError::ProviderInvalidResponse(m),
            LlmError::Auth(m) => SwarmError::ProviderAuthError(m),
            LlmError::Cancelled => SwarmError::ProviderTransportError("cancelled".to_string()),
        }
    }
}

impl SwarmError {
    /// 是否会直接出现在用户看到的回复里
    pub fn is_user_visible(&self) -> bool {
        matches!(self, SwarmError::AllProvidersExhausted(_) | SwarmError::InvalidRequest(_))
    }
}
