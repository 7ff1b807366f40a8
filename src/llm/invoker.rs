//! 模型调用客户端：对单个 Provider 发起一次请求
//!
//! 施加该 Provider 的超时，并响应协作式取消；取消或超时都会丢弃正在进行的请求 future。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::llm::{ChainedProvider, LlmError};

#[derive(Debug, Default, Clone, Copy)]
pub struct ModelInvoker;

impl ModelInvoker {
    pub fn new() -> Self {
        Self
    }

    /// 调用一次 provider；超过 timeout 返回 Timeout，cancel 触发返回 Cancelled
    pub async fn call(
        &self,
        provider: &ChainedProvider,
        prompt: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = tokio::time::timeout(timeout, provider.client.complete(prompt)) => {
                result.unwrap_or(Err(LlmError::Timeout(timeout)))
            }
        }
    }
}
