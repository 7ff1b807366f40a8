//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；默认用于 OpenRouter 主/备 Provider。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt_tokens, completion_tokens, total_tokens)
    pub fn get(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

/// OpenAI 兼容客户端：Prompt 作为单条 user 消息发送，取首个 choice 的 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: 0.1,
            max_tokens: 1000,
            usage: TokenUsage::default(),
        }
    }
}

const AUTH_CODES: &[&str] = &[
    "invalid_api_key",
    "invalid_authentication",
    "authentication_error",
    "permission_error",
    // 额度耗尽：同一 Provider 重试无意义
    "insufficient_quota",
];
const RATE_LIMIT_CODES: &[&str] = &["rate_limit_exceeded", "rate_limit_error"];

/// 先看 error.code / error.type，再退回状态码形式的 code 和文本归类
fn classify_api_error(api: ApiError) -> LlmError {
    let tags: Vec<&str> = [api.code.as_deref(), api.r#type.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    let message = api.to_string();
    if tags.iter().any(|t| AUTH_CODES.contains(t)) {
        return LlmError::Auth(message);
    }
    if tags.iter().any(|t| RATE_LIMIT_CODES.contains(t)) {
        return LlmError::RateLimited(message);
    }
    let status = api.code.as_deref().and_then(|c| c.parse::<u16>().ok());
    LlmError::classify(status, message)
}

fn map_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(api) => classify_api_error(api),
        OpenAIError::Reqwest(e) => {
            let status = e.status().map(|s| s.as_u16());
            LlmError::classify(status, e.to_string())
        }
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidResponse(msg),
        other => LlmError::Transport(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(map_openai_error)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens)
            .messages(vec![ChatCompletionRequestMessage::User(user)])
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}
