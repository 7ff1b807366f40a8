//! LLM 层：客户端抽象、具体后端（OpenAI 兼容 / Ollama / Mock）、Provider 链与容错调用

pub mod invoker;
pub mod metrics;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod resilience;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use invoker::ModelInvoker;
pub use metrics::{ProviderMetrics, ProviderStats};
pub use mock::{MockLlmClient, Scripted, ScriptedLlmClient};
pub use ollama::OllamaClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use provider::{ChainedProvider, ProviderChain, ProviderChainBuilder, ProviderDescriptor, ProviderTier};
pub use resilience::{AttemptRecord, ExhaustedError, Invocation, ProviderFailure, ResilientClient, RetryConfig};
pub use traits::{LlmClient, LlmError};

use crate::config::{ProviderConfig, ProviderKind};

/// 按配置构建 Provider 链
///
/// 缺少 API Key 的远程 Provider 会被跳过；链为空时退化为单个 Mock 离线层，保证总能回复。
pub fn build_provider_chain(configs: &[ProviderConfig]) -> ProviderChain {
    let mut providers = Vec::new();
    let mut seen_remote = false;

    for (index, cfg) in configs.iter().enumerate() {
        let client: Arc<dyn LlmClient> = match cfg.kind {
            ProviderKind::Openai => {
                let key = cfg
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.trim().is_empty());
                let Some(key) = key else {
                    tracing::warn!(
                        provider = %cfg.name,
                        env = cfg.api_key_env.as_deref().unwrap_or("-"),
                        "API key not set, skipping provider"
                    );
                    continue;
                };
                Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, &key))
            }
            ProviderKind::Ollama => {
                let model = if cfg.model.is_empty() {
                    ollama::DEFAULT_OLLAMA_MODEL
                } else {
                    cfg.model.as_str()
                };
                Arc::new(OllamaClient::new(cfg.base_url.as_deref(), model))
            }
            ProviderKind::Mock => Arc::new(MockLlmClient),
        };

        let tier = if cfg.offline {
            ProviderTier::OfflineLocal
        } else if seen_remote {
            ProviderTier::RemoteSecondary
        } else {
            ProviderTier::RemotePrimary
        };
        seen_remote |= !cfg.offline;

        let priority = cfg.priority.unwrap_or(index as u32);
        providers.push(ChainedProvider {
            descriptor: ProviderDescriptor::new(cfg.name.clone(), priority, cfg.timeout(), tier),
            client,
        });
    }

    if providers.is_empty() {
        tracing::warn!("No usable providers configured, falling back to offline mock");
        return ProviderChain::builder()
            .offline("mock", Duration::from_secs(5), Arc::new(MockLlmClient))
            .build();
    }

    let chain = ProviderChain::new(providers);
    tracing::info!(providers = ?chain.names(), "Provider chain ready");
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, kind: ProviderKind, offline: bool) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            kind,
            model: String::new(),
            base_url: None,
            api_key_env: Some("REALTY_SWARM_TEST_KEY_THAT_IS_NEVER_SET".into()),
            timeout_secs: 5,
            priority: None,
            offline,
        }
    }

    #[test]
    fn test_missing_key_skips_remote() {
        let chain = build_provider_chain(&[
            provider("remote", ProviderKind::Openai, false),
            provider("local", ProviderKind::Ollama, true),
        ]);
        assert_eq!(chain.names(), vec!["local"]);
        assert!(chain.iter().all(|p| p.descriptor.is_offline()));
    }

    #[test]
    fn test_empty_chain_falls_back_to_mock() {
        let chain = build_provider_chain(&[provider("remote", ProviderKind::Openai, false)]);
        assert_eq!(chain.names(), vec!["mock"]);
    }

    #[test]
    fn test_explicit_priority_orders_chain() {
        let mut a = provider("a", ProviderKind::Mock, false);
        a.priority = Some(5);
        let b = provider("b", ProviderKind::Mock, false);
        let chain = build_provider_chain(&[a, b]);
        assert_eq!(chain.names(), vec!["b", "a"]);
    }
}
