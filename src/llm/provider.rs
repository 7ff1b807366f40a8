//! Provider 描述与有序 Provider 链
//!
//! 链按 priority 升序排列（成本/质量优先），末端通常是离线本地层。链在构建后不再变化。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::LlmClient;

/// Provider 层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTier {
    RemotePrimary,
    RemoteSecondary,
    OfflineLocal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub name: String,
    /// 越小越优先
    pub priority: u32,
    pub timeout: Duration,
    pub tier: ProviderTier,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, priority: u32, timeout: Duration, tier: ProviderTier) -> Self {
        Self {
            name: name.into(),
            priority,
            timeout,
            tier,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.tier == ProviderTier::OfflineLocal
    }
}

impl fmt::Display for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{}, {:?})", self.name, self.priority, self.tier)
    }
}

/// 链中的一个 Provider：描述 + 客户端
#[derive(Clone)]
pub struct ChainedProvider {
    pub descriptor: ProviderDescriptor,
    pub client: Arc<dyn LlmClient>,
}

/// 不可变的有序 Provider 链
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<ChainedProvider>,
}

impl ProviderChain {
    /// 按 priority 稳定排序（同优先级保持加入顺序）
    pub fn new(mut providers: Vec<ChainedProvider>) -> Self {
        providers.sort_by_key(|p| p.descriptor.priority);
        Self { providers }
    }

    pub fn builder() -> ProviderChainBuilder {
        ProviderChainBuilder::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainedProvider> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.descriptor.name.as_str()).collect()
    }
}

impl fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| &p.descriptor))
            .finish()
    }
}

/// 按加入顺序分配 priority 的链构建器；层级由位置与 offline 标志推断
#[derive(Default)]
pub struct ProviderChainBuilder {
    providers: Vec<ChainedProvider>,
}

impl ProviderChainBuilder {
    pub fn remote(self, name: impl Into<String>, timeout: Duration, client: Arc<dyn LlmClient>) -> Self {
        let tier = if self.providers.iter().any(|p| !p.descriptor.is_offline()) {
            ProviderTier::RemoteSecondary
        } else {
            ProviderTier::RemotePrimary
        };
        self.push(name, timeout, tier, client)
    }

    pub fn offline(self, name: impl Into<String>, timeout: Duration, client: Arc<dyn LlmClient>) -> Self {
        self.push(name, timeout, ProviderTier::OfflineLocal, client)
    }

    fn push(mut self, name: impl Into<String>, timeout: Duration, tier: ProviderTier, client: Arc<dyn LlmClient>) -> Self {
        let priority = self.providers.len() as u32;
        self.providers.push(ChainedProvider {
            descriptor: ProviderDescriptor::new(name, priority, timeout, tier),
            client,
        });
        self
    }

    pub fn build(self) -> ProviderChain {
        ProviderChain::new(self.providers)
    }
}
