//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SWARM__*` 覆盖（双下划线表示嵌套，如 `SWARM__RESILIENCE__RETRIES_PER_PROVIDER=2`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::agents::AgentId;
use crate::routing::intent::{
    DEFAULT_PROPERTY_KEYWORDS, DEFAULT_SCHEDULING_FOLLOW_UPS, DEFAULT_SCHEDULING_KEYWORDS,
    DEFAULT_SEARCH_KEYWORDS,
};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub router: RouterSection,
    pub resilience: ResilienceSection,
    /// 为空时使用 [`default_providers`]
    pub providers: Vec<ProviderConfig>,
}

impl AppConfig {
    /// 配置的 Provider 链；未配置时返回默认三级链
    pub fn provider_chain(&self) -> Vec<ProviderConfig> {
        if self.providers.is_empty() {
            default_providers()
        } else {
            self.providers.clone()
        }
    }
}

/// [app] 段：历史窗口、空闲 TTL、Handoff 保留数、默认 Agent、持久化目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// Prompt 中回放的最近消息数 K
    pub history_window: usize,
    /// 短期状态空闲多久后被清理（秒）
    pub idle_ttl_secs: u64,
    pub handoff_retention: usize,
    pub default_agent: AgentId,
    /// 设置后使用 JSON 文件持久化，否则使用内存存储
    pub state_dir: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            history_window: 6,
            idle_ttl_secs: 1800,
            handoff_retention: 20,
            default_agent: AgentId::Search,
            state_dir: None,
        }
    }
}

impl AppSection {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

/// [router] 段：各意图层级的关键词（按列表顺序扫描）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub scheduling: Vec<String>,
    /// 当前 Agent 为 scheduling 时视为预约跟进的短回复
    pub scheduling_follow_up: Vec<String>,
    pub search: Vec<String>,
    pub property: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            scheduling: owned(DEFAULT_SCHEDULING_KEYWORDS),
            scheduling_follow_up: owned(DEFAULT_SCHEDULING_FOLLOW_UPS),
            search: owned(DEFAULT_SEARCH_KEYWORDS),
            property: owned(DEFAULT_PROPERTY_KEYWORDS),
        }
    }
}

/// [resilience] 段：重试次数、最短有效响应、退避参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceSection {
    pub retries_per_provider: u32,
    pub min_response_chars: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            retries_per_provider: 1,
            min_response_chars: 20,
            backoff_base_ms: 200,
            backoff_max_ms: 2000,
        }
    }
}

/// Provider 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI 兼容接口（OpenRouter 等）
    Openai,
    /// 本地 Ollama
    Ollama,
    /// 确定性本地回复
    Mock,
}

/// [[providers]] 条目
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    /// 越小越优先；未设置时按配置顺序
    pub priority: Option<u32>,
    #[serde(default)]
    pub offline: bool,
}

fn default_provider_timeout_secs() -> u64 {
    30
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 默认链：OpenRouter 主模型 → OpenRouter 备用模型 → 本地 Ollama
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "openrouter-primary".into(),
            kind: ProviderKind::Openai,
            model: "meta-llama/llama-4-maverick:free".into(),
            base_url: Some(crate::llm::openai::OPENROUTER_BASE_URL.into()),
            api_key_env: Some("OPENROUTER_API_KEY".into()),
            timeout_secs: 30,
            priority: Some(0),
            offline: false,
        },
        ProviderConfig {
            name: "openrouter-secondary".into(),
            kind: ProviderKind::Openai,
            model: "mistralai/mistral-7b-instruct:free".into(),
            base_url: Some(crate::llm::openai::OPENROUTER_BASE_URL.into()),
            api_key_env: Some("OPENROUTER_API_KEY".into()),
            timeout_secs: 30,
            priority: Some(1),
            offline: false,
        },
        ProviderConfig {
            name: "ollama-local".into(),
            kind: ProviderKind::Ollama,
            model: crate::llm::ollama::DEFAULT_OLLAMA_MODEL.into(),
            base_url: Some(crate::llm::ollama::DEFAULT_OLLAMA_URL.into()),
            api_key_env: None,
            timeout_secs: 60,
            priority: Some(2),
            offline: true,
        },
    ]
}

/// 从 config 目录加载配置，环境变量 SWARM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SWARM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SWARM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
