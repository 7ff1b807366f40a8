//! 长期记忆：跨线程、按用户命名空间保存的压缩摘要
//!
//! 每轮结束后由 ThreadState 压缩得到；新线程开始时用于预置偏好（如上次的搜索条件）。
//! 内容是累加型摘要而非账本，写入采用 last-write-wins。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::memory::thread::{keys, ThreadContext, ThreadState};

/// 进入长期摘要的上下文键（预约时段、候选结果等会话内数据不跨线程保留）
const DURABLE_KEYS: [&str; 2] = [keys::SEARCH_FILTERS, keys::PROPERTY];

/// 新线程只预置搜索偏好；上次看过的房源只出现在 Prompt 摘要里，不算本线程的引用
const SEEDED_KEYS: [&str; 1] = [keys::SEARCH_FILTERS];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LongTermSummary {
    pub namespace: String,
    /// 偏好：上下文中可跨线程保留的部分
    #[serde(default)]
    pub preferences: ThreadContext,
    pub last_agent: Option<AgentId>,
    /// 该命名空间下累计处理的轮次
    #[serde(default)]
    pub turn_count: u64,
    /// 最近一次交互过的线程
    pub last_thread_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LongTermSummary {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            preferences: ThreadContext::new(),
            last_agent: None,
            turn_count: 0,
            last_thread_id: None,
            updated_at: Utc::now(),
        }
    }

    /// 将本轮结束后的线程状态压缩进摘要（累加，不删除已有偏好）
    pub fn absorb(mut self, state: &ThreadState) -> Self {
        for key in DURABLE_KEYS {
            if let Some(value) = state.context_value(key) {
                self.preferences.insert(key.to_string(), value.clone());
            }
        }
        self.last_agent = Some(state.current_agent());
        self.turn_count += 1;
        self.last_thread_id = Some(state.thread_id.clone());
        self.updated_at = Utc::now();
        self
    }

    /// 用摘要预置一个新线程：只写入线程中尚不存在的键
    pub fn seed(&self, state: &mut ThreadState) {
        let patch: ThreadContext = self
            .preferences
            .iter()
            .filter(|(k, _)| SEEDED_KEYS.contains(&k.as_str()))
            .filter(|(k, _)| state.context_value(k).is_none())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !patch.is_empty() {
            state.merge_context(patch);
        }
    }

    /// 摘要的简短文本形式，拼入 Prompt
    pub fn to_prompt_section(&self) -> String {
        if self.preferences.is_empty() {
            return String::new();
        }
        let mut s = String::from("## Known client preferences\n");
        for (k, v) in &self.preferences {
            s.push_str(&format!("- {}: {}\n", k, v));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with_filters() -> ThreadState {
        let mut state = ThreadState::new("t1", AgentId::Search);
        let mut patch = ThreadContext::new();
        patch.insert(keys::SEARCH_FILTERS.into(), json!({"bedrooms": 2}));
        patch.insert(keys::SCHEDULE_SLOT.into(), json!({"date": "2026-10-17"}));
        state.merge_context(patch);
        state
    }

    #[test]
    fn test_absorb_keeps_only_durable_keys() {
        let summary = LongTermSummary::new("user-1").absorb(&state_with_filters());
        assert_eq!(summary.turn_count, 1);
        assert!(summary.preferences.contains_key(keys::SEARCH_FILTERS));
        assert!(!summary.preferences.contains_key(keys::SCHEDULE_SLOT));
        assert_eq!(summary.last_thread_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_seed_does_not_override_thread_context() {
        let summary = LongTermSummary::new("user-1").absorb(&state_with_filters());

        let mut fresh = ThreadState::new("t2", AgentId::Search);
        summary.seed(&mut fresh);
        assert_eq!(fresh.context_value(keys::SEARCH_FILTERS), Some(&json!({"bedrooms": 2})));

        let mut other = ThreadState::new("t3", AgentId::Search);
        let mut patch = ThreadContext::new();
        patch.insert(keys::SEARCH_FILTERS.into(), json!({"bedrooms": 4}));
        other.merge_context(patch);
        summary.seed(&mut other);
        assert_eq!(other.context_value(keys::SEARCH_FILTERS), Some(&json!({"bedrooms": 4})));
    }

    #[test]
    fn test_seed_leaves_previous_property_out_of_thread() {
        let mut previous = state_with_filters();
        let mut patch = ThreadContext::new();
        patch.insert(keys::PROPERTY.into(), json!({"id": "p1", "address": "123 Ocean Dr"}));
        previous.merge_context(patch);
        let summary = LongTermSummary::new("user-1").absorb(&previous);
        assert!(summary.preferences.contains_key(keys::PROPERTY));
        assert!(summary.to_prompt_section().contains("123 Ocean Dr"));

        let mut fresh = ThreadState::new("t2", AgentId::Search);
        summary.seed(&mut fresh);
        assert!(fresh.context_value(keys::PROPERTY).is_none());
        assert!(!fresh.has_referenced_item());

        let decision = crate::routing::IntentRouter::default().route("tell me more", &fresh);
        assert_eq!(decision.agent, AgentId::Search);
        assert!(decision.is_sticky());
    }
}
