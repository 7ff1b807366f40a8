//! 线程状态：一次连续对话的全部短期状态
//!
//! 只能通过 append_message / switch_agent / merge_context 三个操作修改；
//! 消息序列只追加，Handoff 记录保留最近 retention 条。

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::memory::{HandoffRecord, Message, Role};

/// 上下文键：各 Agent 的结构化草稿数据
pub mod keys {
    /// 最近一次搜索条件（SearchFilters）
    pub const SEARCH_FILTERS: &str = "search_filters";
    /// 外部房源服务提供的候选结果（数组）
    pub const SEARCH_RESULTS: &str = "search_results";
    /// 当前引用的单个房源（对象）
    pub const PROPERTY: &str = "property";
    /// 预约时段（ScheduleSlot）
    pub const SCHEDULE_SLOT: &str = "schedule_slot";
}

/// 自由结构上下文（BTreeMap 保证序列化与比较稳定）
pub type ThreadContext = BTreeMap<String, serde_json::Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: String,
    messages: Vec<Message>,
    current_agent: AgentId,
    handoffs: VecDeque<HandoffRecord>,
    #[serde(default)]
    context: ThreadContext,
    /// 所有 Provider 均失败（或被取消）的轮次累计
    #[serde(default)]
    failed_turns: u32,
    /// 最近一次更新时间；新建未保存的状态为 None
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ThreadState {
    pub fn new(thread_id: impl Into<String>, default_agent: AgentId) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            current_agent: default_agent,
            handoffs: VecDeque::new(),
            context: ThreadContext::new(),
            failed_turns: 0,
            updated_at: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 最近 k 条消息
    pub fn recent_messages(&self, k: usize) -> &[Message] {
        &self.messages[self.messages.len().saturating_sub(k)..]
    }

    pub fn current_agent(&self) -> AgentId {
        self.current_agent
    }

    pub fn handoffs(&self) -> impl Iterator<Item = &HandoffRecord> {
        self.handoffs.iter()
    }

    pub fn handoff_count(&self) -> usize {
        self.handoffs.len()
    }

    pub fn last_handoff(&self) -> Option<&HandoffRecord> {
        self.handoffs.back()
    }

    pub fn context(&self) -> &ThreadContext {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    pub fn failed_turns(&self) -> u32 {
        self.failed_turns
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// 新线程：尚未处理过任何一轮
    pub fn is_fresh(&self) -> bool {
        self.messages.is_empty()
    }

    /// 上下文中是否已有可供详情分析的房源（单个引用或非空结果集）
    pub fn has_referenced_item(&self) -> bool {
        let has_property = self
            .context
            .get(keys::PROPERTY)
            .is_some_and(|v| v.is_object());
        let has_results = self
            .context
            .get(keys::SEARCH_RESULTS)
            .and_then(|v| v.as_array())
            .is_some_and(|a| !a.is_empty());
        has_property || has_results
    }

    /// 最后一条用户消息
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    pub fn append_message(&mut self, message: Message) {
        self.updated_at = Some(message.timestamp.max(self.updated_at.unwrap_or(message.timestamp)));
        self.messages.push(message);
    }

    /// 切换当前 Agent；与当前不同时追加 Handoff 记录并按 retention 丢弃最旧的记录
    pub fn switch_agent(
        &mut self,
        to: AgentId,
        reason: impl Into<String>,
        completed: bool,
        retention: usize,
    ) -> Option<&HandoffRecord> {
        if to == self.current_agent {
            return None;
        }
        let mut record = HandoffRecord::new(self.current_agent, to, reason);
        record.completed = completed;
        self.current_agent = to;
        self.handoffs.push_back(record);
        while self.handoffs.len() > retention.max(1) {
            self.handoffs.pop_front();
        }
        self.handoffs.back()
    }

    /// 浅合并：同名键整体覆盖
    pub fn merge_context(&mut self, patch: ThreadContext) {
        self.context.extend(patch);
    }

    pub fn record_failure(&mut self) {
        self.failed_turns = self.failed_turns.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_state() {
        let state = ThreadState::new("t1", AgentId::Search);
        assert!(state.is_fresh());
        assert_eq!(state.current_agent(), AgentId::Search);
        assert_eq!(state.handoff_count(), 0);
        assert!(state.updated_at().is_none());
        assert_eq!(state, ThreadState::new("t1", AgentId::Search));
    }

    #[test]
    fn test_switch_to_same_agent_records_nothing() {
        let mut state = ThreadState::new("t1", AgentId::Search);
        assert!(state.switch_agent(AgentId::Search, "sticky", true, 5).is_none());
        assert_eq!(state.handoff_count(), 0);
    }

    #[test]
    fn test_handoff_retention_drops_oldest() {
        let mut state = ThreadState::new("t1", AgentId::Search);
        let cycle = [AgentId::Property, AgentId::Scheduling, AgentId::Search];
        for (i, agent) in cycle.iter().cycle().take(7).enumerate() {
            state.switch_agent(*agent, format!("turn-{i}"), true, 3);
        }
        assert_eq!(state.handoff_count(), 3);
        let reasons: Vec<_> = state.handoffs().map(|h| h.reason.clone()).collect();
        assert_eq!(reasons, vec!["turn-4", "turn-5", "turn-6"]);
    }

    #[test]
    fn test_referenced_item_detection() {
        let mut state = ThreadState::new("t1", AgentId::Search);
        assert!(!state.has_referenced_item());

        let mut patch = ThreadContext::new();
        patch.insert(keys::SEARCH_RESULTS.into(), json!([]));
        state.merge_context(patch);
        assert!(!state.has_referenced_item());

        let mut patch = ThreadContext::new();
        patch.insert(keys::SEARCH_RESULTS.into(), json!([{"formattedAddress": "1 Ocean Dr"}]));
        state.merge_context(patch);
        assert!(state.has_referenced_item());
    }

    #[test]
    fn test_recent_messages_window() {
        let mut state = ThreadState::new("t1", AgentId::Search);
        for i in 0..5 {
            state.append_message(Message::user(format!("m{i}")));
        }
        let recent: Vec<_> = state.recent_messages(2).iter().map(|m| m.content.as_str()).collect();
        assert_eq!(recent, vec!["m3", "m4"]);
        assert_eq!(state.recent_messages(50).len(), 5);
        assert!(state.updated_at().is_some());
    }
}
