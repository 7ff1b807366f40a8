//! 短期记忆：单条消息与 Handoff 记录
//!
//! 消息一经追加即不可修改；Handoff 记录仅用于审计与测试断言，不参与路由决策。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

/// 单条消息（append-only）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// 产生该消息的 Agent（仅 Agent 消息）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentId>,
    /// 结构化载荷，如抽取出的搜索条件、预约时段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            agent: None,
            payload: None,
        }
    }

    pub fn agent(agent: AgentId, content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
            timestamp: Utc::now(),
            agent: Some(agent),
            payload: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            timestamp: Utc::now(),
            agent: None,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Prompt 中使用的角色标签
    pub fn speaker(&self) -> &'static str {
        match (self.role, self.agent) {
            (Role::User, _) => "User",
            (Role::Agent, Some(agent)) => agent.persona(),
            (Role::Agent, None) => "Agent",
            (Role::System, _) => "System",
        }
    }
}

/// Agent 切换记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub from: AgentId,
    pub to: AgentId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// 目标 Agent 本轮是否成功产出回复；失败/取消时为 false
    #[serde(default = "default_completed")]
    pub completed: bool,
}

fn default_completed() -> bool {
    true
}

impl HandoffRecord {
    pub fn new(from: AgentId, to: AgentId, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: Utc::now(),
            completed: true,
        }
    }
}
