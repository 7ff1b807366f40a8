//! 专职 Agent：标识、人设、单轮执行
//!
//! - **executor**: Agent Turn Executor（构建 Prompt → 容错调用 → 回写状态）
//! - **extract**: 从用户消息中抽取结构化数据（搜索条件、引用房源、预约时段）
//! - **prompt**: Prompt 拼装

pub mod executor;
pub mod extract;
pub mod prompt;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use executor::{StateUpdate, TurnExecutor, TurnOutcome};
pub use extract::{ScheduleSlot, SearchFilters};
pub use prompt::PromptBuilder;

/// 固定的 Agent 集合（封闭变体）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// 房源搜索 / 发现
    Search,
    /// 单个房源的详情与分析
    Property,
    /// 看房预约
    Scheduling,
}

impl AgentId {
    pub const ALL: [AgentId; 3] = [AgentId::Search, AgentId::Property, AgentId::Scheduling];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Search => "search",
            AgentId::Property => "property",
            AgentId::Scheduling => "scheduling",
        }
    }

    /// 对话中展示的人设名
    pub fn persona(&self) -> &'static str {
        match self {
            AgentId::Search => "Alex",
            AgentId::Property => "Emma",
            AgentId::Scheduling => "Mike",
        }
    }

    /// Prompt 头部的角色指令
    pub fn instruction_header(&self) -> &'static str {
        match self {
            AgentId::Search => {
                "You are Alex, a real estate search specialist. Understand the client's \
                 requirements (location, budget, bedrooms, bathrooms, amenities), present \
                 matching options clearly and ask a clarifying question when criteria are vague. \
                 Keep answers to 3-5 sentences."
            }
            AgentId::Property => {
                "You are Emma, a real estate property expert. Give objective details about the \
                 referenced property: price, size, features, pros and cons. Always mention the \
                 property address when known. Keep answers to 2-4 sentences."
            }
            AgentId::Scheduling => {
                "You are Mike, a scheduling assistant for property viewings. Confirm the property, \
                 propose concrete time slots (weekdays 10:00, 14:00, 16:00; weekends 9:00, 11:00, \
                 13:00, 15:00) and end with a clear confirmation request. Keep answers to 2-4 sentences."
            }
        }
    }

    /// 所有 Provider 失败时返回的固定致歉回复
    pub fn apology(&self) -> &'static str {
        match self {
            AgentId::Search => {
                "Sorry, I'm Alex and I couldn't run your property search right now. \
                 Your criteria are saved, so please try again in a moment."
            }
            AgentId::Property => {
                "Sorry, I'm Emma and I couldn't load the property analysis right now. \
                 Please ask again in a moment and I'll pick up where we left off."
            }
            AgentId::Scheduling => {
                "Sorry, I'm Mike and I couldn't reach the scheduling service right now. \
                 Your preferred time is noted, so please try again shortly to confirm the visit."
            }
        }
    }
}

impl Default for AgentId {
    fn default() -> Self {
        AgentId::Search
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_end_matches("_agent") {
            "search" => Ok(AgentId::Search),
            "property" => Ok(AgentId::Property),
            "scheduling" => Ok(AgentId::Scheduling),
            other => Err(format!("unknown agent: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_parse() {
        assert_eq!("search".parse::<AgentId>(), Ok(AgentId::Search));
        assert_eq!("Scheduling_Agent".parse::<AgentId>(), Ok(AgentId::Scheduling));
        assert!("billing".parse::<AgentId>().is_err());
    }

    #[test]
    fn test_apology_is_agent_specific() {
        let apologies: Vec<_> = AgentId::ALL.iter().map(|a| a.apology()).collect();
        assert!(apologies[0].contains("Alex"));
        assert!(apologies[1].contains("Emma"));
        assert!(apologies[2].contains("Mike"));
    }
}
