//! Prompt 拼装
//!
//! 结构：Agent 指令头 → 当前日期时间 → 与该 Agent 相关的上下文 → 已知长期偏好 → 最近 K 条消息 → 本轮用户消息。
//! 只回放最近 K 条历史以控制 token 成本。

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::agents::AgentId;
use crate::memory::{keys, LongTermSummary, ThreadState};

/// 上下文中最多展示的候选房源数
const MAX_LISTED_RESULTS: usize = 3;

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    history_window: usize,
}

impl PromptBuilder {
    pub fn new(history_window: usize) -> Self {
        Self { history_window }
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub fn build(
        &self,
        agent: AgentId,
        message: &str,
        state: &ThreadState,
        long_term: Option<&LongTermSummary>,
        now: DateTime<Utc>,
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str(agent.instruction_header());
        prompt.push_str("\n\n");
        prompt.push_str(&datetime_section(now));

        let context = context_section(agent, state);
        if !context.is_empty() {
            prompt.push_str("\n## Context\n");
            prompt.push_str(&context);
        }

        if let Some(summary) = long_term {
            let section = summary.to_prompt_section();
            if !section.is_empty() {
                prompt.push('\n');
                prompt.push_str(&section);
            }
        }

        let history = state.recent_messages(self.history_window);
        if !history.is_empty() {
            prompt.push_str("\n## Recent conversation\n");
            for m in history {
                prompt.push_str(&format!("{}: {}\n", m.speaker(), m.content));
            }
        }

        prompt.push('\n');
        prompt.push_str(&format!("USER MESSAGE: \"{}\"\n", message.trim()));
        prompt.push_str(&format!("Respond as {}:", agent.persona()));
        prompt
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(6)
    }
}

/// 让模型正确理解 "today" / "tomorrow"
fn datetime_section(now: DateTime<Utc>) -> String {
    let tomorrow = now + Duration::days(1);
    format!(
        "## Current date and time\nNow: {} ({}), {} UTC\nTomorrow: {}\n",
        now.format("%Y-%m-%d"),
        now.format("%A"),
        now.format("%H:%M"),
        tomorrow.format("%Y-%m-%d (%A)"),
    )
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn listed_results(state: &ThreadState) -> Vec<String> {
    state
        .context_value(keys::SEARCH_RESULTS)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .take(MAX_LISTED_RESULTS)
                .enumerate()
                .map(|(i, item)| format!("  {}. {}", i + 1, describe(item)))
                .collect()
        })
        .unwrap_or_default()
}

fn context_section(agent: AgentId, state: &ThreadState) -> String {
    let mut lines = Vec::new();
    let mut push = |label: &str, key: &str| {
        if let Some(v) = state.context_value(key) {
            lines.push(format!("- {}: {}", label, describe(v)));
        }
    };

    match agent {
        AgentId::Search => push("Search filters", keys::SEARCH_FILTERS),
        AgentId::Property => push("Referenced property", keys::PROPERTY),
        AgentId::Scheduling => {
            push("Property to visit", keys::PROPERTY);
            push("Requested slot", keys::SCHEDULE_SLOT);
        }
    }

    let referenced = state.context_value(keys::PROPERTY).is_some();
    if agent == AgentId::Search || !referenced {
        let results = listed_results(state);
        if !results.is_empty() {
            lines.push("- Current results:".to_string());
            lines.extend(results);
        }
    }

    if lines.is_empty() {
        String::new()
    } else {
        lines.join("\n") + "\n"
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::memory::{Message, ThreadContext};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_prompt_sections_in_order() {
        let mut state = ThreadState::new("t", AgentId::Search);
        state.append_message(Message::user("hi"));
        state.append_message(Message::agent(AgentId::Search, "Hello, I'm Alex"));

        let prompt = PromptBuilder::new(6).build(AgentId::Search, "  2 bedrooms please ", &state, None, now());
        let header = prompt.find("You are Alex").unwrap();
        let date = prompt.find("Now: 2026-10-16 (Friday)").unwrap();
        let history = prompt.find("Alex: Hello, I'm Alex").unwrap();
        let user = prompt.find("USER MESSAGE: \"2 bedrooms please\"").unwrap();
        assert!(header < date && date < history && history < user);
        assert!(prompt.contains("Tomorrow: 2026-10-17 (Saturday)"));
        assert!(prompt.ends_with("Respond as Alex:"));
    }

    #[test]
    fn test_history_window_bounds_replay() {
        let mut state = ThreadState::new("t", AgentId::Search);
        for i in 0..10 {
            state.append_message(Message::user(format!("message-{i}")));
        }
        let prompt = PromptBuilder::new(3).build(AgentId::Search, "next", &state, None, now());
        assert!(!prompt.contains("message-6"));
        assert!(prompt.contains("message-7"));
        assert!(prompt.contains("message-9"));
    }

    #[test]
    fn test_context_relevant_to_agent() {
        let mut state = ThreadState::new("t", AgentId::Property);
        let mut patch = ThreadContext::new();
        patch.insert(keys::SEARCH_FILTERS.into(), json!({"bedrooms": 2}));
        patch.insert(keys::PROPERTY.into(), json!({"address": "123 Ocean Dr"}));
        patch.insert(keys::SCHEDULE_SLOT.into(), json!({"date": "2026-10-17"}));
        state.merge_context(patch);

        let search = PromptBuilder::default().build(AgentId::Search, "x", &state, None, now());
        assert!(search.contains("Search filters"));
        assert!(!search.contains("Requested slot"));

        let property = PromptBuilder::default().build(AgentId::Property, "x", &state, None, now());
        assert!(property.contains("123 Ocean Dr"));
        assert!(!property.contains("Search filters"));

        let scheduling = PromptBuilder::default().build(AgentId::Scheduling, "x", &state, None, now());
        assert!(scheduling.contains("Requested slot"));
        assert!(scheduling.contains("Property to visit"));
    }

    #[test]
    fn test_results_listing_is_capped() {
        let mut state = ThreadState::new("t", AgentId::Search);
        let mut patch = ThreadContext::new();
        patch.insert(keys::SEARCH_RESULTS.into(), json!(["a", "b", "c", "d", "e"]));
        state.merge_context(patch);
        let prompt = PromptBuilder::default().build(AgentId::Search, "x", &state, None, now());
        assert!(prompt.contains("  3. c"));
        assert!(!prompt.contains("  4. d"));
    }

    #[test]
    fn test_long_term_preferences_included() {
        let state = ThreadState::new("t", AgentId::Search);
        let mut summary = LongTermSummary::new("user-1");
        summary.preferences.insert(keys::SEARCH_FILTERS.into(), json!({"location": "brickell"}));
        let prompt = PromptBuilder::default().build(AgentId::Search, "x", &state, Some(&summary), now());
        assert!(prompt.contains("Known client preferences"));
        assert!(prompt.contains("brickell"));
    }
}
