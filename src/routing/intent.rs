//! 意图路由：按固定优先级扫描关键词规则表，选出本轮的 Agent
//!
//! 规则表是数据（有序的 规则 → Agent 列表），首个命中的规则胜出，不跨层级打分：
//! 1. 预约关键词
//! 2. 预约跟进（当前 Agent 为 scheduling 时的 "yes" / "that works" 等短回复）
//! 3. 搜索关键词
//! 4. 房源详情关键词（仅当上下文已有引用的房源）
//! 5. 都不命中：保持当前 Agent（粘性默认）
//!
//! 同一规则内按关键词列表顺序取第一个命中项作为原因，关键词都未命中时再试规则的
//! 时间模式（钟点、月日）。关键词按词边界匹配，避免 "it" 命中 "city"、
//! "tour" 命中 "tourist" 一类的误判。

use std::fmt;

use serde::Serialize;

use crate::agents::extract::{find_calendar_date, find_clock_time};
use crate::agents::AgentId;
use crate::config::RouterSection;
use crate::memory::ThreadState;

/// 明确的时间 / 看房请求
pub const DEFAULT_SCHEDULING_KEYWORDS: &[&str] = &[
    "visit",
    "tour",
    "schedule",
    "appointment",
    "book",
    "booking",
    "bookings",
    "reserve",
    "viewing",
    "can i see",
    "want to see it",
    "see it",
    "available times",
    "availability",
    "when can",
    "what time",
    "time slot",
    "time slots",
    "calendar",
    "today",
    "tomorrow",
    "this week",
    "next week",
    "at 3pm",
    "at 2 pm",
    "in the morning",
    "in the afternoon",
    "in the evening",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// 预约进行中的确认类短回复
pub const DEFAULT_SCHEDULING_FOLLOW_UPS: &[&str] = &[
    "yes",
    "yeah",
    "yep",
    "ok",
    "okay",
    "sure",
    "that works",
    "works for me",
    "sounds good",
    "confirm",
    "confirmed",
    "perfect",
    "book it",
    "let's do it",
];

/// 找房 / 搜索条件
pub const DEFAULT_SEARCH_KEYWORDS: &[&str] = &[
    "i need a place",
    "need a place",
    "place to live",
    "looking for",
    "find me",
    "find",
    "search",
    "show me",
    "i need",
    "i want",
    "bedroom",
    "bedrooms",
    "bathroom",
    "bathrooms",
    "budget",
    "under $",
    "around $",
    "a studio",
    "an apartment",
    "apartments",
    "a house",
    "houses",
    "a condo",
    "condos",
    "in miami",
    "downtown",
    "south beach",
    "brickell",
    "coral gables",
    "aventura",
    "with pool",
    "with gym",
    "with parking",
    "pet friendly",
    "furnished",
    "ocean view",
    "waterfront",
    "balcony",
    "garden",
    "terrace",
    "other properties",
    "alternatives",
    "similar",
    "what else",
    "more options",
    "something else",
    "cheaper",
    "bigger",
];

/// 针对已引用房源的追问
pub const DEFAULT_PROPERTY_KEYWORDS: &[&str] = &[
    "this property",
    "this apartment",
    "this house",
    "this unit",
    "this place",
    "that property",
    "that one",
    "tell me more",
    "tell me about",
    "more about",
    "details",
    "information about",
    "how much",
    "what's the rent",
    "what's the price",
    "how big",
    "size",
    "square feet",
    "sq ft",
    "year built",
    "condition",
    "features",
    "amenities",
    "what's included",
    "utilities",
    "pros and cons",
    "first one",
    "second one",
    "third one",
    "last one",
];

/// 规则所属的意图层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentTier {
    Scheduling,
    SchedulingFollowUp,
    Search,
    PropertyDetail,
}

impl IntentTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentTier::Scheduling => "scheduling_intent",
            IntentTier::SchedulingFollowUp => "scheduling_follow_up",
            IntentTier::Search => "search_intent",
            IntentTier::PropertyDetail => "property_intent",
        }
    }
}

/// 规则生效的前置条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleGuard {
    Always,
    /// 当前 Agent 必须是指定 Agent
    CurrentAgentIs(AgentId),
    /// 上下文中必须已有引用的房源
    ReferencedItem,
}

impl RuleGuard {
    fn admits(&self, state: &ThreadState) -> bool {
        match self {
            RuleGuard::Always => true,
            RuleGuard::CurrentAgentIs(agent) => state.current_agent() == *agent,
            RuleGuard::ReferencedItem => state.has_referenced_item(),
        }
    }
}

/// 关键词之外的时间说法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalPattern {
    /// "4pm"、"10:30 am"、"at 15:00"
    ClockTime,
    /// "october 20"、"20th of oct"
    CalendarDate,
}

impl TemporalPattern {
    fn find(&self, text: &str) -> Option<String> {
        match self {
            TemporalPattern::ClockTime => find_clock_time(text),
            TemporalPattern::CalendarDate => find_calendar_date(text),
        }
    }
}

/// 规则表中的一行
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub tier: IntentTier,
    pub agent: AgentId,
    pub guard: RuleGuard,
    /// 已规范化（小写、压缩空白）的关键词，按扫描顺序
    keywords: Vec<String>,
    patterns: Vec<TemporalPattern>,
}

impl RouteRule {
    pub fn new(tier: IntentTier, agent: AgentId, guard: RuleGuard, keywords: &[String]) -> Self {
        Self {
            tier,
            agent,
            guard,
            keywords: keywords
                .iter()
                .map(|k| normalize(k))
                .filter(|k| !k.is_empty())
                .collect(),
            patterns: Vec::new(),
        }
    }

    pub fn with_patterns(mut self, patterns: &[TemporalPattern]) -> Self {
        self.patterns = patterns.to_vec();
        self
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn patterns(&self) -> &[TemporalPattern] {
        &self.patterns
    }

    /// 按列表顺序返回第一个命中的关键词，其次是第一个命中的时间模式原文
    fn first_match(&self, text: &str) -> Option<String> {
        self.keywords
            .iter()
            .find(|k| contains_phrase(text, k))
            .cloned()
            .or_else(|| self.patterns.iter().find_map(|p| p.find(text)))
    }
}

/// 路由原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteReason {
    Keyword { tier: IntentTier, keyword: String },
    /// 无规则命中，保持当前 Agent
    Sticky,
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteReason::Keyword { tier, keyword } => write!(f, "{}:{}", tier.as_str(), keyword),
            RouteReason::Sticky => f.write_str("sticky_default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub agent: AgentId,
    pub reason: RouteReason,
}

impl RouteDecision {
    pub fn is_sticky(&self) -> bool {
        self.reason == RouteReason::Sticky
    }
}

/// 意图路由器：纯函数，无 I/O
#[derive(Debug, Clone)]
pub struct IntentRouter {
    rules: Vec<RouteRule>,
}

impl IntentRouter {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(cfg: &RouterSection) -> Self {
        Self::new(vec![
            RouteRule::new(IntentTier::Scheduling, AgentId::Scheduling, RuleGuard::Always, &cfg.scheduling)
                .with_patterns(&[TemporalPattern::ClockTime, TemporalPattern::CalendarDate]),
            RouteRule::new(
                IntentTier::SchedulingFollowUp,
                AgentId::Scheduling,
                RuleGuard::CurrentAgentIs(AgentId::Scheduling),
                &cfg.scheduling_follow_up,
            ),
            RouteRule::new(IntentTier::Search, AgentId::Search, RuleGuard::Always, &cfg.search),
            RouteRule::new(
                IntentTier::PropertyDetail,
                AgentId::Property,
                RuleGuard::ReferencedItem,
                &cfg.property,
            ),
        ])
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn select_agent(&self, message: &str, state: &ThreadState) -> AgentId {
        self.route(message, state).agent
    }

    /// 选出 Agent 并给出原因
    pub fn route(&self, message: &str, state: &ThreadState) -> RouteDecision {
        let text = normalize(message);
        if !text.is_empty() {
            for rule in &self.rules {
                if !rule.guard.admits(state) {
                    continue;
                }
                if let Some(keyword) = rule.first_match(&text) {
                    return RouteDecision {
                        agent: rule.agent,
                        reason: RouteReason::Keyword { tier: rule.tier, keyword },
                    };
                }
            }
        }
        RouteDecision {
            agent: state.current_agent(),
            reason: RouteReason::Sticky,
        }
    }
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::from_config(&RouterSection::default())
    }
}

/// 小写并把连续空白压缩为单个空格
fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\''
}

/// 词边界匹配：关键词首尾为字母数字时，两侧不得紧邻字母数字
fn contains_phrase(text: &str, phrase: &str) -> bool {
    let check_start = phrase.chars().next().is_some_and(is_word_char);
    let check_end = phrase.chars().last().is_some_and(is_word_char);

    text.match_indices(phrase).any(|(start, matched)| {
        let end = start + matched.len();
        let left_ok = !check_start || !text[..start].chars().next_back().is_some_and(is_word_char);
        let right_ok = !check_end || !text[end..].chars().next().is_some_and(is_word_char);
        left_ok && right_ok
    })
}
