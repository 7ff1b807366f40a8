//! 意图路由层

pub mod intent;

pub use intent::{IntentRouter, IntentTier, RouteDecision, RouteReason, RouteRule, RuleGuard, TemporalPattern};
