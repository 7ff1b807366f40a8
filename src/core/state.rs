//! 单轮处理阶段：Idle → Routing → Executing → Persisting → Idle
//!
//! 轮与轮之间总是回到 Idle，不存在跨轮挂起。只有 Executing 阶段会发生 I/O 等待。

use std::fmt;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    Routing,
    Executing,
    Persisting,
}

impl TurnPhase {
    /// 合法的下一个阶段
    pub fn next(self) -> TurnPhase {
        match self {
            TurnPhase::Idle => TurnPhase::Routing,
            TurnPhase::Routing => TurnPhase::Executing,
            TurnPhase::Executing => TurnPhase::Persisting,
            TurnPhase::Persisting => TurnPhase::Idle,
        }
    }

    pub fn can_advance_to(self, to: TurnPhase) -> bool {
        self.next() == to
    }

    /// 校验后推进；非法跳转返回 Err 并保持原阶段
    pub fn advance(&mut self, to: TurnPhase) -> Result<(), InvalidTransition> {
        if !self.can_advance_to(to) {
            return Err(InvalidTransition { from: *self, to });
        }
        tracing::debug!(from = %self, to = %to, "Turn phase transition");
        *self = to;
        Ok(())
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Routing => "routing",
            TurnPhase::Executing => "executing",
            TurnPhase::Persisting => "persisting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid turn phase transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TurnPhase,
    pub to: TurnPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut phase = TurnPhase::default();
        for to in [TurnPhase::Routing, TurnPhase::Executing, TurnPhase::Persisting, TurnPhase::Idle] {
            phase.advance(to).unwrap();
        }
        assert_eq!(phase, TurnPhase::Idle);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut phase = TurnPhase::Idle;
        let err = phase.advance(TurnPhase::Executing).unwrap_err();
        assert_eq!(err.from, TurnPhase::Idle);
        assert_eq!(phase, TurnPhase::Idle);
        assert!(err.to_string().contains("idle -> executing"));
    }
}
