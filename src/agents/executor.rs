//! Agent 单轮执行：构建 Prompt → 容错调用 → 生成状态更新
//!
//! 执行器不直接修改 ThreadState，只返回 StateUpdate，由编排器在持有线程锁时应用。
//! 所有 Provider 失败时返回该 Agent 固定的致歉回复，并在更新中标记失败（保留已有上下文）。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::agents::extract::extract_context;
use crate::agents::{AgentId, PromptBuilder};
use crate::llm::{ExhaustedError, Invocation, ResilientClient};
use crate::memory::{HandoffRecord, LongTermSummary, Message, ThreadContext, ThreadState};

/// 一轮对话对线程状态的全部修改
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub agent: AgentId,
    pub user_message: Message,
    pub agent_message: Message,
    /// 本轮抽取的结构化数据（失败轮次同样保留）
    pub context_patch: ThreadContext,
    /// 所有 Provider 失败或被取消
    pub failed: bool,
}

impl StateUpdate {
    /// 追加消息、合并上下文、切换 Agent；返回本轮新增的 Handoff 记录
    pub fn apply(self, state: &mut ThreadState, reason: &str, retention: usize) -> Option<HandoffRecord> {
        state.append_message(self.user_message);
        state.append_message(self.agent_message);
        if !self.context_patch.is_empty() {
            state.merge_context(self.context_patch);
        }
        if self.failed {
            state.record_failure();
        }
        state
            .switch_agent(self.agent, reason, !self.failed, retention)
            .cloned()
    }
}

/// 单轮执行结果
#[derive(Debug)]
pub struct TurnOutcome {
    pub response: String,
    pub update: StateUpdate,
    /// 给出响应的 Provider；失败时为 None
    pub provider: Option<String>,
    pub invocation: Option<Invocation>,
    pub failure: Option<ExhaustedError>,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn was_cancelled(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.was_cancelled())
    }
}

pub struct TurnExecutor {
    client: Arc<ResilientClient>,
    prompts: PromptBuilder,
}

impl TurnExecutor {
    pub fn new(client: Arc<ResilientClient>, prompts: PromptBuilder) -> Self {
        Self { client, prompts }
    }

    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    pub async fn run_turn(
        &self,
        agent: AgentId,
        message: &str,
        state: &ThreadState,
        long_term: Option<&LongTermSummary>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        self.run_turn_at(agent, message, state, long_term, cancel, Utc::now())
            .await
    }

    /// 以给定时间作为本轮时间（相对日期解析、消息时间戳）
    pub async fn run_turn_at(
        &self,
        agent: AgentId,
        message: &str,
        state: &ThreadState,
        long_term: Option<&LongTermSummary>,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> TurnOutcome {
        let context_patch = extract_context(agent, message, state.context(), now);
        let prompt = self.prompts.build(agent, message, state, long_term, now);
        tracing::debug!(
            thread_id = %state.thread_id,
            agent = %agent,
            prompt_chars = prompt.len(),
            extracted = context_patch.len(),
            "Running agent turn"
        );

        let user_message = Message::user(message).at(now);
        let payload = if context_patch.is_empty() {
            None
        } else {
            serde_json::to_value(&context_patch).ok()
        };

        match self.client.invoke(&prompt, cancel).await {
            Ok(invocation) => {
                let mut agent_message = Message::agent(agent, invocation.text.clone());
                if let Some(p) = payload {
                    agent_message = agent_message.with_payload(p);
                }
                TurnOutcome {
                    response: invocation.text.clone(),
                    provider: Some(invocation.provider.clone()),
                    update: StateUpdate {
                        agent,
                        user_message,
                        agent_message,
                        context_patch,
                        failed: false,
                    },
                    invocation: Some(invocation),
                    failure: None,
                }
            }
            Err(exhausted) => {
                tracing::warn!(
                    thread_id = %state.thread_id,
                    agent = %agent,
                    cancelled = exhausted.was_cancelled(),
                    "Agent turn failed, replying with apology"
                );
                let apology = agent.apology().to_string();
                let mut agent_message = Message::agent(agent, apology.clone());
                if let Some(p) = payload {
                    agent_message = agent_message.with_payload(p);
                }
                TurnOutcome {
                    response: apology,
                    provider: None,
                    update: StateUpdate {
                        agent,
                        user_message,
                        agent_message,
                        context_patch,
                        failed: true,
                    },
                    invocation: None,
                    failure: Some(exhausted),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::llm::{LlmClient, ProviderChain, RetryConfig, Scripted, ScriptedLlmClient};
    use crate::memory::keys;

    const REPLY: &str = "I'd be happy to set up a viewing for tomorrow afternoon at 2pm.";

    fn executor(step: Scripted) -> (TurnExecutor, Arc<ScriptedLlmClient>) {
        let scripted = Arc::new(ScriptedLlmClient::always(step));
        let client: Arc<dyn LlmClient> = scripted.clone();
        let chain = ProviderChain::builder()
            .remote("primary", Duration::from_millis(50), client)
            .build();
        let rc = ResilientClient::new(chain, RetryConfig::default(), 20);
        (TurnExecutor::new(Arc::new(rc), PromptBuilder::new(4)), scripted)
    }

    fn friday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn property_state() -> ThreadState {
        let mut state = ThreadState::new("t", AgentId::Search);
        let mut patch = ThreadContext::new();
        patch.insert(keys::PROPERTY.into(), json!({"address": "123 Ocean Dr"}));
        state.merge_context(patch);
        state.switch_agent(AgentId::Property, "setup", true, 20);
        state
    }

    #[tokio::test]
    async fn test_successful_turn_builds_update() {
        let (exec, scripted) = executor(Scripted::ok(REPLY));
        let mut state = property_state();
        let outcome = exec
            .run_turn_at(
                AgentId::Scheduling,
                "Can I visit it tomorrow afternoon?",
                &state,
                None,
                &CancellationToken::new(),
                friday(),
            )
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.response, REPLY);
        assert_eq!(outcome.provider.as_deref(), Some("primary"));
        assert!(scripted.prompts()[0].contains("You are Mike"));
        assert!(scripted.prompts()[0].contains("123 Ocean Dr"));

        let payload = outcome.update.agent_message.payload.clone().unwrap();
        assert_eq!(payload[keys::SCHEDULE_SLOT]["date"], "2026-10-17");

        let handoff = outcome.update.apply(&mut state, "scheduling_intent:visit", 20).unwrap();
        assert_eq!((handoff.from, handoff.to), (AgentId::Property, AgentId::Scheduling));
        assert!(handoff.completed);
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.current_agent(), AgentId::Scheduling);
        assert!(state.context_value(keys::SCHEDULE_SLOT).is_some());
        assert!(state.context_value(keys::PROPERTY).is_some());
    }

    #[tokio::test]
    async fn test_exhausted_turn_returns_apology_and_keeps_context() {
        let (exec, _) = executor(Scripted::hang());
        let mut state = property_state();
        let outcome = exec
            .run_turn(AgentId::Property, "how big is it?", &state, None, &CancellationToken::new())
            .await;

        assert!(!outcome.is_success());
        assert!(!outcome.was_cancelled());
        assert_eq!(outcome.response, AgentId::Property.apology());
        assert!(outcome.provider.is_none());

        // 同一 Agent：无 Handoff，但失败次数可观测
        assert!(outcome.update.apply(&mut state, "sticky_default", 20).is_none());
        assert_eq!(state.failed_turns(), 1);
        assert_eq!(state.messages().len(), 2);
        assert!(state.context_value(keys::PROPERTY).is_some());
    }
}
