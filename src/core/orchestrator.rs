//! 编排器：单轮对话的入口
//!
//! 每轮：按线程加锁 → 读取状态（必要时用长期摘要预置）→ 路由 → Agent 执行 → 应用更新 → 持久化 → 返回响应。
//! 持久化失败只记录日志并以内存状态完成本轮（降级模式）；所有 Provider 失败时返回 Agent 致歉回复。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agents::{AgentId, PromptBuilder, TurnExecutor};
use crate::config::{load_config, AppConfig};
use crate::core::session_supervisor::TurnGuard;
use crate::core::{SwarmError, ThreadSupervisor, TurnPhase};
use crate::llm::{build_provider_chain, ProviderMetrics, ResilientClient, RetryConfig};
use crate::memory::{
    HandoffRecord, InMemoryStateStore, JsonFileStore, LongTermSummary, StateStore, ThreadContext, ThreadState,
};
use crate::routing::IntentRouter;

/// 流式输出的事件缓冲
const STREAM_BUFFER: usize = 64;

/// 入站请求
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    /// 长期记忆命名空间（用户 / 会话身份）
    pub user_id: Option<String>,
    pub message: String,
    /// 调用方附带的上下文（如 REST 层查询到的房源列表），路由前合并
    pub context: ThreadContext,
}

impl TurnRequest {
    pub fn new(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_id: None,
            message: message.into(),
            context: ThreadContext::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// 一轮的结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub thread_id: String,
    pub agent: AgentId,
    pub response: String,
    /// 本轮产生的 Handoff（Agent 未变化时为 None）
    pub handoff: Option<HandoffRecord>,
    /// 给出响应的 Provider；所有 Provider 失败时为 None
    pub provider: Option<String>,
    /// 本轮以致歉回复结束（Provider 全部失败或被取消）
    pub failed: bool,
    /// 本轮持久化失败，状态仅保存在内存中
    pub degraded: bool,
}

/// 流式事件
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// 路由完成
    Routed { agent: AgentId, reason: String },
    /// 响应片段，依次拼接即为完整响应
    Chunk(String),
    Done(TurnReply),
}

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    router: IntentRouter,
    executor: TurnExecutor,
    supervisor: Arc<ThreadSupervisor>,
    default_agent: AgentId,
    handoff_retention: usize,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn StateStore>, router: IntentRouter, executor: TurnExecutor) -> Self {
        Self {
            store,
            router,
            executor,
            supervisor: Arc::new(ThreadSupervisor::new()),
            default_agent: AgentId::default(),
            handoff_retention: 20,
        }
    }

    pub fn with_default_agent(mut self, agent: AgentId) -> Self {
        self.default_agent = agent;
        self
    }

    pub fn with_handoff_retention(mut self, retention: usize) -> Self {
        self.handoff_retention = retention.max(1);
        self
    }

    /// 按配置组装：Provider 链、容错客户端、路由表、存储
    pub fn from_config(cfg: &AppConfig) -> Self {
        let chain = build_provider_chain(&cfg.provider_chain());
        let retry = RetryConfig {
            retries_per_provider: cfg.resilience.retries_per_provider,
            backoff_base: Duration::from_millis(cfg.resilience.backoff_base_ms),
            backoff_max: Duration::from_millis(cfg.resilience.backoff_max_ms),
        };
        let client = ResilientClient::new(chain, retry, cfg.resilience.min_response_chars);
        tracing::info!(
            max_latency_ms = client.max_latency().as_millis() as u64,
            "Resilient client ready"
        );

        let store: Arc<dyn StateStore> = match &cfg.app.state_dir {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "Using JSON file state store");
                Arc::new(JsonFileStore::new(dir, cfg.app.default_agent, cfg.app.idle_ttl()))
            }
            None => Arc::new(InMemoryStateStore::new(cfg.app.default_agent, cfg.app.idle_ttl())),
        };

        let executor = TurnExecutor::new(Arc::new(client), PromptBuilder::new(cfg.app.history_window));
        Self::new(store, IntentRouter::from_config(&cfg.router), executor)
            .with_default_agent(cfg.app.default_agent)
            .with_handoff_retention(cfg.app.handoff_retention)
    }

    /// 加载配置文件（及 SWARM__* 环境变量）后组装
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, SwarmError> {
        let cfg = load_config(config_path)?;
        Ok(Self::from_config(&cfg))
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        self.executor.client().metrics()
    }

    pub fn phase(&self, thread_id: &str) -> TurnPhase {
        self.supervisor.phase(thread_id)
    }

    /// 取消该线程正在执行的轮次
    pub fn cancel(&self, thread_id: &str) -> bool {
        let cancelled = self.supervisor.cancel(thread_id);
        if cancelled {
            tracing::info!(thread_id, "Turn cancellation requested");
        }
        cancelled
    }

    /// 停止后台清理任务并取消所有进行中的轮次
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnReply, SwarmError> {
        validate(&request)?;
        self.process(request, None).await
    }

    /// 同一轮处理，以事件流返回：Routed → Chunk… → Done
    pub fn handle_turn_stream(self: &Arc<Self>, request: TurnRequest) -> Result<mpsc::Receiver<TurnEvent>, SwarmError> {
        validate(&request)?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.process(request, Some(&tx)).await {
                tracing::error!(error = %e, "Streaming turn failed");
            }
        });
        Ok(rx)
    }

    /// 在不产生对话轮次的情况下合并上下文（如外部房源搜索结果），与轮次串行
    pub async fn attach_context(&self, thread_id: &str, entries: ThreadContext) -> Result<(), SwarmError> {
        if thread_id.trim().is_empty() {
            return Err(SwarmError::InvalidRequest("thread_id must not be empty".into()));
        }
        let _turn = self.supervisor.begin(thread_id).await;
        let mut state = self.store.load(thread_id).await?;
        state.merge_context(entries);
        self.store.save(thread_id, &state).await?;
        tracing::debug!(thread_id, keys = state.context().len(), "Context attached");
        Ok(())
    }

    /// 后台定期清理空闲线程状态与线程锁；shutdown 后退出
    pub fn spawn_idle_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let stop = self.supervisor.shutdown_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = this.store.evict_idle().await;
                        let locks = this.supervisor.prune_idle_locks();
                        if evicted > 0 {
                            tracing::info!(evicted, locks, "Evicted idle threads");
                        }
                    }
                }
            }
        })
    }

    async fn process(&self, request: TurnRequest, events: Option<&mpsc::Sender<TurnEvent>>) -> Result<TurnReply, SwarmError> {
        let TurnRequest {
            thread_id,
            user_id,
            message,
            context,
        } = request;

        let turn = self.supervisor.begin(&thread_id).await;
        let mut degraded = false;

        // 读取失败时本轮只在内存中运行，不写回，避免覆盖已持久化的历史
        let (mut state, load_failed) = match self.store.load(&thread_id).await {
            Ok(state) => (state, false),
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, error = %SwarmError::from(e), "State load failed, running turn in memory only");
                degraded = true;
                (ThreadState::new(thread_id.clone(), self.default_agent), true)
            }
        };

        let summary = match &user_id {
            Some(ns) => match self.store.load_long_term(ns).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::warn!(namespace = %ns, error = %SwarmError::from(e), "Long-term load failed");
                    degraded = true;
                    None
                }
            },
            None => None,
        };
        if state.is_fresh() && !load_failed {
            if let Some(summary) = &summary {
                state = ThreadState::new(thread_id.clone(), summary.last_agent.unwrap_or(self.default_agent));
                summary.seed(&mut state);
                tracing::debug!(thread_id = %thread_id, namespace = %summary.namespace, "Seeded thread from long-term summary");
            }
        }
        if !context.is_empty() {
            state.merge_context(context);
        }

        step(&turn, TurnPhase::Routing);
        let decision = self.router.route(&message, &state);
        let reason = decision.reason.to_string();
        tracing::info!(
            thread_id = %thread_id,
            from = %state.current_agent(),
            to = %decision.agent,
            reason = %reason,
            "Routed turn"
        );
        emit(events, TurnEvent::Routed { agent: decision.agent, reason: reason.clone() }).await;

        step(&turn, TurnPhase::Executing);
        let outcome = self
            .executor
            .run_turn(decision.agent, &message, &state, summary.as_ref(), turn.cancel_token())
            .await;
        if let Some(failure) = &outcome.failure {
            tracing::warn!(thread_id = %thread_id, error = %SwarmError::from(failure.clone()), "Turn degraded to apology");
        }

        step(&turn, TurnPhase::Persisting);
        let response = outcome.response;
        let provider = outcome.provider;
        let failed = outcome.failure.is_some();
        let handoff = outcome.update.apply(&mut state, &reason, self.handoff_retention);
        if let Some(h) = &handoff {
            tracing::info!(
                thread_id = %thread_id,
                from = %h.from,
                to = %h.to,
                completed = h.completed,
                reason = %h.reason,
                "Agent handoff"
            );
        }

        if load_failed {
            tracing::warn!(thread_id = %thread_id, "Skipping persistence for turn without loaded state");
        } else if let Err(e) = self.store.save(&thread_id, &state).await {
            tracing::warn!(thread_id = %thread_id, error = %SwarmError::from(e), "State save failed, continuing in degraded mode");
            degraded = true;
        }
        if let Some(ns) = user_id.as_ref().filter(|_| !load_failed) {
            let updated = summary.unwrap_or_else(|| LongTermSummary::new(ns.clone())).absorb(&state);
            if let Err(e) = self.store.save_long_term(ns, &updated).await {
                tracing::warn!(namespace = %ns, error = %SwarmError::from(e), "Long-term save failed");
                degraded = true;
            }
        }
        step(&turn, TurnPhase::Idle);
        drop(turn);

        let reply = TurnReply {
            thread_id,
            agent: decision.agent,
            response,
            handoff,
            provider,
            failed,
            degraded,
        };

        if events.is_some() {
            for chunk in reply.response.split_inclusive(' ') {
                emit(events, TurnEvent::Chunk(chunk.to_string())).await;
            }
            emit(events, TurnEvent::Done(reply.clone())).await;
        }
        Ok(reply)
    }
}

fn validate(request: &TurnRequest) -> Result<(), SwarmError> {
    if request.thread_id.trim().is_empty() {
        return Err(SwarmError::InvalidRequest("thread_id must not be empty".into()));
    }
    Ok(())
}

fn step(turn: &TurnGuard, to: TurnPhase) {
    if let Err(e) = turn.advance(to) {
        tracing::warn!(thread_id = turn.thread_id(), error = %e, "Unexpected phase transition");
    }
}

/// 接收端已关闭时丢弃事件（调用方断开不影响本轮完成与持久化）
async fn emit(events: Option<&mpsc::Sender<TurnEvent>>, event: TurnEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, ProviderChain, Scripted, ScriptedLlmClient};

    const REPLY: &str = "Here are a few apartments that match what you described.";

    fn orchestrator(step: Scripted) -> Arc<Orchestrator> {
        let client: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::always(step));
        let chain = ProviderChain::builder()
            .remote("primary", Duration::from_millis(100), client)
            .build();
        let rc = ResilientClient::new(chain, RetryConfig::default(), 20);
        Arc::new(Orchestrator::new(
            Arc::new(InMemoryStateStore::default()),
            IntentRouter::default(),
            TurnExecutor::new(Arc::new(rc), PromptBuilder::default()),
        ))
    }

    #[tokio::test]
    async fn test_empty_thread_id_rejected() {
        let orch = orchestrator(Scripted::ok(REPLY));
        let err = orch.handle_turn(TurnRequest::new("  ", "hi")).await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_turn_persists_and_returns_to_idle() {
        let orch = orchestrator(Scripted::ok(REPLY));
        let reply = orch
            .handle_turn(TurnRequest::new("t1", "I need a place to live"))
            .await
            .unwrap();
        assert_eq!(reply.agent, AgentId::Search);
        assert_eq!(reply.response, REPLY);
        assert!(!reply.degraded && !reply.failed);
        assert_eq!(orch.phase("t1"), TurnPhase::Idle);

        let state = orch.store().load("t1").await.unwrap();
        assert_eq!(state.messages().len(), 2);
        assert_eq!(orch.metrics().get("primary").successes, 1);
    }

    #[tokio::test]
    async fn test_stream_chunks_concatenate_to_response() {
        let orch = orchestrator(Scripted::ok(REPLY));
        let mut rx = orch
            .handle_turn_stream(TurnRequest::new("t1", "show me apartments in brickell"))
            .unwrap();

        let mut routed = None;
        let mut text = String::new();
        let mut done = None;
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Routed { agent, .. } => routed = Some(agent),
                TurnEvent::Chunk(c) => text.push_str(&c),
                TurnEvent::Done(reply) => done = Some(reply),
            }
        }
        assert_eq!(routed, Some(AgentId::Search));
        assert_eq!(text, REPLY);
        assert_eq!(done.unwrap().response, REPLY);
    }

    #[tokio::test]
    async fn test_attach_context_is_persisted() {
        let orch = orchestrator(Scripted::ok(REPLY));
        let mut entries = ThreadContext::new();
        entries.insert(crate::memory::keys::SEARCH_RESULTS.into(), serde_json::json!([{"id": "p1"}]));
        orch.attach_context("t1", entries).await.unwrap();

        let state = orch.store().load("t1").await.unwrap();
        assert!(state.has_referenced_item());
        assert!(state.is_fresh());
    }
}
