//! 会话状态存储抽象层
//!
//! 短期（按 thread_id）与长期（按用户命名空间）两类持久化，支持内存与 JSON 文件两种实现。
//! 同一 thread_id 的 save 不做并发保护，由编排器的按线程互斥保证。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::agents::AgentId;
use crate::memory::{LongTermSummary, ThreadState};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// 状态存储接口
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 读取线程状态；不存在时返回新建状态（默认 Agent、空历史）
    async fn load(&self, thread_id: &str) -> Result<ThreadState, StoreError>;

    /// 整体替换线程状态
    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<(), StoreError>;

    async fn load_long_term(&self, namespace: &str) -> Result<Option<LongTermSummary>, StoreError>;

    async fn save_long_term(&self, namespace: &str, summary: &LongTermSummary) -> Result<(), StoreError>;

    /// 清理空闲超时的短期状态，返回清理数量；不支持 TTL 的实现返回 0
    async fn evict_idle(&self) -> usize {
        0
    }
}

struct StoredThread {
    state: ThreadState,
    last_active: Instant,
}

/// 内存存储：短期状态带空闲 TTL，长期摘要常驻
pub struct InMemoryStateStore {
    threads: RwLock<HashMap<String, StoredThread>>,
    long_term: RwLock<HashMap<String, LongTermSummary>>,
    default_agent: AgentId,
    idle_ttl: Duration,
}

impl InMemoryStateStore {
    pub fn new(default_agent: AgentId, idle_ttl: Duration) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            long_term: RwLock::new(HashMap::new()),
            default_agent,
            idle_ttl,
        }
    }

    /// 当前保存的线程数
    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(AgentId::default(), Duration::from_secs(1800))
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, thread_id: &str) -> Result<ThreadState, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .map(|t| t.state.clone())
            .unwrap_or_else(|| ThreadState::new(thread_id, self.default_agent)))
    }

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<(), StoreError> {
        self.threads.write().await.insert(
            thread_id.to_string(),
            StoredThread {
                state: state.clone(),
                last_active: Instant::now(),
            },
        );
        Ok(())
    }

    async fn load_long_term(&self, namespace: &str) -> Result<Option<LongTermSummary>, StoreError> {
        Ok(self.long_term.read().await.get(namespace).cloned())
    }

    async fn save_long_term(&self, namespace: &str, summary: &LongTermSummary) -> Result<(), StoreError> {
        self.long_term
            .write()
            .await
            .insert(namespace.to_string(), summary.clone());
        Ok(())
    }

    async fn evict_idle(&self) -> usize {
        let mut threads = self.threads.write().await;
        let before = threads.len();
        threads.retain(|_, t| t.last_active.elapsed() <= self.idle_ttl);
        let evicted = before - threads.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle threads");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[tokio::test]
    async fn test_load_missing_returns_fresh_state() {
        let store = InMemoryStateStore::new(AgentId::Property, Duration::from_secs(60));
        let state = store.load("t1").await.unwrap();
        assert!(state.is_fresh());
        assert_eq!(state.current_agent(), AgentId::Property);
        assert_eq!(store.thread_count().await, 0);
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let store = InMemoryStateStore::default();
        assert_eq!(store.load("t1").await.unwrap(), store.load("t1").await.unwrap());

        let mut state = store.load("t1").await.unwrap();
        state.append_message(Message::user("hello"));
        store.save("t1", &state).await.unwrap();
        let a = store.load("t1").await.unwrap();
        let b = store.load("t1").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, state);
    }

    #[tokio::test]
    async fn test_evict_idle_threads() {
        let store = InMemoryStateStore::new(AgentId::Search, Duration::from_millis(20));
        let state = ThreadState::new("t1", AgentId::Search);
        store.save("t1", &state).await.unwrap();
        assert_eq!(store.evict_idle().await, 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.evict_idle().await, 1);
        assert!(store.load("t1").await.unwrap().is_fresh());
    }

    #[tokio::test]
    async fn test_long_term_roundtrip_survives_eviction() {
        let store = InMemoryStateStore::new(AgentId::Search, Duration::from_millis(1));
        assert!(store.load_long_term("user-1").await.unwrap().is_none());

        let summary = LongTermSummary::new("user-1");
        store.save_long_term("user-1", &summary).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.evict_idle().await;
        assert_eq!(store.load_long_term("user-1").await.unwrap(), Some(summary));
    }
}
