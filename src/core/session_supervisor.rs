//! 线程监管：按 thread_id 串行化、取消令牌、阶段跟踪
//!
//! 同一 thread_id 的轮次持有同一把互斥锁依次执行；不同线程之间完全并发。
//! 每轮持有一个根令牌的子令牌，`cancel(thread_id)` 只取消该线程正在执行的轮次。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::core::state::{InvalidTransition, TurnPhase};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
pub struct ThreadSupervisor {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    active: Mutex<HashMap<String, CancellationToken>>,
    phases: Mutex<HashMap<String, TurnPhase>>,
    root: CancellationToken,
}

impl ThreadSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 等待该线程的上一轮结束后开始新一轮
    pub async fn begin(self: &Arc<Self>, thread_id: &str) -> TurnGuard {
        let thread_lock = {
            let mut locks = lock(&self.locks);
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let held = thread_lock.lock_owned().await;

        let cancel = self.root.child_token();
        lock(&self.active).insert(thread_id.to_string(), cancel.clone());
        lock(&self.phases).insert(thread_id.to_string(), TurnPhase::Idle);

        TurnGuard {
            supervisor: Arc::clone(self),
            thread_id: thread_id.to_string(),
            cancel,
            _held: held,
        }
    }

    /// 取消该线程正在执行的轮次；没有进行中的轮次时返回 false
    pub fn cancel(&self, thread_id: &str) -> bool {
        match lock(&self.active).get(thread_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消所有进行中的轮次（进程退出时）
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    pub fn phase(&self, thread_id: &str) -> TurnPhase {
        lock(&self.phases).get(thread_id).copied().unwrap_or_default()
    }

    pub fn is_active(&self, thread_id: &str) -> bool {
        lock(&self.active).contains_key(thread_id)
    }

    /// 丢弃没有任何轮次持有或等待的线程锁，返回丢弃数量
    pub fn prune_idle_locks(&self) -> usize {
        let mut locks = lock(&self.locks);
        let before = locks.len();
        locks.retain(|_, l| Arc::strong_count(l) > 1);
        before - locks.len()
    }

    fn set_phase(&self, thread_id: &str, to: TurnPhase) -> Result<(), InvalidTransition> {
        let mut phases = lock(&self.phases);
        let phase = phases.entry(thread_id.to_string()).or_default();
        phase.advance(to)
    }

    fn finish(&self, thread_id: &str) {
        lock(&self.active).remove(thread_id);
        lock(&self.phases).remove(thread_id);
    }
}

/// 一轮的持有凭证：析构时释放线程锁并回到 Idle（调用方中途放弃也不会卡住线程）
#[derive(Debug)]
pub struct TurnGuard {
    supervisor: Arc<ThreadSupervisor>,
    thread_id: String,
    cancel: CancellationToken,
    _held: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn advance(&self, to: TurnPhase) -> Result<(), InvalidTransition> {
        self.supervisor.set_phase(&self.thread_id, to)
    }

    pub fn phase(&self) -> TurnPhase {
        self.supervisor.phase(&self.thread_id)
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.supervisor.finish(&self.thread_id);
    }
}
