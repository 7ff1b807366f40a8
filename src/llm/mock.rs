//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：总是可用，回显 Prompt 中最后一条用户消息
//! - ScriptedLlmClient：按队列依次返回预设结果，可设置延迟，用于容错测试

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};

/// Mock 客户端：从 Prompt 中取出 USER MESSAGE 行并生成确定性回复
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let last_user = prompt
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix("USER MESSAGE: "))
            .unwrap_or("(no input)");

        Ok(format!(
            "[offline assistant] I received your message \"{}\". \
             I'm running without a remote model right now, but I've noted your request.",
            last_user.trim_matches('"')
        ))
    }
}

/// 预设结果：Ok 文本或错误，可附带延迟
#[derive(Debug, Clone)]
pub struct Scripted {
    pub outcome: Result<String, LlmError>,
    pub delay: Duration,
}

impl Scripted {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            outcome: Ok(text.into()),
            delay: Duration::ZERO,
        }
    }

    pub fn err(error: LlmError) -> Self {
        Self {
            outcome: Err(error),
            delay: Duration::ZERO,
        }
    }

    /// 模拟一个永远不会在超时内返回的调用
    pub fn hang() -> Self {
        Self::ok("late reply that should never be seen by callers").after(Duration::from_secs(3600))
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// 脚本化客户端：队列取空后重复最后一个结果
#[derive(Debug)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 总是返回同一结果
    pub fn always(step: Scripted) -> Self {
        Self::new([step])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 收到过的 Prompt（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn next_step(&self) -> Scripted {
        let next = self.script.lock().ok().and_then(|mut q| q.pop_front());
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match next {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last
                .clone()
                .unwrap_or_else(|| Scripted::err(LlmError::Transport("empty script".into()))),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let step = self.next_step();
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.outcome
    }
}
