//! Realty Swarm - 命令行对话入口
//!
//! 从标准输入逐行读取用户消息，在同一线程上调用编排器，输出 `[agent] response`。
//! 可选参数：配置文件路径。环境变量 SWARM_USER 设置长期记忆命名空间。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use realty_swarm::{observability, Orchestrator, TurnRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let orchestrator = Arc::new(Orchestrator::load(config_path).context("Failed to load config")?);
    let sweeper = orchestrator.spawn_idle_sweeper(Duration::from_secs(60));

    let thread_id = uuid::Uuid::new_v4().to_string();
    let user_id = std::env::var("SWARM_USER").ok();
    tracing::info!(thread_id = %thread_id, "Realty swarm ready, type a message (Ctrl+D to quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut request = TurnRequest::new(thread_id.clone(), line);
        if let Some(user) = &user_id {
            request = request.with_user(user.clone());
        }
        let reply = orchestrator.handle_turn(request).await.context("Turn failed")?;
        println!("[{}] {}", reply.agent, reply.response);
    }

    orchestrator.shutdown();
    let _ = sweeper.await;
    observability::log_provider_metrics(orchestrator.metrics());
    Ok(())
}
