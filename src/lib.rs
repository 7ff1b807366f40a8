//! Realty Swarm - 多智能体房产对话编排
//!
//! 模块划分：
//! - **agents**: Agent 标识与人设、结构化抽取、Prompt 拼装、单轮执行
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、线程监管、轮次阶段、错误分类与恢复策略
//! - **llm**: 模型客户端（OpenAI 兼容 / Ollama / Mock）、Provider 链与容错调用
//! - **memory**: 消息、线程状态、长期摘要与存储实现
//! - **observability**: 日志初始化与统计输出
//! - **routing**: 意图路由

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod routing;

pub use crate::agents::AgentId;
pub use crate::core::{Orchestrator, SwarmError, TurnEvent, TurnReply, TurnRequest};
