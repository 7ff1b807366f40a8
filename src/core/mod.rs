//! 核心编排层：错误分类、恢复策略、轮次阶段、线程监管、编排器

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::SwarmError;
pub use orchestrator::{Orchestrator, TurnEvent, TurnReply, TurnRequest};
pub use recovery::{RecoveryAction, RecoveryEngine};
pub use session_supervisor::{ThreadSupervisor, TurnGuard};
pub use state::{InvalidTransition, TurnPhase};
