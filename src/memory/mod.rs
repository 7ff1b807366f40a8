//! 记忆层：消息与 Handoff、线程状态（短期）、用户摘要（长期）、存储实现

pub mod conversation;
pub mod long_term;
pub mod persistence;
pub mod store;
pub mod thread;

pub use conversation::{HandoffRecord, Message, Role};
pub use long_term::LongTermSummary;
pub use persistence::JsonFileStore;
pub use store::{InMemoryStateStore, StateStore, StoreError};
pub use thread::{keys, ThreadContext, ThreadState};
