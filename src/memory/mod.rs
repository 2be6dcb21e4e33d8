//! 记忆层：短期（会话对话历史）与 few-shot 示例库（ICL）

pub mod conversation;
pub mod icl;

pub use conversation::{ConversationMemory, Message, Role, ToolCall};
pub use icl::{
    IclDocument, IclExample, IclPersistence, IclStore, IclStoreError, JsonFileIclPersistence,
    NoopIclPersistence, DEFAULT_MAX_STORE, ICL_FORMAT_VERSION,
};
