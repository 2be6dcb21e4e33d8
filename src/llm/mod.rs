//! LLM 层：补全客户端抽象、Lemonade HTTP 实现、响应规范化、SSE 累积与测试用 Mock

pub mod lemonade;
pub mod mock;
pub mod response;
pub mod sse;
pub mod traits;

pub use lemonade::LemonadeClient;
pub use mock::ScriptedClient;
pub use response::ResponseVariant;
pub use sse::StreamAccumulator;
pub use traits::{ChatRequest, Completion, CompletionClient, Endpoint, LlmError};
