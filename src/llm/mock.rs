//! 脚本化 Mock 客户端（用于测试，无需 API）
//!
//! 按顺序弹出预设的回复；脚本耗尽后回退为固定文本。记录每次收到的请求，便于断言调用次数与请求内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatRequest, Completion, CompletionClient, LlmError};
use crate::memory::ToolCall;

/// 脚本耗尽后的回复
const FALLBACK_REPLY: &str = "(no scripted reply)";

/// Mock 客户端：按脚本回复并记录请求
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, item: Result<Completion, LlmError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
    }

    /// 追加纯文本回复
    pub fn reply(self, text: &str) -> Self {
        self.push(Ok(Completion::text(text)));
        self
    }

    /// 追加带工具调用的回复
    pub fn tool_calls(self, content: Option<&str>, calls: Vec<ToolCall>) -> Self {
        self.push(Ok(Completion::with_tool_calls(content.map(String::from), calls)));
        self
    }

    /// 追加一次失败
    pub fn error(self, err: LlmError) -> Self {
        self.push(Err(err));
        self
    }

    /// 已收到的请求（按时间顺序）
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn chat(&self, request: &ChatRequest) -> Result<Completion, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| Ok(Completion::text(FALLBACK_REPLY)))
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(vec!["scripted".to_string()])
    }
}
