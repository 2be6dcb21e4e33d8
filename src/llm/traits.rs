//! 补全客户端抽象
//!
//! 所有后端（Lemonade / OpenAI 兼容 HTTP、测试用脚本客户端）实现 CompletionClient：
//! chat 接收已规范化的请求，返回统一的 `{content, tool_calls}` 结果。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Message, ToolCall};

/// 补全端点类型（OpenAI 兼容的三种路径）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// `/chat/completions`（推荐，唯一支持流式 + 工具调用的端点）
    #[default]
    ChatCompletions,
    /// `/responses`
    Responses,
    /// `/completions`（旧式纯文本 prompt，不支持工具）
    Completions,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::ChatCompletions => "chat/completions",
            Endpoint::Responses => "responses",
            Endpoint::Completions => "completions",
        }
    }

    /// 协议层面是否能携带工具定义
    pub fn supports_tools(self) -> bool {
        !matches!(self, Endpoint::Completions)
    }

    pub fn supports_streaming(self) -> bool {
        matches!(self, Endpoint::ChatCompletions)
    }
}

/// 一次补全请求
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub endpoint: Endpoint,
    pub model: String,
    pub messages: Vec<Message>,
    /// OpenAI 格式的工具定义（`{"type": "function", "function": {...}}`）
    pub tools: Option<Vec<Value>>,
    pub tool_choice: Option<Value>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    /// 覆盖客户端默认超时（握手探测使用更短的超时）
    pub timeout: Option<Duration>,
}

impl ChatRequest {
    pub fn new(endpoint: Endpoint, model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            endpoint,
            model: model.into(),
            messages,
            tools: None,
            tool_choice: None,
            temperature: 0.3,
            top_p: 1.0,
            max_tokens: None,
            stream: false,
            timeout: None,
        }
    }

    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// 规范化后的补全结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content,
            tool_calls,
        }
    }

    pub fn content_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// 补全调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("credentials rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// 补全客户端 trait
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// 发送一次补全；流式请求在内部累积为完整文本
    async fn chat(&self, request: &ChatRequest) -> Result<Completion, LlmError>;

    /// 列出服务端可用模型；默认无
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }
}
