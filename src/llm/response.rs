//! 响应规范化
//!
//! 三种后端返回格式按配置的端点类型选择适配器，统一为 Completion：
//! - Chat：`choices[0].message.{content, tool_calls}`
//! - Responses：顶层 `output_text`，或嵌套的 `response` / `output` 对象
//! - Completions：`choices[0].text`
//!
//! 适配器不会失败：无法识别的结构整体序列化为文本返回，保证本轮总有输出。

use serde_json::Value;

use crate::llm::{Completion, Endpoint};
use crate::memory::ToolCall;

/// 后端原始响应（按端点类型打标签）
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseVariant {
    Chat(Value),
    Responses(Value),
    Completions(Value),
}

impl ResponseVariant {
    pub fn from_endpoint(endpoint: Endpoint, payload: Value) -> Self {
        match endpoint {
            Endpoint::ChatCompletions => ResponseVariant::Chat(payload),
            Endpoint::Responses => ResponseVariant::Responses(payload),
            Endpoint::Completions => ResponseVariant::Completions(payload),
        }
    }

    pub fn normalize(&self) -> Completion {
        match self {
            ResponseVariant::Chat(payload) => normalize_chat(payload),
            ResponseVariant::Responses(payload) => normalize_responses(payload),
            ResponseVariant::Completions(payload) => normalize_completions(payload),
        }
    }
}

/// 无法识别时的兜底：字符串原样返回，其它结构序列化为 JSON 文本
fn literal(payload: &Value) -> Completion {
    match payload {
        Value::String(s) => Completion::text(s.clone()),
        other => Completion::text(other.to_string()),
    }
}

fn normalize_chat(payload: &Value) -> Completion {
    let Some(message) = payload.pointer("/choices/0/message") else {
        // 部分服务端在 chat 路径上也返回 output_text
        if payload.get("output_text").is_some() {
            return normalize_responses(payload);
        }
        return literal(payload);
    };

    let content = message.get("content").and_then(content_text);
    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    Completion::with_tool_calls(content, tool_calls)
}

/// content 可能是字符串，也可能是 `[{"type": "text", "text": ...}]` 分段
fn content_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            Some(text)
        }
        _ => None,
    }
}

fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
    let function = raw.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "{}".to_string(),
        Some(other) => other.to_string(),
    };
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(ToolCall {
        id,
        name,
        arguments,
    })
}

fn normalize_responses(payload: &Value) -> Completion {
    if let Some(text) = payload.get("output_text").and_then(Value::as_str) {
        return Completion::text(text);
    }
    if let Some(text) = payload
        .get("response")
        .and_then(|r| r.get("output_text"))
        .and_then(Value::as_str)
    {
        return Completion::text(text);
    }
    if let Some(text) = output_items_text(payload) {
        return Completion::text(text);
    }
    literal(payload)
}

/// `output: [{"content": [{"type": "output_text", "text": ...}]}]`
fn output_items_text(payload: &Value) -> Option<String> {
    let output = payload
        .get("output")
        .or_else(|| payload.pointer("/response/output"))?
        .as_array()?;
    let parts: Vec<&str> = output
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| {
            part.get("type")
                .and_then(Value::as_str)
                .map_or(true, |t| t == "output_text" || t == "text")
        })
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.concat())
    }
}

fn normalize_completions(payload: &Value) -> Completion {
    match payload.pointer("/choices/0/text").and_then(Value::as_str) {
        Some(text) => Completion::text(text),
        None => literal(payload),
    }
}
