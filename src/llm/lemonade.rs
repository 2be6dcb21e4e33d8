//! Lemonade Server / OpenAI 兼容 HTTP 客户端
//!
//! 通过 reqwest 直接构造三种端点的请求体（chat/completions、responses、completions），
//! 原始 JSON 交给 ResponseVariant 规范化；chat 端点在请求流式时逐帧累积 SSE 文本。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use crate::config::ConnectionSection;
use crate::llm::response::ResponseVariant;
use crate::llm::sse::StreamAccumulator;
use crate::llm::{ChatRequest, Completion, CompletionClient, Endpoint, LlmError};
use crate::memory::{Message, Role};

/// 列模型请求的固定超时
const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(15);

/// 错误响应体最多保留的字符数
const ERROR_BODY_PREVIEW_CHARS: usize = 300;

/// OpenAI 兼容客户端：base_url 需包含 API 前缀（如 http://host:8000/api/v1）
pub struct LemonadeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl LemonadeClient {
    pub fn new(connection: &ConnectionSection) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!connection.verify_ssl)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        let api_key = connection
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty());
        Ok(Self {
            http,
            base_url: connection.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout: connection.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn post(&self, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .post(self.url(path))
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(timeout);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// 校验连接与凭据（初始化时调用）；凭据被拒时返回 LlmError::Auth
    pub async fn validate(&self) -> Result<Vec<String>, LlmError> {
        let models = self.list_models().await?;
        tracing::info!(count = models.len(), base_url = %self.base_url, "Lemonade server reachable");
        Ok(models)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, LlmError> {
        let resp = builder.send().await.map_err(map_transport_error)?;
        check_status(resp).await
    }

    async fn read_payload(resp: reqwest::Response) -> Result<Value, LlmError> {
        let raw = resp.text().await.map_err(map_transport_error)?;
        // 非 JSON 响应按原文作为字符串交给规范化层
        Ok(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
    }

    async fn read_stream(resp: reqwest::Response) -> Result<Completion, LlmError> {
        let mut acc = StreamAccumulator::new();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let bytes = chunk.map_err(map_transport_error)?;
            acc.push(&bytes);
        }
        tracing::debug!(frames = acc.frames(), "Stream finished");
        Ok(Completion::text(acc.finish()))
    }
}

#[async_trait]
impl CompletionClient for LemonadeClient {
    async fn chat(&self, request: &ChatRequest) -> Result<Completion, LlmError> {
        let body = build_body(request);
        let stream = request.stream && request.endpoint.supports_streaming();
        let timeout = request.timeout.unwrap_or(self.timeout);

        tracing::debug!(
            endpoint = request.endpoint.path(),
            model = %request.model,
            messages = request.messages.len(),
            tools = request.has_tools(),
            stream,
            "Sending completion request"
        );

        let resp = self
            .send(self.post(request.endpoint.path(), timeout).json(&body))
            .await?;

        if stream {
            return Self::read_stream(resp).await;
        }
        let payload = Self::read_payload(resp).await?;
        Ok(ResponseVariant::from_endpoint(request.endpoint, payload).normalize())
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let mut builder = self.http.get(self.url("models")).timeout(LIST_MODELS_TIMEOUT);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = self.send(builder).await?;
        let payload = Self::read_payload(resp).await?;
        Ok(parse_model_list(&payload))
    }
}

fn map_transport_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Connection(err.to_string())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(LlmError::Auth {
            status: status.as_u16(),
        });
    }
    let body: String = resp
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(ERROR_BODY_PREVIEW_CHARS)
        .collect();
    Err(LlmError::Status {
        status: status.as_u16(),
        body,
    })
}

/// `{"data": [{"id": ...}]}` 或裸列表
fn parse_model_list(payload: &Value) -> Vec<String> {
    if let Some(items) = payload.get("data").and_then(Value::as_array) {
        let models: Vec<String> = items
            .iter()
            .filter_map(|m| m.get("id").and_then(Value::as_str).map(String::from))
            .collect();
        if !models.is_empty() {
            return models;
        }
    }
    match payload.as_array() {
        Some(items) => items
            .iter()
            .map(|m| match m {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        None => Vec::new(),
    }
}

/// 消息转 OpenAI 线上格式
pub fn message_to_wire(message: &Message) -> Value {
    let mut obj = Map::new();
    obj.insert("role".into(), json!(message.role.as_str()));
    obj.insert("content".into(), json!(message.content));
    if let Some(calls) = &message.tool_calls {
        let calls: Vec<Value> = calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {"name": c.name, "arguments": c.arguments},
                })
            })
            .collect();
        obj.insert("tool_calls".into(), Value::Array(calls));
    }
    if let Some(id) = &message.tool_call_id {
        obj.insert("tool_call_id".into(), json!(id));
    }
    if let Some(name) = &message.name {
        obj.insert("name".into(), json!(name));
    }
    Value::Object(obj)
}

/// 旧式 completions 端点：消息压平为 `ROLE: content` 行
pub fn flatten_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 按端点构造请求体
pub fn build_body(request: &ChatRequest) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(request.model));
    body.insert("temperature".into(), json!(request.temperature));
    body.insert("top_p".into(), json!(request.top_p));

    match request.endpoint {
        Endpoint::ChatCompletions => {
            let messages: Vec<Value> = request.messages.iter().map(message_to_wire).collect();
            body.insert("messages".into(), Value::Array(messages));
            insert_tools(&mut body, request);
            if let Some(max) = request.max_tokens {
                body.insert("max_tokens".into(), json!(max));
            }
            if request.stream {
                body.insert("stream".into(), json!(true));
            }
        }
        Endpoint::Responses => {
            let input: Vec<Value> = request
                .messages
                .iter()
                // responses 的 input 不接受 tool 角色，工具结果以 user 身份附带
                .map(|m| match m.role {
                    Role::Tool => json!({"role": "user", "content": m.content}),
                    _ => json!({"role": m.role.as_str(), "content": m.content}),
                })
                .collect();
            body.insert("input".into(), Value::Array(input));
            insert_tools(&mut body, request);
            if let Some(max) = request.max_tokens {
                body.insert("max_output_tokens".into(), json!(max));
            }
        }
        Endpoint::Completions => {
            body.insert("prompt".into(), json!(flatten_prompt(&request.messages)));
            if let Some(max) = request.max_tokens {
                body.insert("max_tokens".into(), json!(max));
            }
        }
    }
    Value::Object(body)
}

fn insert_tools(body: &mut Map<String, Value>, request: &ChatRequest) {
    if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
        body.insert("tools".into(), Value::Array(tools.clone()));
        if let Some(choice) = &request.tool_choice {
            body.insert("tool_choice".into(), choice.clone());
        }
    }
}
