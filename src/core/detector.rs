//! 工具支持探测
//!
//! 决定本轮请求是否附带工具定义：全局启用、control_mode 为 llm_tools、端点协议支持工具、模型支持工具，四者同时成立才附带。
//! 模型支持与否在 auto 模式下每个会话只探测一次（一条最小请求，temperature=0，短超时），结果缓存在 Session 上。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;

use crate::config::{AgentConfig, ControlMode, ToolSupport};
use crate::core::session::Session;
use crate::llm::{ChatRequest, CompletionClient};
use crate::memory::Message;

const PROBE_SYSTEM: &str =
    "You are a smart home assistant. Use the provided tools to answer the user.";
const PROBE_USER: &str = "Which areas are there in the home?";

pub struct ToolSupportDetector {
    client: Arc<dyn CompletionClient>,
    config: Arc<AgentConfig>,
    probe_timeout: Duration,
}

impl ToolSupportDetector {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        config: Arc<AgentConfig>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            client,
            config,
            probe_timeout,
        }
    }

    /// 与模型无关的静态条件
    pub fn tools_permitted(&self) -> bool {
        self.config.enable_tools
            && self.config.control_mode == ControlMode::LlmTools
            && self.config.endpoint.supports_tools()
    }

    /// 本轮是否附带工具定义；auto 模式下必要时发起一次探测
    pub async fn should_attach_tools(&self, session: &mut Session, tools: &[Value]) -> bool {
        if tools.is_empty() || !self.tools_permitted() {
            return false;
        }
        match self.config.model_supports_tools {
            ToolSupport::Yes => true,
            ToolSupport::No => false,
            ToolSupport::Auto => {
                if let Some(cached) = session.cached_tool_support {
                    return cached;
                }
                let supported = self.probe(tools).await;
                tracing::info!(
                    conversation_id = %session.conversation_id,
                    model = %self.config.model,
                    supported,
                    "Tool support probe finished"
                );
                session.cached_tool_support = Some(supported);
                supported
            }
        }
    }

    /// 回复中出现至少一个工具调用即视为支持；任何失败都视为不支持
    async fn probe(&self, tools: &[Value]) -> bool {
        let mut request = ChatRequest::new(
            self.config.endpoint,
            self.config.model.clone(),
            vec![Message::system(PROBE_SYSTEM), Message::user(PROBE_USER)],
        );
        request.tools = Some(tools.to_vec());
        request.tool_choice = Some(Value::String("auto".into()));
        request.temperature = 0.0;
        request.top_p = self.config.top_p;
        request.max_tokens = self.config.max_tokens;
        request.stream = false;
        request.timeout = Some(self.probe_timeout);

        match timeout(self.probe_timeout, self.client.chat(&request)).await {
            Ok(Ok(completion)) => !completion.tool_calls.is_empty(),
            Ok(Err(e)) => {
                tracing::warn!("Tool support probe failed: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!("Tool support probe timed out after {:?}", self.probe_timeout);
                false
            }
        }
    }
}
