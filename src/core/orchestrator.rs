//! 回合编排器
//!
//! process(input) 处理一个对话回合：ComposePrompt → AwaitCompletion → [ToolsPending → ExecuteTools → AwaitCompletion]* → Finalize。
//! 对外从不返回错误：任何失败（包括回合内 panic）都会变成一句道歉，并记录诊断日志。
//! 同一会话的回合由会话锁串行化；不同会话可并发。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

use crate::config::AgentConfig;
use crate::core::detector::ToolSupportDetector;
use crate::core::error::GENERIC_APOLOGY;
use crate::core::session::{Session, SessionRegistry};
use crate::core::tool_loop::{LoopOutcome, ToolLoop};
use crate::core::AgentError;
use crate::llm::{ChatRequest, CompletionClient};
use crate::memory::{IclStore, IclStoreError, Message};
use crate::tools::{DeviceDirectory, ToolExecutor};

/// 自动采集示例时打的标签
const AUTO_CAPTURE_TAG: &str = "auto";

const SAFETY_GUIDANCE: &str = "Before doing anything that is hard to undo or could be unsafe \
(unlocking doors, opening covers or garage doors, disabling alarms), ask the user to confirm first.";

const TOOL_GUIDANCE: &str = "Use the provided tools to look up areas, entities and states, \
and to call services. Never invent entity ids; list entities when unsure.";

/// 回合内的阶段（用于调试日志）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    ComposePrompt,
    AwaitCompletion,
    ToolsPending,
    ExecuteTools,
    Finalize,
}

/// 发起请求的设备所在位置
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceContext {
    pub area_id: Option<String>,
    pub area_name: Option<String>,
    pub device_id: Option<String>,
}

/// 一个回合的输入
#[derive(Clone, Debug, Default)]
pub struct TurnInput {
    pub text: String,
    /// 为空时生成新的会话 ID
    pub conversation_id: Option<String>,
    pub language_hint: Option<String>,
    pub device_context: Option<DeviceContext>,
}

impl TurnInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language_hint = Some(language.into());
        self
    }

    pub fn with_device_context(mut self, context: DeviceContext) -> Self {
        self.device_context = Some(context);
        self
    }
}

/// 一个回合的输出
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutput {
    pub speech: String,
    pub conversation_id: String,
}

/// 回合编排器：持有不可变配置与各组件，会话状态全部在 SessionRegistry 中
pub struct Orchestrator {
    config: Arc<AgentConfig>,
    client: Arc<dyn CompletionClient>,
    executor: ToolExecutor,
    directory: Arc<dyn DeviceDirectory>,
    sessions: Arc<SessionRegistry>,
    icl: Arc<IclStore>,
    detector: ToolSupportDetector,
    /// OpenAI 格式的工具定义（启动时生成一次）
    tools: Vec<Value>,
}

impl Orchestrator {
    pub(crate) fn new(
        config: Arc<AgentConfig>,
        client: Arc<dyn CompletionClient>,
        executor: ToolExecutor,
        directory: Arc<dyn DeviceDirectory>,
        sessions: Arc<SessionRegistry>,
        icl: Arc<IclStore>,
        detector: ToolSupportDetector,
    ) -> Self {
        let tools = executor.openai_tools();
        Self {
            config,
            client,
            executor,
            directory,
            sessions,
            icl,
            detector,
            tools,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn icl_store(&self) -> &Arc<IclStore> {
        &self.icl
    }

    /// 清空 ICL 示例库
    pub async fn clear_examples(&self) -> Result<(), IclStoreError> {
        self.icl.clear().await?;
        tracing::info!("ICL examples cleared");
        Ok(())
    }

    /// 处理一个回合；总能得到回复
    pub async fn process(&self, input: TurnInput) -> TurnOutput {
        let conversation_id = input
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let turn = AssertUnwindSafe(self.run_turn(&conversation_id, &input))
            .catch_unwind()
            .await;

        let speech = match turn {
            Ok(Ok(speech)) => speech,
            Ok(Err(e)) => {
                tracing::error!(conversation_id = %conversation_id, "Turn failed: {}", e);
                e.user_message()
            }
            Err(_) => {
                tracing::error!(conversation_id = %conversation_id, "Turn panicked");
                GENERIC_APOLOGY.to_string()
            }
        };

        TurnOutput {
            speech,
            conversation_id,
        }
    }

    async fn run_turn(&self, conversation_id: &str, input: &TurnInput) -> Result<String, AgentError> {
        let handle = self.sessions.get_or_create(conversation_id).await;
        let mut session = handle.lock().await;
        session.touch();

        tracing::debug!(phase = ?TurnPhase::ComposePrompt, conversation_id);
        let attach_tools = self
            .detector
            .should_attach_tools(&mut session, &self.tools)
            .await;
        let system_prompt = match session.system_prompt.clone() {
            Some(cached) if !self.config.refresh_system_every_turn => cached,
            _ => self.system_prompt(input, attach_tools).await,
        };
        let messages = self.compose_messages(&session, &system_prompt, input).await;
        let mut request = self.build_request(messages, attach_tools);

        tracing::debug!(
            phase = ?TurnPhase::AwaitCompletion,
            messages = request.messages.len(),
            tools = attach_tools,
            stream = request.stream,
        );
        let outcome = match self.complete(&mut request, attach_tools).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // 失败时只记录用户消息
                session.history.push(Message::user(&input.text));
                return Err(e);
            }
        };

        tracing::debug!(
            phase = ?TurnPhase::Finalize,
            iterations = outcome.iterations,
            tools_used = ?outcome.tools_used,
        );
        session.system_prompt = Some(system_prompt);
        session.history.push(Message::user(&input.text));
        session.history.push(Message::assistant(&outcome.speech));
        session.touch();
        drop(session);

        self.capture_example(input, &outcome).await;
        Ok(outcome.speech)
    }

    /// 首次补全 + （附带工具时）工具循环
    async fn complete(
        &self,
        request: &mut ChatRequest,
        attach_tools: bool,
    ) -> Result<LoopOutcome, AgentError> {
        let first = self.client.chat(request).await?;
        if !attach_tools {
            return Ok(LoopOutcome {
                speech: first.content_or_empty().trim().to_string(),
                ..LoopOutcome::default()
            });
        }
        let tool_loop = ToolLoop {
            client: self.client.as_ref(),
            executor: &self.executor,
            directory: self.directory.as_ref(),
            follow_up: self.config.follow_up_mode,
            iteration_limit: self.config.tool_iteration_limit,
        };
        Ok(tool_loop.run(request, first).await?)
    }

    fn build_request(&self, messages: Vec<Message>, attach_tools: bool) -> ChatRequest {
        let cfg = &self.config;
        let mut request = ChatRequest::new(cfg.endpoint, cfg.model.clone(), messages);
        request.temperature = cfg.temperature;
        request.top_p = cfg.top_p;
        request.max_tokens = cfg.max_tokens;
        // 工具调用与流式互斥
        request.stream = cfg.stream && !attach_tools && cfg.endpoint.supports_streaming();
        if attach_tools {
            request.tools = Some(self.tools.clone());
            request.tool_choice = Some(Value::String("auto".into()));
        }
        request
    }

    /// system prompt + ICL 示例 + 历史 + 本轮用户消息
    async fn compose_messages(
        &self,
        session: &Session,
        system_prompt: &str,
        input: &TurnInput,
    ) -> Vec<Message> {
        let mut messages = vec![Message::system(system_prompt)];

        if self.config.icl.enabled && self.config.icl.max_examples > 0 {
            let examples = self
                .icl
                .get_examples(&input.text, self.config.icl.max_examples)
                .await;
            tracing::debug!(count = examples.len(), "ICL examples selected");
            for example in examples {
                messages.push(Message::user(example.user));
                messages.push(Message::assistant(example.assistant));
            }
        }

        messages.extend(session.history.messages().iter().cloned());
        messages.push(Message::user(&input.text));
        messages
    }

    /// 重新构建 system prompt；工具说明只在本回合实际附带工具时加入
    async fn system_prompt(&self, input: &TurnInput, attach_tools: bool) -> String {
        let cfg = &self.config;
        let mut parts = vec![cfg.system_prompt.trim().to_string()];
        if !cfg.agent_name.trim().is_empty() {
            parts.push(format!("Your name is {}.", cfg.agent_name.trim()));
        }
        parts.push(format!(
            "Current date and time: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M (%A)")
        ));
        if let Some(hint) = self.area_hint(input.device_context.as_ref()).await {
            parts.push(hint);
        }
        if let Some(lang) = input.language_hint.as_deref().filter(|l| !l.trim().is_empty()) {
            parts.push(format!("Answer in the user's language ({}).", lang.trim()));
        }
        if attach_tools {
            parts.push(TOOL_GUIDANCE.to_string());
        }
        parts.push(SAFETY_GUIDANCE.to_string());
        parts.join("\n")
    }

    /// 由设备上下文推出的区域提示；只有区域 ID 时从目录查区域名
    async fn area_hint(&self, context: Option<&DeviceContext>) -> Option<String> {
        let context = context?;
        let mut area = context.area_name.clone().filter(|n| !n.is_empty());
        if area.is_none() {
            if let Some(area_id) = context.area_id.as_deref().filter(|a| !a.is_empty()) {
                area = Some(
                    self.directory
                        .areas()
                        .await
                        .into_iter()
                        .find(|a| a.id == area_id)
                        .map(|a| a.name)
                        .unwrap_or_else(|| area_id.to_string()),
                );
            }
        }
        match (area, context.device_id.as_deref()) {
            (Some(area), _) => Some(format!(
                "The user is speaking from the {area} area. When a request does not name a place, assume this area."
            )),
            (None, Some(device)) if !device.is_empty() => {
                Some(format!("The request came from device {device}."))
            }
            _ => None,
        }
    }

    async fn capture_example(&self, input: &TurnInput, outcome: &LoopOutcome) {
        let icl = &self.config.icl;
        if !(icl.enabled && icl.auto_capture) || outcome.limit_reached {
            return;
        }
        if input.text.trim().is_empty() || outcome.speech.trim().is_empty() {
            return;
        }
        if let Err(e) = self
            .icl
            .add_example(
                &input.text,
                &outcome.speech,
                &outcome.tools_used,
                &[AUTO_CAPTURE_TAG.to_string()],
            )
            .await
        {
            tracing::warn!("Failed to capture ICL example: {}", e);
        }
    }
}
