//! 工具调用循环与跟进策略
//!
//! 每轮：达到迭代上限则追加提示并结束；否则回写带工具调用的 assistant 消息，按顺序逐个执行工具，
//! 每个结果以 tool 消息（tool_call_id 对应调用 ID）追加；随后 direct 模式尝试模板回复，
//! 否则（或模板无结果）迭代计数加一、关闭流式，再次请求模型。

use crate::config::FollowUpMode;
use crate::core::format::direct_reply;
use crate::core::orchestrator::TurnPhase;
use crate::llm::{ChatRequest, Completion, CompletionClient, LlmError};
use crate::memory::{Message, ToolCall};
use crate::tools::{DeviceDirectory, ToolExecutor, ToolResult};

/// 达到迭代上限时追加在回复末尾
pub const LIMIT_NOTICE: &str = "(Tool iteration limit reached.)";

/// 一轮工具执行后的去向
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    /// 直接以该文本结束回合
    Reply(String),
    /// 把工具结果交给模型继续
    AskModel,
}

/// 工具循环的结果
#[derive(Debug, Clone, Default)]
pub struct LoopOutcome {
    pub speech: String,
    /// 本回合用到的工具名（去重，按首次出现顺序）
    pub tools_used: Vec<String>,
    /// 已完成的模型跟进次数
    pub iterations: usize,
    pub limit_reached: bool,
}

/// 为缺少 ID 的工具调用生成 `call_<uuid>`，保证每条 tool 消息都能关联到调用
pub fn assign_call_ids(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.trim().is_empty() {
                call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
            call
        })
        .collect()
}

pub fn append_limit_notice(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        LIMIT_NOTICE.to_string()
    } else {
        format!("{text} {LIMIT_NOTICE}")
    }
}

/// 执行一轮工具调用（严格串行），把 assistant 与 tool 消息追加到 messages
pub async fn execute_round(
    executor: &ToolExecutor,
    messages: &mut Vec<Message>,
    assistant_text: &str,
    calls: &[ToolCall],
) -> Vec<(String, ToolResult)> {
    messages.push(Message::assistant_with_tools(assistant_text, calls.to_vec()));
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        tracing::debug!(tool = %call.name, call_id = %call.id, "Executing tool call");
        let result = executor.run(call).await;
        messages.push(Message::tool(&call.id, &call.name, result.to_content()));
        results.push((call.name.clone(), result));
    }
    results
}

pub async fn decide_follow_up(
    mode: FollowUpMode,
    directory: &dyn DeviceDirectory,
    results: &[(String, ToolResult)],
) -> FollowUp {
    if mode == FollowUpMode::Direct {
        if let Some(reply) = direct_reply(directory, results).await {
            return FollowUp::Reply(reply);
        }
        tracing::debug!("No direct reply for this round, asking the model");
    }
    FollowUp::AskModel
}

/// 有界工具循环
pub struct ToolLoop<'a> {
    pub client: &'a dyn CompletionClient,
    pub executor: &'a ToolExecutor,
    pub directory: &'a dyn DeviceDirectory,
    pub follow_up: FollowUpMode,
    pub iteration_limit: usize,
}

impl ToolLoop<'_> {
    /// 从第一次补全开始驱动循环；request.messages 作为工作消息列表被追加
    pub async fn run(
        &self,
        request: &mut ChatRequest,
        first: Completion,
    ) -> Result<LoopOutcome, LlmError> {
        let mut outcome = LoopOutcome::default();
        let mut completion = first;
        let mut last_text = String::new();

        loop {
            let text = completion.content_or_empty().trim().to_string();
            if !text.is_empty() {
                last_text = text.clone();
            }
            if completion.tool_calls.is_empty() {
                outcome.speech = text;
                break;
            }

            tracing::debug!(phase = ?TurnPhase::ToolsPending, calls = completion.tool_calls.len());
            if outcome.iterations >= self.iteration_limit {
                tracing::warn!(
                    limit = self.iteration_limit,
                    "Tool iteration limit reached, finalizing turn"
                );
                outcome.speech = append_limit_notice(&last_text);
                outcome.limit_reached = true;
                break;
            }

            tracing::debug!(phase = ?TurnPhase::ExecuteTools);
            let calls = assign_call_ids(std::mem::take(&mut completion.tool_calls));
            for call in &calls {
                if !outcome.tools_used.contains(&call.name) {
                    outcome.tools_used.push(call.name.clone());
                }
            }
            let results = execute_round(self.executor, &mut request.messages, &text, &calls).await;

            match decide_follow_up(self.follow_up, self.directory, &results).await {
                FollowUp::Reply(reply) => {
                    outcome.speech = reply;
                    break;
                }
                FollowUp::AskModel => {
                    outcome.iterations += 1;
                    request.stream = false;
                    tracing::debug!(phase = ?TurnPhase::AwaitCompletion, iteration = outcome.iterations);
                    completion = self.client.chat(request).await?;
                }
            }
        }

        Ok(outcome)
    }
}
