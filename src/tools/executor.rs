//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, args) 在超时内调用 registry.execute，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed / UnknownTool）；每次调用输出结构化审计日志（JSON）。
//! run(call) 在此之上把模型的 ToolCall 变为 ToolResult，错误不会向外传播。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::memory::ToolCall;
use crate::tools::bridge::ToolResult;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定工具；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<Value, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = match self.registry.get(tool_name) {
            Some(tool) => timeout(self.timeout, tool.execute(args))
                .await
                .map_err(|_| AgentError::ToolTimeout(tool_name.to_string()))
                .and_then(|r| r.map_err(AgentError::ToolExecutionFailed)),
            None => Err(AgentError::UnknownTool(tool_name.to_string())),
        };

        let (ok, outcome) = match &result {
            Ok(v) if v.get("error").is_some() => (false, "rejected"),
            Ok(_) => (true, "ok"),
            Err(AgentError::ToolTimeout(_)) => (false, "timeout"),
            Err(AgentError::UnknownTool(_)) => (false, "unknown"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    /// 执行模型给出的一次工具调用；参数非法时按 `{}` 处理，错误折叠为 `{"error": ...}`
    pub async fn run(&self, call: &ToolCall) -> ToolResult {
        let args = parse_arguments(&call.arguments);
        match self.execute(&call.name, args).await {
            Ok(payload) => ToolResult::from_payload(payload),
            Err(AgentError::UnknownTool(name)) => {
                ToolResult::failure(format!("Unsupported tool: {name}"))
            }
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn openai_tools(&self) -> Vec<Value> {
        self.registry.to_openai_tools()
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        Ok(_) | Err(_) => {
            tracing::warn!(raw = %args_preview(&serde_json::Value::String(raw.to_string())), "Malformed tool arguments, using {{}}");
            Value::Object(Default::default())
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes args"
        }

        async fn execute(&self, args: Value) -> Result<Value, String> {
            Ok(json!({ "args": args }))
        }
    }

    fn executor(timeout_secs: u64) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        registry.register(Echo);
        ToolExecutor::new(registry, timeout_secs)
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_result() {
        let exec = executor(1);
        let err = exec.execute("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(_)));

        let result = exec.run(&ToolCall::new("c1", "slow", "{}")).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_unknown_tool_result() {
        let result = executor(1).run(&ToolCall::new("c1", "nope", "{}")).await;
        assert_eq!(result.payload, json!({"error": "Unsupported tool: nope"}));
    }

    #[tokio::test]
    async fn test_malformed_arguments_treated_as_empty() {
        let result = executor(1)
            .run(&ToolCall::new("c1", "echo", "{not json"))
            .await;
        assert!(result.ok);
        assert_eq!(result.payload, json!({"args": {}}));
    }
}
