//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按注册顺序保存，
//! 既用于按名查找执行，也用于生成请求中的 OpenAI `tools` 数组。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::schema::function_tool;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（与模型返回的 function.name 对应）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    /// 默认返回空对象，表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；业务错误放在返回的 JSON 中，Err 仅表示工具本身无法执行
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// 工具注册表：保持注册顺序，同名工具后注册者覆盖先注册者
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(slot) => *slot = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, String> {
        let tool = self.get(name).ok_or_else(|| format!("Unsupported tool: {name}"))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 生成请求用的 OpenAI function tools 数组
    pub fn to_openai_tools(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| function_tool(t.name(), t.description(), t.parameters_schema()))
            .collect()
    }
}
