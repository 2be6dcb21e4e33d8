//! Agent 错误类型
//!
//! 回合边界不向外抛错：Orchestrator 通过 user_message 把错误转成一句道歉，同时记录诊断日志。
//! 工具相关错误被写入 tool 消息（`{"error": ...}`），不会中止回合。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误（网络、认证、工具、配置等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Connection error: {0}")]
    Connection(LlmError),

    /// 仅在初始化 / 校验凭据时单独上报
    #[error("Authentication failed: {0}")]
    Auth(LlmError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unsupported tool: {0}")]
    UnknownTool(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Auth { .. } => AgentError::Auth(err),
            other => AgentError::Connection(other),
        }
    }
}

impl AgentError {
    /// 面向用户的一句话
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Connection(LlmError::Timeout) => {
                "Sorry, the language model service took too long to answer.".to_string()
            }
            AgentError::Connection(_) => {
                "Sorry, I couldn't reach the language model service.".to_string()
            }
            AgentError::Auth(_) => {
                "Sorry, the language model service rejected my credentials.".to_string()
            }
            _ => GENERIC_APOLOGY.to_string(),
        }
    }
}

/// 未预期故障时的统一回复
pub const GENERIC_APOLOGY: &str = "Sorry, an unexpected error occurred.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_is_classified_separately() {
        let err: AgentError = LlmError::Auth { status: 401 }.into();
        assert!(matches!(err, AgentError::Auth(_)));
        assert!(err.user_message().contains("credentials"));
    }

    #[test]
    fn test_connection_apology() {
        let err: AgentError = LlmError::Connection("refused".into()).into();
        assert!(err.user_message().contains("couldn't reach"));
        let timeout: AgentError = LlmError::Timeout.into();
        assert!(timeout.user_message().contains("too long"));
    }

    #[test]
    fn test_other_errors_use_generic_apology() {
        let err = AgentError::ToolExecutionFailed("boom".into());
        assert_eq!(err.user_message(), GENERIC_APOLOGY);
    }
}
