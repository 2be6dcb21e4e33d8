//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LEMONADE__*` 覆盖（双下划线表示嵌套，如 `LEMONADE__AGENT__MODEL=qwen`）。
//! `agent.allowed_domains` 可用逗号分隔的环境变量给出。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::Endpoint;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub connection: ConnectionSection,
    pub agent: AgentConfig,
    pub tools: ToolsSection,
}

/// [app] 段：实例名、ICL 存储位置、会话闲置回收
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// ICL 示例库文件；未设置时示例只保存在内存中
    pub icl_store_path: Option<PathBuf>,
    /// 会话闲置超过该秒数后被回收（0 表示不回收）
    pub session_idle_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            icl_store_path: None,
            session_idle_secs: 1800,
        }
    }
}

/// [connection] 段：服务地址、凭据、超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// 需包含 API 前缀，如 http://lemonade:8000/api/v1
    pub base_url: String,
    pub api_key: Option<String>,
    pub verify_ssl: bool,
    /// 普通补全请求超时（秒）
    pub timeout_secs: u64,
    /// 工具支持握手探测的超时（秒），应短于 timeout_secs
    pub probe_timeout_secs: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            api_key: None,
            verify_ssl: true,
            timeout_secs: 45,
            probe_timeout_secs: 10,
        }
    }
}

impl ConnectionSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// 工具结果转回复的策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpMode {
    /// 已知结果形态直接套模板回复，不再调用模型
    #[default]
    Direct,
    /// 把工具结果交回模型生成回复
    Llm,
}

/// 是否允许模型控制设备
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// 纯聊天
    None,
    /// 控制交给宿主的本地意图管线
    Assist,
    /// 由模型通过工具调用控制
    #[default]
    LlmTools,
}

/// 模型是否支持工具调用（auto 表示首次使用时探测）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSupport {
    #[default]
    Auto,
    Yes,
    No,
}

/// [agent.icl] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IclSection {
    pub enabled: bool,
    pub max_examples: usize,
    /// 成功的回合自动写入示例库
    pub auto_capture: bool,
    pub max_store: usize,
}

impl Default for IclSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_examples: 4,
            auto_capture: false,
            max_store: crate::memory::DEFAULT_MAX_STORE,
        }
    }
}

/// [agent] 段：会话内不可变的代理参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub endpoint: Endpoint,
    pub model: String,
    pub agent_name: String,
    /// 人设部分；时间、区域提示与安全约束在每轮拼接
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
    pub max_history_turns: usize,
    pub refresh_system_every_turn: bool,
    pub stream: bool,
    pub enable_tools: bool,
    pub tool_iteration_limit: usize,
    pub follow_up_mode: FollowUpMode,
    pub control_mode: ControlMode,
    pub model_supports_tools: ToolSupport,
    /// call_service 允许的域名白名单
    pub allowed_domains: Vec<String>,
    pub icl: IclSection,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::ChatCompletions,
            model: "Qwen2.5-0.5B-Instruct-CPU".to_string(),
            agent_name: "Lemonade Assistant".to_string(),
            system_prompt: default_system_prompt(),
            temperature: 0.3,
            top_p: 1.0,
            max_tokens: Some(512),
            max_history_turns: 6,
            refresh_system_every_turn: true,
            stream: false,
            enable_tools: true,
            tool_iteration_limit: 1,
            follow_up_mode: FollowUpMode::Direct,
            control_mode: ControlMode::LlmTools,
            model_supports_tools: ToolSupport::Auto,
            allowed_domains: default_allowed_domains(),
            icl: IclSection::default(),
        }
    }
}

impl AgentConfig {
    /// 检查数值范围；构建 Orchestrator 前调用
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.model.trim().is_empty() {
            return Err(AgentError::ConfigError("agent.model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AgentError::ConfigError(format!(
                "agent.temperature out of range: {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(AgentError::ConfigError(format!(
                "agent.top_p out of range: {}",
                self.top_p
            )));
        }
        if self.max_tokens == Some(0) {
            return Err(AgentError::ConfigError("agent.max_tokens must be positive".into()));
        }
        Ok(())
    }
}

fn default_system_prompt() -> String {
    "You are a helpful assistant for a smart home. \
     You can talk naturally and, when appropriate, use tools to list areas and entities, \
     read device states and call home services (turn on lights, adjust temperature, etc.). \
     Be clear, concise and safe. If you lack context, ask for clarification."
        .to_string()
}

fn default_allowed_domains() -> Vec<String> {
    [
        "light",
        "switch",
        "climate",
        "fan",
        "cover",
        "media_player",
        "scene",
        "script",
        "button",
        "input_boolean",
        "vacuum",
        "lock",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 设备目录 JSON 文件（区域、实体、状态）；未设置时目录为空
    pub directory_path: Option<PathBuf>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            directory_path: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 LEMONADE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LEMONADE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    // 显式指定的配置文件必须存在且可解析
    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LEMONADE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("agent.allowed_domains")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
