//! Orchestrator 构建器：统一的初始化逻辑
//!
//! 未显式注入的组件按配置创建：补全客户端用 LemonadeClient，设备目录从 JSON 文件加载（未配置则为空），
//! ICL 示例库在配置了路径时落盘，否则只在内存中。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{AgentConfig, AppConfig, ConnectionSection};
use crate::core::detector::ToolSupportDetector;
use crate::core::orchestrator::Orchestrator;
use crate::core::session::SessionRegistry;
use crate::core::AgentError;
use crate::llm::{CompletionClient, LemonadeClient};
use crate::memory::{IclStore, JsonFileIclPersistence};
use crate::tools::{
    device_tool_registry, DeviceDirectory, InMemoryDirectory, ToolBridge, ToolExecutor,
};

pub struct OrchestratorBuilder {
    agent: AgentConfig,
    connection: ConnectionSection,
    tool_timeout_secs: u64,
    directory_path: Option<PathBuf>,
    icl_store_path: Option<PathBuf>,
    client: Option<Arc<dyn CompletionClient>>,
    directory: Option<Arc<dyn DeviceDirectory>>,
    icl: Option<Arc<IclStore>>,
    sessions: Option<Arc<SessionRegistry>>,
}

impl OrchestratorBuilder {
    /// 只有代理配置时使用默认连接与工具设置
    pub fn new(agent: AgentConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            agent,
            connection: defaults.connection,
            tool_timeout_secs: defaults.tools.tool_timeout_secs,
            directory_path: None,
            icl_store_path: None,
            client: None,
            directory: None,
            icl: None,
            sessions: None,
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            connection: config.connection.clone(),
            tool_timeout_secs: config.tools.tool_timeout_secs,
            directory_path: config.tools.directory_path.clone(),
            icl_store_path: config.app.icl_store_path.clone(),
            ..Self::new(config.agent.clone())
        }
    }

    pub fn with_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn DeviceDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_icl_store(mut self, store: Arc<IclStore>) -> Self {
        self.icl = Some(store);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_tool_timeout(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    fn build_client(&self) -> Result<Arc<dyn CompletionClient>, AgentError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = LemonadeClient::new(&self.connection)?;
        tracing::info!(
            base_url = %client.base_url(),
            model = %self.agent.model,
            endpoint = ?self.agent.endpoint,
            "Using Lemonade completion client"
        );
        Ok(Arc::new(client))
    }

    fn build_directory(&self) -> Result<Arc<dyn DeviceDirectory>, AgentError> {
        if let Some(directory) = &self.directory {
            return Ok(directory.clone());
        }
        match &self.directory_path {
            Some(path) => {
                let directory = InMemoryDirectory::from_json_file(path)
                    .map_err(|e| AgentError::ConfigError(format!("{e:#}")))?;
                Ok(Arc::new(directory))
            }
            None => {
                tracing::warn!("No device directory configured, tools will see an empty home");
                Ok(Arc::new(InMemoryDirectory::new()))
            }
        }
    }

    fn build_icl(&self) -> Arc<IclStore> {
        if let Some(store) = &self.icl {
            return store.clone();
        }
        let max_store = self.agent.icl.max_store;
        match &self.icl_store_path {
            Some(path) => Arc::new(IclStore::new(
                Arc::new(JsonFileIclPersistence::new(path)),
                max_store,
            )),
            None => Arc::new(IclStore::in_memory(max_store)),
        }
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        self.agent.validate()?;

        let client = self.build_client()?;
        let directory = self.build_directory()?;
        let icl = self.build_icl();
        let sessions = self
            .sessions
            .clone()
            .unwrap_or_else(|| Arc::new(SessionRegistry::new(self.agent.max_history_turns)));

        let bridge = Arc::new(ToolBridge::new(
            directory.clone(),
            self.agent.allowed_domains.clone(),
        ));
        let executor = ToolExecutor::new(device_tool_registry(bridge), self.tool_timeout_secs);

        let config = Arc::new(self.agent);
        let detector = ToolSupportDetector::new(
            client.clone(),
            config.clone(),
            self.connection.probe_timeout(),
        );

        Ok(Orchestrator::new(
            config, client, executor, directory, sessions, icl, detector,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedClient;

    #[test]
    fn test_invalid_config_is_rejected() {
        let agent = AgentConfig {
            temperature: 5.0,
            ..AgentConfig::default()
        };
        let result = OrchestratorBuilder::new(agent)
            .with_client(Arc::new(ScriptedClient::new()))
            .build();
        assert!(matches!(result, Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_missing_directory_file_is_config_error() {
        let mut app = AppConfig::default();
        app.tools.directory_path = Some(PathBuf::from("/nonexistent/home.json"));
        let result = OrchestratorBuilder::from_app_config(&app)
            .with_client(Arc::new(ScriptedClient::new()))
            .build();
        assert!(matches!(result, Err(AgentError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_builds_with_file_backed_icl() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut app = AppConfig::default();
        app.app.icl_store_path = Some(dir.path().join("icl/examples.json"));
        let orch = OrchestratorBuilder::from_app_config(&app)
            .with_client(Arc::new(ScriptedClient::new()))
            .build()
            .unwrap();

        orch.icl_store()
            .add_example("hi", "hello", &[], &[])
            .await
            .unwrap();
        assert!(dir.path().join("icl/examples.json").exists());
    }
}
