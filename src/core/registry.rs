//! 宿主注册
//!
//! 代理通过显式的 register / unregister 挂到宿主的会话代理表上；AgentHandle 在 start 时注册、stop 时注销，
//! 不依赖任何全局状态。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::orchestrator::{Orchestrator, TurnInput, TurnOutput};
use crate::core::AgentError;

/// 能处理一个回合的对象（宿主侧只看到这个接口）
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle(&self, input: TurnInput) -> TurnOutput;
}

#[async_trait]
impl TurnHandler for Orchestrator {
    async fn handle(&self, input: TurnInput) -> TurnOutput {
        self.process(input).await
    }
}

/// 宿主的代理注册表
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn register(
        &self,
        provider_id: &str,
        handler: Arc<dyn TurnHandler>,
    ) -> Result<(), AgentError>;

    /// 返回是否确有注销
    async fn unregister(&self, provider_id: &str) -> bool;
}

/// 内存注册表：provider_id -> handler
#[derive(Default)]
pub struct InMemoryAgentRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TurnHandler>>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, provider_id: &str) -> Option<Arc<dyn TurnHandler>> {
        self.handlers.read().await.get(provider_id).cloned()
    }

    pub async fn provider_ids(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    async fn register(
        &self,
        provider_id: &str,
        handler: Arc<dyn TurnHandler>,
    ) -> Result<(), AgentError> {
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(provider_id) {
            return Err(AgentError::ConfigError(format!(
                "provider already registered: {provider_id}"
            )));
        }
        handlers.insert(provider_id.to_string(), handler);
        tracing::info!(provider_id, "Conversation agent registered");
        Ok(())
    }

    async fn unregister(&self, provider_id: &str) -> bool {
        let removed = self.handlers.write().await.remove(provider_id).is_some();
        if removed {
            tracing::info!(provider_id, "Conversation agent unregistered");
        }
        removed
    }
}

/// 代理生命周期：start 注册，stop 注销
pub struct AgentHandle {
    provider_id: String,
    registry: Arc<dyn AgentRegistry>,
}

impl AgentHandle {
    pub async fn start(
        registry: Arc<dyn AgentRegistry>,
        provider_id: impl Into<String>,
        handler: Arc<dyn TurnHandler>,
    ) -> Result<Self, AgentError> {
        let provider_id = provider_id.into();
        registry.register(&provider_id, handler).await?;
        Ok(Self {
            provider_id,
            registry,
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub async fn stop(self) -> bool {
        self.registry.unregister(&self.provider_id).await
    }
}
