//! 会话注册表
//!
//! 每个 conversation id 对应一个 Session（历史记忆 + 已生效的 system prompt + 工具支持探测缓存），
//! 以 `Arc<Mutex<Session>>` 保存；回合全程持有该锁，同一会话的回合因此串行，不同会话互不影响。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::memory::ConversationMemory;

/// 单个会话的可变状态
#[derive(Debug)]
pub struct Session {
    pub conversation_id: String,
    pub history: ConversationMemory,
    /// 最近一次成功回合使用的 system prompt；不逐轮刷新时原样复用
    pub system_prompt: Option<String>,
    /// 工具支持探测结果；Some 之后本会话不再探测
    pub cached_tool_support: Option<bool>,
    last_active: Instant,
}

impl Session {
    pub fn new(conversation_id: impl Into<String>, max_history_turns: usize) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            history: ConversationMemory::new(max_history_turns),
            system_prompt: None,
            cached_tool_support: None,
            last_active: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// 会话注册表：按需创建，显式移除或按空闲时长回收
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    max_history_turns: usize,
}

impl SessionRegistry {
    pub fn new(max_history_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_history_turns,
        }
    }

    /// 获取或创建会话
    pub async fn get_or_create(&self, conversation_id: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.read().await.get(conversation_id) {
            return handle.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(conversation_id, "Session created");
                Arc::new(Mutex::new(Session::new(conversation_id, self.max_history_turns)))
            })
            .clone()
    }

    pub async fn get(&self, conversation_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(conversation_id).cloned()
    }

    pub async fn remove(&self, conversation_id: &str) -> bool {
        self.sessions.write().await.remove(conversation_id).is_some()
    }

    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// 回收空闲超过 max_idle 的会话。返回回收数量
    ///
    /// 仍被回合持有句柄（已取出但可能尚未加锁）或锁被占用的会话跳过。
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| {
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(session) => session.idle_for() < max_idle,
                Err(_) => true,
            }
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, "Evicted idle sessions");
        }
        evicted
    }
}
