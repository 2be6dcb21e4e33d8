//! ICL（few-shot）示例库
//!
//! 存储以往的 (user, assistant) 对话作为 few-shot 示例，按容量上限淘汰最旧条目。
//! 检索策略只看时间：取最近 k 条，再按时间正序返回，使最新示例紧贴本轮用户消息。
//! query 参数保留但不参与匹配（不做语义检索）。
//!
//! 持久化通过 IclPersistence 抽象，默认实现为 JSON 文件：
//! `{"version": 1, "examples": [{"ts", "user", "assistant", "tools", "tags"}]}`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// 当前存储格式版本
pub const ICL_FORMAT_VERSION: u32 = 1;

/// 默认最多保留的示例数
pub const DEFAULT_MAX_STORE: usize = 200;

/// 单条示例
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IclExample {
    /// 写入时间（Unix 秒，含小数）
    pub ts: f64,
    pub user: String,
    pub assistant: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 持久化文档
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IclDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub examples: Vec<IclExample>,
}

fn default_version() -> u32 {
    ICL_FORMAT_VERSION
}

impl Default for IclDocument {
    fn default() -> Self {
        Self {
            version: ICL_FORMAT_VERSION,
            examples: Vec::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum IclStoreError {
    #[error("ICL store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ICL store format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// 示例库持久化后端
#[async_trait]
pub trait IclPersistence: Send + Sync {
    /// 读取文档；尚无数据时返回 None
    async fn load(&self) -> Result<Option<IclDocument>, IclStoreError>;

    async fn save(&self, doc: &IclDocument) -> Result<(), IclStoreError>;
}

/// 不落盘（测试或关闭持久化时使用）
#[derive(Debug, Default)]
pub struct NoopIclPersistence;

#[async_trait]
impl IclPersistence for NoopIclPersistence {
    async fn load(&self) -> Result<Option<IclDocument>, IclStoreError> {
        Ok(None)
    }

    async fn save(&self, _doc: &IclDocument) -> Result<(), IclStoreError> {
        Ok(())
    }
}

/// 单文件 JSON 持久化（每个代理配置实例一个文件）
#[derive(Debug, Clone)]
pub struct JsonFileIclPersistence {
    path: PathBuf,
}

impl JsonFileIclPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IclPersistence for JsonFileIclPersistence {
    async fn load(&self) -> Result<Option<IclDocument>, IclStoreError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// 父目录不存在时自动创建
    async fn save(&self, doc: &IclDocument) -> Result<(), IclStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(doc)?).await?;
        Ok(())
    }
}

struct StoreState {
    loaded: bool,
    examples: Vec<IclExample>,
}

/// 容量受限的示例库；内部互斥保证同一实例单写者
pub struct IclStore {
    persistence: Arc<dyn IclPersistence>,
    max_store: usize,
    state: Mutex<StoreState>,
}

impl IclStore {
    pub fn new(persistence: Arc<dyn IclPersistence>, max_store: usize) -> Self {
        Self {
            persistence,
            max_store,
            state: Mutex::new(StoreState {
                loaded: false,
                examples: Vec::new(),
            }),
        }
    }

    /// 纯内存示例库
    pub fn in_memory(max_store: usize) -> Self {
        Self::new(Arc::new(NoopIclPersistence), max_store)
    }

    pub fn max_store(&self) -> usize {
        self.max_store
    }

    /// 首次访问时加载；文件损坏时记录警告并从空库开始
    async fn ensure_loaded(&self, state: &mut StoreState) {
        if state.loaded {
            return;
        }
        match self.persistence.load().await {
            Ok(Some(doc)) => {
                if doc.version != ICL_FORMAT_VERSION {
                    tracing::warn!(version = doc.version, "ICL store has unexpected format version");
                }
                state.examples = doc.examples;
                trim_oldest(&mut state.examples, self.max_store);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to load ICL store, starting empty: {}", e),
        }
        state.loaded = true;
    }

    async fn persist(&self, examples: &[IclExample]) -> Result<(), IclStoreError> {
        let doc = IclDocument {
            version: ICL_FORMAT_VERSION,
            examples: examples.to_vec(),
        };
        self.persistence.save(&doc).await
    }

    /// 追加示例；超过 max_store 时淘汰最旧条目，然后落盘
    pub async fn add_example(
        &self,
        user_text: &str,
        assistant_text: &str,
        tools_used: &[String],
        tags: &[String],
    ) -> Result<(), IclStoreError> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;

        state.examples.push(IclExample {
            ts: now_epoch_secs(),
            user: user_text.to_string(),
            assistant: assistant_text.to_string(),
            tools: dedup(tools_used),
            tags: dedup(tags),
        });
        trim_oldest(&mut state.examples, self.max_store);
        tracing::debug!(count = state.examples.len(), "ICL example added");

        self.persist(&state.examples).await
    }

    /// 返回至多 k 条：先按时间取最近的 k 条，再按时间正序排列。query_text 暂不参与检索。
    pub async fn get_examples(&self, _query_text: &str, k: usize) -> Vec<IclExample> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;

        let mut indexed: Vec<(usize, &IclExample)> = state
            .examples
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.user.trim().is_empty() && !e.assistant.trim().is_empty())
            .collect();
        // 时间相同时，后插入者视为更新
        indexed.sort_by(|a, b| b.1.ts.total_cmp(&a.1.ts).then(b.0.cmp(&a.0)));

        let mut selected: Vec<IclExample> =
            indexed.into_iter().take(k).map(|(_, e)| e.clone()).collect();
        selected.reverse();
        selected
    }

    /// 清空并落盘
    pub async fn clear(&self) -> Result<(), IclStoreError> {
        let mut state = self.state.lock().await;
        state.examples.clear();
        state.loaded = true;
        self.persist(&state.examples).await
    }

    pub async fn len(&self) -> usize {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.examples.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn trim_oldest(examples: &mut Vec<IclExample>, max_store: usize) {
    if examples.len() > max_store {
        let excess = examples.len() - max_store;
        examples.drain(..excess);
    }
}

fn dedup(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fresh_store_returns_nothing() {
        let store = IclStore::in_memory(DEFAULT_MAX_STORE);
        assert!(store.get_examples("x", 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_get_examples_most_recent_oldest_first() {
        let store = IclStore::in_memory(DEFAULT_MAX_STORE);
        for i in 0..5 {
            store
                .add_example(&format!("u{i}"), &format!("a{i}"), &[], &[])
                .await
                .unwrap();
        }
        let got = store.get_examples("ignored", 3).await;
        let users: Vec<_> = got.iter().map(|e| e.user.as_str()).collect();
        assert_eq!(users, vec!["u2", "u3", "u4"]);

        let all = store.get_examples("ignored", 10).await;
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = IclStore::in_memory(3);
        for i in 0..6 {
            store.add_example(&format!("u{i}"), "a", &[], &[]).await.unwrap();
        }
        assert_eq!(store.len().await, 3);
        let users: Vec<_> = store
            .get_examples("", 10)
            .await
            .into_iter()
            .map(|e| e.user)
            .collect();
        assert_eq!(users, vec!["u3", "u4", "u5"]);
    }

    #[tokio::test]
    async fn test_tools_and_tags_deduplicated() {
        let store = IclStore::in_memory(10);
        let tools = vec!["call_service".to_string(), "call_service".to_string()];
        let tags = vec!["auto".to_string()];
        store.add_example("u", "a", &tools, &tags).await.unwrap();
        let ex = &store.get_examples("", 1).await[0];
        assert_eq!(ex.tools, vec!["call_service".to_string()]);
        assert_eq!(ex.tags, vec!["auto".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_empties_store() {
        let store = IclStore::in_memory(10);
        store.add_example("u", "a", &[], &[]).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_persistence_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("icl").join("agent.json");

        let store = IclStore::new(Arc::new(JsonFileIclPersistence::new(&path)), 10);
        store
            .add_example("turn on the light", "Turned on Kitchen Light.", &["call_service".into()], &[])
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["version"], 1);
        assert_eq!(doc["examples"][0]["user"], "turn on the light");
        assert_eq!(doc["examples"][0]["tools"][0], "call_service");

        let reopened = IclStore::new(Arc::new(JsonFileIclPersistence::new(&path)), 10);
        let got = reopened.get_examples("", 4).await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].assistant, "Turned on Kitchen Light.");
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "not json").unwrap();

        let store = IclStore::new(Arc::new(JsonFileIclPersistence::new(&path)), 10);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unversioned_document_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"{"examples": [{"ts": 1.0, "user": "hi", "assistant": "hello"}]}"#,
        )
        .unwrap();

        let store = IclStore::new(Arc::new(JsonFileIclPersistence::new(&path)), 10);
        assert_eq!(store.get_examples("", 4).await.len(), 1);
    }
}
