//! 设备目录：宿主平台的区域 / 实体 / 状态 / 服务边界
//!
//! DeviceDirectory 抽象宿主侧的设备注册表与服务调用；InMemoryDirectory 为内存实现，
//! 供测试与 REPL 演示使用（可从 JSON 文件加载），并记录每次服务调用。

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub area_id: Option<String>,
}

/// 实体注册信息（不含状态）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl EntityRecord {
    /// `light.kitchen` -> `light`
    pub fn domain(&self) -> &str {
        entity_domain(&self.entity_id)
    }
}

pub fn entity_domain(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or(entity_id)
}

/// 实体当前状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }
}

/// 服务调用目标；序列化形态与宿主一致（单个实体为字符串，多个为列表）
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceTarget {
    pub entity_ids: Vec<String>,
    pub area_id: Option<String>,
    pub device_id: Option<String>,
}

impl ServiceTarget {
    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty() && self.area_id.is_none() && self.device_id.is_none()
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        match self.entity_ids.as_slice() {
            [] => {}
            [one] => {
                obj.insert("entity_id".into(), Value::String(one.clone()));
            }
            many => {
                obj.insert(
                    "entity_id".into(),
                    Value::Array(many.iter().cloned().map(Value::String).collect()),
                );
            }
        }
        if let Some(area) = &self.area_id {
            obj.insert("area_id".into(), Value::String(area.clone()));
        }
        if let Some(device) = &self.device_id {
            obj.insert("device_id".into(), Value::String(device.clone()));
        }
        Value::Object(obj)
    }
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("{0}")]
    Failed(String),
}

/// 宿主设备目录
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn areas(&self) -> Vec<Area>;

    async fn entities(&self) -> Vec<EntityRecord>;

    async fn device(&self, device_id: &str) -> Option<Device>;

    async fn state(&self, entity_id: &str) -> Option<EntityState>;

    /// 执行服务（阻塞直至宿主完成）
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target: Option<&ServiceTarget>,
        data: &Value,
    ) -> Result<(), DirectoryError>;
}

/// 一次已执行的服务调用
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub target: Option<ServiceTarget>,
    pub data: Value,
}

/// 目录快照（JSON 文件格式）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub areas: Vec<Area>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub states: Vec<EntityState>,
}

/// 内存设备目录：turn_on / turn_off / toggle 会更新目标实体状态
#[derive(Default)]
pub struct InMemoryDirectory {
    snapshot: RwLock<DirectorySnapshot>,
    calls: RwLock<Vec<ServiceCall>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: DirectorySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// 从 JSON 文件加载目录快照
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read device directory {}", path.display()))?;
        let snapshot: DirectorySnapshot = serde_json::from_str(&data)
            .with_context(|| format!("Invalid device directory {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn with_area(mut self, id: &str, name: &str) -> Self {
        self.snapshot.get_mut().areas.push(Area {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// 注册实体并设置初始状态；friendly_name 写入 attributes
    pub fn with_entity(
        mut self,
        entity_id: &str,
        friendly_name: &str,
        state: &str,
        area_id: Option<&str>,
    ) -> Self {
        {
            let snapshot = self.snapshot.get_mut();
            snapshot.entities.push(EntityRecord {
                entity_id: entity_id.to_string(),
                area_id: area_id.map(String::from),
                device_id: None,
                disabled: false,
            });
            let mut attributes = Map::new();
            attributes.insert("friendly_name".into(), Value::String(friendly_name.to_string()));
            snapshot.states.push(EntityState {
                entity_id: entity_id.to_string(),
                state: state.to_string(),
                attributes,
            });
        }
        self
    }

    pub fn with_device(mut self, id: &str, area_id: Option<&str>) -> Self {
        self.snapshot.get_mut().devices.push(Device {
            id: id.to_string(),
            area_id: area_id.map(String::from),
        });
        self
    }

    /// 已执行的服务调用
    pub async fn service_calls(&self) -> Vec<ServiceCall> {
        self.calls.read().await.clone()
    }

    /// 目标展开为实体 ID（显式实体 + 区域内实体）
    fn resolve_targets(snapshot: &DirectorySnapshot, target: &ServiceTarget) -> Vec<String> {
        let mut ids = target.entity_ids.clone();
        if let Some(area) = &target.area_id {
            for e in &snapshot.entities {
                let in_area = e.area_id.as_deref() == Some(area.as_str())
                    || e.device_id.as_deref().is_some_and(|d| {
                        snapshot
                            .devices
                            .iter()
                            .any(|dev| dev.id == d && dev.area_id.as_deref() == Some(area.as_str()))
                    });
                if in_area && !ids.contains(&e.entity_id) {
                    ids.push(e.entity_id.clone());
                }
            }
        }
        ids
    }
}

/// 常见服务对状态的影响；其它服务不改变状态
fn next_state(service: &str, current: &str) -> Option<&'static str> {
    match service {
        "turn_on" => Some("on"),
        "turn_off" => Some("off"),
        "toggle" => Some(if current == "on" { "off" } else { "on" }),
        "open_cover" => Some("open"),
        "close_cover" => Some("closed"),
        "lock" => Some("locked"),
        "unlock" => Some("unlocked"),
        _ => None,
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDirectory {
    async fn areas(&self) -> Vec<Area> {
        self.snapshot.read().await.areas.clone()
    }

    async fn entities(&self) -> Vec<EntityRecord> {
        self.snapshot.read().await.entities.clone()
    }

    async fn device(&self, device_id: &str) -> Option<Device> {
        self.snapshot
            .read()
            .await
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
    }

    async fn state(&self, entity_id: &str) -> Option<EntityState> {
        self.snapshot
            .read()
            .await
            .states
            .iter()
            .find(|s| s.entity_id == entity_id)
            .cloned()
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target: Option<&ServiceTarget>,
        data: &Value,
    ) -> Result<(), DirectoryError> {
        let mut snapshot = self.snapshot.write().await;
        if let Some(target) = target {
            let ids = Self::resolve_targets(&snapshot, target);
            for state in snapshot.states.iter_mut().filter(|s| ids.contains(&s.entity_id)) {
                if let Some(next) = next_state(service, &state.state) {
                    state.state = next.to_string();
                }
            }
        }
        drop(snapshot);

        tracing::info!(domain, service, "Service called");
        self.calls.write().await.push(ServiceCall {
            domain: domain.to_string(),
            service: service.to_string(),
            target: target.cloned(),
            data: data.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::new()
            .with_area("kitchen", "Kitchen")
            .with_device("dev_1", Some("kitchen"))
            .with_entity("light.kitchen", "Kitchen Light", "off", Some("kitchen"))
            .with_entity("switch.fan", "Fan Switch", "on", None)
    }

    #[test]
    fn test_target_json_shapes() {
        let one = ServiceTarget {
            entity_ids: vec!["light.a".into()],
            ..ServiceTarget::default()
        };
        assert_eq!(one.to_json(), serde_json::json!({"entity_id": "light.a"}));

        let many = ServiceTarget {
            entity_ids: vec!["light.a".into(), "light.b".into()],
            area_id: Some("kitchen".into()),
            device_id: None,
        };
        assert_eq!(
            many.to_json(),
            serde_json::json!({"entity_id": ["light.a", "light.b"], "area_id": "kitchen"})
        );
        assert!(ServiceTarget::default().is_empty());
    }

    #[tokio::test]
    async fn test_call_service_updates_state_and_records_call() {
        let dir = directory();
        let target = ServiceTarget {
            area_id: Some("kitchen".into()),
            ..ServiceTarget::default()
        };
        dir.call_service("light", "turn_on", Some(&target), &Value::Null)
            .await
            .unwrap();

        assert_eq!(dir.state("light.kitchen").await.unwrap().state, "on");
        assert_eq!(dir.state("switch.fan").await.unwrap().state, "on");
        let calls = dir.service_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].service, "turn_on");
    }

    #[tokio::test]
    async fn test_snapshot_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("home.json");
        std::fs::write(
            &path,
            r#"{"areas": [{"id": "living", "name": "Living Room"}],
                "entities": [{"entity_id": "light.lamp", "area_id": "living"}],
                "states": [{"entity_id": "light.lamp", "state": "off",
                            "attributes": {"friendly_name": "Lamp"}}]}"#,
        )
        .unwrap();

        let directory = InMemoryDirectory::from_json_file(&path).unwrap();
        assert_eq!(directory.areas().await[0].name, "Living Room");
        let state = directory.state("light.lamp").await.unwrap();
        assert_eq!(state.friendly_name(), Some("Lamp"));
        assert_eq!(directory.entities().await[0].domain(), "light");
    }
}
