//! Tool Bridge：在设备目录上执行四种能力
//!
//! list_areas / list_entities / get_state / call_service。结果均为可序列化的 JSON，
//! 业务错误以 `{"error": ...}` 返回而不是 Err，便于模型或直接回复模板据此反应。
//! call_service 在触达宿主之前校验域名白名单。

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::tools::directory::{DeviceDirectory, ServiceTarget};
use crate::tools::schema::{CallServiceArgs, GetStateArgs, ListEntitiesArgs};

/// 工具执行结果，序列化后写入 tool 消息
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub ok: bool,
    pub payload: Value,
    pub error: Option<String>,
}

impl ToolResult {
    /// 依据 payload 是否含 error 字段判断成功
    pub fn from_payload(payload: Value) -> Self {
        let error = payload
            .get("error")
            .map(|e| e.as_str().map(String::from).unwrap_or_else(|| e.to_string()));
        Self {
            ok: error.is_none(),
            payload,
            error,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            ok: false,
            payload: json!({ "error": message }),
            error: Some(message),
        }
    }

    /// tool 消息正文
    pub fn to_content(&self) -> String {
        self.payload.to_string()
    }
}

fn error_payload(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

/// 解析模型给出的参数；格式不对时按空参数处理
pub fn parse_args<T: DeserializeOwned + Default>(args: &Value) -> T {
    match args {
        Value::Null => T::default(),
        other => serde_json::from_value(other.clone()).unwrap_or_else(|e| {
            tracing::warn!("Invalid tool arguments, using defaults: {}", e);
            T::default()
        }),
    }
}

/// 逗号分隔的实体 ID
pub fn split_entities(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

/// 设备能力桥：持有目录与 call_service 域名白名单
pub struct ToolBridge {
    directory: Arc<dyn DeviceDirectory>,
    allowed_domains: Vec<String>,
}

impl ToolBridge {
    pub fn new(directory: Arc<dyn DeviceDirectory>, allowed_domains: Vec<String>) -> Self {
        Self {
            directory,
            allowed_domains,
        }
    }

    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        self.allowed_domains.iter().any(|d| d == domain)
    }

    /// 区域按 ID 精确匹配，其次按名称（不区分大小写）
    async fn resolve_area_id(&self, needle: &str) -> Option<String> {
        let areas = self.directory.areas().await;
        if let Some(area) = areas.iter().find(|a| a.id == needle) {
            return Some(area.id.clone());
        }
        let lower = needle.to_lowercase();
        areas
            .into_iter()
            .find(|a| a.name.to_lowercase() == lower)
            .map(|a| a.id)
    }

    pub async fn list_areas(&self) -> Value {
        let areas: Vec<Value> = self
            .directory
            .areas()
            .await
            .into_iter()
            .map(|a| json!({"area_id": a.id, "name": a.name}))
            .collect();
        json!({ "areas": areas })
    }

    /// 跳过禁用实体与无状态实体；实体无区域时继承所属设备的区域。
    /// 区域无法解析时不做区域过滤。
    pub async fn list_entities(&self, args: ListEntitiesArgs) -> Value {
        let area_filter = match args.area.as_deref().filter(|a| !a.is_empty()) {
            Some(area) => {
                let resolved = self.resolve_area_id(area).await;
                if resolved.is_none() {
                    tracing::debug!(area, "Unknown area, listing all entities");
                }
                resolved
            }
            None => None,
        };
        let areas = self.directory.areas().await;

        let mut items = Vec::new();
        for entity in self.directory.entities().await {
            if entity.disabled {
                continue;
            }
            if let Some(domain) = args.domain.as_deref().filter(|d| !d.is_empty()) {
                if entity.domain() != domain {
                    continue;
                }
            }
            let Some(state) = self.directory.state(&entity.entity_id).await else {
                continue;
            };

            let mut area_id = entity.area_id.clone();
            if area_id.is_none() {
                if let Some(device_id) = &entity.device_id {
                    area_id = self
                        .directory
                        .device(device_id)
                        .await
                        .and_then(|d| d.area_id);
                }
            }
            if area_filter.is_some() && area_id != area_filter {
                continue;
            }
            let area_name = area_id
                .as_deref()
                .and_then(|id| areas.iter().find(|a| a.id == id))
                .map(|a| a.name.clone());

            items.push(json!({
                "entity_id": entity.entity_id,
                "domain": entity.domain(),
                "area": area_name,
                "friendly_name": state.friendly_name(),
                "state": state.state,
            }));
        }
        json!({ "entities": items })
    }

    pub async fn get_state(&self, args: GetStateArgs) -> Value {
        let Some(entity_id) = args.entity_id.filter(|e| !e.is_empty()) else {
            return error_payload("entity_id is required");
        };
        match self.directory.state(&entity_id).await {
            Some(state) => json!({
                "entity_id": entity_id,
                "state": state.state,
                "attributes": state.attributes,
            }),
            None => error_payload(format!("Entity not found: {entity_id}")),
        }
    }

    pub async fn call_service(&self, args: CallServiceArgs) -> Value {
        let (Some(domain), Some(service)) = (
            args.domain.filter(|d| !d.is_empty()),
            args.service.filter(|s| !s.is_empty()),
        ) else {
            return error_payload("domain and service are required");
        };

        if !self.is_domain_allowed(&domain) {
            tracing::warn!(domain = %domain, "Rejected service call outside allowed domains");
            return error_payload(format!("Domain not allowed: {domain}"));
        }

        let mut area_id = args.area_id.filter(|a| !a.is_empty());
        if area_id.is_none() {
            if let Some(name) = args.area_name.as_deref().filter(|n| !n.is_empty()) {
                area_id = self.resolve_area_id(name).await;
            }
        }

        let target = ServiceTarget {
            entity_ids: split_entities(args.entity_id.as_deref()),
            area_id,
            device_id: args.device_id.filter(|d| !d.is_empty()),
        };
        let target = (!target.is_empty()).then_some(target);
        let data = args.data.unwrap_or_else(|| json!({}));

        if let Err(e) = self
            .directory
            .call_service(&domain, &service, target.as_ref(), &data)
            .await
        {
            return error_payload(format!("Service call failed: {e}"));
        }

        json!({
            "result": "ok",
            "domain": domain,
            "service": service,
            "target": target.as_ref().map(ServiceTarget::to_json),
            "data": data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::directory::InMemoryDirectory;

    fn bridge() -> (Arc<InMemoryDirectory>, ToolBridge) {
        let dir = Arc::new(
            InMemoryDirectory::new()
                .with_area("kitchen", "Kitchen")
                .with_area("bedroom", "Bedroom")
                .with_entity("light.kitchen", "Kitchen Light", "off", Some("kitchen"))
                .with_entity("light.bed", "Bed Lamp", "on", Some("bedroom"))
                .with_entity("lock.front", "Front Door", "locked", None),
        );
        let bridge = ToolBridge::new(dir.clone(), vec!["light".into(), "switch".into()]);
        (dir, bridge)
    }

    #[tokio::test]
    async fn test_list_areas() {
        let (_, bridge) = bridge();
        let out = bridge.list_areas().await;
        assert_eq!(out["areas"][0]["area_id"], "kitchen");
        assert_eq!(out["areas"][1]["name"], "Bedroom");
    }

    #[tokio::test]
    async fn test_list_entities_filters_by_area_name_and_domain() {
        let (_, bridge) = bridge();
        let out = bridge
            .list_entities(ListEntitiesArgs {
                domain: Some("light".into()),
                area: Some("kitchen".into()),
            })
            .await;
        let entities = out["entities"].as_array().unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0]["friendly_name"], "Kitchen Light");
        assert_eq!(entities[0]["area"], "Kitchen");

        let by_name = bridge
            .list_entities(ListEntitiesArgs {
                domain: None,
                area: Some("BEDROOM".into()),
            })
            .await;
        assert_eq!(by_name["entities"][0]["entity_id"], "light.bed");
    }

    #[tokio::test]
    async fn test_list_entities_ignores_unresolved_area() {
        let (_, bridge) = bridge();
        let out = bridge
            .list_entities(ListEntitiesArgs {
                domain: Some("light".into()),
                area: Some("Cocina".into()),
            })
            .await;
        let ids: Vec<&str> = out["entities"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["entity_id"].as_str())
            .collect();
        assert_eq!(ids, vec!["light.kitchen", "light.bed"]);
    }

    #[tokio::test]
    async fn test_get_state_unknown_entity() {
        let (_, bridge) = bridge();
        let out = bridge
            .get_state(GetStateArgs {
                entity_id: Some("sensor.unknown".into()),
            })
            .await;
        assert_eq!(out["error"], "Entity not found: sensor.unknown");
    }

    #[tokio::test]
    async fn test_call_service_rejects_domain_without_host_call() {
        let (dir, bridge) = bridge();
        let out = bridge
            .call_service(CallServiceArgs {
                domain: Some("lock".into()),
                service: Some("unlock".into()),
                entity_id: Some("lock.front".into()),
                ..CallServiceArgs::default()
            })
            .await;
        assert_eq!(out["error"], "Domain not allowed: lock");
        assert!(dir.service_calls().await.is_empty());
        assert_eq!(dir.state("lock.front").await.unwrap().state, "locked");
    }

    #[tokio::test]
    async fn test_call_service_resolves_area_name_and_splits_entities() {
        let (dir, bridge) = bridge();
        let out = bridge
            .call_service(CallServiceArgs {
                domain: Some("light".into()),
                service: Some("turn_off".into()),
                entity_id: Some("light.kitchen, light.bed".into()),
                area_name: Some("Kitchen".into()),
                ..CallServiceArgs::default()
            })
            .await;
        assert_eq!(out["result"], "ok");
        assert_eq!(
            out["target"],
            json!({"entity_id": ["light.kitchen", "light.bed"], "area_id": "kitchen"})
        );
        assert_eq!(dir.service_calls().await.len(), 1);
        assert_eq!(dir.state("light.bed").await.unwrap().state, "off");
    }

    #[tokio::test]
    async fn test_call_service_requires_domain_and_service() {
        let (_, bridge) = bridge();
        let out = bridge.call_service(CallServiceArgs::default()).await;
        assert_eq!(out["error"], "domain and service are required");
    }

    #[test]
    fn test_tool_result_from_payload() {
        let ok = ToolResult::from_payload(json!({"result": "ok"}));
        assert!(ok.ok);
        let err = ToolResult::from_payload(json!({"error": "nope"}));
        assert!(!err.ok);
        assert_eq!(err.error.as_deref(), Some("nope"));
        assert_eq!(ToolResult::failure("x").to_content(), r#"{"error":"x"}"#);
    }

    #[test]
    fn test_parse_args_falls_back_to_default() {
        let args: GetStateArgs = parse_args(&json!("garbage"));
        assert!(args.entity_id.is_none());
    }
}
