//! 直接回复模式的格式化
//!
//! 把一轮工具结果（call_service 确认、get_state 读数、错误）转换成一句确定性的自然语言回复，
//! 不再调用模型。list_* 之类没有模板的结果返回 None，由调用方回退到模型跟进。

use serde_json::Value;

use crate::tools::bridge::ToolResult;
use crate::tools::device::{CALL_SERVICE, GET_STATE};
use crate::tools::DeviceDirectory;

/// 没有任何目标时的占位
const NO_TARGETS: &str = "the requested targets";

/// (domain, service) -> 模板；`{targets}` 会被替换
fn template(domain: &str, service: &str) -> Option<&'static str> {
    let t = match (domain, service) {
        ("light" | "switch" | "fan" | "input_boolean" | "media_player", "turn_on") => {
            "Turned on {targets}."
        }
        ("light" | "switch" | "fan" | "input_boolean" | "media_player", "turn_off") => {
            "Turned off {targets}."
        }
        ("light" | "switch" | "fan" | "input_boolean", "toggle") => "Toggled {targets}.",
        ("cover", "open_cover") => "Opened {targets}.",
        ("cover", "close_cover") => "Closed {targets}.",
        ("cover", "stop_cover") => "Stopped {targets}.",
        ("lock", "lock") => "Locked {targets}.",
        ("lock", "unlock") => "Unlocked {targets}.",
        ("climate", "set_temperature") => "Set the temperature for {targets}.",
        ("climate", "set_hvac_mode") => "Changed the mode of {targets}.",
        ("scene", "turn_on") => "Activated {targets}.",
        ("script", "turn_on") => "Ran {targets}.",
        ("media_player", "media_play") => "Resumed playback on {targets}.",
        ("media_player", "media_pause") => "Paused {targets}.",
        ("media_player", "volume_set") => "Changed the volume on {targets}.",
        ("vacuum", "start") => "Started {targets}.",
        ("vacuum", "return_to_base") => "Sent {targets} back to its dock.",
        ("button", "press") => "Pressed {targets}.",
        _ => return None,
    };
    Some(t)
}

/// "A" / "A and B" / "A, B and C"
pub fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

async fn friendly_name(directory: &dyn DeviceDirectory, entity_id: &str) -> String {
    directory
        .state(entity_id)
        .await
        .and_then(|s| s.friendly_name().map(String::from))
        .unwrap_or_else(|| entity_id.to_string())
}

/// 把 call_service 回执里的 target 还原为可读的目标描述
pub async fn describe_targets(directory: &dyn DeviceDirectory, target: &Value) -> String {
    let mut names = Vec::new();

    let entity_ids: Vec<&str> = match target.get("entity_id") {
        Some(Value::String(id)) => vec![id.as_str()],
        Some(Value::Array(ids)) => ids.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    for id in entity_ids {
        names.push(friendly_name(directory, id).await);
    }

    if let Some(area_id) = target.get("area_id").and_then(Value::as_str) {
        let area = directory
            .areas()
            .await
            .into_iter()
            .find(|a| a.id == area_id)
            .map(|a| a.name)
            .unwrap_or_else(|| area_id.to_string());
        names.push(format!("the {area} area"));
    }

    if names.is_empty() {
        NO_TARGETS.to_string()
    } else {
        join_names(&names)
    }
}

/// 单个工具结果的直接回复；无法模板化时返回 None
pub async fn format_result(
    directory: &dyn DeviceDirectory,
    tool_name: &str,
    result: &ToolResult,
) -> Option<String> {
    if let Some(error) = &result.error {
        return Some(format!("Sorry, I couldn't complete that: {error}"));
    }
    let payload = &result.payload;
    match tool_name {
        CALL_SERVICE => {
            let domain = payload.get("domain").and_then(Value::as_str)?;
            let service = payload.get("service").and_then(Value::as_str)?;
            let targets = describe_targets(directory, payload.get("target").unwrap_or(&Value::Null)).await;
            Some(match template(domain, service) {
                Some(t) => t.replace("{targets}", &targets),
                None => format!("Executed {domain}.{service} on {targets}."),
            })
        }
        GET_STATE => {
            let entity_id = payload.get("entity_id").and_then(Value::as_str)?;
            let state = payload.get("state").and_then(Value::as_str)?;
            let name = payload
                .pointer("/attributes/friendly_name")
                .and_then(Value::as_str)
                .unwrap_or(entity_id);
            Some(match state {
                "on" | "off" => format!("{name} is {state}."),
                other => format!("{name} is in state '{other}'."),
            })
        }
        _ => None,
    }
}

/// 一轮全部结果的直接回复（以空格连接）；任何一项无法模板化则整体返回 None
pub async fn direct_reply(
    directory: &dyn DeviceDirectory,
    results: &[(String, ToolResult)],
) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    let mut parts = Vec::with_capacity(results.len());
    for (tool_name, result) in results {
        parts.push(format_result(directory, tool_name, result).await?);
    }
    Some(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::InMemoryDirectory;
    use serde_json::json;

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::new()
            .with_area("kitchen", "Kitchen")
            .with_entity("light.kitchen", "Kitchen Light", "on", Some("kitchen"))
            .with_entity("light.hall", "Hall Light", "off", None)
            .with_entity("light.porch", "Porch Light", "off", None)
    }

    fn ack(domain: &str, service: &str, target: Value) -> ToolResult {
        ToolResult::from_payload(json!({
            "result": "ok", "domain": domain, "service": service, "target": target, "data": {}
        }))
    }

    #[test]
    fn test_join_names() {
        let n = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(join_names(&n(&["A"])), "A");
        assert_eq!(join_names(&n(&["A", "B"])), "A and B");
        assert_eq!(join_names(&n(&["A", "B", "C"])), "A, B and C");
    }

    #[tokio::test]
    async fn test_turn_on_uses_friendly_names() {
        let dir = directory();
        let out = format_result(
            &dir,
            CALL_SERVICE,
            &ack("light", "turn_on", json!({"entity_id": ["light.hall", "light.porch", "light.x"]})),
        )
        .await;
        assert_eq!(out.as_deref(), Some("Turned on Hall Light, Porch Light and light.x."));
    }

    #[tokio::test]
    async fn test_area_and_missing_targets() {
        let dir = directory();
        let area = format_result(&dir, CALL_SERVICE, &ack("light", "turn_off", json!({"area_id": "kitchen"}))).await;
        assert_eq!(area.as_deref(), Some("Turned off the Kitchen area."));

        let none = format_result(&dir, CALL_SERVICE, &ack("climate", "set_preset_mode", Value::Null)).await;
        assert_eq!(
            none.as_deref(),
            Some("Executed climate.set_preset_mode on the requested targets.")
        );
    }

    #[tokio::test]
    async fn test_get_state_phrases() {
        let dir = directory();
        let on = ToolResult::from_payload(json!({
            "entity_id": "light.kitchen", "state": "on",
            "attributes": {"friendly_name": "Kitchen Light"}
        }));
        assert_eq!(
            format_result(&dir, GET_STATE, &on).await.as_deref(),
            Some("Kitchen Light is on.")
        );
        let other = ToolResult::from_payload(json!({
            "entity_id": "sensor.temp", "state": "21.5", "attributes": {}
        }));
        assert_eq!(
            format_result(&dir, GET_STATE, &other).await.as_deref(),
            Some("sensor.temp is in state '21.5'.")
        );
    }

    #[tokio::test]
    async fn test_error_payload_is_apology() {
        let dir = directory();
        let err = ToolResult::from_payload(json!({"error": "Entity not found: sensor.unknown"}));
        assert_eq!(
            format_result(&dir, GET_STATE, &err).await.as_deref(),
            Some("Sorry, I couldn't complete that: Entity not found: sensor.unknown")
        );
    }

    #[tokio::test]
    async fn test_list_results_have_no_direct_reply() {
        let dir = directory();
        let results = vec![
            ("call_service".to_string(), ack("light", "turn_on", json!({"entity_id": "light.hall"}))),
            ("list_areas".to_string(), ToolResult::from_payload(json!({"areas": []}))),
        ];
        assert!(direct_reply(&dir, &results).await.is_none());
        assert!(direct_reply(&dir, &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_direct_reply_joins_round() {
        let dir = directory();
        let results = vec![
            ("call_service".to_string(), ack("light", "turn_on", json!({"entity_id": "light.hall"}))),
            ("call_service".to_string(), ack("lock", "lock", json!({"entity_id": "lock.door"}))),
        ];
        assert_eq!(
            direct_reply(&dir, &results).await.as_deref(),
            Some("Turned on Hall Light. Locked lock.door.")
        );
    }
}
