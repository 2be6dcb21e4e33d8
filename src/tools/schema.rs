//! 工具参数结构与 JSON Schema（schemars 自动生成）
//!
//! 参数结构同时用于反序列化模型给出的 arguments 与生成 OpenAI `tools` 定义，保证二者一致。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

/// list_areas 无参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct ListAreasArgs {}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct ListEntitiesArgs {
    /// Filter by domain (light, switch, climate, ...).
    #[serde(default)]
    pub domain: Option<String>,
    /// Area name or id to filter by (optional).
    #[serde(default)]
    pub area: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct GetStateArgs {
    /// Entity id, e.g. light.kitchen
    #[serde(default)]
    pub entity_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct CallServiceArgs {
    /// Service domain, e.g. light, switch, climate.
    #[serde(default)]
    pub domain: Option<String>,
    /// Service name, e.g. turn_on, turn_off, set_temperature.
    #[serde(default)]
    pub service: Option<String>,
    /// One entity id or a comma-separated list of entity ids.
    #[serde(default, deserialize_with = "string_or_list")]
    #[schemars(with = "Option<String>")]
    pub entity_id: Option<String>,
    /// Area id, if applicable.
    #[serde(default)]
    pub area_id: Option<String>,
    /// Area name (converted to an area id).
    #[serde(default)]
    pub area_name: Option<String>,
    /// Device id, if applicable.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Additional service data.
    #[serde(default)]
    pub data: Option<Value>,
}

/// 模型有时把 entity_id 给成列表，统一折叠为逗号分隔字符串
fn string_or_list<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    })
}

/// 参数 JSON Schema：可选字段不加 null 类型，子结构内联，去掉 `$schema` / `title`
pub fn parameters_schema<T: JsonSchema>(required: &[&str]) -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = false;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    let root = settings.into_generator().into_root_schema_for::<T>();
    let mut schema = serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.remove("definitions");
        obj.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
        obj.insert(
            "required".into(),
            Value::Array(required.iter().map(|r| Value::String(r.to_string())).collect()),
        );
    }
    schema
}

/// OpenAI `tools` 数组中的一项
pub fn function_tool(name: &str, description: &str, parameters: Value) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}
