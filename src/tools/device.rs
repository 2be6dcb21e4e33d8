//! 设备工具：把 ToolBridge 的四种能力包装为 Tool，供模型以 function calling 调用

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::bridge::{parse_args, ToolBridge};
use crate::tools::schema::{
    parameters_schema, CallServiceArgs, GetStateArgs, ListAreasArgs, ListEntitiesArgs,
};
use crate::tools::{Tool, ToolRegistry};

pub const LIST_AREAS: &str = "list_areas";
pub const LIST_ENTITIES: &str = "list_entities";
pub const GET_STATE: &str = "get_state";
pub const CALL_SERVICE: &str = "call_service";

pub struct ListAreasTool {
    bridge: Arc<ToolBridge>,
}

impl ListAreasTool {
    pub fn new(bridge: Arc<ToolBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for ListAreasTool {
    fn name(&self) -> &str {
        LIST_AREAS
    }

    fn description(&self) -> &str {
        "List all areas (rooms) in the home."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ListAreasArgs>(&[])
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        Ok(self.bridge.list_areas().await)
    }
}

pub struct ListEntitiesTool {
    bridge: Arc<ToolBridge>,
}

impl ListEntitiesTool {
    pub fn new(bridge: Arc<ToolBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for ListEntitiesTool {
    fn name(&self) -> &str {
        LIST_ENTITIES
    }

    fn description(&self) -> &str {
        "List entities, optionally filtered by domain and/or area."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ListEntitiesArgs>(&[])
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        Ok(self.bridge.list_entities(parse_args(&args)).await)
    }
}

pub struct GetStateTool {
    bridge: Arc<ToolBridge>,
}

impl GetStateTool {
    pub fn new(bridge: Arc<ToolBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for GetStateTool {
    fn name(&self) -> &str {
        GET_STATE
    }

    fn description(&self) -> &str {
        "Get the current state and attributes of one entity."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<GetStateArgs>(&["entity_id"])
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        Ok(self.bridge.get_state(parse_args(&args)).await)
    }
}

pub struct CallServiceTool {
    bridge: Arc<ToolBridge>,
}

impl CallServiceTool {
    pub fn new(bridge: Arc<ToolBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for CallServiceTool {
    fn name(&self) -> &str {
        CALL_SERVICE
    }

    fn description(&self) -> &str {
        "Call a home automation service (e.g. light.turn_on) on entities, an area, or a device."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<CallServiceArgs>(&["domain", "service"])
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        Ok(self.bridge.call_service(parse_args(&args)).await)
    }
}

/// 注册全部四个设备工具（顺序即请求中 tools 的顺序）
pub fn device_tool_registry(bridge: Arc<ToolBridge>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ListAreasTool::new(bridge.clone()));
    registry.register(ListEntitiesTool::new(bridge.clone()));
    registry.register(GetStateTool::new(bridge.clone()));
    registry.register(CallServiceTool::new(bridge));
    registry
}
