//! 工具层：设备目录边界、Tool Bridge、参数 schema、注册表与带超时的执行器

pub mod bridge;
pub mod device;
pub mod directory;
pub mod executor;
pub mod registry;
pub mod schema;

pub use bridge::{ToolBridge, ToolResult};
pub use device::{
    device_tool_registry, CallServiceTool, GetStateTool, ListAreasTool, ListEntitiesTool,
};
pub use directory::{DeviceDirectory, DirectorySnapshot, InMemoryDirectory, ServiceTarget};
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
