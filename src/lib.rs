//! Lemonade - 对话代理
//!
//! 把对话前端桥接到 OpenAI 兼容的补全服务（Lemonade Server 等），模型可通过工具调用控制设备。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 回合编排、工具循环、工具支持探测、会话与宿主注册
//! - **llm**: 补全客户端抽象、HTTP 实现、响应规范化与 SSE 累积
//! - **memory**: 会话短期记忆与 ICL 示例库
//! - **tools**: 设备目录边界、Tool Bridge、参数 schema 与执行器
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorBuilder, TurnInput, TurnOutput};
