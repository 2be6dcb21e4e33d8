//! 核心编排层：错误、会话注册、工具支持探测、工具循环、直接回复格式化、回合编排与宿主注册

pub mod builder;
pub mod detector;
pub mod error;
pub mod format;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod tool_loop;

pub use builder::OrchestratorBuilder;
pub use detector::ToolSupportDetector;
pub use error::{AgentError, GENERIC_APOLOGY};
pub use orchestrator::{DeviceContext, Orchestrator, TurnInput, TurnOutput, TurnPhase};
pub use registry::{AgentHandle, AgentRegistry, InMemoryAgentRegistry, TurnHandler};
pub use session::{Session, SessionHandle, SessionRegistry};
pub use tool_loop::{FollowUp, LoopOutcome, ToolLoop, LIMIT_NOTICE};
