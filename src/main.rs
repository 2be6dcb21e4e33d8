//! Lemonade - 命令行对话代理
//!
//! 入口：初始化日志、加载配置、校验服务连通性、构建 Orchestrator 并注册到宿主表，然后在标准输入上运行对话循环。
//! 命令：`/clear-examples` 清空 ICL 示例库，`/quit` 退出。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lemonade::config::load_config;
use lemonade::core::{AgentHandle, InMemoryAgentRegistry, OrchestratorBuilder, TurnInput};
use lemonade::llm::{LemonadeClient, LlmError};
use lemonade::observability;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const PROVIDER_ID: &str = "lemonade_conversation";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let client = Arc::new(
        LemonadeClient::new(&cfg.connection).context("Failed to create completion client")?,
    );
    match client.validate().await {
        Ok(models) => tracing::info!("Available models: {}", models.join(", ")),
        Err(e @ LlmError::Auth { .. }) => {
            return Err(e).context("Lemonade server rejected the API key");
        }
        Err(e) => tracing::warn!("Lemonade server not reachable yet: {}", e),
    }

    let orchestrator = Arc::new(
        OrchestratorBuilder::from_app_config(&cfg)
            .with_client(client)
            .build()
            .context("Failed to build conversation agent")?,
    );

    let registry = Arc::new(InMemoryAgentRegistry::new());
    let handle = AgentHandle::start(registry.clone(), PROVIDER_ID, orchestrator.clone())
        .await
        .context("Failed to register conversation agent")?;

    if cfg.app.session_idle_secs > 0 {
        let sessions = orchestrator.sessions().clone();
        let max_idle = Duration::from_secs(cfg.app.session_idle_secs);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(max_idle.min(Duration::from_secs(60)));
            loop {
                tick.tick().await;
                sessions.evict_idle(max_idle).await;
            }
        });
    }

    let name = cfg
        .app
        .name
        .clone()
        .unwrap_or_else(|| orchestrator.config().agent_name.clone());
    println!("{name} ready. Type /quit to exit, /clear-examples to reset the example store.");

    let conversation_id = uuid::Uuid::new_v4().to_string();
    let handler = registry
        .get(PROVIDER_ID)
        .await
        .context("Conversation agent missing from registry")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear-examples" => {
                match orchestrator.clear_examples().await {
                    Ok(()) => println!("Examples cleared."),
                    Err(e) => println!("Failed to clear examples: {e}"),
                }
                continue;
            }
            _ => {}
        }

        let output = handler
            .handle(TurnInput::new(text).with_conversation_id(&conversation_id))
            .await;
        println!("{}", output.speech);
    }

    handle.stop().await;
    Ok(())
}
