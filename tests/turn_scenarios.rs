//! 回合级集成测试：脚本化补全客户端 + 内存设备目录，不依赖网络与宿主

use std::sync::Arc;

use lemonade::config::{AgentConfig, FollowUpMode, ToolSupport};
use lemonade::core::{OrchestratorBuilder, TurnInput, LIMIT_NOTICE};
use lemonade::llm::{CompletionClient, ScriptedClient};
use lemonade::memory::{IclStore, Role, ToolCall};
use lemonade::tools::schema::GetStateArgs;
use lemonade::tools::{InMemoryDirectory, ToolBridge};
use lemonade::Orchestrator;

fn home() -> Arc<InMemoryDirectory> {
    Arc::new(
        InMemoryDirectory::new()
            .with_area("kitchen", "Kitchen")
            .with_entity("light.kitchen", "Kitchen Light", "off", Some("kitchen"))
            .with_entity("lock.front_door", "Front Door", "locked", None),
    )
}

fn build(
    client: Arc<dyn CompletionClient>,
    directory: Arc<InMemoryDirectory>,
    config: AgentConfig,
) -> Orchestrator {
    OrchestratorBuilder::new(config)
        .with_client(client)
        .with_directory(directory)
        .build()
        .expect("valid config")
}

fn call_service(domain: &str, service: &str, entity_id: &str) -> ToolCall {
    ToolCall::new(
        "call_1",
        "call_service",
        format!(r#"{{"domain":"{domain}","service":"{service}","entity_id":"{entity_id}"}}"#),
    )
}

#[tokio::test]
async fn direct_mode_turn_on_uses_single_completion() {
    let directory = home();
    let client = Arc::new(
        ScriptedClient::new().tool_calls(None, vec![call_service("light", "turn_on", "light.kitchen")]),
    );
    let config = AgentConfig {
        model_supports_tools: ToolSupport::Yes,
        follow_up_mode: FollowUpMode::Direct,
        ..AgentConfig::default()
    };
    let orch = build(client.clone(), directory.clone(), config);

    let out = orch
        .process(TurnInput::new("turn on the kitchen light").with_conversation_id("kitchen"))
        .await;

    assert_eq!(out.speech, "Turned on Kitchen Light.");
    assert_eq!(client.call_count(), 1);
    assert_eq!(directory.service_calls().await.len(), 1);

    let session = orch.sessions().get("kitchen").await.unwrap();
    let session = session.lock().await;
    let roles: Vec<Role> = session.history.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn iteration_limit_appends_notice_without_third_completion() {
    let client = Arc::new(
        ScriptedClient::new()
            .tool_calls(Some("Checking the kitchen."), vec![ToolCall::new("a", "list_areas", "{}")])
            .tool_calls(None, vec![ToolCall::new("b", "list_areas", "{}")])
            .reply("should never be requested"),
    );
    let config = AgentConfig {
        model_supports_tools: ToolSupport::Yes,
        follow_up_mode: FollowUpMode::Llm,
        tool_iteration_limit: 1,
        ..AgentConfig::default()
    };
    let orch = build(client.clone(), home(), config);

    let out = orch.process(TurnInput::new("what rooms do I have?")).await;

    assert_eq!(out.speech, format!("Checking the kitchen. {LIMIT_NOTICE}"));
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn fresh_icl_store_returns_no_examples() {
    let store = IclStore::in_memory(200);
    assert!(store.get_examples("x", 4).await.is_empty());
}

#[tokio::test]
async fn unknown_entity_is_rendered_as_apology() {
    let bridge = ToolBridge::new(home(), vec!["light".into()]);
    let payload = bridge
        .get_state(GetStateArgs {
            entity_id: Some("sensor.unknown".into()),
        })
        .await;
    assert_eq!(payload["error"], "Entity not found: sensor.unknown");

    let client = Arc::new(ScriptedClient::new().tool_calls(
        None,
        vec![ToolCall::new("c", "get_state", r#"{"entity_id":"sensor.unknown"}"#)],
    ));
    let config = AgentConfig {
        model_supports_tools: ToolSupport::Yes,
        ..AgentConfig::default()
    };
    let orch = build(client, home(), config);
    let out = orch.process(TurnInput::new("is the sensor on?")).await;

    assert_eq!(
        out.speech,
        "Sorry, I couldn't complete that: Entity not found: sensor.unknown"
    );
}

#[tokio::test]
async fn history_stays_bounded_across_many_turns() {
    let client = Arc::new(ScriptedClient::new());
    let config = AgentConfig {
        max_history_turns: 2,
        model_supports_tools: ToolSupport::No,
        ..AgentConfig::default()
    };
    let orch = build(client.clone(), home(), config);

    for i in 0..9 {
        for id in ["a", "b"] {
            orch.process(TurnInput::new(format!("turn {i}")).with_conversation_id(id))
                .await;
            let session = orch.sessions().get(id).await.unwrap();
            assert!(session.lock().await.history.len() <= 4);
        }
    }
    // 每个请求最多包含 system + 4 条历史 + 新用户消息
    assert!(client.requests().iter().all(|r| r.messages.len() <= 6));
}

#[tokio::test]
async fn probe_runs_once_per_session() {
    let client = Arc::new(
        ScriptedClient::new()
            .tool_calls(None, vec![ToolCall::new("p", "list_areas", "{}")])
            .reply("one")
            .reply("two")
            .reply("three"),
    );
    let config = AgentConfig {
        model_supports_tools: ToolSupport::Auto,
        ..AgentConfig::default()
    };
    let orch = build(client.clone(), home(), config);

    for text in ["one", "two", "three"] {
        orch.process(TurnInput::new(text).with_conversation_id("probe")).await;
    }

    let probes = client
        .requests()
        .iter()
        .filter(|r| r.temperature == 0.0 && r.has_tools())
        .count();
    assert_eq!(probes, 1);
    assert_eq!(client.call_count(), 4);
}

#[tokio::test]
async fn disallowed_domain_never_reaches_the_host() {
    let directory = home();
    let client = Arc::new(ScriptedClient::new().tool_calls(
        None,
        vec![call_service("lock", "unlock", "lock.front_door")],
    ));
    let config = AgentConfig {
        model_supports_tools: ToolSupport::Yes,
        allowed_domains: vec!["light".into()],
        ..AgentConfig::default()
    };
    let orch = build(client, directory.clone(), config);

    let out = orch.process(TurnInput::new("unlock the front door")).await;

    assert_eq!(out.speech, "Sorry, I couldn't complete that: Domain not allowed: lock");
    assert!(directory.service_calls().await.is_empty());
}

#[tokio::test]
async fn concurrent_turns_on_one_conversation_are_serialized() {
    let client = Arc::new(ScriptedClient::new());
    let config = AgentConfig {
        model_supports_tools: ToolSupport::No,
        ..AgentConfig::default()
    };
    let orch = Arc::new(build(client, home(), config));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let orch = orch.clone();
        tasks.push(tokio::spawn(async move {
            orch.process(TurnInput::new(format!("msg {i}")).with_conversation_id("shared"))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let session = orch.sessions().get("shared").await.unwrap();
    let session = session.lock().await;
    let roles: Vec<Role> = session.history.messages().iter().map(|m| m.role).collect();
    // 用户与助手消息严格交替
    for pair in roles.chunks(2) {
        assert_eq!(pair, [Role::User, Role::Assistant]);
    }
}
