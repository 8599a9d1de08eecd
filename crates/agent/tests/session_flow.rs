//! End-to-end session behavior against an in-process tool provider and a
//! scripted model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use geoloop_agent::{BatchProcessor, GeoSession};
use geoloop_core::GeoError;
use geoloop_mcp::{ClientConnectionState, ClientOptions, InProcessLauncher, ToolHandler, ToolProcessClient};
use geoloop_tool_runtime::provider::mock::ScriptedProvider;
use geoloop_tool_runtime::{ConversationMessage, LoopOptions, ProviderReply, QueryContext, RetryPolicy, ToolCall, ToolSpec};

struct Geocoder {
    delay: Option<Duration>,
}

#[async_trait]
impl ToolHandler for Geocoder {
    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "maps_geo".to_string(),
            description: "Geocode a structured address".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"address": {"type": "string"}, "city": {"type": "string"}},
                "required": ["address"]
            }),
        }]
    }

    async fn call(&self, _name: &str, arguments: Value) -> Result<Value, String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let address = arguments
            .get("address")
            .and_then(Value::as_str)
            .ok_or("address is required")?;
        Ok(json!({
            "status": "1",
            "geocodes": [{"formatted_address": address, "location": "121.490317,31.241701"}]
        }))
    }
}

fn session_with(handler: Geocoder, provider: Arc<ScriptedProvider>) -> (GeoSession, Arc<InProcessLauncher>) {
    let launcher = Arc::new(InProcessLauncher::new(Arc::new(handler)));
    let options = ClientOptions {
        retry: RetryPolicy::none(),
        ..ClientOptions::default()
    };
    let client = Arc::new(ToolProcessClient::new(launcher.clone(), options));
    let session = GeoSession::new(client, provider).with_loop_options(LoopOptions {
        llm_retry: RetryPolicy::none(),
        ..LoopOptions::default()
    });
    (session, launcher)
}

fn geo_call(id: &str, address: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: "maps_geo".to_string(),
        input: json!({"address": address, "city": "上海"}),
    }
}

#[tokio::test]
async fn test_query_runs_tools_and_tags_request() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.queue_tool_uses(Some("Let me geocode that."), vec![geo_call("toolu_1", "外滩")]);
    provider.queue_text("外滩 is at 121.490317,31.241701.");

    let (session, _launcher) = session_with(Geocoder { delay: None }, provider.clone());
    session.connect().await.unwrap();

    let mut context = QueryContext::new();
    context.insert("city".into(), json!("上海"));
    let result = session
        .process_query("Where is 外滩?", Some(&context), None)
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.request_id.is_some());
    assert_eq!(result.iterations, 2);
    assert_eq!(result.tool_calls.len(), 1);
    assert!(result.tool_calls[0].succeeded);
    assert_eq!(
        result.final_answer,
        "Let me geocode that.\n外滩 is at 121.490317,31.241701."
    );

    let requests = provider.requests();
    assert_eq!(requests[0].tool_names, vec!["maps_geo"]);
    match &requests[0].messages[0] {
        ConversationMessage::User(text) => {
            assert!(text.starts_with("Context: City: 上海"));
            assert!(text.ends_with("User query: Where is 外滩?"));
        }
        other => panic!("unexpected first message {:?}", other),
    }
    session.shutdown().await;
}

#[tokio::test]
async fn test_empty_query_rejected_without_model_call() {
    let provider = Arc::new(ScriptedProvider::new());
    let (session, launcher) = session_with(Geocoder { delay: None }, provider.clone());

    let err = session.process_query("   ", None, None).await.unwrap_err();
    assert!(matches!(err, GeoError::Validation(_)));
    assert_eq!(provider.call_count(), 0);
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_dead_provider_is_replaced_before_query() {
    let provider = Arc::new(ScriptedProvider::repeating(ProviderReply::text("ok")));
    let (session, launcher) = session_with(Geocoder { delay: None }, provider);
    session.connect().await.unwrap();
    assert_eq!(launcher.launches(), 1);

    launcher.kill_all();

    let result = session.process_query("ping", None, None).await.unwrap();
    assert!(result.success);
    assert_eq!(launcher.launches(), 2);
    assert_eq!(
        session.tool_client().state().await,
        ClientConnectionState::Connected
    );
}

#[tokio::test(start_paused = true)]
async fn test_query_deadline_at_caller_boundary() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.queue_tool_uses(None, vec![geo_call("toolu_slow", "人民广场")]);
    provider.queue_text("done");

    let (session, _launcher) = session_with(
        Geocoder {
            delay: Some(Duration::from_secs(20)),
        },
        provider,
    );
    let session = session.with_query_timeout(Duration::from_secs(5));
    session.connect().await.unwrap();

    let err = session
        .process_query_with_timeout("Where is 人民广场?", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, GeoError::Timeout(_)));
    // the subprocess survives an abandoned query
    assert!(session.tool_client().is_connected().await);
}

#[tokio::test]
async fn test_health_reports_both_sides() {
    let provider = Arc::new(ScriptedProvider::new());
    let (session, launcher) = session_with(Geocoder { delay: None }, provider);

    let before = session.health().await;
    assert!(!before.tool_provider_up);
    assert_eq!(before.status(), "unhealthy");

    session.connect().await.unwrap();
    let report = session.deep_health().await;
    assert!(report.tool_provider_up);
    assert!(report.llm_up);
    assert_eq!(report.tools_count, 1);
    assert_eq!(report.provider, "mock");
    assert!(report.llm_probe.unwrap().success);

    launcher.kill_all();
    let after = session.health().await;
    assert!(!after.tool_provider_up);
    // health never reconnects
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_tools_listing_connects_on_demand() {
    let provider = Arc::new(ScriptedProvider::new());
    let (session, launcher) = session_with(Geocoder { delay: None }, provider);

    let tools = session.get_available_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "maps_geo");
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_named_provider_probe_without_config() {
    let provider = Arc::new(ScriptedProvider::new());
    let (session, _launcher) = session_with(Geocoder { delay: None }, provider);

    assert!(session.test_provider_connection(None).await.success);
    let probe = session.test_provider_connection(Some("openai")).await;
    assert!(!probe.success);
    assert!(!probe.api_key_configured);
}

#[tokio::test]
async fn test_batch_enriches_and_preserves_order() {
    let answer = r#"{"市集名称": "x", "standardized_address": "上海市-黄浦区-中山东一路-外滩", "latitude": 31.2417, "longitude": 121.4903}"#;
    let provider = Arc::new(ScriptedProvider::repeating(ProviderReply::text(answer)));
    let (session, _launcher) = session_with(Geocoder { delay: None }, provider.clone());
    session.connect().await.unwrap();

    let items = vec![
        json!({"市集名称": "a", "举办地点": "外滩"}),
        json!({"市集名称": "b", "举办地点": "外滩"}),
        json!({"市集名称": "c", "举办地点": "外滩"}),
    ];
    let processor = BatchProcessor::new(Arc::new(session)).with_batch_size(2);
    let (out, summary) = processor.process_batch(&items).await;

    assert_eq!(out.len(), 3);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.enriched, 3);
    assert_eq!(out[0]["latitude"], json!(31.2417));
    assert!(provider.requests()[0].system_prompt.contains("standardized_address"));
}

#[tokio::test]
async fn test_batch_falls_back_to_original() {
    // one answer without a record, then the script runs dry
    let provider = Arc::new(ScriptedProvider::new());
    provider.queue_text("I could not find it.");
    let (session, _launcher) = session_with(Geocoder { delay: None }, provider);
    session.connect().await.unwrap();

    let items = vec![json!({"举办地点": "东风路文创园"}), json!({"举办地点": "某处"})];
    let processor = BatchProcessor::new(Arc::new(session));
    let (out, summary) = processor.process_batch(&items).await;

    assert_eq!(out, items);
    assert_eq!(summary.enriched, 0);
}
