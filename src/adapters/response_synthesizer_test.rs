use super::request_matcher::{MatchResult, RequestMatcher, DEFAULT_CAS_MAX_RETRIES};
use super::response_synthesizer::ResponseSynthesizer;
use super::scenario_store::ScenarioStore;
use super::stub_registry::StubRegistry;
use crate::domain::stub::{Action, ResponseBody, ResponseTemplate, SequenceStep};
use crate::domain::{EngineError, RequestDescriptor, SchemaNode, SchemaRegistry, StubDefinition};
use serde_json::json;
use std::sync::Arc;

struct Harness {
    registry: Arc<StubRegistry>,
    matcher: RequestMatcher,
    store: ScenarioStore,
    synthesizer: ResponseSynthesizer,
    schemas: SchemaRegistry,
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(StubRegistry::new());
        Self {
            matcher: RequestMatcher::new(registry.clone(), DEFAULT_CAS_MAX_RETRIES),
            registry,
            store: ScenarioStore::new(),
            synthesizer: ResponseSynthesizer::default(),
            schemas: SchemaRegistry::new(),
        }
    }

    async fn matched(&self, request: &RequestDescriptor) -> MatchResult {
        self.matcher.match_request(request, "default").await.unwrap()
    }

    async fn send(&self, request: RequestDescriptor) -> Result<crate::domain::MockResponse, EngineError> {
        let matched = self.matched(&request).await;
        self.synthesizer
            .render(&matched, &request, &self.store, "default", &self.schemas)
            .await
    }
}

#[tokio::test]
async fn test_template_body_and_headers() {
    let harness = Harness::new();
    let template = ResponseTemplate::status(201)
        .with_header("Location", "/users/{{ path.id }}")
        .with_body(ResponseBody::Template {
            template: r#"{"id": "{{ path.id }}", "page": {{ query.page }}, "name": "{{ body.name }}"}"#.to_string(),
        });
    harness
        .registry
        .register(StubDefinition::new("PUT", "/users/{id}").with_response(template))
        .await
        .unwrap();

    let response = harness
        .send(
            RequestDescriptor::new("PUT", "/users/9")
                .with_query("page", "3")
                .with_json(json!({"name": "ada"})),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.headers["Location"], "/users/9");
    assert_eq!(response.body, json!({"id": "9", "page": 3, "name": "ada"}));
    assert!(response.stub_id.is_some());
}

#[tokio::test]
async fn test_non_json_template_stays_text() {
    let harness = Harness::new();
    harness
        .registry
        .register(StubDefinition::new("GET", "/hello/{name}").with_response(
            ResponseTemplate::status(200).with_body(ResponseBody::Template {
                template: "Hello, {{ path.name }}!".to_string(),
            }),
        ))
        .await
        .unwrap();

    let response = harness.send(RequestDescriptor::new("GET", "/hello/world")).await.unwrap();
    assert_eq!(response.body, json!("Hello, world!"));
}

#[tokio::test]
async fn test_sequence_cycles_with_wraparound() {
    let harness = Harness::new();
    let body = ResponseBody::Sequence {
        name: "throttle".to_string(),
        steps: vec![SequenceStep::new(5, 200), SequenceStep::new(10, 429)],
    };
    harness
        .registry
        .register(StubDefinition::new("GET", "/limited").with_response(ResponseTemplate::status(200).with_body(body)))
        .await
        .unwrap();

    let mut statuses = Vec::new();
    for _ in 0..16 {
        statuses.push(harness.send(RequestDescriptor::new("GET", "/limited")).await.unwrap().status);
    }
    assert!(statuses[..5].iter().all(|s| *s == 200));
    assert!(statuses[5..15].iter().all(|s| *s == 429));
    assert_eq!(statuses[15], 200);
}

#[tokio::test]
async fn test_actions_update_state_and_body() {
    let harness = Harness::new();
    let template = ResponseTemplate::json(200, json!({"ok": true}))
        .with_action(Action::invoke("state.calls", "increment", vec![]))
        .with_action(Action::set_field("body.calls", json!("{{ state.calls }}")));
    harness
        .registry
        .register(StubDefinition::new("POST", "/count").with_response(template))
        .await
        .unwrap();

    for expected in 1..=3 {
        let response = harness.send(RequestDescriptor::new("POST", "/count")).await.unwrap();
        assert_eq!(response.body, json!({"ok": true, "calls": expected}));
    }
    assert_eq!(harness.store.get_state("default").await.data["calls"], json!(3));
}

#[tokio::test]
async fn test_failed_render_rolls_back_state() {
    let harness = Harness::new();
    let template = ResponseTemplate::status(200)
        .with_body(ResponseBody::Sequence {
            name: "s".to_string(),
            steps: vec![SequenceStep::new(1, 200), SequenceStep::new(1, 500)],
        })
        .with_action(Action::set_field("state.touched", json!(true)))
        .with_action(Action::invoke("state.touched", "increment", vec![]));
    harness
        .registry
        .register(StubDefinition::new("GET", "/broken").with_response(template))
        .await
        .unwrap();

    let err = harness.send(RequestDescriptor::new("GET", "/broken")).await.unwrap_err();
    assert!(matches!(err, EngineError::Render(_)));

    let state = harness.store.get_state("default").await;
    assert!(state.data.get("touched").is_none());
    assert_eq!(state.cursor("s").step_index, 0);
}

#[tokio::test]
async fn test_schema_body_uses_registry() {
    let mut harness = Harness::new();
    harness.schemas.insert(
        "Token",
        SchemaNode::object().with_property("value", SchemaNode::string().with_format("uuid"), true),
    );
    harness
        .registry
        .register(StubDefinition::new("POST", "/token").with_response(
            ResponseTemplate::status(200).with_body(ResponseBody::Schema {
                schema: SchemaNode::reference("Token"),
            }),
        ))
        .await
        .unwrap();

    let response = harness.send(RequestDescriptor::new("POST", "/token")).await.unwrap();
    assert!(uuid::Uuid::parse_str(response.body["value"].as_str().unwrap()).is_ok());
}
