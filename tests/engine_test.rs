use decoy::adapters::relational::{Cardinality, RelationshipSpec};
use decoy::adapters::request_log::RequestLogFilter;
use decoy::adapters::stub_registry::ListFilter;
use decoy::application::MockEngine;
use decoy::config::EngineSettings;
use decoy::domain::stub::SequenceStep;
use decoy::domain::{
    Action, EngineError, MockPort, RequestDescriptor, ResponseBody, ResponseTemplate, SchemaNode, StubDefinition,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn engine() -> MockEngine {
    MockEngine::new(EngineSettings::default()).unwrap()
}

#[tokio::test]
async fn test_priority_literal_beats_template() {
    let engine = engine();
    engine
        .register_stub(
            StubDefinition::new("GET", "/users/1")
                .with_id("A")
                .with_priority(1)
                .with_response(ResponseTemplate::json(200, json!({"id": "1"}))),
        )
        .await
        .unwrap();
    engine
        .register_stub(
            StubDefinition::new("GET", "/users/{id}")
                .with_id("B")
                .with_response(ResponseTemplate::json(200, json!({"id": "template"}))),
        )
        .await
        .unwrap();

    for _ in 0..10 {
        let response = engine.handle(RequestDescriptor::new("GET", "/users/1")).await.unwrap();
        assert_eq!(response.body, json!({"id": "1"}));
        assert_eq!(response.stub_id.as_deref(), Some("A"));
    }
}

#[tokio::test]
async fn test_login_uses_then_diagnostic_404() {
    let engine = engine();
    engine
        .register_stub(
            StubDefinition::new("POST", "/login")
                .with_id("login")
                .with_remaining_uses(2)
                .with_response(ResponseTemplate::json(200, json!({"token": "t"}))),
        )
        .await
        .unwrap();

    let statuses = [
        engine.handle(RequestDescriptor::new("POST", "/login")).await.unwrap().status,
        engine.handle(RequestDescriptor::new("POST", "/login")).await.unwrap().status,
    ];
    assert_eq!(statuses, [200, 200]);

    let err = engine
        .match_request(&RequestDescriptor::new("POST", "/login"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));

    let diagnostic = engine.handle(RequestDescriptor::new("POST", "/login")).await.unwrap();
    assert_eq!(diagnostic.status, 404);
    assert!(diagnostic.stub_id.is_none());
    let closest = diagnostic.body["closest"].as_array().unwrap();
    assert_eq!(closest[0]["stub_id"], "login");
    assert!(closest[0]["reasons"]
        .as_array()
        .unwrap()
        .iter()
        .any(|reason| reason.as_str().unwrap().contains("no remaining uses")));

    // Exhausted stubs stay registered
    let listed = engine.list_stubs(&ListFilter::default()).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].remaining_uses, 0);
}

#[tokio::test]
async fn test_reset_scenario_replays_identically() {
    let engine = engine();
    let mut initial = Map::new();
    initial.insert("items".to_string(), json!([]));

    engine
        .register_stub(
            StubDefinition::new("POST", "/cart")
                .with_scenario("checkout")
                .with_initial_state(initial)
                .with_response(
                    ResponseTemplate::json(201, json!({"ok": true}))
                        .with_action(Action::invoke("state.items", "append", vec![json!("{{ body.item }}")]))
                        .with_action(Action::set_field("body.items", json!("{{ state.items | json_encode() }}"))),
                ),
        )
        .await
        .unwrap();
    engine
        .register_stub(
            StubDefinition::new("GET", "/cart/total")
                .with_scenario("checkout")
                .with_response(ResponseTemplate::status(200).with_body(ResponseBody::Sequence {
                    name: "total".to_string(),
                    steps: vec![
                        SequenceStep::new(1, 200).with_body(ResponseBody::Template {
                            template: r#"{"count": {{ state.items | length }}}"#.to_string(),
                        }),
                        SequenceStep::new(1, 202),
                    ],
                })),
        )
        .await
        .unwrap();
    engine.set_active_scenario("checkout").await.unwrap();

    let run = || async {
        let requests = vec![
            RequestDescriptor::new("POST", "/cart").with_json(json!({"item": "apple"})),
            RequestDescriptor::new("POST", "/cart").with_json(json!({"item": "pear"})),
            RequestDescriptor::new("GET", "/cart/total"),
            RequestDescriptor::new("GET", "/cart/total"),
        ];
        let mut transcript = Vec::new();
        for request in requests {
            let response = engine.handle(request).await.unwrap();
            transcript.push((response.status, response.body_bytes()));
        }
        transcript
    };

    let first = run().await;
    assert_eq!(first[1].1, br#"{"ok":true,"items":["apple","pear"]}"#.to_vec());
    assert_eq!(first[2], (200, br#"{"count":2}"#.to_vec()));
    assert_eq!(first[3].0, 202);

    engine.reset_scenario("checkout").await;
    let second = run().await;
    assert_eq!(first, second);
}

async fn status_of(engine: &MockEngine) -> u16 {
    engine.handle(RequestDescriptor::new("GET", "/status")).await.unwrap().status
}

#[tokio::test]
async fn test_scenario_switch_and_default_eligibility() {
    let engine = engine();
    engine
        .register_stub(StubDefinition::new("GET", "/status").with_id("base"))
        .await
        .unwrap();
    engine
        .register_stub(
            StubDefinition::new("GET", "/status")
                .with_id("outage")
                .with_scenario("outage")
                .with_response(ResponseTemplate::status(503)),
        )
        .await
        .unwrap();

    assert_eq!(status_of(&engine).await, 200);
    engine.set_active_scenario("outage").await.unwrap();
    assert_eq!(status_of(&engine).await, 503);
    engine.set_active_scenario("default").await.unwrap();
    assert_eq!(status_of(&engine).await, 200);
}

#[tokio::test]
async fn test_request_log_queries() {
    let engine = engine();
    engine
        .register_stub(StubDefinition::new("GET", "/users/{id}").with_id("users"))
        .await
        .unwrap();

    engine
        .handle(RequestDescriptor::new("GET", "/users/1").with_header("X-Trace", "1"))
        .await
        .unwrap();
    engine.handle(RequestDescriptor::new("GET", "/users/2")).await.unwrap();
    engine.handle(RequestDescriptor::new("DELETE", "/users/2")).await.unwrap();

    let by_template = RequestLogFilter::default().path_template("/users/{id}");
    assert_eq!(engine.count_requests(&by_template).await.unwrap(), 3);
    assert_eq!(
        engine
            .count_requests(&RequestLogFilter::default().stub_id("users"))
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        engine
            .count_requests(&RequestLogFilter::default().matched(false))
            .await
            .unwrap(),
        1
    );

    let traced = engine
        .query_request_log(&RequestLogFilter::default().header("x-trace"))
        .await
        .unwrap();
    assert_eq!(traced.len(), 1);
    assert_eq!(traced[0].request.path, "/users/1");
}

#[tokio::test]
async fn test_reset_all() {
    let engine = engine();
    engine
        .register_stub(StubDefinition::new("GET", "/a").with_scenario("s"))
        .await
        .unwrap();
    engine.set_active_scenario("s").await.unwrap();
    engine.handle(RequestDescriptor::new("GET", "/a")).await.unwrap();

    engine.reset_all().await;

    assert!(engine.list_stubs(&ListFilter::default()).await.is_empty());
    assert_eq!(engine.count_requests(&RequestLogFilter::default()).await.unwrap(), 0);
    assert_eq!(engine.active_scenario().await, "default");
    assert_eq!(engine.handle(RequestDescriptor::new("GET", "/a")).await.unwrap().status, 404);
}

#[tokio::test]
async fn test_remove_unknown_stub() {
    let engine = engine();
    let err = engine.remove_stub("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::StubNotFound(_)));
}

#[tokio::test]
async fn test_relational_users_and_orders() {
    let engine = engine();
    let mut schemas = BTreeMap::new();
    schemas.insert(
        "user".to_string(),
        SchemaNode::object().with_property("email", SchemaNode::string().with_format("email"), true),
    );
    schemas.insert(
        "order".to_string(),
        SchemaNode::object().with_property("total", SchemaNode::number(Some(1.0), Some(500.0)), true),
    );
    let counts = BTreeMap::from([("user".to_string(), 10), ("order".to_string(), 30)]);
    let relationships = vec![RelationshipSpec::new("user", "orders", "order", Cardinality::OneToMany)];

    let dataset = engine.generate_dataset(&schemas, &counts, &relationships).await.unwrap();
    assert_eq!(dataset["user"].len(), 10);
    assert_eq!(dataset["order"].len(), 30);

    let order_ids: BTreeSet<&str> = dataset["order"].iter().map(|o| o["id"].as_str().unwrap()).collect();
    for user in &dataset["user"] {
        let orders = user["orders"].as_array().unwrap();
        assert!(!orders.is_empty() && orders.len() <= 5);
        for id in orders {
            assert!(order_ids.contains(id.as_str().unwrap()));
        }
    }
}

#[tokio::test]
async fn test_delay_is_scoped_to_its_request() {
    let engine = Arc::new(engine());
    engine
        .register_stub(StubDefinition::new("GET", "/slow").with_delay(Duration::from_millis(500)))
        .await
        .unwrap();
    engine.register_stub(StubDefinition::new("GET", "/fast")).await.unwrap();

    let slow = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.handle(RequestDescriptor::new("GET", "/slow")).await })
    };
    tokio::task::yield_now().await;

    let started = Instant::now();
    let fast = engine.handle(RequestDescriptor::new("GET", "/fast")).await.unwrap();
    assert_eq!(fast.status, 200);
    assert!(started.elapsed() < Duration::from_millis(400));

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.status, 200);
}

#[tokio::test]
async fn test_engine_behind_port() {
    let port: Arc<dyn MockPort> = Arc::new(engine());
    let response = port.handle(RequestDescriptor::new("GET", "/nothing")).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.body["closest"], Value::Array(vec![]));
}
