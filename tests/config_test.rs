use decoy::application::MockEngine;
use decoy::config::Settings;
use decoy::domain::RequestDescriptor;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn write_layout(root: &std::path::Path) -> anyhow::Result<()> {
    fs::create_dir_all(root.join("config/stubs"))?;
    fs::create_dir_all(root.join("config/scenarios"))?;
    fs::create_dir_all(root.join("config/datasets"))?;

    let decoy_toml = r#"
contract_path = "contract.yaml"

[engine]
max_ref_depth = 6
validate_responses = true

[logging]
level = "debug"
"#;
    fs::write(root.join("decoy.toml"), decoy_toml)?;

    let contract = r#"
schemas:
  User:
    kind: object
    properties:
      id: { kind: string, format: uuid }
      age: { kind: integer, minimum: 0, maximum: 120 }
endpoints:
  - method: GET
    path: /users/{id}
    responses:
      "200":
        body: { kind: ref, $ref: User }
"#;
    fs::write(root.join("contract.yaml"), contract)?;

    // A single stub in JSON, header names keep their case
    let login_json = r#"
{
    "id": "login",
    "method": "POST",
    "path": "/login",
    "remaining_uses": 1,
    "response": {
        "status": 200,
        "headers": { "X-Session": "abc" },
        "body": { "type": "static", "content": { "token": "t-1" } }
    }
}
"#;
    fs::write(root.join("config/stubs/login.json"), login_json)?;

    // A list of stubs in YAML
    let users_yaml = r#"
- id: user
  method: get
  path: /users/{id}
  response:
    body:
      type: schema
      schema: { kind: ref, $ref: User }
- id: cart
  method: GET
  path: /cart
  scenario: checkout
  response:
    body:
      type: template
      template: '{"items": {{ state.items | length }}}'
"#;
    fs::write(root.join("config/stubs/users.yaml"), users_yaml)?;

    let scenarios = r#"
name = "checkout"

[initial_state]
items = ["apple"]
"#;
    fs::write(root.join("config/scenarios/checkout.toml"), scenarios)?;

    let dataset = r#"
name: shop
entities:
  user:
    count: 4
    schema: { kind: ref, $ref: User }
  order:
    count: 6
    schema: { kind: object }
relationships:
  - sourceEntityType: user
    sourceField: orders
    targetEntityType: order
    cardinality: one-to-many
"#;
    fs::write(root.join("config/datasets/shop.yml"), dataset)?;

    // Ignored: unknown extension
    fs::write(root.join("config/stubs/README.md"), "notes")?;
    Ok(())
}

#[test]
fn test_load_external_configs() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_layout(root)?;

    let settings = Settings::from_root(root)?;

    assert_eq!(settings.engine.max_ref_depth, 6);
    assert_eq!(settings.engine.cas_max_retries, 16);
    assert!(settings.engine.validate_responses);
    assert_eq!(settings.logging.level, "debug");

    assert_eq!(settings.stubs.len(), 3);
    let login = settings.stubs.iter().find(|s| s.id.as_deref() == Some("login")).unwrap();
    assert_eq!(login.response.headers["X-Session"], "abc");

    assert_eq!(settings.scenario("checkout").unwrap().initial_state["items"], json!(["apple"]));
    assert_eq!(settings.dataset("shop").unwrap().relationships.len(), 1);
    assert_eq!(settings.contract.as_ref().unwrap().schemas.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_engine_from_settings() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    write_layout(root)?;

    let settings = Settings::from_root(root)?;
    let engine = MockEngine::from_settings(&settings).await?;

    let user = engine.handle(RequestDescriptor::new("GET", "/users/5")).await?;
    assert_eq!(user.status, 200);
    assert!(uuid::Uuid::parse_str(user.body["id"].as_str().unwrap()).is_ok());
    assert!(user.contract_report.unwrap().valid);

    let login = engine.handle(RequestDescriptor::new("POST", "/login")).await?;
    assert_eq!(login.headers["X-Session"], "abc");
    assert_eq!(login.body, json!({"token": "t-1"}));
    assert_eq!(engine.handle(RequestDescriptor::new("POST", "/login")).await?.status, 404);

    engine.set_active_scenario("checkout").await?;
    let cart = engine.handle(RequestDescriptor::new("GET", "/cart")).await?;
    assert_eq!(cart.body, json!({"items": 1}));

    let dataset = engine.seed_dataset("shop").await?;
    assert_eq!(dataset["user"].len(), 4);
    assert_eq!(dataset["order"].len(), 6);

    // Scenario initial state survives a full reset
    engine.reset_all().await;
    assert_eq!(engine.scenario_state("checkout").await.data["items"], json!(["apple"]));
    Ok(())
}

#[test]
fn test_invalid_stub_files_fail_validation() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    fs::create_dir_all(root.join("config/stubs"))?;
    fs::write(
        root.join("config/stubs/bad.yaml"),
        r#"
- { id: dup, method: GET, path: /a }
- { id: dup, method: "", path: "b" }
"#,
    )?;

    let err = Settings::from_root(root).unwrap_err().to_string();
    assert!(err.contains("Configuration validation failed"));
    assert!(err.contains("Duplicate entry"));
    assert!(err.contains("stubs[1].method"));
    assert!(err.contains("stubs[1].path"));
    Ok(())
}

#[test]
fn test_missing_root_uses_defaults() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = Settings::from_root(temp_dir.path())?;
    assert_eq!(settings.engine.default_scenario, "default");
    assert_eq!(settings.engine.request_log_capacity, 10_000);
    assert!(settings.stubs.is_empty());
    assert!(settings.contract.is_none());
    Ok(())
}
