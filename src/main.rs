use clap::Parser;
use decoy::adapters::stub_registry::ListFilter;
use decoy::application::MockEngine;
use decoy::cli::{Cli, Command};
use decoy::config::{load_document, Settings};
use decoy::domain::RequestDescriptor;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::new_with_cli(&cli)?;

    // Initialize tracing; stdout is reserved for command output
    let level = cli.log_level.clone().unwrap_or_else(|| settings.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(config = %cli.config.display(), "Loaded configuration");
    let engine = MockEngine::from_settings(&settings).await?;

    match cli.command {
        Command::Check => {
            let stubs = engine.list_stubs(&ListFilter::default()).await;
            for stub in &stubs {
                println!(
                    "{:<7} {:<40} id={} priority={} scenario={} uses={}",
                    stub.method,
                    stub.path,
                    stub.id.as_deref().unwrap_or("-"),
                    stub.priority,
                    stub.scenario,
                    stub.remaining_uses
                );
            }
            println!(
                "OK: {} stubs, {} scenarios, {} datasets, {} schemas",
                stubs.len(),
                settings.scenarios.len(),
                settings.datasets.len(),
                engine.schema_names().await.len()
            );
        }
        Command::Generate { schema, count } => {
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(engine.generate_from_schema(&schema).await?);
            }
            let output = if count == 1 {
                values.pop().unwrap_or(Value::Null)
            } else {
                Value::Array(values)
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Seed { dataset } => {
            let generated = engine.seed_dataset(&dataset).await?;
            println!("{}", serde_json::to_string_pretty(&generated)?);
        }
        Command::Validate {
            method,
            path,
            status,
            body,
            headers,
        } => {
            let body: Value = match body {
                Some(file) => load_document(&file)?,
                None => Value::Null,
            };
            let headers: BTreeMap<String, String> = headers.into_iter().collect();
            let report = engine.validate_response(&method, &path, status, &headers, &body).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Replay {
            requests,
            scenario,
            metrics,
        } => {
            let requests: Vec<RequestDescriptor> = load_document(&requests)?;
            if let Some(scenario) = scenario {
                engine.set_active_scenario(&scenario).await?;
            }
            for request in requests {
                let label = format!("{} {}", request.method, request.path);
                let line = match engine.handle(request).await {
                    Ok(response) => json!({ "request": label, "response": response }),
                    Err(e) => {
                        error!(request = %label, error = %e, "Request failed");
                        json!({ "request": label, "error": e.to_string(), "status": e.status_code() })
                    }
                };
                println!("{}", line);
            }
            if metrics {
                print!("{}", engine.metrics().encode()?);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
