//! # Decoy - request-matching and stateful scenario engine
//!
//! Decoy answers test and development traffic with deterministic, configurable
//! fake responses. It is the core a transport (HTTP server, test harness) calls
//! into; it never binds sockets itself.
//!
//! ## Features
//!
//! - **Stub matching**: priority ordering, path templates with `{name}` and `*`,
//!   header/query/body predicates, usage limits consumed atomically
//! - **Scenarios**: per-scenario working memory and cyclic response sequences
//! - **Data generation**: schema-driven synthetic values with `$ref` cycle detection,
//!   and related entity sets that never contain dangling references
//! - **Contract checks**: drift detection against a contract document
//! - **Verification**: an in-memory request log for "was it called N times" assertions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use decoy::application::MockEngine;
//! use decoy::config::EngineSettings;
//! use decoy::domain::{RequestDescriptor, ResponseTemplate, StubDefinition};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = MockEngine::new(EngineSettings::default())?;
//!     engine
//!         .register_stub(
//!             StubDefinition::new("GET", "/users/{id}")
//!                 .with_response(ResponseTemplate::json(200, json!({"name": "ada"}))),
//!         )
//!         .await?;
//!
//!     let response = engine.handle(RequestDescriptor::new("GET", "/users/7")).await?;
//!     assert_eq!(response.status, 200);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Decoy follows Hexagonal Architecture:
//! - **Domain**: core types, errors and the `MockPort` entry point
//! - **Application**: the `MockEngine` facade
//! - **Adapters**: registry, matcher, scenario store, generators, validator
//! - **Config**: configuration loading and validation

pub mod adapters;
pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
