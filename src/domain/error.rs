//! Error types for the mock engine

use thiserror::Error;

/// Errors raised while generating data from a schema.
///
/// Both variants abort only the single generation call that produced them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    /// A `$ref` chain revisited a schema already on the resolution path, or
    /// grew past the configured maximum depth
    #[error("Schema cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// The schema node itself is malformed (unknown kind, empty enum, bad bounds...)
    #[error("Schema validation error: {0}")]
    Validation(String),
}

/// Errors surfaced by the engine and its components
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed registration or configuration input
    #[error("Validation error: {0}")]
    Validation(String),

    /// No registered stub matched the request
    #[error("No stub matched {method} {path}")]
    NotFound { method: String, path: String },

    /// A stub id that is not registered
    #[error("Stub not found: {0}")]
    StubNotFound(String),

    /// Schema generation failure
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Compare-and-swap retries on a usage counter were exhausted
    #[error("Concurrency conflict on stub '{stub_id}' after {attempts} attempts")]
    ConcurrencyConflict { stub_id: String, attempts: u32 },

    /// Response rendering or action evaluation failed
    #[error("Render error: {0}")]
    Render(String),

    /// Template engine error
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
}

impl EngineError {
    /// Shorthand used by validation paths throughout the crate
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP-equivalent status a transport should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } | Self::StubNotFound(_) => 404,
            Self::ConcurrencyConflict { .. } => 409,
            _ => 500,
        }
    }
}
