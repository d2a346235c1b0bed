//! Contract documents: expected response shapes per endpoint and status.

use crate::domain::error::EngineError;
use crate::domain::path::PathTemplate;
use crate::domain::schema::{SchemaNode, SchemaRegistry};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Status key used when no exact status entry exists
pub const DEFAULT_STATUS_KEY: &str = "default";

/// A parsed contract document, as handed over by an external loader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractDocument {
    #[serde(default)]
    pub schemas: IndexMap<String, SchemaNode>,
    #[serde(default)]
    pub endpoints: Vec<ContractEndpointSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractEndpointSpec {
    pub method: String,
    /// Path template, e.g. `/users/{id}`
    pub path: String,
    /// Keyed by decimal status code or `default`
    #[serde(default)]
    pub responses: BTreeMap<String, ResponseSpec>,
}

impl ContractEndpointSpec {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            responses: BTreeMap::new(),
        }
    }

    pub fn with_response(mut self, status: impl ToString, spec: ResponseSpec) -> Self {
        self.responses.insert(status.to_string(), spec);
        self
    }

    /// Response spec for `status`, falling back to the `default` entry
    pub fn response_for(&self, status: u16) -> Option<&ResponseSpec> {
        self.responses
            .get(&status.to_string())
            .or_else(|| self.responses.get(DEFAULT_STATUS_KEY))
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(&self.method, &self.path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseSpec {
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<SchemaNode>,
}

impl ResponseSpec {
    pub fn with_body(body: SchemaNode) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: Some(body),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, spec: HeaderSpec) -> Self {
        self.headers.insert(name.into(), spec);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeaderSpec {
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Default for HeaderSpec {
    fn default() -> Self {
        Self {
            required: true,
            pattern: None,
        }
    }
}

/// `METHOD path-template` identity of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub method: String,
    pub path: String,
}

impl EndpointKey {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
        }
    }
}

pub type ContractMap = HashMap<EndpointKey, ContractEndpointSpec>;

/// Convert a parsed contract document into its endpoint map and schema registry.
///
/// Rejects documents whose refs name unknown schemas, whose endpoint paths are
/// malformed, or that declare the same method+path twice.
pub fn load_contract(document: ContractDocument) -> Result<(ContractMap, SchemaRegistry), EngineError> {
    let mut refs = BTreeSet::new();
    for node in document.schemas.values() {
        node.collect_refs(&mut refs);
    }
    for endpoint in &document.endpoints {
        for response in endpoint.responses.values() {
            if let Some(body) = &response.body {
                body.collect_refs(&mut refs);
            }
        }
    }
    let unknown: Vec<String> = refs
        .into_iter()
        .filter(|name| !document.schemas.contains_key(name))
        .collect();
    if !unknown.is_empty() {
        return Err(EngineError::validation(format!(
            "contract references unknown schemas: {}",
            unknown.join(", ")
        )));
    }

    let mut endpoints = ContractMap::new();
    for endpoint in document.endpoints {
        if endpoint.method.trim().is_empty() {
            return Err(EngineError::validation(format!(
                "contract endpoint '{}' has an empty method",
                endpoint.path
            )));
        }
        PathTemplate::parse(&endpoint.path).map_err(EngineError::Validation)?;
        for status in endpoint.responses.keys() {
            if status != DEFAULT_STATUS_KEY && status.parse::<u16>().is_err() {
                return Err(EngineError::validation(format!(
                    "contract endpoint {} {} has invalid status key '{}'",
                    endpoint.method, endpoint.path, status
                )));
            }
        }
        let key = endpoint.key();
        if endpoints.contains_key(&key) {
            return Err(EngineError::validation(format!(
                "contract endpoint {} {} is declared twice",
                key.method, key.path
            )));
        }
        endpoints.insert(key, endpoint);
    }

    let registry = document.schemas.into_iter().collect::<SchemaRegistry>();
    Ok((endpoints, registry))
}

/// One contract drift finding. `path` is a JSON-pointer-like location such as `$.items[2].id`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContractViolation {
    #[error("Unexpected status {status}: no response declared")]
    UnexpectedStatus { status: u16 },

    #[error("Missing required header '{name}'")]
    MissingHeader { name: String },

    #[error("Header '{name}' value '{value}' does not match pattern '{pattern}'")]
    HeaderPatternMismatch {
        name: String,
        value: String,
        pattern: String,
    },

    #[error("{path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("{path}: missing required field '{field}'")]
    MissingRequired { path: String, field: String },

    #[error("{path}: '{value}' is not one of {allowed:?}")]
    EnumMismatch {
        path: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("{path}: '{value}' does not match pattern '{pattern}'")]
    PatternMismatch {
        path: String,
        value: String,
        pattern: String,
    },

    #[error("{path}: pattern '{pattern}' is invalid: {reason}")]
    InvalidPattern {
        path: String,
        pattern: String,
        reason: String,
    },

    #[error("{path}: '{value}' is not a valid {format}")]
    FormatMismatch {
        path: String,
        value: String,
        format: String,
    },

    #[error("{path}: length {length} outside [{min:?}, {max:?}]")]
    LengthOutOfRange {
        path: String,
        length: usize,
        min: Option<usize>,
        max: Option<usize>,
    },

    #[error("{path}: value {value} outside [{min:?}, {max:?}]")]
    ValueOutOfRange {
        path: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("{path}: {count} items outside [{min:?}, {max:?}]")]
    ItemCountOutOfRange {
        path: String,
        count: usize,
        min: Option<usize>,
        max: Option<usize>,
    },

    #[error("{path}: unresolved schema reference '{name}'")]
    UnresolvedRef { path: String, name: String },

    #[error("{path}: schema reference chain exceeds depth {depth}")]
    DepthExceeded { path: String, depth: usize },

    #[error("{path}: schema kind is not recognized")]
    UnknownKind { path: String },
}

/// Complete diagnostic list for one validation call
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ContractViolation>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<ContractViolation>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}
