use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;

pub mod contract;
pub mod error;
pub mod path;
pub mod schema;
pub mod stub;

pub use contract::{ContractDocument, ContractEndpointSpec, ContractViolation, ValidationReport};
pub use error::{EngineError, SchemaError};
pub use schema::{RefResolver, SchemaKind, SchemaNode, SchemaRegistry};
pub use stub::{Action, Matcher, MatchTarget, ResponseBody, ResponseTemplate, StubDefinition};

/// Parsed request body
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Raw(Vec<u8>),
}

/// Transport-neutral description of an incoming request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: RequestBody,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn with_raw(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = RequestBody::Raw(body.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body as structured JSON; raw bodies are parsed when they hold valid JSON
    pub fn body_json(&self) -> Option<Cow<'_, Value>> {
        match &self.body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => Some(Cow::Borrowed(value)),
            RequestBody::Raw(bytes) => serde_json::from_slice(bytes).ok().map(Cow::Owned),
        }
    }

    /// Body serialized to text, used by regex body matchers
    pub fn body_text(&self) -> Cow<'_, str> {
        match &self.body {
            RequestBody::Empty => Cow::Borrowed(""),
            RequestBody::Json(value) => Cow::Owned(value.to_string()),
            RequestBody::Raw(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    /// JSON view of the request exposed to response templates
    pub fn template_view(&self) -> Value {
        let body = match &self.body {
            RequestBody::Empty => Value::Null,
            RequestBody::Json(value) => value.clone(),
            RequestBody::Raw(_) => self
                .body_json()
                .map(Cow::into_owned)
                .unwrap_or_else(|| Value::String(self.body_text().into_owned())),
        };
        json!({
            "method": self.method,
            "path": self.path,
            "headers": self.headers,
            "query": self.query,
            "body": body,
        })
    }
}

/// A rendered mock response, ready for a transport to serialize
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
    /// Stub that produced the response; `None` for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub_id: Option<String>,
    /// Contract check outcome, when response validation is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_report: Option<ValidationReport>,
}

impl MockResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
            stub_id: None,
            contract_report: None,
        }
    }

    /// Body bytes as a transport would send them: strings raw, everything else as JSON
    pub fn body_bytes(&self) -> Vec<u8> {
        match &self.body {
            Value::Null => Vec::new(),
            Value::String(text) => text.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        }
    }
}

/// Near-miss diagnostic for a stub that did not match a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NearMiss {
    pub stub_id: String,
    pub method: String,
    pub path: String,
    pub reasons: Vec<String>,
}

/// Entry point used by transports (HTTP servers, test harnesses)
#[async_trait]
pub trait MockPort: Send + Sync {
    async fn handle(&self, request: RequestDescriptor) -> Result<MockResponse, EngineError>;
}
