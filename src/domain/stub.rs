//! Stub definitions: request predicates paired with response templates.
//!
//! ```yaml
//! id: login-once
//! method: POST
//! path: /login
//! remaining_uses: 1
//! matchers:
//!   - target: body
//!     kind: subset
//!     value: { user: alice }
//! response:
//!   status: 200
//!   body:
//!     type: template
//!     template: '{"token": "{{ body.user }}-token"}'
//!   actions:
//!     - action: set_field
//!       target: state.logged_in
//!       value: true
//! ```

use crate::domain::schema::SchemaNode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Scenario name of stubs that are eligible under every active scenario
pub const DEFAULT_SCENARIO: &str = "default";

/// `remaining_uses` value meaning "never exhausted"
pub const UNLIMITED_USES: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StubDefinition {
    /// Assigned by the registry when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub method: String,
    /// Path template, e.g. `/users/{id}` or `/assets/*`
    pub path: String,
    #[serde(default)]
    pub matchers: Vec<Matcher>,
    #[serde(default)]
    pub response: ResponseTemplate,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_remaining_uses")]
    pub remaining_uses: i64,
    #[serde(default = "default_scenario")]
    pub scenario: String,
    /// Artificial response delay in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
    /// Working memory the stub's scenario starts with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<Map<String, Value>>,
}

fn default_remaining_uses() -> i64 {
    UNLIMITED_USES
}

fn default_scenario() -> String {
    DEFAULT_SCENARIO.to_string()
}

impl StubDefinition {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            path: path.into(),
            matchers: Vec::new(),
            response: ResponseTemplate::default(),
            priority: 0,
            remaining_uses: UNLIMITED_USES,
            scenario: default_scenario(),
            delay_ms: 0,
            initial_state: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_remaining_uses(mut self, uses: i64) -> Self {
        self.remaining_uses = uses;
        self
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = scenario.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn with_response(mut self, response: ResponseTemplate) -> Self {
        self.response = response;
        self
    }

    pub fn with_initial_state(mut self, state: Map<String, Value>) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// What part of the request a matcher inspects
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchTarget {
    PathParam,
    Query,
    Header,
    Body,
}

impl MatchTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathParam => "path_param",
            Self::Query => "query",
            Self::Header => "header",
            Self::Body => "body",
        }
    }
}

/// A single request predicate.
///
/// `kind` stays a free string here so that an unknown kind is reported as a
/// registration error rather than a parse failure of the whole document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Matcher {
    pub target: MatchTarget,
    /// Parameter or header name; when absent on query/header matchers, `value`
    /// must be an object of name → expected value (subset semantics)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_match_kind")]
    pub kind: String,
    pub value: Value,
}

fn default_match_kind() -> String {
    "exact".to_string()
}

impl Matcher {
    pub fn new(target: MatchTarget, kind: impl Into<String>, value: Value) -> Self {
        Self {
            target,
            name: None,
            kind: kind.into(),
            value,
        }
    }

    pub fn named(target: MatchTarget, name: impl Into<String>, kind: impl Into<String>, value: Value) -> Self {
        Self {
            target,
            name: Some(name.into()),
            kind: kind.into(),
            value,
        }
    }

    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::named(MatchTarget::Header, name, "exact", Value::String(value.into()))
    }

    pub fn query(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::named(MatchTarget::Query, name, "exact", Value::String(value.into()))
    }

    pub fn body(kind: impl Into<String>, value: Value) -> Self {
        Self::new(MatchTarget::Body, kind, value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseTemplate {
    #[serde(default = "default_status")]
    pub status: u16,
    /// Header values are rendered as templates
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: ResponseBody,
    /// Applied in order after the body is rendered
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseTemplate {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            body: ResponseBody::Empty,
            actions: Vec::new(),
        }
    }
}

impl ResponseTemplate {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn json(status: u16, content: Value) -> Self {
        Self {
            status,
            body: ResponseBody::Static { content },
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    #[default]
    Empty,
    /// Returned verbatim
    Static { content: Value },
    /// Tera template; parsed as JSON when the output is valid JSON
    Template { template: String },
    /// Synthesized by the data generator
    Schema { schema: SchemaNode },
    /// Cyclic sequence of steps, advanced once per consuming match
    Sequence { name: String, steps: Vec<SequenceStep> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceStep {
    /// Consecutive matches served by this step before advancing
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    /// Overrides the template status when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: ResponseBody,
}

fn default_repeat() -> u32 {
    1
}

impl SequenceStep {
    pub fn new(repeat: u32, status: u16) -> Self {
        Self {
            repeat,
            status: Some(status),
            headers: BTreeMap::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }
}

/// Serializable response transform, interpreted by a fixed evaluator.
///
/// `target` is a dotted path rooted at `state.` (scenario working memory) or
/// `body.` (the response body being built). String values are rendered as
/// templates before use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    SetField {
        target: String,
        value: Value,
    },
    Concatenate {
        target: String,
        parts: Vec<Value>,
        #[serde(default)]
        separator: String,
    },
    InvokeNamedFunction {
        target: String,
        function: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl Action {
    pub fn target(&self) -> &str {
        match self {
            Self::SetField { target, .. }
            | Self::Concatenate { target, .. }
            | Self::InvokeNamedFunction { target, .. } => target,
        }
    }

    pub fn set_field(target: impl Into<String>, value: Value) -> Self {
        Self::SetField {
            target: target.into(),
            value,
        }
    }

    pub fn invoke(target: impl Into<String>, function: impl Into<String>, args: Vec<Value>) -> Self {
        Self::InvokeNamedFunction {
            target: target.into(),
            function: function.into(),
            args,
        }
    }
}
