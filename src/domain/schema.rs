//! In-memory schema model.
//!
//! Schemas are loaded once from a contract document and never mutated
//! afterwards. A node is a flat record in the manner of JSON Schema; which
//! fields are meaningful depends on [`SchemaKind`].
//!
//! ```yaml
//! kind: object
//! properties:
//!   id:   { kind: string, format: uuid }
//!   age:  { kind: integer, minimum: 0, maximum: 120 }
//!   tags: { kind: array, items: { kind: string }, maxItems: 3 }
//!   owner: { kind: ref, $ref: User }
//! required: [id]
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    #[default]
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Ref,
    /// Any kind name this model does not recognize
    #[serde(other)]
    Unknown,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Ref => "ref",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaNode {
    pub kind: SchemaKind,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, SchemaNode>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(rename = "$ref", alias = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl SchemaNode {
    pub fn of_kind(kind: SchemaKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn object() -> Self {
        Self::of_kind(SchemaKind::Object)
    }

    pub fn string() -> Self {
        Self::of_kind(SchemaKind::String)
    }

    pub fn boolean() -> Self {
        Self::of_kind(SchemaKind::Boolean)
    }

    pub fn integer(minimum: Option<f64>, maximum: Option<f64>) -> Self {
        Self {
            minimum,
            maximum,
            ..Self::of_kind(SchemaKind::Integer)
        }
    }

    pub fn number(minimum: Option<f64>, maximum: Option<f64>) -> Self {
        Self {
            minimum,
            maximum,
            ..Self::of_kind(SchemaKind::Number)
        }
    }

    pub fn array(items: SchemaNode) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of_kind(SchemaKind::Array)
        }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            reference: Some(name.into()),
            ..Self::of_kind(SchemaKind::Ref)
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn with_items_range(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_items = min;
        self.max_items = max;
        self
    }

    /// Add an object property; `required` also records it in the required set
    pub fn with_property(mut self, name: impl Into<String>, node: SchemaNode, required: bool) -> Self {
        let name = name.into();
        if required {
            self.required.insert(name.clone());
        }
        self.properties.insert(name, node);
        self
    }

    /// Collect every `$ref` target reachable inside this node (without resolving)
    pub fn collect_refs(&self, out: &mut BTreeSet<String>) {
        if let Some(name) = &self.reference {
            out.insert(name.clone());
        }
        for child in self.properties.values() {
            child.collect_refs(out);
        }
        if let Some(items) = &self.items {
            items.collect_refs(out);
        }
    }
}

/// Resolves `$ref` names to schema nodes
pub trait RefResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<&SchemaNode>;
}

/// Named schemas loaded from a contract document
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SchemaNode>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, node: SchemaNode) {
        self.schemas.insert(name.into(), node);
    }

    pub fn get(&self, name: &str) -> Option<&SchemaNode> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl RefResolver for SchemaRegistry {
    fn resolve(&self, name: &str) -> Option<&SchemaNode> {
        self.schemas.get(name)
    }
}

impl FromIterator<(String, SchemaNode)> for SchemaRegistry {
    fn from_iter<T: IntoIterator<Item = (String, SchemaNode)>>(iter: T) -> Self {
        Self {
            schemas: iter.into_iter().collect(),
        }
    }
}
