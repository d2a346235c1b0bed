use crate::adapters::data_generator::{DataGenerator, DEFAULT_MAX_REF_DEPTH};
use crate::adapters::formats;
use crate::adapters::pattern::generate_from_pattern;
use crate::domain::contract::{ContractEndpointSpec, ContractViolation, ResponseSpec, ValidationReport};
use crate::domain::{EngineError, MockResponse, RefResolver, SchemaKind, SchemaNode};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// Value used for synthesized headers that declare no pattern
const SYNTHETIC_HEADER_VALUE: &str = "synthetic";

/// Checks responses against contract endpoint specs.
///
/// Drift is reported, never raised: every call returns a complete
/// [`ValidationReport`] and the caller decides what a violation means.
#[derive(Debug, Clone)]
pub struct ContractValidator {
    max_ref_depth: usize,
    generator: DataGenerator,
}

impl Default for ContractValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REF_DEPTH)
    }
}

impl ContractValidator {
    pub fn new(max_ref_depth: usize) -> Self {
        Self {
            max_ref_depth,
            generator: DataGenerator::new(max_ref_depth),
        }
    }

    pub fn validate_response(
        &self,
        spec: &ContractEndpointSpec,
        status: u16,
        headers: &BTreeMap<String, String>,
        body: &Value,
        resolver: &dyn RefResolver,
    ) -> ValidationReport {
        let Some(response) = spec.response_for(status) else {
            return ValidationReport::from_errors(vec![ContractViolation::UnexpectedStatus { status }]);
        };

        let mut errors = Vec::new();
        check_headers(response, headers, &mut errors);
        if let Some(schema) = &response.body {
            self.check(schema, body, "$", 0, resolver, &mut errors);
        }

        if !errors.is_empty() {
            tracing::debug!(
                method = %spec.method,
                path = %spec.path,
                status,
                violations = errors.len(),
                "Contract drift detected"
            );
        }
        ValidationReport::from_errors(errors)
    }

    /// Validate a bare value against `schema`
    pub fn validate_value(&self, schema: &SchemaNode, value: &Value, resolver: &dyn RefResolver) -> ValidationReport {
        let mut errors = Vec::new();
        self.check(schema, value, "$", 0, resolver, &mut errors);
        ValidationReport::from_errors(errors)
    }

    /// Build a response that satisfies the spec for `status`
    pub fn synthesize(
        &self,
        spec: &ContractEndpointSpec,
        status: u16,
        resolver: &dyn RefResolver,
    ) -> Result<MockResponse, EngineError> {
        let response = spec.response_for(status).ok_or_else(|| {
            EngineError::validation(format!(
                "{} {} declares no response for status {}",
                spec.method, spec.path, status
            ))
        })?;

        let body = match &response.body {
            Some(schema) => self.generator.generate(schema, resolver)?,
            None => Value::Null,
        };
        let mut synthesized = MockResponse::new(status, body);
        for (name, header) in &response.headers {
            let value = match &header.pattern {
                Some(pattern) => generate_from_pattern(pattern)?,
                None => SYNTHETIC_HEADER_VALUE.to_string(),
            };
            synthesized.headers.insert(name.clone(), value);
        }
        Ok(synthesized)
    }

    /// `ref_hops` counts consecutive `$ref` resolutions since the last
    /// structural descent; it resets on entering properties or items.
    fn check(
        &self,
        schema: &SchemaNode,
        value: &Value,
        path: &str,
        ref_hops: usize,
        resolver: &dyn RefResolver,
        errors: &mut Vec<ContractViolation>,
    ) {
        match schema.kind {
            SchemaKind::Ref => {
                let Some(name) = schema.reference.as_deref() else {
                    errors.push(ContractViolation::UnresolvedRef {
                        path: path.to_string(),
                        name: String::new(),
                    });
                    return;
                };
                if ref_hops >= self.max_ref_depth {
                    errors.push(ContractViolation::DepthExceeded {
                        path: path.to_string(),
                        depth: self.max_ref_depth,
                    });
                    return;
                }
                match resolver.resolve(name) {
                    Some(target) => self.check(target, value, path, ref_hops + 1, resolver, errors),
                    None => errors.push(ContractViolation::UnresolvedRef {
                        path: path.to_string(),
                        name: name.to_string(),
                    }),
                }
            }
            SchemaKind::Object => {
                let Some(object) = value.as_object() else {
                    errors.push(type_mismatch(path, "object", value));
                    return;
                };
                for field in &schema.required {
                    if !object.contains_key(field) {
                        errors.push(ContractViolation::MissingRequired {
                            path: path.to_string(),
                            field: field.clone(),
                        });
                    }
                }
                for (name, child) in &schema.properties {
                    if let Some(field_value) = object.get(name) {
                        let child_path = format!("{}.{}", path, name);
                        self.check(child, field_value, &child_path, 0, resolver, errors);
                    }
                }
            }
            SchemaKind::Array => {
                let Some(items) = value.as_array() else {
                    errors.push(type_mismatch(path, "array", value));
                    return;
                };
                if out_of_range(items.len(), schema.min_items, schema.max_items) {
                    errors.push(ContractViolation::ItemCountOutOfRange {
                        path: path.to_string(),
                        count: items.len(),
                        min: schema.min_items,
                        max: schema.max_items,
                    });
                }
                if let Some(item_schema) = &schema.items {
                    for (idx, item) in items.iter().enumerate() {
                        let item_path = format!("{}[{}]", path, idx);
                        self.check(item_schema, item, &item_path, 0, resolver, errors);
                    }
                }
            }
            SchemaKind::String => {
                let Some(text) = value.as_str() else {
                    errors.push(type_mismatch(path, "string", value));
                    return;
                };
                check_string(schema, text, path, errors);
            }
            SchemaKind::Number | SchemaKind::Integer => {
                let Some(number) = value.as_f64() else {
                    errors.push(type_mismatch(path, schema.kind.as_str(), value));
                    return;
                };
                if schema.kind == SchemaKind::Integer && !is_whole(value) {
                    errors.push(type_mismatch(path, "integer", value));
                    return;
                }
                let below = schema.minimum.is_some_and(|min| number < min);
                let above = schema.maximum.is_some_and(|max| number > max);
                if below || above {
                    errors.push(ContractViolation::ValueOutOfRange {
                        path: path.to_string(),
                        value: number,
                        min: schema.minimum,
                        max: schema.maximum,
                    });
                }
            }
            SchemaKind::Boolean => {
                if !value.is_boolean() {
                    errors.push(type_mismatch(path, "boolean", value));
                }
            }
            SchemaKind::Unknown => errors.push(ContractViolation::UnknownKind {
                path: path.to_string(),
            }),
        }
    }
}

fn check_headers(response: &ResponseSpec, headers: &BTreeMap<String, String>, errors: &mut Vec<ContractViolation>) {
    for (name, spec) in &response.headers {
        let actual = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value);
        match (actual, &spec.pattern) {
            (None, _) if spec.required => errors.push(ContractViolation::MissingHeader { name: name.clone() }),
            (None, _) => {}
            (Some(value), Some(pattern)) => match Regex::new(pattern) {
                Ok(regex) if regex.is_match(value) => {}
                Ok(_) => errors.push(ContractViolation::HeaderPatternMismatch {
                    name: name.clone(),
                    value: value.clone(),
                    pattern: pattern.clone(),
                }),
                Err(e) => errors.push(ContractViolation::InvalidPattern {
                    path: format!("headers.{}", name),
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                }),
            },
            (Some(_), None) => {}
        }
    }
}

fn check_string(schema: &SchemaNode, text: &str, path: &str, errors: &mut Vec<ContractViolation>) {
    if let Some(allowed) = &schema.enum_values {
        if !allowed.iter().any(|candidate| candidate == text) {
            errors.push(ContractViolation::EnumMismatch {
                path: path.to_string(),
                value: text.to_string(),
                allowed: allowed.clone(),
            });
        }
    }

    if let Some(format) = &schema.format {
        if formats::check_format(format, text) == Some(false) {
            errors.push(ContractViolation::FormatMismatch {
                path: path.to_string(),
                value: text.to_string(),
                format: format.clone(),
            });
        }
    }

    if let Some(pattern) = &schema.pattern {
        match Regex::new(pattern) {
            Ok(regex) if regex.is_match(text) => {}
            Ok(_) => errors.push(ContractViolation::PatternMismatch {
                path: path.to_string(),
                value: text.to_string(),
                pattern: pattern.clone(),
            }),
            Err(e) => errors.push(ContractViolation::InvalidPattern {
                path: path.to_string(),
                pattern: pattern.clone(),
                reason: e.to_string(),
            }),
        }
    }

    let length = text.chars().count();
    if out_of_range(length, schema.min_length, schema.max_length) {
        errors.push(ContractViolation::LengthOutOfRange {
            path: path.to_string(),
            length,
            min: schema.min_length,
            max: schema.max_length,
        });
    }
}

fn out_of_range(n: usize, min: Option<usize>, max: Option<usize>) -> bool {
    min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max)
}

fn is_whole(value: &Value) -> bool {
    value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
}

fn type_mismatch(path: &str, expected: &str, value: &Value) -> ContractViolation {
    ContractViolation::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: json_type(value).to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
