use crate::adapters::formats;
use crate::adapters::pattern::{PatternSampler, SAMPLE_ATTEMPTS};
use crate::domain::{RefResolver, SchemaError, SchemaKind, SchemaNode};
use fake::faker::lorem::en::Words;
use fake::Fake;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::fmt::Display;

pub const DEFAULT_MAX_REF_DEPTH: usize = 10;

const DEFAULT_MIN_ITEMS: usize = 1;
const DEFAULT_MAX_ITEMS: usize = 10;
const DEFAULT_MIN_LENGTH: usize = 5;
const DEFAULT_MAX_LENGTH: usize = 20;
const DEFAULT_MINIMUM: f64 = 0.0;
const DEFAULT_MAXIMUM: f64 = 1_000_000.0;

/// Synthesizes JSON values from schema nodes.
///
/// Stateless apart from the thread-local RNG, so a single instance can be
/// shared freely between workers.
#[derive(Debug, Clone)]
pub struct DataGenerator {
    max_ref_depth: usize,
}

impl Default for DataGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REF_DEPTH)
    }
}

impl DataGenerator {
    pub fn new(max_ref_depth: usize) -> Self {
        Self { max_ref_depth }
    }

    pub fn max_ref_depth(&self) -> usize {
        self.max_ref_depth
    }

    /// Generate a value for `node`, starting with an empty resolution path
    pub fn generate(&self, node: &SchemaNode, resolver: &dyn RefResolver) -> Result<Value, SchemaError> {
        let mut path = Vec::new();
        self.generate_at(node, resolver, &mut path)
    }

    /// Generate a value for `node`. `path` holds the `$ref` names currently
    /// being resolved on this branch and is restored before returning.
    pub fn generate_at(
        &self,
        node: &SchemaNode,
        resolver: &dyn RefResolver,
        path: &mut Vec<String>,
    ) -> Result<Value, SchemaError> {
        match node.kind {
            SchemaKind::Object => {
                let mut result = Map::new();
                for (name, child) in &node.properties {
                    let value = self.generate_at(child, resolver, path)?;
                    result.insert(name.clone(), value);
                }
                Ok(Value::Object(result))
            }
            SchemaKind::Array => {
                let items = node.items.as_deref().ok_or_else(|| {
                    SchemaError::Validation("array schema has no 'items'".to_string())
                })?;
                let (min, max) = bounds(node.min_items, node.max_items, DEFAULT_MIN_ITEMS, DEFAULT_MAX_ITEMS, "items")?;
                let len = rand::thread_rng().gen_range(min..=max);
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(self.generate_at(items, resolver, path)?);
                }
                Ok(Value::Array(values))
            }
            SchemaKind::String => self.generate_string(node).map(Value::String),
            SchemaKind::Number => {
                let (min, max) = bounds(node.minimum, node.maximum, DEFAULT_MINIMUM, DEFAULT_MAXIMUM, "value")?;
                let value = if min == max {
                    min
                } else {
                    rand::thread_rng().gen_range(min..=max)
                };
                Ok(json!(value))
            }
            SchemaKind::Integer => {
                let (min, max) = bounds(node.minimum, node.maximum, DEFAULT_MINIMUM, DEFAULT_MAXIMUM, "value")?;
                let (min, max) = (min.ceil() as i64, max.floor() as i64);
                if min > max {
                    return Err(SchemaError::Validation(format!(
                        "integer range [{}, {}] contains no whole number",
                        node.minimum.unwrap_or(DEFAULT_MINIMUM),
                        node.maximum.unwrap_or(DEFAULT_MAXIMUM)
                    )));
                }
                Ok(json!(rand::thread_rng().gen_range(min..=max)))
            }
            SchemaKind::Boolean => Ok(Value::Bool(rand::thread_rng().gen_bool(0.5))),
            SchemaKind::Ref => {
                let name = node.reference.as_deref().ok_or_else(|| {
                    SchemaError::Validation("ref schema has no '$ref' target".to_string())
                })?;
                if path.iter().any(|seen| seen == name) || path.len() >= self.max_ref_depth {
                    let mut cycle = path.clone();
                    cycle.push(name.to_string());
                    return Err(SchemaError::Cycle { path: cycle });
                }
                let target = resolver.resolve(name).ok_or_else(|| {
                    SchemaError::Validation(format!("unresolved schema reference '{}'", name))
                })?;

                path.push(name.to_string());
                let result = self.generate_at(target, resolver, path);
                path.pop();
                result
            }
            SchemaKind::Unknown => Err(SchemaError::Validation(
                "unrecognized schema kind".to_string(),
            )),
        }
    }

    fn generate_string(&self, node: &SchemaNode) -> Result<String, SchemaError> {
        if let Some(values) = &node.enum_values {
            if values.is_empty() {
                return Err(SchemaError::Validation("string enum is empty".to_string()));
            }
            let idx = rand::thread_rng().gen_range(0..values.len());
            return Ok(values[idx].clone());
        }

        if let (Some(min), Some(max)) = (node.min_length, node.max_length) {
            if min > max {
                return Err(SchemaError::Validation(format!(
                    "minimum length {} exceeds maximum {}",
                    min, max
                )));
            }
        }
        let fits_length = |value: &str| {
            let length = value.chars().count();
            node.min_length.map_or(true, |min| length >= min) && node.max_length.map_or(true, |max| length <= max)
        };
        let sampler = match &node.pattern {
            Some(pattern) => Some(PatternSampler::new(pattern, node.min_length)?),
            None => None,
        };

        match node.format.as_deref() {
            Some(format) if formats::is_known(format) => {
                let found = (0..SAMPLE_ATTEMPTS)
                    .filter_map(|_| formats::generate_format(format))
                    .find(|value| fits_length(value.as_str()) && sampler.as_ref().map_or(true, |s| s.matches(value.as_str())));
                if let Some(value) = found {
                    return Ok(value);
                }
                if sampler.is_none() {
                    return Err(SchemaError::Validation(format!(
                        "no '{}' value fits length [{:?}, {:?}]",
                        format, node.min_length, node.max_length
                    )));
                }
                tracing::debug!(format = %format, "Format values never fit the pattern, generating from the pattern");
            }
            Some(format) => tracing::debug!(format = %format, "Unknown string format, falling back"),
            None => {}
        }

        if let Some(sampler) = &sampler {
            let format = node.format.as_deref();
            return sampler
                .sample(&mut rand::thread_rng(), |value| {
                    fits_length(value) && format.map_or(true, |f| formats::check_format(f, value) != Some(false))
                })
                .ok_or_else(|| {
                    SchemaError::Validation(format!(
                        "no value for pattern '{}' fits length [{:?}, {:?}] after {} attempts",
                        node.pattern.as_deref().unwrap_or_default(),
                        node.min_length,
                        node.max_length,
                        SAMPLE_ATTEMPTS
                    ))
                });
        }

        let (min, max) = bounds(node.min_length, node.max_length, DEFAULT_MIN_LENGTH, DEFAULT_MAX_LENGTH, "length")?;
        let len = rand::thread_rng().gen_range(min..=max);
        Ok(lorem_text(len))
    }
}

/// Resolve a `[min, max]` range from optional bounds and defaults.
///
/// A lower bound above the default upper bound lifts the upper bound with it.
fn bounds<T>(min: Option<T>, max: Option<T>, default_min: T, default_max: T, what: &str) -> Result<(T, T), SchemaError>
where
    T: PartialOrd + Copy + Display,
{
    let lo = min.unwrap_or(default_min);
    let hi = match max {
        Some(hi) => hi,
        None if lo > default_max => lo,
        None => default_max,
    };
    if lo > hi {
        return Err(SchemaError::Validation(format!(
            "minimum {} {} exceeds maximum {}",
            what, lo, hi
        )));
    }
    Ok((lo, hi))
}

/// Lorem text of exactly `len` characters
fn lorem_text(len: usize) -> String {
    let mut text = String::with_capacity(len + 16);
    while text.len() < len {
        let words: Vec<String> = Words(3..8).fake();
        for word in words {
            if !text.is_empty() {
                text.push(' ');
            }
            text.extend(word.chars().filter(|c| c.is_ascii_alphanumeric()));
        }
        if text.trim().is_empty() {
            text.clear();
            text.push_str("lorem");
        }
    }
    text.truncate(len);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SchemaRegistry;

    #[test]
    fn test_lorem_text_has_exact_length() {
        for len in [0, 1, 5, 20, 64] {
            assert_eq!(lorem_text(len).chars().count(), len);
        }
    }

    #[test]
    fn test_bounds_defaults() {
        assert_eq!(bounds::<usize>(None, None, 1, 10, "items").unwrap(), (1, 10));
        assert_eq!(bounds(Some(15usize), None, 1, 10, "items").unwrap(), (15, 15));
        assert_eq!(bounds(None, Some(3usize), 1, 10, "items").unwrap(), (1, 3));
        assert!(bounds(Some(5usize), Some(2), 1, 10, "items").is_err());
    }

    #[test]
    fn test_generate_at_restores_path() {
        let mut registry = SchemaRegistry::new();
        registry.insert("Leaf", SchemaNode::boolean());
        let node = SchemaNode::object()
            .with_property("a", SchemaNode::reference("Leaf"), true)
            .with_property("b", SchemaNode::reference("Leaf"), true);

        let mut path = vec!["Outer".to_string()];
        let value = DataGenerator::default().generate_at(&node, &registry, &mut path).unwrap();
        assert!(value["a"].is_boolean());
        assert!(value["b"].is_boolean());
        assert_eq!(path, vec!["Outer".to_string()]);
    }
}
