//! Path templates with `{placeholder}` and trailing `*` segments.
//!
//! Template: `/users/{id}/orders`
//! Path:     `/users/42/orders`
//! Binds:    `{"id": "42"}`

use std::collections::BTreeMap;
use std::fmt;

/// Name under which the suffix matched by a trailing `*` is bound
pub const WILDCARD_PARAM: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Placeholder(String),
    Wildcard,
}

/// Structural key used to bucket templates before full evaluation.
///
/// `segments` counts the non-wildcard segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateShape {
    pub segments: usize,
    pub wildcard: bool,
}

/// A parsed path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    parts: Vec<TemplatePart>,
}

impl PathTemplate {
    /// Parse a template, rejecting malformed input with a human-readable reason
    pub fn parse(template: &str) -> Result<Self, String> {
        if template.is_empty() {
            return Err("path template is empty".to_string());
        }
        if !template.starts_with('/') {
            return Err(format!("path template '{}' must start with '/'", template));
        }

        let segments = split_segments(template);
        let mut parts = Vec::with_capacity(segments.len());
        let mut seen = Vec::new();

        for (idx, segment) in segments.iter().enumerate() {
            if *segment == "*" {
                if idx + 1 != segments.len() {
                    return Err(format!(
                        "wildcard '*' must be the last segment in '{}'",
                        template
                    ));
                }
                parts.push(TemplatePart::Wildcard);
            } else if let Some(inner) = segment.strip_prefix('{') {
                let name = inner.strip_suffix('}').ok_or_else(|| {
                    format!("unclosed placeholder '{}' in '{}'", segment, template)
                })?;
                if name.is_empty() || name.contains(['{', '}']) {
                    return Err(format!("invalid placeholder '{}' in '{}'", segment, template));
                }
                if seen.contains(&name) {
                    return Err(format!("duplicate placeholder '{}' in '{}'", name, template));
                }
                seen.push(name);
                parts.push(TemplatePart::Placeholder(name.to_string()));
            } else if segment.contains(['{', '}', '*']) {
                return Err(format!("malformed segment '{}' in '{}'", segment, template));
            } else {
                parts.push(TemplatePart::Literal(segment.to_string()));
            }
        }

        Ok(Self {
            raw: template.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn shape(&self) -> TemplateShape {
        let wildcard = matches!(self.parts.last(), Some(TemplatePart::Wildcard));
        TemplateShape {
            segments: self.parts.len() - usize::from(wildcard),
            wildcard,
        }
    }

    /// Names of the `{placeholder}` segments, in template order
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            TemplatePart::Placeholder(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Match a concrete request path, returning the bound parameters.
    ///
    /// A trailing `*` requires at least one remaining segment and binds the
    /// joined suffix under [`WILDCARD_PARAM`].
    pub fn match_path(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let segments = split_segments(strip_query(path));
        let shape = self.shape();

        if shape.wildcard {
            if segments.len() <= shape.segments {
                return None;
            }
        } else if segments.len() != shape.segments {
            return None;
        }

        let mut params = BTreeMap::new();
        for (idx, part) in self.parts.iter().enumerate() {
            match part {
                TemplatePart::Literal(literal) => {
                    if segments[idx] != literal {
                        return None;
                    }
                }
                TemplatePart::Placeholder(name) => {
                    params.insert(name.clone(), segments[idx].to_string());
                }
                TemplatePart::Wildcard => {
                    params.insert(WILDCARD_PARAM.to_string(), segments[idx..].join("/"));
                }
            }
        }
        Some(params)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Number of non-empty segments in a request path
pub fn segment_count(path: &str) -> usize {
    split_segments(strip_query(path)).len()
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map(|(p, _)| p).unwrap_or(path)
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
