use crate::adapters::stub_registry::{Consume, StubEntry, StubRegistry};
use crate::domain::path::PathTemplate;
use crate::domain::{EngineError, MatchTarget, Matcher, NearMiss, RequestBody, RequestDescriptor};
use regex::Regex;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Full selections attempted per request: the first one plus one restart
/// after losing the winner's last use to a concurrent match
const MATCH_ATTEMPTS: u32 = 2;

pub const DEFAULT_CAS_MAX_RETRIES: u32 = 16;

#[derive(Debug)]
enum ValueTest {
    Exact(String),
    Regex(Regex),
}

impl ValueTest {
    fn compile(kind: &str, expected: &Value, what: &str) -> Result<Self, EngineError> {
        match kind {
            "exact" => Ok(Self::Exact(value_text(expected))),
            "regex" => compile_regex(expected, what).map(Self::Regex),
            other => Err(EngineError::validation(format!(
                "{} matcher does not support kind '{}'",
                what, other
            ))),
        }
    }

    fn test(&self, actual: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == actual,
            Self::Regex(regex) => regex.is_match(actual),
        }
    }
}

#[derive(Debug)]
enum Predicate {
    Named { name: String, test: ValueTest },
    /// Unnamed query/header matcher: every listed entry must be present and pass
    Entries(Vec<(String, ValueTest)>),
    BodyExact(Value),
    BodySubset(Value),
    BodyRegex(Regex),
}

/// A [`Matcher`] with its regex compiled, evaluated on the hot path
#[derive(Debug)]
pub struct CompiledMatcher {
    target: MatchTarget,
    kind: String,
    predicate: Predicate,
}

impl CompiledMatcher {
    pub fn compile(matcher: &Matcher, template: &PathTemplate) -> Result<Self, EngineError> {
        let target = matcher.target;
        let what = target.as_str();
        let predicate = match target {
            MatchTarget::PathParam => {
                let name = matcher.name.clone().ok_or_else(|| {
                    EngineError::validation("path_param matcher needs a name")
                })?;
                if !template.placeholders().any(|p| p == name) {
                    return Err(EngineError::validation(format!(
                        "path_param matcher names '{}', which is not a placeholder of '{}'",
                        name, template
                    )));
                }
                Predicate::Named {
                    test: ValueTest::compile(&matcher.kind, &matcher.value, what)?,
                    name,
                }
            }
            MatchTarget::Query | MatchTarget::Header => match &matcher.name {
                Some(name) => Predicate::Named {
                    name: name.clone(),
                    test: ValueTest::compile(&matcher.kind, &matcher.value, what)?,
                },
                None => {
                    let entries = matcher.value.as_object().ok_or_else(|| {
                        EngineError::validation(format!(
                            "unnamed {} matcher needs an object of expected values",
                            what
                        ))
                    })?;
                    let entries = entries
                        .iter()
                        .map(|(name, expected)| {
                            ValueTest::compile(&matcher.kind, expected, what).map(|t| (name.clone(), t))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Predicate::Entries(entries)
                }
            },
            MatchTarget::Body => match matcher.kind.as_str() {
                "exact" => Predicate::BodyExact(matcher.value.clone()),
                "subset" => Predicate::BodySubset(matcher.value.clone()),
                "regex" => Predicate::BodyRegex(compile_regex(&matcher.value, what)?),
                other => {
                    return Err(EngineError::validation(format!(
                        "body matcher does not support kind '{}'",
                        other
                    )))
                }
            },
        };

        Ok(Self {
            target,
            kind: matcher.kind.clone(),
            predicate,
        })
    }

    pub fn matches(&self, request: &RequestDescriptor, path_params: &BTreeMap<String, String>) -> bool {
        match &self.predicate {
            Predicate::Named { name, test } => self
                .lookup(request, path_params, name)
                .is_some_and(|actual| test.test(actual)),
            Predicate::Entries(entries) => entries.iter().all(|(name, test)| {
                self.lookup(request, path_params, name)
                    .is_some_and(|actual| test.test(actual))
            }),
            Predicate::BodyExact(expected) => body_value(request) == *expected,
            Predicate::BodySubset(expected) => json_subset(expected, &body_value(request)),
            Predicate::BodyRegex(regex) => regex.is_match(&request.body_text()),
        }
    }

    /// Short description used in near-miss diagnostics
    pub fn describe(&self) -> String {
        match &self.predicate {
            Predicate::Named { name, .. } => format!("{} '{}' ({})", self.target.as_str(), name, self.kind),
            Predicate::Entries(entries) => {
                let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
                format!("{} [{}] ({})", self.target.as_str(), names.join(", "), self.kind)
            }
            _ => format!("body ({})", self.kind),
        }
    }

    fn lookup<'a>(
        &self,
        request: &'a RequestDescriptor,
        path_params: &'a BTreeMap<String, String>,
        name: &str,
    ) -> Option<&'a str> {
        match self.target {
            MatchTarget::PathParam => path_params.get(name).map(String::as_str),
            MatchTarget::Query => request.query.get(name).map(String::as_str),
            MatchTarget::Header => request.header(name),
            MatchTarget::Body => None,
        }
    }
}

fn compile_regex(pattern: &Value, what: &str) -> Result<Regex, EngineError> {
    let pattern = pattern.as_str().ok_or_else(|| {
        EngineError::validation(format!("{} regex matcher needs a string pattern", what))
    })?;
    Regex::new(pattern)
        .map_err(|e| EngineError::validation(format!("{} regex '{}' is invalid: {}", what, pattern, e)))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Structured view of the body for exact/subset matchers.
///
/// Empty bodies compare as `null`; raw bodies that are not JSON compare as a string.
fn body_value(request: &RequestDescriptor) -> Value {
    match &request.body {
        RequestBody::Empty => Value::Null,
        _ => request
            .body_json()
            .map(|b| b.into_owned())
            .unwrap_or_else(|| Value::String(request.body_text().into_owned())),
    }
}

/// Every field of `expected` is present in `actual` with a matching value.
///
/// Objects recurse, arrays must have equal length and match element-wise,
/// scalars must be equal.
pub fn json_subset(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => expected
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|a| json_subset(value, a))),
        (Value::Array(expected), Value::Array(actual)) => {
            expected.len() == actual.len()
                && expected.iter().zip(actual).all(|(e, a)| json_subset(e, a))
        }
        _ => expected == actual,
    }
}

/// The winning stub and the parameters its template bound
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub stub: Arc<StubEntry>,
    pub path_params: BTreeMap<String, String>,
}

/// Selects exactly one stub per request and consumes one of its uses
#[derive(Clone)]
pub struct RequestMatcher {
    registry: Arc<StubRegistry>,
    max_cas_retries: u32,
}

impl RequestMatcher {
    pub fn new(registry: Arc<StubRegistry>, max_cas_retries: u32) -> Self {
        Self {
            registry,
            max_cas_retries,
        }
    }

    pub fn registry(&self) -> &Arc<StubRegistry> {
        &self.registry
    }

    pub async fn match_request(&self, request: &RequestDescriptor, active: &str) -> Result<MatchResult, EngineError> {
        let mut last_error = not_found(request);

        for attempt in 1..=MATCH_ATTEMPTS {
            let Some(result) = self.select(request, active).await else {
                return Err(not_found(request));
            };

            match result.stub.try_consume(self.max_cas_retries) {
                Consume::Unlimited => return Ok(result),
                Consume::Consumed { remaining } => {
                    tracing::debug!(stub_id = %result.stub.id, remaining, "Consumed stub use");
                    return Ok(result);
                }
                Consume::Exhausted => {
                    tracing::debug!(stub_id = %result.stub.id, attempt, "Winner exhausted concurrently, re-matching");
                    last_error = not_found(request);
                }
                Consume::Conflict { attempts } => {
                    tracing::warn!(stub_id = %result.stub.id, attempts, attempt, "Usage counter contention");
                    last_error = EngineError::ConcurrencyConflict {
                        stub_id: result.stub.id.clone(),
                        attempts,
                    };
                }
            }
        }

        Err(last_error)
    }

    /// Highest-ranked eligible stub, without consuming it
    pub async fn select(&self, request: &RequestDescriptor, active: &str) -> Option<MatchResult> {
        let candidates = self.registry.candidates(&request.method, &request.path).await;
        let considered = candidates.len();

        let winner = candidates
            .into_iter()
            .filter(|stub| !stub.is_exhausted() && stub.in_scenario(active))
            .filter_map(|stub| {
                let path_params = stub.template.match_path(&request.path)?;
                stub.matchers
                    .iter()
                    .all(|m| m.matches(request, &path_params))
                    .then_some(MatchResult { stub, path_params })
            })
            .max_by_key(|result| result.stub.rank());

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            scenario = %active,
            candidates = considered,
            stub_id = winner.as_ref().map(|w| w.stub.id.as_str()).unwrap_or("-"),
            "Evaluated candidates"
        );
        winner
    }

    /// Stubs closest to matching `request`, each with the reasons it did not.
    ///
    /// Diagnostics only: never used to pick a fallback.
    pub async fn closest(&self, request: &RequestDescriptor, active: &str, limit: usize) -> Vec<NearMiss> {
        let stubs = self.registry.list(&Default::default()).await;
        let mut misses: Vec<(Vec<String>, u64, NearMiss)> = stubs
            .iter()
            .map(|stub| {
                let reasons = mismatch_reasons(stub, request, active);
                let miss = NearMiss {
                    stub_id: stub.id.clone(),
                    method: stub.definition.method.clone(),
                    path: stub.template.to_string(),
                    reasons: reasons.clone(),
                };
                (reasons, stub.registration_seq, miss)
            })
            .collect();

        misses.sort_by_key(|(reasons, seq, _)| (reasons.len(), Reverse(*seq)));
        misses.into_iter().take(limit).map(|(_, _, miss)| miss).collect()
    }
}

fn mismatch_reasons(stub: &StubEntry, request: &RequestDescriptor, active: &str) -> Vec<String> {
    let mut reasons = Vec::new();
    if !stub.definition.method.eq_ignore_ascii_case(&request.method) {
        reasons.push(format!("method {} != {}", stub.definition.method, request.method));
    }
    let params = match stub.template.match_path(&request.path) {
        Some(params) => params,
        None => {
            reasons.push(format!("path does not match template '{}'", stub.template));
            BTreeMap::new()
        }
    };
    if stub.is_exhausted() {
        reasons.push("no remaining uses".to_string());
    }
    if !stub.in_scenario(active) {
        reasons.push(format!("scenario '{}' is not active", stub.scenario()));
    }
    for matcher in &stub.matchers {
        if !matcher.matches(request, &params) {
            reasons.push(format!("{} did not match", matcher.describe()));
        }
    }
    reasons
}

fn not_found(request: &RequestDescriptor) -> EngineError {
    EngineError::NotFound {
        method: request.method.clone(),
        path: request.path.clone(),
    }
}
