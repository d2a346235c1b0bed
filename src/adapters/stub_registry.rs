use crate::adapters::actions;
use crate::adapters::request_matcher::CompiledMatcher;
use crate::domain::path::{segment_count, PathTemplate, TemplateShape};
use crate::domain::stub::{ResponseBody, ResponseTemplate, DEFAULT_SCENARIO, UNLIMITED_USES};
use crate::domain::{EngineError, StubDefinition};
use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::AtomicU32;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A registered stub with its compiled predicates and live usage counter
#[derive(Debug)]
pub struct StubEntry {
    pub id: String,
    /// Normalized definition: id filled in, method uppercased
    pub definition: StubDefinition,
    pub template: PathTemplate,
    pub matchers: Vec<CompiledMatcher>,
    pub registration_seq: u64,
    remaining_uses: AtomicI64,
    /// Upcoming `try_consume` calls that report a lost CAS race
    #[cfg(test)]
    contention: AtomicU32,
}

/// Outcome of trying to take one use from a stub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consume {
    Unlimited,
    Consumed { remaining: i64 },
    /// Counter was already at 0
    Exhausted,
    /// Every compare-and-swap attempt lost
    Conflict { attempts: u32 },
}

impl StubEntry {
    pub fn remaining_uses(&self) -> i64 {
        self.remaining_uses.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_uses() == 0
    }

    pub fn scenario(&self) -> &str {
        &self.definition.scenario
    }

    /// Eligible under `active`: own scenario, or the always-eligible default
    pub fn in_scenario(&self, active: &str) -> bool {
        self.definition.scenario == DEFAULT_SCENARIO || self.definition.scenario == active
    }

    /// Ordering key: higher priority first, then most recently registered
    pub fn rank(&self) -> (i32, u64) {
        (self.definition.priority, self.registration_seq)
    }

    /// Decrement a finite counter with a bounded compare-and-swap loop.
    ///
    /// The counter never goes below zero.
    pub fn try_consume(&self, max_retries: u32) -> Consume {
        let attempts = max_retries.max(1);
        if self.take_contention() {
            return Consume::Conflict { attempts };
        }
        for _ in 0..attempts {
            let current = self.remaining_uses.load(Ordering::SeqCst);
            if current < 0 {
                return Consume::Unlimited;
            }
            if current == 0 {
                return Consume::Exhausted;
            }
            if self
                .remaining_uses
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Consume::Consumed {
                    remaining: current - 1,
                };
            }
        }
        Consume::Conflict { attempts }
    }

    /// Make the next `rounds` calls to `try_consume` lose every CAS attempt
    #[cfg(test)]
    pub(crate) fn simulate_contention(&self, rounds: u32) {
        self.contention.store(rounds, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_contention(&self) -> bool {
        self.contention
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_contention(&self) -> bool {
        false
    }
}

/// Narrows [`StubRegistry::list`]
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub method: Option<String>,
    pub scenario: Option<String>,
    pub include_exhausted: bool,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            method: None,
            scenario: None,
            include_exhausted: true,
        }
    }
}

impl ListFilter {
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn active_only(mut self) -> Self {
        self.include_exhausted = false;
        self
    }

    fn accepts(&self, entry: &StubEntry) -> bool {
        if let Some(method) = &self.method {
            if !entry.definition.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(scenario) = &self.scenario {
            if entry.scenario() != scenario {
                return false;
            }
        }
        self.include_exhausted || !entry.is_exhausted()
    }
}

type BucketKey = (String, TemplateShape);

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<String, Arc<StubEntry>>,
    index: HashMap<BucketKey, Vec<Arc<StubEntry>>>,
}

/// Stub storage, bucketed by method and path-template shape.
///
/// Lookups share a read lock; register/remove/clear take the write lock.
pub struct StubRegistry {
    inner: RwLock<RegistryInner>,
    next_seq: AtomicU64,
}

impl Default for StubRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StubRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Validate and insert a stub, returning its id
    pub async fn register(&self, definition: StubDefinition) -> Result<String, EngineError> {
        let mut definition = definition;
        let method = definition.method.trim().to_ascii_uppercase();
        if method.is_empty() {
            return Err(EngineError::validation(format!(
                "stub for path '{}' has an empty method",
                definition.path
            )));
        }
        definition.method = method;

        let template = PathTemplate::parse(&definition.path).map_err(EngineError::Validation)?;
        if definition.remaining_uses < UNLIMITED_USES {
            return Err(EngineError::validation(format!(
                "remaining_uses must be -1 or non-negative, got {}",
                definition.remaining_uses
            )));
        }
        if definition.scenario.trim().is_empty() {
            return Err(EngineError::validation("stub scenario must not be empty"));
        }
        let matchers = definition
            .matchers
            .iter()
            .map(|m| CompiledMatcher::compile(m, &template))
            .collect::<Result<Vec<_>, _>>()?;
        validate_response(&definition.response)?;

        let id = definition
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        definition.id = Some(id.clone());

        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&id) {
            return Err(EngineError::validation(format!("stub id '{}' is already registered", id)));
        }

        let entry = Arc::new(StubEntry {
            id: id.clone(),
            remaining_uses: AtomicI64::new(definition.remaining_uses),
            registration_seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            template,
            matchers,
            definition,
            #[cfg(test)]
            contention: AtomicU32::new(0),
        });
        let key = (entry.definition.method.clone(), entry.template.shape());
        inner.index.entry(key).or_default().push(entry.clone());
        inner.by_id.insert(id.clone(), entry.clone());

        tracing::info!(
            stub_id = %id,
            method = %entry.definition.method,
            path = %entry.template,
            priority = entry.definition.priority,
            scenario = %entry.scenario(),
            "Registered stub"
        );
        Ok(id)
    }

    pub async fn remove(&self, id: &str) -> Result<Arc<StubEntry>, EngineError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .by_id
            .remove(id)
            .ok_or_else(|| EngineError::StubNotFound(id.to_string()))?;

        let key = (entry.definition.method.clone(), entry.template.shape());
        if let Some(bucket) = inner.index.get_mut(&key) {
            bucket.retain(|candidate| !Arc::ptr_eq(candidate, &entry));
            if bucket.is_empty() {
                inner.index.remove(&key);
            }
        }

        tracing::info!(stub_id = %id, method = %entry.definition.method, path = %entry.template, "Removed stub");
        Ok(entry)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<StubEntry>> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// Stubs accepted by `filter`, in registration order
    pub async fn list(&self, filter: &ListFilter) -> Vec<Arc<StubEntry>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<_> = inner
            .by_id
            .values()
            .filter(|entry| filter.accepts(entry))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.registration_seq);
        entries
    }

    /// Stubs whose bucket could match `method` + `path`.
    ///
    /// Visits the exact bucket for the path's segment count and every
    /// wildcard bucket with fewer fixed segments. Templates still have to be
    /// evaluated against the path.
    pub async fn candidates(&self, method: &str, path: &str) -> Vec<Arc<StubEntry>> {
        let method = method.to_ascii_uppercase();
        let segments = segment_count(path);
        let inner = self.inner.read().await;

        let exact = TemplateShape {
            segments,
            wildcard: false,
        };
        let wildcards = (0..segments).map(|n| TemplateShape {
            segments: n,
            wildcard: true,
        });

        std::iter::once(exact)
            .chain(wildcards)
            .filter_map(|shape| inner.index.get(&(method.clone(), shape)))
            .flatten()
            .cloned()
            .collect()
    }

    /// Drop every stub. Registration sequence numbers keep counting up.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        let count = inner.by_id.len();
        inner.by_id.clear();
        inner.index.clear();
        tracing::info!(count, "Cleared stub registry");
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn validate_response(response: &ResponseTemplate) -> Result<(), EngineError> {
    for (name, value) in &response.headers {
        check_template(&format!("header '{}'", name), value)?;
    }
    validate_body(&response.body, true)?;
    for action in &response.actions {
        actions::validate(action)?;
    }
    Ok(())
}

fn validate_body(body: &ResponseBody, top_level: bool) -> Result<(), EngineError> {
    match body {
        ResponseBody::Template { template } => check_template("body", template),
        ResponseBody::Sequence { name, steps } => {
            if !top_level {
                return Err(EngineError::validation(format!(
                    "sequence '{}' is nested inside another sequence",
                    name
                )));
            }
            if name.trim().is_empty() {
                return Err(EngineError::validation("sequence name must not be empty"));
            }
            if steps.is_empty() {
                return Err(EngineError::validation(format!("sequence '{}' has no steps", name)));
            }
            for step in steps {
                for (header, value) in &step.headers {
                    check_template(&format!("header '{}'", header), value)?;
                }
                validate_body(&step.body, false)?;
            }
            Ok(())
        }
        ResponseBody::Empty | ResponseBody::Static { .. } | ResponseBody::Schema { .. } => Ok(()),
    }
}

/// Reject template syntax errors at registration instead of on first render
fn check_template(what: &str, template: &str) -> Result<(), EngineError> {
    let mut tera = tera::Tera::default();
    tera.add_raw_template(what, template)
        .map(|_| ())
        .map_err(|e| EngineError::validation(format!("invalid template in {}: {}", what, e)))
}
