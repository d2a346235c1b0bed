use crate::domain::path::PathTemplate;
use crate::domain::{EngineError, RequestDescriptor};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;

pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// One request as the engine saw it
#[derive(Debug, Clone, Serialize)]
pub struct RecordedRequest {
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub scenario: String,
    /// Stub that answered, `None` when nothing matched
    pub stub_id: Option<String>,
    pub request: RequestDescriptor,
}

/// Narrows [`RequestLog::query`]; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct RequestLogFilter {
    pub method: Option<String>,
    pub path: Option<String>,
    /// Path template such as `/users/{id}`
    pub path_template: Option<String>,
    pub stub_id: Option<String>,
    pub scenario: Option<String>,
    /// Header that must be present (case-insensitive)
    pub header: Option<String>,
    pub matched: Option<bool>,
}

impl RequestLogFilter {
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn path_template(mut self, template: impl Into<String>) -> Self {
        self.path_template = Some(template.into());
        self
    }

    pub fn stub_id(mut self, stub_id: impl Into<String>) -> Self {
        self.stub_id = Some(stub_id.into());
        self
    }

    pub fn scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>) -> Self {
        self.header = Some(name.into());
        self
    }

    pub fn matched(mut self, matched: bool) -> Self {
        self.matched = Some(matched);
        self
    }
}

struct CompiledFilter<'a> {
    filter: &'a RequestLogFilter,
    template: Option<PathTemplate>,
}

impl<'a> CompiledFilter<'a> {
    fn new(filter: &'a RequestLogFilter) -> Result<Self, EngineError> {
        let template = filter
            .path_template
            .as_deref()
            .map(PathTemplate::parse)
            .transpose()
            .map_err(EngineError::Validation)?;
        Ok(Self { filter, template })
    }

    fn accepts(&self, recorded: &RecordedRequest) -> bool {
        let f = self.filter;
        let request = &recorded.request;
        f.method.as_ref().map_or(true, |m| request.method.eq_ignore_ascii_case(m))
            && f.path.as_ref().map_or(true, |p| request.path == *p)
            && self.template.as_ref().map_or(true, |t| t.match_path(&request.path).is_some())
            && f.stub_id.as_ref().map_or(true, |id| recorded.stub_id.as_ref() == Some(id))
            && f.scenario.as_ref().map_or(true, |s| recorded.scenario == *s)
            && f.header.as_ref().map_or(true, |h| request.header(h).is_some())
            && f.matched.map_or(true, |m| recorded.stub_id.is_some() == m)
    }
}

struct LogInner {
    entries: VecDeque<RecordedRequest>,
    next_sequence: u64,
}

/// Bounded in-memory journal of handled requests; oldest entries are evicted first
pub struct RequestLog {
    capacity: usize,
    inner: RwLock<LogInner>,
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(LogInner {
                entries: VecDeque::new(),
                next_sequence: 1,
            }),
        }
    }

    pub async fn record(&self, request: RequestDescriptor, scenario: &str, stub_id: Option<String>) -> u64 {
        let mut inner = self.inner.write().await;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        if self.capacity == 0 {
            return sequence;
        }
        while inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(RecordedRequest {
            sequence,
            received_at: Utc::now(),
            scenario: scenario.to_string(),
            stub_id,
            request,
        });
        sequence
    }

    pub async fn query(&self, filter: &RequestLogFilter) -> Result<Vec<RecordedRequest>, EngineError> {
        let compiled = CompiledFilter::new(filter)?;
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .filter(|recorded| compiled.accepts(recorded))
            .cloned()
            .collect())
    }

    pub async fn count(&self, filter: &RequestLogFilter) -> Result<usize, EngineError> {
        let compiled = CompiledFilter::new(filter)?;
        let inner = self.inner.read().await;
        Ok(inner.entries.iter().filter(|recorded| compiled.accepts(recorded)).count())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filters() {
        let log = RequestLog::new(10);
        log.record(
            RequestDescriptor::new("GET", "/users/1").with_header("Authorization", "x"),
            "default",
            Some("a".to_string()),
        )
        .await;
        log.record(RequestDescriptor::new("POST", "/users"), "checkout", None).await;
        log.record(RequestDescriptor::new("GET", "/users/2"), "default", Some("b".to_string()))
            .await;

        let count = |filter: RequestLogFilter| {
            let log = &log;
            async move { log.count(&filter).await.unwrap() }
        };
        assert_eq!(count(RequestLogFilter::default()).await, 3);
        assert_eq!(count(RequestLogFilter::default().method("get")).await, 2);
        assert_eq!(count(RequestLogFilter::default().path("/users")).await, 1);
        assert_eq!(count(RequestLogFilter::default().path_template("/users/{id}")).await, 2);
        assert_eq!(count(RequestLogFilter::default().stub_id("b")).await, 1);
        assert_eq!(count(RequestLogFilter::default().scenario("checkout")).await, 1);
        assert_eq!(count(RequestLogFilter::default().header("authorization")).await, 1);
        assert_eq!(count(RequestLogFilter::default().matched(false)).await, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let log = RequestLog::new(2);
        for i in 0..3 {
            log.record(RequestDescriptor::new("GET", format!("/{}", i)), "default", None)
                .await;
        }
        let entries = log.query(&RequestLogFilter::default()).await.unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_bad_template_filter_is_rejected() {
        let log = RequestLog::default();
        assert!(log.query(&RequestLogFilter::default().path_template("nope")).await.is_err());
    }
}
