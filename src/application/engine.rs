use crate::adapters::contract_validator::ContractValidator;
use crate::adapters::data_generator::DataGenerator;
use crate::adapters::metrics::MetricsCollector;
use crate::adapters::relational::{Dataset, RelationalDataGenerator, RelationshipSpec};
use crate::adapters::request_log::{RecordedRequest, RequestLog, RequestLogFilter};
use crate::adapters::request_matcher::{MatchResult, RequestMatcher};
use crate::adapters::response_synthesizer::ResponseSynthesizer;
use crate::adapters::scenario_store::{ScenarioState, ScenarioStore};
use crate::adapters::stub_registry::{ListFilter, StubRegistry};
use crate::config::{DatasetConfig, EngineSettings, ScenarioConfig, Settings};
use crate::domain::contract::{load_contract, ContractMap, EndpointKey};
use crate::domain::path::PathTemplate;
use crate::domain::{
    ContractDocument, ContractEndpointSpec, EngineError, MockPort, MockResponse, NearMiss, RequestDescriptor,
    SchemaError, SchemaNode, SchemaRegistry, StubDefinition, ValidationReport,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// The loaded contract: endpoint specs, their parsed templates and the schema registry
#[derive(Default)]
struct LoadedContract {
    endpoints: ContractMap,
    templates: Vec<(PathTemplate, EndpointKey)>,
    schemas: Arc<SchemaRegistry>,
}

impl LoadedContract {
    fn new(endpoints: ContractMap, schemas: SchemaRegistry) -> Self {
        let mut templates: Vec<(PathTemplate, EndpointKey)> = endpoints
            .keys()
            .filter_map(|key| PathTemplate::parse(&key.path).ok().map(|t| (t, key.clone())))
            .collect();
        templates.sort_by(|a, b| a.1.cmp(&b.1));
        Self {
            endpoints,
            templates,
            schemas: Arc::new(schemas),
        }
    }

    /// Exact template key first, then the first template matching a concrete path
    fn endpoint(&self, method: &str, path: &str) -> Option<&ContractEndpointSpec> {
        if let Some(spec) = self.endpoints.get(&EndpointKey::new(method, path)) {
            return Some(spec);
        }
        self.templates
            .iter()
            .filter(|(_, key)| key.method.eq_ignore_ascii_case(method))
            .find(|(template, _)| template.match_path(path).is_some())
            .and_then(|(_, key)| self.endpoints.get(key))
    }
}

/// Harness-facing facade: owns one of every component and runs the
/// match → render → check → log → delay flow for each request.
pub struct MockEngine {
    settings: EngineSettings,
    registry: Arc<StubRegistry>,
    matcher: RequestMatcher,
    scenarios: ScenarioStore,
    synthesizer: ResponseSynthesizer,
    generator: DataGenerator,
    relational: RelationalDataGenerator,
    validator: ContractValidator,
    request_log: RequestLog,
    contract: RwLock<LoadedContract>,
    active_scenario: RwLock<String>,
    configured_scenarios: Vec<ScenarioConfig>,
    datasets: Vec<DatasetConfig>,
    metrics: Arc<MetricsCollector>,
}

impl MockEngine {
    pub fn new(settings: EngineSettings) -> anyhow::Result<Self> {
        let registry = Arc::new(StubRegistry::new());
        let generator = DataGenerator::new(settings.max_ref_depth);
        Ok(Self {
            matcher: RequestMatcher::new(registry.clone(), settings.cas_max_retries),
            registry,
            scenarios: ScenarioStore::new(),
            synthesizer: ResponseSynthesizer::new(generator.clone()),
            relational: RelationalDataGenerator::new(generator.clone()),
            generator,
            validator: ContractValidator::new(settings.max_ref_depth),
            request_log: RequestLog::new(settings.request_log_capacity),
            contract: RwLock::new(LoadedContract::default()),
            active_scenario: RwLock::new(settings.default_scenario.clone()),
            configured_scenarios: Vec::new(),
            datasets: Vec::new(),
            metrics: Arc::new(MetricsCollector::new()?),
            settings,
        })
    }

    /// Build an engine preloaded with the configured contract, scenarios and stubs
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let mut engine = Self::new(settings.engine.clone())?;
        engine.configured_scenarios = settings.scenarios.clone();
        engine.datasets = settings.datasets.clone();

        if let Some(document) = &settings.contract {
            engine.load_contract(document.clone()).await?;
        }
        engine.define_configured_scenarios().await;
        for stub in &settings.stubs {
            engine.register_stub(stub.clone()).await?;
        }

        info!(
            stubs = settings.stubs.len(),
            scenarios = settings.scenarios.len(),
            datasets = settings.datasets.len(),
            "Engine initialized"
        );
        Ok(engine)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    // ---------------------------------------------------------------------
    // Stubs
    // ---------------------------------------------------------------------

    pub async fn register_stub(&self, definition: StubDefinition) -> Result<String, EngineError> {
        let scenario = definition.scenario.clone();
        let initial_state = definition.initial_state.clone();
        let id = self.registry.register(definition).await?;
        if let Some(state) = initial_state {
            if self.scenarios.define_if_absent(&scenario, state).await {
                debug!(stub_id = %id, scenario = %scenario, "Recorded scenario initial state");
            }
        }
        Ok(id)
    }

    pub async fn remove_stub(&self, id: &str) -> Result<(), EngineError> {
        self.registry.remove(id).await.map(|_| ())
    }

    /// Registered definition with its live `remaining_uses`
    pub async fn get_stub(&self, id: &str) -> Option<StubDefinition> {
        self.registry.get(id).await.map(|entry| {
            let mut definition = entry.definition.clone();
            definition.remaining_uses = entry.remaining_uses();
            definition
        })
    }

    /// Stubs in registration order, with live `remaining_uses`
    pub async fn list_stubs(&self, filter: &ListFilter) -> Vec<StubDefinition> {
        self.registry
            .list(filter)
            .await
            .into_iter()
            .map(|entry| {
                let mut definition = entry.definition.clone();
                definition.remaining_uses = entry.remaining_uses();
                definition
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Scenarios
    // ---------------------------------------------------------------------

    pub async fn set_active_scenario(&self, name: &str) -> Result<(), EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("scenario name must not be empty"));
        }
        let mut active = self.active_scenario.write().await;
        if *active != name {
            info!(from = %active, to = %name, "Switched active scenario");
            *active = name.to_string();
        }
        Ok(())
    }

    pub async fn active_scenario(&self) -> String {
        self.active_scenario.read().await.clone()
    }

    pub async fn define_scenario(&self, name: &str, initial_state: Map<String, Value>) {
        self.scenarios.define(name, initial_state).await;
    }

    pub async fn scenario_state(&self, name: &str) -> ScenarioState {
        self.scenarios.get_state(name).await
    }

    pub async fn reset_scenario(&self, name: &str) {
        self.scenarios.reset(name).await;
        info!(scenario = %name, "Reset scenario");
    }

    /// Drop every stub, scenario state and logged request, and return to the default scenario
    pub async fn reset_all(&self) {
        self.registry.clear().await;
        self.scenarios.clear().await;
        self.request_log.clear().await;
        *self.active_scenario.write().await = self.settings.default_scenario.clone();
        self.define_configured_scenarios().await;
        info!("Reset engine");
    }

    async fn define_configured_scenarios(&self) {
        for scenario in &self.configured_scenarios {
            self.scenarios
                .define(&scenario.name, scenario.initial_state.clone())
                .await;
        }
    }

    // ---------------------------------------------------------------------
    // Request log
    // ---------------------------------------------------------------------

    pub async fn query_request_log(&self, filter: &RequestLogFilter) -> Result<Vec<RecordedRequest>, EngineError> {
        self.request_log.query(filter).await
    }

    pub async fn count_requests(&self, filter: &RequestLogFilter) -> Result<usize, EngineError> {
        self.request_log.count(filter).await
    }

    // ---------------------------------------------------------------------
    // Contract
    // ---------------------------------------------------------------------

    /// Replace the loaded contract. Returns the number of endpoints.
    pub async fn load_contract(&self, document: ContractDocument) -> Result<usize, EngineError> {
        let (endpoints, schemas) = load_contract(document)?;
        let count = endpoints.len();
        info!(endpoints = count, schemas = schemas.len(), "Loaded contract");
        *self.contract.write().await = LoadedContract::new(endpoints, schemas);
        Ok(count)
    }

    pub async fn contract_endpoint(&self, method: &str, path: &str) -> Option<ContractEndpointSpec> {
        self.contract.read().await.endpoint(method, path).cloned()
    }

    pub async fn schema_names(&self) -> Vec<String> {
        self.contract.read().await.schemas.names()
    }

    pub async fn validate_response(
        &self,
        method: &str,
        path: &str,
        status: u16,
        headers: &BTreeMap<String, String>,
        body: &Value,
    ) -> Result<ValidationReport, EngineError> {
        let contract = self.contract.read().await;
        let spec = contract
            .endpoint(method, path)
            .ok_or_else(|| EngineError::validation(format!("no contract endpoint for {} {}", method, path)))?;
        let report = self
            .validator
            .validate_response(spec, status, headers, body, contract.schemas.as_ref());
        if !report.valid {
            self.metrics.contract_violations.inc_by(report.errors.len() as f64);
        }
        Ok(report)
    }

    pub async fn synthesize_contract(&self, method: &str, path: &str, status: u16) -> Result<MockResponse, EngineError> {
        let contract = self.contract.read().await;
        let spec = contract
            .endpoint(method, path)
            .ok_or_else(|| EngineError::validation(format!("no contract endpoint for {} {}", method, path)))?;
        self.validator
            .synthesize(spec, status, contract.schemas.as_ref())
            .inspect_err(|e| self.record_generation_error(e))
    }

    // ---------------------------------------------------------------------
    // Data generation
    // ---------------------------------------------------------------------

    /// Generate a value for a named contract schema
    pub async fn generate_from_schema(&self, name: &str) -> Result<Value, EngineError> {
        self.generate(&SchemaNode::reference(name)).await
    }

    pub async fn generate(&self, node: &SchemaNode) -> Result<Value, EngineError> {
        let schemas = self.contract.read().await.schemas.clone();
        self.generator
            .generate(node, schemas.as_ref())
            .map_err(EngineError::from)
            .inspect_err(|e| self.record_generation_error(e))
    }

    pub async fn generate_dataset(
        &self,
        entity_schemas: &BTreeMap<String, SchemaNode>,
        counts: &BTreeMap<String, usize>,
        relationships: &[RelationshipSpec],
    ) -> Result<Dataset, EngineError> {
        let schemas = self.contract.read().await.schemas.clone();
        self.relational
            .generate(entity_schemas, counts, relationships, schemas.as_ref())
            .inspect_err(|e| self.record_generation_error(e))
    }

    /// Generate a configured dataset by name
    pub async fn seed_dataset(&self, name: &str) -> Result<Dataset, EngineError> {
        let dataset = self
            .datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| EngineError::validation(format!("unknown dataset '{}'", name)))?;
        let dataset_result = self
            .generate_dataset(&dataset.schemas(), &dataset.counts(), &dataset.relationships)
            .await?;
        info!(
            dataset = %name,
            entities = dataset_result.values().map(Vec::len).sum::<usize>(),
            "Seeded dataset"
        );
        Ok(dataset_result)
    }

    fn record_generation_error(&self, error: &EngineError) {
        let kind = match error {
            EngineError::Schema(SchemaError::Cycle { .. }) => "cycle",
            EngineError::Schema(SchemaError::Validation(_)) => "schema",
            EngineError::Validation(_) => "validation",
            _ => "other",
        };
        self.metrics.generation_errors.with_label_values(&[kind]).inc();
        warn!(kind, error = %error, "Data generation failed");
    }

    // ---------------------------------------------------------------------
    // Request handling
    // ---------------------------------------------------------------------

    /// Match against the active scenario and consume one use, without rendering
    pub async fn match_request(&self, request: &RequestDescriptor) -> Result<MatchResult, EngineError> {
        let scenario = self.active_scenario().await;
        self.matcher.match_request(request, &scenario).await
    }

    /// Full request flow. An unmatched request is answered with a 404
    /// diagnostic listing the closest stubs.
    pub async fn handle(&self, request: RequestDescriptor) -> Result<MockResponse, EngineError> {
        let scenario = self.active_scenario().await;

        let matched = match self.matcher.match_request(&request, &scenario).await {
            Ok(matched) => matched,
            Err(EngineError::NotFound { method, path }) => {
                self.metrics.matches_total.with_label_values(&["not_found"]).inc();
                let closest = self
                    .matcher
                    .closest(&request, &scenario, self.settings.near_miss_limit)
                    .await;
                info!(method = %method, path = %path, scenario = %scenario, near_misses = closest.len(), "No stub matched");
                self.request_log.record(request, &scenario, None).await;
                return Ok(not_found_response(&method, &path, &scenario, closest));
            }
            Err(e) => {
                self.metrics.matches_total.with_label_values(&["error"]).inc();
                self.request_log.record(request, &scenario, None).await;
                return Err(e);
            }
        };

        let stub_id = matched.stub.id.clone();
        self.metrics.matches_total.with_label_values(&["matched"]).inc();
        self.metrics.stub_hits.with_label_values(&[stub_id.as_str()]).inc();

        let schemas = self.contract.read().await.schemas.clone();
        let timer = self.metrics.render_duration.start_timer();
        let rendered = self
            .synthesizer
            .render(&matched, &request, &self.scenarios, &scenario, schemas.as_ref())
            .await;
        timer.observe_duration();

        let mut response = match rendered {
            Ok(response) => response,
            Err(e) => {
                warn!(stub_id = %stub_id, error = %e, "Response rendering failed");
                self.request_log.record(request, &scenario, Some(stub_id)).await;
                return Err(e);
            }
        };

        if self.settings.validate_responses {
            response.contract_report = self.check_contract(&request, &response).await;
        }

        self.request_log.record(request, &scenario, Some(stub_id)).await;

        let delay = matched.stub.definition.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }

    async fn check_contract(&self, request: &RequestDescriptor, response: &MockResponse) -> Option<ValidationReport> {
        let contract = self.contract.read().await;
        let spec = contract.endpoint(&request.method, &request.path)?;
        let report = self.validator.validate_response(
            spec,
            response.status,
            &response.headers,
            &response.body,
            contract.schemas.as_ref(),
        );
        if !report.valid {
            self.metrics.contract_violations.inc_by(report.errors.len() as f64);
            warn!(
                method = %request.method,
                path = %request.path,
                status = response.status,
                violations = report.errors.len(),
                "Response drifted from contract"
            );
        }
        Some(report)
    }
}

fn not_found_response(method: &str, path: &str, scenario: &str, closest: Vec<NearMiss>) -> MockResponse {
    MockResponse::new(
        404,
        json!({
            "error": format!("No stub matched {} {}", method, path),
            "scenario": scenario,
            "closest": closest,
        }),
    )
}

#[async_trait]
impl MockPort for MockEngine {
    async fn handle(&self, request: RequestDescriptor) -> Result<MockResponse, EngineError> {
        MockEngine::handle(self, request).await
    }
}
