use crate::adapters::actions;
use crate::adapters::data_generator::DataGenerator;
use crate::adapters::request_matcher::MatchResult;
use crate::adapters::scenario_store::{ScenarioState, ScenarioStore};
use crate::domain::stub::ResponseBody;
use crate::domain::{EngineError, MockResponse, RefResolver, RequestDescriptor};
use serde_json::Value;
use std::collections::BTreeMap;
use tera::{Context, Tera};

/// Turns a matched stub into a concrete response.
///
/// Sequence advancement, body rendering and actions run as a single scenario
/// mutation: if any step fails, the scenario state is left untouched.
#[derive(Debug, Clone, Default)]
pub struct ResponseSynthesizer {
    generator: DataGenerator,
}

impl ResponseSynthesizer {
    pub fn new(generator: DataGenerator) -> Self {
        Self { generator }
    }

    pub async fn render(
        &self,
        matched: &MatchResult,
        request: &RequestDescriptor,
        store: &ScenarioStore,
        scenario: &str,
        resolver: &dyn RefResolver,
    ) -> Result<MockResponse, EngineError> {
        let context = request_context(request, &matched.path_params);
        let (_, response) = store
            .try_apply(scenario, |state| self.render_into(matched, &context, state, resolver))
            .await?;
        Ok(response)
    }

    fn render_into(
        &self,
        matched: &MatchResult,
        base: &Context,
        state: &mut ScenarioState,
        resolver: &dyn RefResolver,
    ) -> Result<MockResponse, EngineError> {
        let template = &matched.stub.definition.response;

        let (status, header_templates, body_spec) = match &template.body {
            ResponseBody::Sequence { name, steps } => {
                let repeats: Vec<u32> = steps.iter().map(|step| step.repeat).collect();
                let served = state.advance_sequence(name, &repeats);
                let step = steps.get(served).ok_or_else(|| {
                    EngineError::Render(format!("sequence '{}' has no step {}", name, served))
                })?;
                let mut headers = template.headers.clone();
                headers.extend(step.headers.clone());
                (step.status.unwrap_or(template.status), headers, &step.body)
            }
            body => (template.status, template.headers.clone(), body),
        };

        let mut context = base.clone();
        context.insert("state", &state.data);

        let mut body = self.render_body(body_spec, &context, resolver)?;

        let mut headers = BTreeMap::new();
        for (name, value) in &header_templates {
            headers.insert(name.clone(), Tera::one_off(value, &context, false)?);
        }

        for action in &template.actions {
            actions::apply(action, &mut state.data, &mut body, &context)?;
        }

        Ok(MockResponse {
            status,
            headers,
            body,
            stub_id: Some(matched.stub.id.clone()),
            contract_report: None,
        })
    }

    fn render_body(&self, body: &ResponseBody, context: &Context, resolver: &dyn RefResolver) -> Result<Value, EngineError> {
        match body {
            ResponseBody::Empty => Ok(Value::Null),
            ResponseBody::Static { content } => Ok(content.clone()),
            ResponseBody::Template { template } => actions::render_template(template, context),
            ResponseBody::Schema { schema } => Ok(self.generator.generate(schema, resolver)?),
            ResponseBody::Sequence { name, .. } => Err(EngineError::Render(format!(
                "sequence '{}' cannot be nested inside another sequence",
                name
            ))),
        }
    }
}

/// Template context for a request: `request`, `method`, `path` (bound
/// parameters), `query`, `headers` and `body`
pub fn request_context(request: &RequestDescriptor, path_params: &BTreeMap<String, String>) -> Context {
    let view = request.template_view();
    let mut context = Context::new();
    context.insert("method", &request.method);
    context.insert("path", path_params);
    context.insert("query", &request.query);
    context.insert("headers", &request.headers);
    context.insert("body", &view["body"]);
    context.insert("request", &view);
    context
}
