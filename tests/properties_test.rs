use decoy::adapters::contract_validator::ContractValidator;
use decoy::adapters::formats::KNOWN_FORMATS;
use decoy::adapters::relational::{Cardinality, RelationalDataGenerator, RelationshipSpec};
use decoy::adapters::request_matcher::{RequestMatcher, DEFAULT_CAS_MAX_RETRIES};
use decoy::adapters::scenario_store::ScenarioState;
use decoy::adapters::stub_registry::StubRegistry;
use decoy::domain::contract::{HeaderSpec, ResponseSpec};
use decoy::domain::{ContractEndpointSpec, RequestDescriptor, SchemaNode, SchemaRegistry, StubDefinition};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Patterns exercising escapes, assertions, classes and alternation
const PATTERNS: [&str; 7] = [
    r"^[a-z]+$",
    r"\bid-\d{3}\b",
    r"^\x41{2}[0-9]*$",
    r"(GET|POST)/v[12]",
    r"[^@\s]+@example\.com",
    r"^\u{42}[\x30-\x39]{2,}\z",
    r"\Aitem_\w+",
];

/// Open-ended patterns paired with length bounds no shorter than their minimum match
const STRETCHY_PATTERNS: [&str; 3] = [r"^[a-z]+$", r"\w+", r"^[A-Z]{2}\d*$"];

/// Known formats with length bounds every generated value can meet
const FORMAT_LENGTHS: [(&str, usize, usize); 7] = [
    ("uuid", 36, 36),
    ("date", 10, 10),
    ("datetime", 20, 20),
    ("email", 5, 80),
    ("name", 3, 60),
    ("password", 8, 30),
    ("url", 10, 120),
];

fn registry() -> SchemaRegistry {
    [
        (
            "Address".to_string(),
            SchemaNode::object()
                .with_property("zip", SchemaNode::string().with_pattern(r"^\d{5}$"), true)
                .with_property("city", SchemaNode::string().with_length(Some(2), Some(30)), false),
        ),
        ("Tag".to_string(), SchemaNode::string().with_enum(["new", "hot", "sale"])),
        (
            "Contact".to_string(),
            SchemaNode::object()
                .with_property("email", SchemaNode::string().with_format("email"), true)
                .with_property("address", SchemaNode::reference("Address"), true),
        ),
    ]
    .into_iter()
    .collect()
}

fn leaf_schema() -> impl Strategy<Value = SchemaNode> {
    prop_oneof![
        Just(SchemaNode::boolean()),
        (-1000i64..1000, 0i64..1000).prop_map(|(min, span)| {
            SchemaNode::integer(Some(min as f64), Some((min + span) as f64))
        }),
        (-100.0f64..100.0, 0.0f64..100.0).prop_map(|(min, span)| SchemaNode::number(Some(min), Some(min + span))),
        prop::sample::select(KNOWN_FORMATS.to_vec()).prop_map(|format| SchemaNode::string().with_format(format)),
        prop::collection::vec("[a-z]{1,8}", 1..5).prop_map(|values| SchemaNode::string().with_enum(values)),
        (0usize..10, 0usize..10).prop_map(|(min, span)| SchemaNode::string().with_length(Some(min), Some(min + span))),
        prop::sample::select(PATTERNS.to_vec()).prop_map(|pattern| SchemaNode::string().with_pattern(pattern)),
        (prop::sample::select(STRETCHY_PATTERNS.to_vec()), 2usize..12, 0usize..10).prop_map(|(pattern, min, span)| {
            SchemaNode::string()
                .with_pattern(pattern)
                .with_length(Some(min), Some(min + span))
        }),
        prop::sample::select(FORMAT_LENGTHS.to_vec()).prop_map(|(format, min, max)| {
            SchemaNode::string().with_format(format).with_length(Some(min), Some(max))
        }),
        prop::sample::select(vec!["Address", "Tag", "Contact"]).prop_map(|name| SchemaNode::reference(name)),
    ]
}

fn schema() -> impl Strategy<Value = SchemaNode> {
    leaf_schema().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            (inner.clone(), 0usize..3, 0usize..3).prop_map(|(items, min, span)| {
                SchemaNode::array(items).with_items_range(Some(min), Some(min + span))
            }),
            prop::collection::btree_map("[a-z]{1,6}", (inner, any::<bool>()), 0..4).prop_map(|fields| {
                fields
                    .into_iter()
                    .fold(SchemaNode::object(), |node, (name, (child, required))| {
                        node.with_property(name, child, required)
                    })
            }),
        ]
    })
}

fn cardinality() -> impl Strategy<Value = Cardinality> {
    prop_oneof![
        Just(Cardinality::OneToOne),
        Just(Cardinality::OneToMany),
        Just(Cardinality::ManyToOne),
    ]
}

fn ids(entities: &[Value]) -> BTreeSet<String> {
    entities
        .iter()
        .map(|entity| entity["id"].as_str().unwrap().to_string())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn higher_priority_always_wins(low in -50i32..50, gap in 1i32..50, low_first in any::<bool>()) {
        let high = low + gap;
        runtime().block_on(async {
            let registry = Arc::new(StubRegistry::new());
            let matcher = RequestMatcher::new(registry.clone(), DEFAULT_CAS_MAX_RETRIES);
            let stubs = [
                StubDefinition::new("GET", "/items/{id}").with_id("low").with_priority(low),
                StubDefinition::new("GET", "/items/{id}").with_id("high").with_priority(high),
            ];
            let order: Vec<_> = if low_first { stubs.into_iter().collect() } else { stubs.into_iter().rev().collect() };
            for stub in order {
                registry.register(stub).await.unwrap();
            }
            let result = matcher.match_request(&RequestDescriptor::new("GET", "/items/9"), "default").await.unwrap();
            assert_eq!(result.stub.id, "high");
        });
    }

    #[test]
    fn sequence_returns_to_start_after_full_cycle(repeats in prop::collection::vec(0u32..6, 1..5), cycles in 1usize..3) {
        let mut state = ScenarioState::new(Map::new());
        let total: u32 = repeats.iter().map(|r| (*r).max(1)).sum();
        let mut served = vec![0u32; repeats.len()];

        for _ in 0..(total as usize * cycles) {
            served[state.advance_sequence("s", &repeats)] += 1;
        }

        let cursor = state.cursor("s");
        prop_assert_eq!(cursor.step_index, 0);
        prop_assert_eq!(cursor.repeat_count_in_step, 0);
        for (step, count) in served.iter().enumerate() {
            prop_assert_eq!(*count, repeats[step].max(1) * cycles as u32);
        }
    }

    #[test]
    fn relationships_never_dangle(
        source_count in 0usize..12,
        target_count in 0usize..12,
        cardinality in cardinality(),
    ) {
        let mut schemas = BTreeMap::new();
        schemas.insert("user".to_string(), SchemaNode::object().with_property("active", SchemaNode::boolean(), true));
        schemas.insert("order".to_string(), SchemaNode::object());
        let counts = BTreeMap::from([("user".to_string(), source_count), ("order".to_string(), target_count)]);
        let relationship = RelationshipSpec::new("user", "link", "order", cardinality);

        let dataset = RelationalDataGenerator::default()
            .generate(&schemas, &counts, &[relationship.clone()], &SchemaRegistry::new())
            .unwrap();
        let users = ids(&dataset["user"]);
        let orders = ids(&dataset["order"]);

        match cardinality {
            Cardinality::OneToMany => {
                for user in &dataset["user"] {
                    for id in user["link"].as_array().unwrap() {
                        prop_assert!(orders.contains(id.as_str().unwrap()));
                    }
                }
            }
            Cardinality::OneToOne => {
                let mut seen = BTreeSet::new();
                for user in &dataset["user"] {
                    if let Some(id) = user["link"].as_str() {
                        prop_assert!(orders.contains(id));
                        prop_assert!(seen.insert(id.to_string()));
                    }
                }
            }
            Cardinality::ManyToOne => {
                let field = relationship.resolved_target_field();
                for order in &dataset["order"] {
                    match &order[field.as_str()] {
                        Value::String(id) => prop_assert!(users.contains(id)),
                        other => prop_assert!(other.is_null() && users.is_empty()),
                    }
                }
            }
        }
    }

    #[test]
    fn synthesized_responses_validate(
        body in schema(),
        status in prop::sample::select(vec![200u16, 201, 404]),
        header_pattern in prop::option::of(prop::sample::select(PATTERNS.to_vec())),
    ) {
        let mut response = ResponseSpec::with_body(body).with_header("x-plain", HeaderSpec::default());
        if let Some(pattern) = header_pattern {
            response = response.with_header(
                "x-request-id",
                HeaderSpec { required: true, pattern: Some(pattern.to_string()) },
            );
        }
        let spec = ContractEndpointSpec::new("GET", "/things/{id}").with_response(status, response);
        let validator = ContractValidator::default();
        let registry = registry();

        let response = validator.synthesize(&spec, status, &registry).unwrap();
        let report = validator.validate_response(&spec, status, &response.headers, &response.body, &registry);
        prop_assert!(report.valid, "violations: {:?} for {}", report.errors, response.body);
    }
}
