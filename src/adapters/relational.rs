//! Related entity sets with referential integrity.
//!
//! Generation runs in two passes. The first pass generates every entity and
//! allocates its id; the second wires relationships by drawing exclusively
//! from the id pools of the first pass, so a relationship field can never
//! point at an entity that does not exist, whatever the relationship graph
//! looks like (self references and cycles included).

use crate::adapters::data_generator::DataGenerator;
use crate::domain::{EngineError, RefResolver, SchemaError, SchemaNode};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Upper bound on the ids assigned per source entity in one-to-many relationships
pub const MAX_LINKS_PER_ENTITY: usize = 5;

/// Field receiving each entity's generated id
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSpec {
    pub source_entity_type: String,
    pub source_field: String,
    pub target_entity_type: String,
    pub cardinality: Cardinality,
    /// Field written on target entities by many-to-one relationships
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,
}

impl RelationshipSpec {
    pub fn new(
        source_entity_type: impl Into<String>,
        source_field: impl Into<String>,
        target_entity_type: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            source_entity_type: source_entity_type.into(),
            source_field: source_field.into(),
            target_entity_type: target_entity_type.into(),
            cardinality,
            target_field: None,
        }
    }

    pub fn with_target_field(mut self, field: impl Into<String>) -> Self {
        self.target_field = Some(field.into());
        self
    }

    /// Field written by a many-to-one relationship
    pub fn resolved_target_field(&self) -> String {
        self.target_field
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.source_entity_type))
    }
}

/// Generated entities per type, in id order
pub type Dataset = BTreeMap<String, Vec<Value>>;

/// `"{entity_type}_{index}"`, 1-based
pub fn entity_id(entity_type: &str, index: usize) -> String {
    format!("{}_{}", entity_type, index)
}

#[derive(Debug, Clone, Default)]
pub struct RelationalDataGenerator {
    generator: DataGenerator,
}

impl RelationalDataGenerator {
    pub fn new(generator: DataGenerator) -> Self {
        Self { generator }
    }

    pub fn generate(
        &self,
        entity_schemas: &BTreeMap<String, SchemaNode>,
        counts: &BTreeMap<String, usize>,
        relationships: &[RelationshipSpec],
        resolver: &dyn RefResolver,
    ) -> Result<Dataset, EngineError> {
        Self::check_inputs(entity_schemas, counts, relationships)?;

        // Pass 1: entities and their ids
        let mut dataset = Dataset::new();
        let mut pools: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for (entity_type, schema) in entity_schemas {
            let count = counts.get(entity_type).copied().unwrap_or(0);
            let mut entities = Vec::with_capacity(count);
            let mut ids = Vec::with_capacity(count);
            for index in 1..=count {
                let mut entity = self.generator.generate(schema, resolver)?;
                let object = entity.as_object_mut().ok_or_else(|| {
                    SchemaError::Validation(format!(
                        "entity schema '{}' must generate objects",
                        entity_type
                    ))
                })?;
                let id = Value::String(entity_id(entity_type, index));
                object.insert(ID_FIELD.to_string(), id.clone());
                ids.push(id);
                entities.push(entity);
            }
            tracing::debug!(entity_type = %entity_type, count, "Generated entities");
            dataset.insert(entity_type.clone(), entities);
            pools.insert(entity_type.clone(), ids);
        }

        // Pass 2: relationships, drawing ids from the pass-1 pools only
        let mut rng = rand::thread_rng();
        for relationship in relationships {
            match relationship.cardinality {
                Cardinality::OneToMany => {
                    let pool = &pools[&relationship.target_entity_type];
                    let entities = entities_mut(&mut dataset, &relationship.source_entity_type)?;
                    for entity in entities.iter_mut() {
                        let links: Vec<Value> = if pool.is_empty() {
                            Vec::new()
                        } else {
                            let size = rng.gen_range(1..=MAX_LINKS_PER_ENTITY.min(pool.len()));
                            pool.choose_multiple(&mut rng, size).cloned().collect()
                        };
                        set_field(entity, &relationship.source_field, Value::Array(links));
                    }
                }
                Cardinality::ManyToOne => {
                    let pool = &pools[&relationship.source_entity_type];
                    let field = relationship.resolved_target_field();
                    let entities = entities_mut(&mut dataset, &relationship.target_entity_type)?;
                    for entity in entities.iter_mut() {
                        let link = pool.choose(&mut rng).cloned().unwrap_or(Value::Null);
                        set_field(entity, &field, link);
                    }
                }
                Cardinality::OneToOne => {
                    let mut pool = pools[&relationship.target_entity_type].clone();
                    pool.shuffle(&mut rng);
                    let entities = entities_mut(&mut dataset, &relationship.source_entity_type)?;
                    for (idx, entity) in entities.iter_mut().enumerate() {
                        let link = pool.get(idx).cloned().unwrap_or(Value::Null);
                        set_field(entity, &relationship.source_field, link);
                    }
                }
            }
        }

        Ok(dataset)
    }

    fn check_inputs(
        entity_schemas: &BTreeMap<String, SchemaNode>,
        counts: &BTreeMap<String, usize>,
        relationships: &[RelationshipSpec],
    ) -> Result<(), EngineError> {
        if let Some(unknown) = counts.keys().find(|name| !entity_schemas.contains_key(*name)) {
            return Err(EngineError::validation(format!(
                "count given for unknown entity type '{}'",
                unknown
            )));
        }
        for relationship in relationships {
            for entity_type in [&relationship.source_entity_type, &relationship.target_entity_type] {
                if !entity_schemas.contains_key(entity_type) {
                    return Err(EngineError::validation(format!(
                        "relationship references unknown entity type '{}'",
                        entity_type
                    )));
                }
            }
            if relationship.source_field.is_empty() {
                return Err(EngineError::validation(format!(
                    "relationship {} -> {} has an empty source field",
                    relationship.source_entity_type, relationship.target_entity_type
                )));
            }
        }
        Ok(())
    }
}

fn entities_mut<'a>(dataset: &'a mut Dataset, entity_type: &str) -> Result<&'a mut Vec<Value>, EngineError> {
    dataset
        .get_mut(entity_type)
        .ok_or_else(|| EngineError::validation(format!("unknown entity type '{}'", entity_type)))
}

fn set_field(entity: &mut Value, field: &str, value: Value) {
    if let Some(object) = entity.as_object_mut() {
        object.insert(field.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SchemaRegistry;
    use std::collections::HashSet;

    fn schemas() -> BTreeMap<String, SchemaNode> {
        let mut schemas = BTreeMap::new();
        schemas.insert(
            "user".to_string(),
            SchemaNode::object().with_property("name", SchemaNode::string().with_format("name"), true),
        );
        schemas.insert(
            "order".to_string(),
            SchemaNode::object().with_property("total", SchemaNode::number(Some(1.0), Some(500.0)), true),
        );
        schemas
    }

    fn ids(dataset: &Dataset, entity_type: &str) -> HashSet<String> {
        dataset[entity_type]
            .iter()
            .map(|e| e[ID_FIELD].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_ids_are_sequential() {
        let counts = BTreeMap::from([("user".to_string(), 3)]);
        let dataset = RelationalDataGenerator::default()
            .generate(&schemas(), &counts, &[], &SchemaRegistry::new())
            .unwrap();
        let users: Vec<_> = dataset["user"].iter().map(|u| u["id"].clone()).collect();
        assert_eq!(users, vec!["user_1", "user_2", "user_3"]);
        assert!(dataset["order"].is_empty());
    }

    #[test]
    fn test_one_to_one_links_are_distinct() {
        let counts = BTreeMap::from([("user".to_string(), 4), ("order".to_string(), 3)]);
        let relationships = vec![RelationshipSpec::new("user", "order_id", "order", Cardinality::OneToOne)];
        let dataset = RelationalDataGenerator::default()
            .generate(&schemas(), &counts, &relationships, &SchemaRegistry::new())
            .unwrap();

        let orders = ids(&dataset, "order");
        let linked: Vec<_> = dataset["user"]
            .iter()
            .filter_map(|u| u["order_id"].as_str().map(str::to_string))
            .collect();
        assert_eq!(linked.len(), 3);
        assert_eq!(linked.iter().collect::<HashSet<_>>().len(), 3);
        assert!(linked.iter().all(|id| orders.contains(id)));
        assert_eq!(dataset["user"].iter().filter(|u| u["order_id"].is_null()).count(), 1);
    }

    #[test]
    fn test_many_to_one_writes_target_field() {
        let counts = BTreeMap::from([("user".to_string(), 2), ("order".to_string(), 6)]);
        let relationships = vec![RelationshipSpec::new("user", "orders", "order", Cardinality::ManyToOne)
            .with_target_field("owner_id")];
        let dataset = RelationalDataGenerator::default()
            .generate(&schemas(), &counts, &relationships, &SchemaRegistry::new())
            .unwrap();

        let users = ids(&dataset, "user");
        for order in &dataset["order"] {
            assert!(users.contains(order["owner_id"].as_str().unwrap()));
        }
    }

    #[test]
    fn test_empty_target_pool() {
        let counts = BTreeMap::from([("user".to_string(), 2)]);
        let relationships = vec![RelationshipSpec::new("user", "orders", "order", Cardinality::OneToMany)];
        let dataset = RelationalDataGenerator::default()
            .generate(&schemas(), &counts, &relationships, &SchemaRegistry::new())
            .unwrap();
        assert!(dataset["user"].iter().all(|u| u["orders"] == Value::Array(vec![])));
    }

    #[test]
    fn test_unknown_entity_type_rejected() {
        let relationships = vec![RelationshipSpec::new("user", "x", "invoice", Cardinality::OneToMany)];
        let err = RelationalDataGenerator::default()
            .generate(&schemas(), &BTreeMap::new(), &relationships, &SchemaRegistry::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let counts = BTreeMap::from([("invoice".to_string(), 1)]);
        assert!(RelationalDataGenerator::default()
            .generate(&schemas(), &counts, &[], &SchemaRegistry::new())
            .is_err());
    }

    #[test]
    fn test_non_object_entity_schema_rejected() {
        let mut schemas = schemas();
        schemas.insert("tag".to_string(), SchemaNode::string());
        let counts = BTreeMap::from([("tag".to_string(), 1)]);
        let err = RelationalDataGenerator::default()
            .generate(&schemas, &counts, &[], &SchemaRegistry::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Schema(SchemaError::Validation(_))));
    }
}
