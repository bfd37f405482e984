use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::entity::EntityDescriptor;
use crate::error::EntityError;

/// A single field in a create/update payload.
///
/// `Unset` means "omitted"; `Set(Value::Null)` is an explicit clear.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldInput {
    #[default]
    Unset,
    Set(Value),
}

impl FieldInput {
    pub fn is_unset(&self) -> bool {
        matches!(self, FieldInput::Unset)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldInput::Set(value) => Some(value),
            FieldInput::Unset => None,
        }
    }
}

/// Field name -> input mapping handed to `create`/`update`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload(BTreeMap<String, FieldInput>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object; every present key becomes `Set`
    pub fn from_json(json: Value) -> Result<Self, EntityError> {
        match json {
            Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k, FieldInput::Set(v))).collect()),
            _ => Err(EntityError::invalid_field("payload", "expected a JSON object")),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), FieldInput::Set(value.into()));
        self
    }

    pub fn unset(&mut self, key: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), FieldInput::Unset);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldInput> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldInput> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldInput)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields that will actually be written
    pub fn set_count(&self) -> usize {
        self.0.values().filter(|v| !v.is_unset()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, FieldInput)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, FieldInput)>>(iter: I) -> Self {
        Payload(iter.into_iter().collect())
    }
}

/// Eagerly loaded relationship value attached to an entity
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl Related {
    pub fn to_json(&self) -> Value {
        match self {
            Related::One(Some(entity)) => entity.to_json(),
            Related::One(None) => Value::Null,
            Related::Many(entities) => Value::Array(entities.iter().map(Entity::to_json).collect()),
        }
    }
}

/// A persisted entity instance with its primary key split out
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    entity: String,
    primary_key: String,
    key: Uuid,
    fields: Map<String, Value>,
    related: BTreeMap<String, Related>,
}

impl Entity {
    /// Build from a stored row; the primary-key column must hold a UUID
    pub fn from_row(descriptor: &EntityDescriptor, mut row: Map<String, Value>) -> Result<Self, DatabaseError> {
        let pk = descriptor.primary_key();
        let key = row
            .remove(pk)
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                DatabaseError::QueryError(format!(
                    "row from '{}' has no valid primary key '{}'",
                    descriptor.table(),
                    pk
                ))
            })?;

        Ok(Self {
            entity: descriptor.name().to_string(),
            primary_key: pk.to_string(),
            key,
            fields: row,
            related: BTreeMap::new(),
        })
    }

    pub fn key(&self) -> Uuid {
        self.key
    }

    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    /// Get field value (the primary key is available through `key()`)
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related.get(name)
    }

    /// Joined one-to-one relation, `None` when absent or not joined
    pub fn one(&self, name: &str) -> Option<&Entity> {
        match self.related.get(name) {
            Some(Related::One(Some(entity))) => Some(entity),
            _ => None,
        }
    }

    /// Joined one-to-many relation, empty when not joined
    pub fn many(&self, name: &str) -> &[Entity] {
        match self.related.get(name) {
            Some(Related::Many(entities)) => entities,
            _ => &[],
        }
    }

    pub fn attach(&mut self, name: impl Into<String>, related: Related) -> &mut Self {
        self.related.insert(name.into(), related);
        self
    }

    pub fn is_joined(&self) -> bool {
        !self.related.is_empty()
    }

    /// Flat JSON object: primary key, fields, then nested relations
    pub fn to_json(&self) -> Value {
        let mut output = Map::new();
        output.insert(self.primary_key.clone(), Value::String(self.key.to_string()));
        for (k, v) in &self.fields {
            output.insert(k.clone(), v.clone());
        }
        for (name, related) in &self.related {
            output.insert(name.clone(), related.to_json());
        }
        Value::Object(output)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        entity.to_json()
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(key: {}, fields: {}, joined: {})",
            self.entity,
            self.key,
            self.fields.len(),
            self.related.len()
        )
    }
}
