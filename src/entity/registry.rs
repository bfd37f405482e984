use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::descriptor::{Cardinality, EntityDescriptor, FkOwner};
use crate::error::EntityError;
use crate::filter::ColumnCasts;

/// Read-only set of entity descriptors, built once at startup
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: BTreeMap<String, Arc<EntityDescriptor>>,
}

#[derive(Deserialize)]
struct RegistryFile {
    entities: Vec<EntityDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor; names and tables must be unique across the registry
    pub fn register(&mut self, descriptor: EntityDescriptor) -> Result<&mut Self, EntityError> {
        if self.entities.contains_key(descriptor.name()) {
            return Err(EntityError::configuration(format!(
                "entity '{}' is registered more than once",
                descriptor.name()
            )));
        }
        if self.entities.values().any(|d| d.table() == descriptor.table()) {
            return Err(EntityError::configuration(format!(
                "table '{}' is claimed by more than one entity",
                descriptor.table()
            )));
        }

        let mut names = HashSet::new();
        for relationship in descriptor.relationships() {
            if !names.insert(relationship.name.as_str()) || descriptor.schema().contains(&relationship.name) {
                return Err(EntityError::configuration(format!(
                    "relationship '{}' on '{}' clashes with another field or relationship",
                    relationship.name,
                    descriptor.name()
                )));
            }
        }

        debug!("Registered entity {} (table {})", descriptor.name(), descriptor.table());
        self.entities.insert(descriptor.name().to_string(), Arc::new(descriptor));
        Ok(self)
    }

    /// Load a registry from YAML (`entities: [...]`) and validate it
    pub fn from_yaml(source: &str) -> Result<Self, EntityError> {
        let file: RegistryFile = serde_yaml::from_str(source)
            .map_err(|e| EntityError::configuration(format!("invalid registry YAML: {}", e)))?;

        let mut registry = Self::new();
        for descriptor in file.entities {
            registry.register(descriptor)?;
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Check that every relationship points at a registered entity and that
    /// its foreign key is declared on the side that owns it
    pub fn validate(&self) -> Result<(), EntityError> {
        for source in self.entities.values() {
            for relationship in source.relationships() {
                let target = self.entities.get(&relationship.target).ok_or_else(|| {
                    EntityError::configuration(format!(
                        "relationship '{}.{}' targets unknown entity '{}'",
                        source.name(),
                        relationship.name,
                        relationship.target
                    ))
                })?;

                let owner = match relationship.owner {
                    FkOwner::Source => source,
                    FkOwner::Target => target,
                };
                if !owner.schema().contains(&relationship.foreign_key) {
                    return Err(EntityError::configuration(format!(
                        "foreign key '{}' of relationship '{}.{}' is not a field of '{}'",
                        relationship.foreign_key,
                        source.name(),
                        relationship.name,
                        owner.name()
                    )));
                }

                if relationship.owner == FkOwner::Source && relationship.cardinality == Cardinality::Many {
                    return Err(EntityError::configuration(format!(
                        "relationship '{}.{}' holds the foreign key and cannot be one-to-many",
                        source.name(),
                        relationship.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityDescriptor>> {
        self.entities.get(name).cloned()
    }

    /// Like `get`, but an unknown name is a configuration error
    pub fn descriptor(&self, name: &str) -> Result<Arc<EntityDescriptor>, EntityError> {
        self.get(name)
            .ok_or_else(|| EntityError::configuration(format!("unknown entity '{}'", name)))
    }

    pub fn by_table(&self, table: &str) -> Option<Arc<EntityDescriptor>> {
        self.entities.values().find(|d| d.table() == table).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Postgres casts for every column of `table`; primary keys are UUIDs
    pub fn column_casts(&self, table: &str) -> ColumnCasts {
        let mut casts = ColumnCasts::new();
        if let Some(descriptor) = self.by_table(table) {
            casts.insert(descriptor.primary_key().to_string(), "uuid".to_string());
            for field in descriptor.schema().fields() {
                casts.insert(field.name.clone(), field.field_type.pg_type().to_string());
            }
        }
        casts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::RelationshipSpec;
    use crate::schema::{Constraint, DefaultValue, FieldRule, FieldType, SchemaDescriptor};

    fn user() -> EntityDescriptor {
        let schema = SchemaDescriptor::new("User", vec![FieldRule::required("email", FieldType::Email)]).unwrap();
        EntityDescriptor::new("User", "users", schema)
            .with_relationship(RelationshipSpec::has_one("profile", "UserProfile", "user_id"))
    }

    fn profile(fk: &str) -> EntityDescriptor {
        let schema = SchemaDescriptor::new(
            "UserProfile",
            vec![FieldRule::optional(fk, FieldType::Uuid, DefaultValue::Null)],
        )
        .unwrap();
        EntityDescriptor::new("UserProfile", "user_profile", schema)
    }

    #[test]
    fn validates_relationship_targets_and_keys() {
        let mut registry = Registry::new();
        registry.register(user()).unwrap();
        assert!(matches!(registry.validate(), Err(EntityError::Configuration(_))));

        registry.register(profile("owner_id")).unwrap();
        let err = registry.validate().unwrap_err();
        assert!(err.to_string().contains("user_id"));

        let mut registry = Registry::new();
        registry.register(user()).unwrap();
        registry.register(profile("user_id")).unwrap();
        registry.validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_entities() {
        let mut registry = Registry::new();
        registry.register(user()).unwrap();
        assert!(registry.register(user()).is_err());
    }

    #[test]
    fn column_casts_include_primary_key() {
        let mut registry = Registry::new();
        registry.register(user()).unwrap();
        let casts = registry.column_casts("users");
        assert_eq!(casts.get("id").map(String::as_str), Some("uuid"));
        assert_eq!(casts.get("email").map(String::as_str), Some("text"));
        assert!(registry.column_casts("missing").is_empty());
    }

    #[test]
    fn loads_registry_from_yaml() {
        let registry = Registry::from_yaml(
            r#"
entities:
  - name: Tag
    table: tag
    schema:
      name: Tag
      fields:
        - name: label
          type: string
          required: true
          unique: true
          constraints:
            - strip_whitespace
            - min_length: 2
            - max_length: 40
  - name: Note
    table: note
    primary_key: note_id
    schema:
      name: Note
      fields:
        - name: tag_id
          type: uuid
    relationships:
      - name: tag
        target: Tag
        foreign_key: tag_id
        owner: source
        cardinality: one
"#,
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        let note = registry.descriptor("Note").unwrap();
        assert_eq!(note.primary_key(), "note_id");
        assert_eq!(note.find_relationship("tag").unwrap().owner, FkOwner::Source);
        let tag = registry.descriptor("Tag").unwrap();
        assert_eq!(tag.primary_key(), "id");
        assert_eq!(
            tag.schema().field("label").unwrap().constraints,
            vec![Constraint::StripWhitespace, Constraint::MinLength(2), Constraint::MaxLength(40)]
        );
        assert!(registry.descriptor("Nope").is_err());
    }
}
