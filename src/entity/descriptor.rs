use serde::{Deserialize, Serialize};

use crate::schema::SchemaDescriptor;

/// Which side of a relationship stores the foreign key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FkOwner {
    /// The entity declaring the relationship holds the column (belongs-to)
    Source,
    /// The related entity holds a column pointing back (has-one / has-many)
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// A named, navigable link from one entity to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    pub name: String,
    pub target: String,
    pub foreign_key: String,
    pub owner: FkOwner,
    pub cardinality: Cardinality,
}

impl RelationshipSpec {
    /// The target holds `foreign_key` pointing at our primary key; at most one match
    pub fn has_one(name: impl Into<String>, target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            owner: FkOwner::Target,
            cardinality: Cardinality::One,
        }
    }

    pub fn has_many(name: impl Into<String>, target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::has_one(name, target, foreign_key)
        }
    }

    /// We hold `foreign_key` pointing at the target's primary key
    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            owner: FkOwner::Source,
            ..Self::has_one(name, target, foreign_key)
        }
    }
}

/// Static description of a persisted entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    #[serde(default = "default_primary_key")]
    primary_key: String,
    schema: SchemaDescriptor,
    #[serde(default)]
    relationships: Vec<RelationshipSpec>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, table: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: default_primary_key(),
            schema,
            relationships: vec![],
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipSpec) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn relationships(&self) -> &[RelationshipSpec] {
        &self.relationships
    }

    pub fn find_relationship(&self, name: &str) -> Option<&RelationshipSpec> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Columns with a uniqueness guarantee, primary key first
    pub fn unique_columns(&self) -> Vec<String> {
        let mut columns = vec![self.primary_key.clone()];
        columns.extend(
            self.schema
                .unique_fields()
                .map(|f| f.name.clone())
                .filter(|name| *name != self.primary_key),
        );
        columns
    }
}
