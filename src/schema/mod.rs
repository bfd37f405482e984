//! Validation schema descriptors and partial-schema derivation.
//!
//! A [`SchemaDescriptor`] is an ordered table of [`FieldRule`]s. Descriptors
//! are built once at startup (in code or from YAML) and never mutated after.

pub mod derive;
pub mod validate;

pub use derive::SchemaDeriver;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::EntityError;

/// Underlying value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Uuid,
    DateTime,
    Email,
}

impl FieldType {
    /// Postgres type used for parameter casts and DDL
    pub fn pg_type(&self) -> &'static str {
        match self {
            FieldType::String | FieldType::Email => "text",
            FieldType::Integer => "bigint",
            FieldType::Float => "double precision",
            FieldType::Boolean => "boolean",
            FieldType::Uuid => "uuid",
            FieldType::DateTime => "timestamptz",
        }
    }
}

/// A compiled regular expression that compares and serializes by its source
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, EntityError> {
        Regex::new(source)
            .map(Pattern)
            .map_err(|e| EntityError::configuration(format!("invalid pattern '{}': {}", source, e)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Regex::new(&source).map(Pattern).map_err(serde::de::Error::custom)
    }
}

/// Constraint applied to a present, non-null field value.
///
/// Written as a one-key map in YAML and JSON (`- max_length: 50`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    MinLength(usize),
    MaxLength(usize),
    Minimum(f64),
    Maximum(f64),
    Pattern(Pattern),
    /// Trim surrounding whitespace before the other constraints run
    StripWhitespace,
}

/// Value an optional field takes when omitted
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Leave the field out entirely (partial updates)
    #[default]
    Unset,
    Null,
    Value(Value),
    /// Fresh v4 UUID per created row
    GeneratedUuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub default: DefaultValue,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldRule {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            default: DefaultValue::Unset,
            constraints: vec![],
            unique: false,
            title: None,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType, default: DefaultValue) -> Self {
        Self {
            required: false,
            default,
            ..Self::required(name, field_type)
        }
    }

    /// Length bounds in characters, both inclusive
    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.constraints.push(Constraint::MinLength(min));
        self.constraints.push(Constraint::MaxLength(max));
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDescriptor {
    name: String,
    fields: Vec<FieldRule>,
}

impl SchemaDescriptor {
    /// Build a descriptor; field names must be unique
    pub fn new(name: impl Into<String>, fields: Vec<FieldRule>) -> Result<Self, EntityError> {
        let name = name.into();
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.is_empty() {
                return Err(EntityError::configuration(format!("schema '{}' has a field with no name", name)));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(EntityError::configuration(format!(
                    "schema '{}' declares field '{}' more than once",
                    name, field.name
                )));
            }
        }
        Ok(Self { name, fields })
    }

    pub fn from_yaml(source: &str) -> Result<Self, EntityError> {
        serde_yaml::from_str(source)
            .map_err(|e| EntityError::configuration(format!("invalid schema YAML: {}", e)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldRule] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldRule> {
        self.fields.iter().filter(|f| f.unique)
    }
}

impl<'de> Deserialize<'de> for SchemaDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            fields: Vec<FieldRule>,
        }
        let raw = Raw::deserialize(deserializer)?;
        SchemaDescriptor::new(raw.name, raw.fields).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_field_names_are_rejected() {
        let result = SchemaDescriptor::new(
            "Role",
            vec![
                FieldRule::required("role_name", FieldType::String),
                FieldRule::required("role_name", FieldType::String),
            ],
        );
        assert!(matches!(result, Err(EntityError::Configuration(_))));
    }

    #[test]
    fn loads_from_yaml() {
        let schema = SchemaDescriptor::from_yaml(
            r#"
name: Upload
fields:
  - name: unique_name
    type: string
    required: true
    unique: true
    constraints:
      - max_length: 50
  - name: file_size
    type: integer
    default: "null"
  - name: code
    type: string
    constraints:
      - pattern: "^[A-Z]{3}$"
"#,
        )
        .unwrap();

        assert_eq!(schema.name(), "Upload");
        let unique_name = schema.field("unique_name").unwrap();
        assert!(unique_name.required && unique_name.unique);
        assert_eq!(unique_name.constraints, vec![Constraint::MaxLength(50)]);
        assert_eq!(schema.field("file_size").unwrap().default, DefaultValue::Null);
        assert!(!schema.field("code").unwrap().required);
        let pattern = Pattern::new("^[A-Z]{3}$").unwrap();
        assert_eq!(schema.field("code").unwrap().constraints, vec![Constraint::Pattern(pattern)]);
    }

    #[test]
    fn value_defaults_and_bounds_load_from_yaml() {
        let schema = SchemaDescriptor::from_yaml(
            r#"
name: User
fields:
  - name: is_active
    type: boolean
    default:
      value: true
  - name: score
    type: float
    constraints:
      - minimum: 0
      - maximum: 10.5
      - strip_whitespace
"#,
        )
        .unwrap();

        assert_eq!(schema.field("is_active").unwrap().default, DefaultValue::Value(Value::Bool(true)));
        assert_eq!(
            schema.field("score").unwrap().constraints,
            vec![Constraint::Minimum(0.0), Constraint::Maximum(10.5), Constraint::StripWhitespace]
        );

        let yaml = serde_yaml::to_string(&schema).unwrap();
        assert!(yaml.contains("max") && !yaml.contains('!'));
        assert_eq!(SchemaDescriptor::from_yaml(&yaml).unwrap(), schema);
    }

    #[test]
    fn invalid_yaml_pattern_is_a_configuration_error() {
        let result = SchemaDescriptor::from_yaml(
            r#"
name: Broken
fields:
  - name: code
    type: string
    constraints:
      - pattern: "(["
"#,
        );
        assert!(matches!(result, Err(EntityError::Configuration(_))));
    }
}
