use std::collections::BTreeSet;

use super::{DefaultValue, FieldRule, SchemaDescriptor};
use crate::error::EntityError;

/// Builds partial schemas from a base schema.
///
/// Derivation is a pure function of `(base, exclude)`: excluded fields are
/// dropped, every surviving field becomes optional with an `Unset` default,
/// and type, constraints and uniqueness are carried over untouched.
pub struct SchemaDeriver;

impl SchemaDeriver {
    /// Derive `"{base}Partial"` without the `exclude`d fields
    pub fn derive<I, S>(base: &SchemaDescriptor, exclude: I) -> Result<SchemaDescriptor, EntityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::derive_named(base, format!("{}Partial", base.name()), exclude)
    }

    pub fn derive_named<I, S>(
        base: &SchemaDescriptor,
        name: impl Into<String>,
        exclude: I,
    ) -> Result<SchemaDescriptor, EntityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let exclude: BTreeSet<String> = exclude.into_iter().map(|s| s.as_ref().to_string()).collect();

        let unknown: Vec<&str> = exclude
            .iter()
            .map(String::as_str)
            .filter(|field| !base.contains(field))
            .collect();
        if !unknown.is_empty() {
            return Err(EntityError::configuration(format!(
                "cannot exclude unknown field(s) {} from schema '{}'",
                unknown.join(", "),
                base.name()
            )));
        }

        let fields: Vec<FieldRule> = base
            .fields()
            .iter()
            .filter(|rule| !exclude.contains(&rule.name))
            .cloned()
            .map(|rule| FieldRule {
                required: false,
                default: DefaultValue::Unset,
                ..rule
            })
            .collect();

        let derived = SchemaDescriptor::new(name, fields)?;
        tracing::debug!(
            "Derived schema {} from {} ({} excluded, {} fields)",
            derived.name(),
            base.name(),
            exclude.len(),
            derived.fields().len()
        );
        Ok(derived)
    }
}
