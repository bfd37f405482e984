use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{Constraint, DefaultValue, FieldRule, FieldType, SchemaDescriptor};
use crate::database::record::{FieldInput, Payload};
use crate::error::EntityError;
use crate::types::Operation;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email pattern compiles"));

impl SchemaDescriptor {
    /// Validate a full payload; missing optional fields take their defaults
    pub fn validate_create(&self, payload: &Payload) -> Result<Map<String, Value>, EntityError> {
        self.validate(payload, Operation::Create)
    }

    /// Validate only the fields present in the payload
    pub fn validate_update(&self, payload: &Payload) -> Result<Map<String, Value>, EntityError> {
        self.validate(payload, Operation::Update)
    }

    /// Normalize a payload into a storable row.
    ///
    /// Errors are collected per field. Messages never echo the rejected value.
    pub fn validate(&self, payload: &Payload, operation: Operation) -> Result<Map<String, Value>, EntityError> {
        let mut field_errors = BTreeMap::new();
        let mut row = Map::new();

        for name in payload.keys() {
            if !self.contains(name) {
                field_errors.insert(name.to_string(), "unknown field".to_string());
            }
        }

        for rule in self.fields() {
            match payload.get(&rule.name) {
                Some(FieldInput::Set(value)) => match check_value(rule, value) {
                    Ok(normalized) => {
                        row.insert(rule.name.clone(), normalized);
                    }
                    Err(reason) => {
                        field_errors.insert(rule.name.clone(), reason);
                    }
                },
                Some(FieldInput::Unset) | None if operation == Operation::Create => {
                    if rule.required {
                        field_errors.insert(rule.name.clone(), "field is required".to_string());
                    } else if let Some(value) = default_value(&rule.default) {
                        row.insert(rule.name.clone(), value);
                    }
                }
                _ => {}
            }
        }

        if !field_errors.is_empty() {
            return Err(EntityError::validation(
                format!("{} payload failed {} validation", self.name(), operation),
                field_errors,
            ));
        }
        Ok(row)
    }
}

fn default_value(default: &DefaultValue) -> Option<Value> {
    match default {
        DefaultValue::Unset => None,
        DefaultValue::Null => Some(Value::Null),
        DefaultValue::Value(v) => Some(v.clone()),
        DefaultValue::GeneratedUuid => Some(Value::String(Uuid::new_v4().to_string())),
    }
}

/// Check one value against its rule and return the normalized value
pub fn check_value(rule: &FieldRule, value: &Value) -> Result<Value, String> {
    if value.is_null() {
        return if rule.required {
            Err("field is required".to_string())
        } else {
            Ok(Value::Null)
        };
    }

    match rule.field_type {
        FieldType::String | FieldType::Email => {
            let raw = value.as_str().ok_or("expected a string")?;
            let text = if rule.constraints.contains(&Constraint::StripWhitespace) { raw.trim() } else { raw };
            check_text(&rule.constraints, text)?;
            if rule.field_type == FieldType::Email && !EMAIL.is_match(text) {
                return Err("expected an email address".to_string());
            }
            Ok(Value::String(text.to_string()))
        }
        FieldType::Integer => {
            let n = value.as_i64().ok_or("expected an integer")?;
            check_range(&rule.constraints, n as f64)?;
            Ok(Value::from(n))
        }
        FieldType::Float => {
            let n = value.as_f64().ok_or("expected a number")?;
            check_range(&rule.constraints, n)?;
            Ok(value.clone())
        }
        FieldType::Boolean => value.as_bool().map(Value::Bool).ok_or_else(|| "expected a boolean".to_string()),
        FieldType::Uuid => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(|id| Value::String(id.to_string()))
            .ok_or_else(|| "expected a UUID".to_string()),
        FieldType::DateTime => value
            .as_str()
            .and_then(parse_timestamp)
            .map(|ts| Value::String(ts.to_rfc3339()))
            .ok_or_else(|| "expected an RFC 3339 timestamp or YYYY-MM-DD date".to_string()),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn check_text(constraints: &[Constraint], text: &str) -> Result<(), String> {
    let len = text.chars().count();
    for constraint in constraints {
        match constraint {
            Constraint::MinLength(min) if len < *min => {
                return Err(format!("must be at least {} characters", min));
            }
            Constraint::MaxLength(max) if len > *max => {
                return Err(format!("must be at most {} characters", max));
            }
            Constraint::Pattern(pattern) if !pattern.is_match(text) => {
                return Err(format!("must match pattern {}", pattern.as_str()));
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_range(constraints: &[Constraint], n: f64) -> Result<(), String> {
    for constraint in constraints {
        match constraint {
            Constraint::Minimum(min) if n < *min => return Err(format!("must be at least {}", min)),
            Constraint::Maximum(max) if n > *max => return Err(format!("must be at most {}", max)),
            _ => {}
        }
    }
    Ok(())
}
