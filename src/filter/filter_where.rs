use serde_json::{Map, Value};

use super::error::FilterError;
use super::types::{ColumnCasts, FilterOp, FilterWhereInfo};

pub struct FilterWhere<'a> {
    param_values: Vec<Value>,
    param_index: usize,
    casts: &'a ColumnCasts,
}

impl<'a> FilterWhere<'a> {
    pub fn new(starting_param_index: usize, casts: &'a ColumnCasts) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
            casts,
        }
    }

    /// Parse `{ "col": value }` / `{ "col": { "$in": [..] } }` into conditions
    pub fn parse(where_data: &Value) -> Result<Vec<FilterWhereInfo>, FilterError> {
        match where_data {
            Value::Null => Ok(vec![]),
            Value::Object(obj) => {
                let mut conditions = Vec::new();
                for (key, value) in obj {
                    if key.starts_with('$') {
                        return Err(FilterError::UnsupportedOperator(key.clone()));
                    }
                    Self::validate_column(key)?;
                    Self::parse_field_condition(key, value, &mut conditions)?;
                }
                Ok(conditions)
            }
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn parse_field_condition(
        field: &str,
        value: &Value,
        out: &mut Vec<FilterWhereInfo>,
    ) -> Result<(), FilterError> {
        match value {
            Value::Object(obj) if obj.keys().all(|k| k.starts_with('$')) && !obj.is_empty() => {
                for (op_key, op_val) in obj {
                    let operator = Self::map_operator(op_key)?;
                    if operator == FilterOp::In && !op_val.is_array() {
                        return Err(FilterError::InvalidOperatorData(format!("{} requires array", op_key)));
                    }
                    out.push(FilterWhereInfo { column: field.to_string(), operator, data: op_val.clone() });
                }
            }
            // Implicit equality: { field: value }
            _ => out.push(FilterWhereInfo { column: field.to_string(), operator: FilterOp::Eq, data: value.clone() }),
        }
        Ok(())
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        Ok(match op_key {
            "$eq" => FilterOp::Eq,
            "$in" => FilterOp::In,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    pub fn validate_column(column: &str) -> Result<(), FilterError> {
        let mut chars = column.chars();
        let valid_start = matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_');
        if !valid_start || !column.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(FilterError::InvalidColumn(format!("Invalid column name format: {}", column)));
        }
        Ok(())
    }

    /// Build the SQL predicate (without the `WHERE` keyword) and its parameters
    pub fn generate(mut self, conditions: &[FilterWhereInfo]) -> (String, Vec<Value>) {
        let sql_conditions: Vec<String> = conditions
            .iter()
            .map(|condition| self.build_sql_condition(condition))
            .collect();
        (sql_conditions.join(" AND "), self.param_values)
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> String {
        let quoted_column = format!("\"{}\"", condition.column);
        match condition.operator {
            FilterOp::Eq => {
                if condition.data.is_null() { format!("{} IS NULL", quoted_column) }
                else { format!("{} = {}", quoted_column, self.param(&condition.column, condition.data.clone())) }
            }
            FilterOp::In => {
                let values = condition.data.as_array().cloned().unwrap_or_default();
                if values.is_empty() {
                    return "1=0".to_string();
                }
                let params: Vec<String> = values.into_iter().map(|v| self.param(&condition.column, v)).collect();
                format!("{} IN ({})", quoted_column, params.join(", "))
            }
        }
    }

    fn param(&mut self, column: &str, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        match self.casts.get(column) {
            Some(cast) => format!("${}::{}", self.param_index, cast),
            None => format!("${}", self.param_index),
        }
    }

    /// Evaluate conditions against an in-memory row
    pub fn matches(conditions: &[FilterWhereInfo], row: &Map<String, Value>) -> bool {
        conditions.iter().all(|condition| {
            let current = row.get(&condition.column).unwrap_or(&Value::Null);
            match condition.operator {
                FilterOp::Eq => values_equal(current, &condition.data),
                FilterOp::In => condition
                    .data
                    .as_array()
                    .map(|values| values.iter().any(|v| !current.is_null() && values_equal(current, v)))
                    .unwrap_or(false),
            }
        })
    }
}

/// Equality that treats `1` and `1.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}
