use serde_json::{json, Map, Value};

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{ColumnCasts, FilterOrderInfo, FilterWhereInfo, SqlResult};

/// A table-scoped query: equality conditions, ordering and offset pagination.
///
/// The same filter renders to parameterized SQL for Postgres and evaluates
/// directly against in-memory rows.
#[derive(Debug, Clone)]
pub struct Filter {
    table_name: String,
    where_data: Vec<FilterWhereInfo>,
    order_data: Vec<FilterOrderInfo>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        Self::validate_table_name(&table_name)?;
        Ok(Self {
            table_name,
            where_data: vec![],
            order_data: vec![],
            limit: None,
            offset: None,
        })
    }

    /// Filter matching rows whose `column` equals `value`
    pub fn eq(table_name: &str, column: &str, value: Value) -> Result<Self, FilterError> {
        let mut filter = Self::new(table_name)?;
        filter.where_clause(json!({ column: value }))?;
        Ok(filter)
    }

    /// Filter matching rows whose `column` is one of `values`
    pub fn any_of(table_name: &str, column: &str, values: Vec<Value>) -> Result<Self, FilterError> {
        let mut filter = Self::new(table_name)?;
        filter.where_clause(json!({ column: { "$in": values } }))?;
        Ok(filter)
    }

    pub fn where_clause(&mut self, conditions: Value) -> Result<&mut Self, FilterError> {
        self.where_data = FilterWhere::parse(&conditions)?;
        Ok(self)
    }

    /// Sort by one column, `"column"` or `"column desc"`
    pub fn order(&mut self, order: &str) -> Result<&mut Self, FilterError> {
        self.order_data = FilterOrder::parse(order)?;
        Ok(self)
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn to_sql(&self, casts: &ColumnCasts) -> SqlResult {
        let (where_clause, params) = FilterWhere::new(0, casts).generate(&self.where_data);
        let order_clause = FilterOrder::generate(&self.order_data);
        let limit_clause = self.build_limit_clause();

        let query = [
            "SELECT *".to_string(),
            format!("FROM \"{}\"", self.table_name),
            if where_clause.is_empty() { String::new() } else { format!("WHERE {}", where_clause) },
            order_clause,
            limit_clause,
        ].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");

        SqlResult { query, params }
    }

    pub fn to_count_sql(&self, casts: &ColumnCasts) -> SqlResult {
        let (where_clause, params) = FilterWhere::new(0, casts).generate(&self.where_data);
        let query = if where_clause.is_empty() {
            format!("SELECT COUNT(*) as count FROM \"{}\"", self.table_name)
        } else {
            format!("SELECT COUNT(*) as count FROM \"{}\" WHERE {}", self.table_name, where_clause)
        };
        SqlResult { query, params }
    }

    /// Whether a single row satisfies the WHERE conditions
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        FilterWhere::matches(&self.where_data, row)
    }

    /// Apply conditions, ordering, offset and limit to rows kept in storage order
    pub fn evaluate<'r>(&self, rows: impl IntoIterator<Item = &'r Map<String, Value>>) -> Vec<Map<String, Value>> {
        let mut matched: Vec<&Map<String, Value>> = rows.into_iter().filter(|row| self.matches(row)).collect();
        if !self.order_data.is_empty() {
            // stable sort keeps storage order for ties
            matched.sort_by(|a, b| FilterOrder::compare_rows(&self.order_data, a, b));
        }
        let offset = self.offset.unwrap_or(0) as usize;
        let limit = self.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        matched.into_iter().skip(offset).take(limit).cloned().collect()
    }

    fn validate_table_name(name: &str) -> Result<(), FilterError> {
        if name.is_empty() { return Err(FilterError::InvalidTableName("Table name cannot be empty".to_string())); }
        let first = name.chars().next().unwrap_or('0');
        if !name.chars().all(|c| c.is_alphanumeric() || c == '_') || (!first.is_alphabetic() && first != '_') {
            return Err(FilterError::InvalidTableName(format!("Invalid table name format: {}", name)));
        }
        Ok(())
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}
